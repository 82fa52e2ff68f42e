//! Single-port connection probes.
//!
//! A probe performs one connection attempt and reports a [`PortStatus`].
//! Expected network outcomes (refusal, reset, timeout) never surface as
//! errors; they fold into `CLOSED`.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

use crate::ports::PortPolicy;
use crate::types::PortStatus;

/// Capability to classify one port on one host.
#[async_trait]
pub trait PortProbe: Send + Sync + 'static {
    async fn probe(&self, addr: IpAddr, port: u16, timeout: Duration) -> PortStatus;
}

/// Plain TCP connect probe.
///
/// The stream (or the pending connect future, on timeout) is dropped before
/// returning, so the socket is released on every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProbe;

#[async_trait]
impl PortProbe for TcpConnectProbe {
    async fn probe(&self, addr: IpAddr, port: u16, timeout: Duration) -> PortStatus {
        let socket = SocketAddr::new(addr, port);
        match time::timeout(timeout, TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                PortStatus::Open
            }
            Ok(Err(e)) => {
                trace!(%socket, error = %e, "connect failed");
                PortStatus::Closed
            }
            Err(_) => {
                trace!(%socket, "connect timed out");
                PortStatus::Closed
            }
        }
    }
}

/// Wraps a probe with a [`PortPolicy`]. Disallowed ports short-circuit to
/// `BLOCKED` and the inner probe is never called for them.
#[derive(Debug, Clone)]
pub struct PolicyGuard<P> {
    policy: PortPolicy,
    inner: P,
}

impl<P: PortProbe> PolicyGuard<P> {
    pub fn new(policy: PortPolicy, inner: P) -> Self {
        Self { policy, inner }
    }

    pub fn policy(&self) -> &PortPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P: PortProbe> PortProbe for PolicyGuard<P> {
    async fn probe(&self, addr: IpAddr, port: u16, timeout: Duration) -> PortStatus {
        if self.policy.is_blocked(port) {
            return PortStatus::Blocked;
        }
        self.inner.probe(addr, port, timeout).await
    }
}

/// TCP connect probe behind the default unsafe-port policy.
pub fn default_probe() -> PolicyGuard<TcpConnectProbe> {
    PolicyGuard::new(PortPolicy::default(), TcpConnectProbe)
}
