use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};

use crate::error::ConfigError;

/// Classification of a single probe.
///
/// `Closed` folds refusal and timeout together; `Blocked` is a local policy
/// decision and says nothing about the remote host.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortStatus {
    Open,
    Closed,
    Blocked,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortStatus::Open => "OPEN",
            PortStatus::Closed => "CLOSED",
            PortStatus::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// One classified outcome for a port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub status: PortStatus,
    pub observed_at: String,
}

impl PortResult {
    pub fn new(port: u16, status: PortStatus) -> Self {
        Self {
            port,
            status,
            observed_at: now_rfc3339(),
        }
    }
}

/// Input to a scan run. Captured at start and never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub target_address: String,
    pub start_port: u16,
    pub end_port: u16,
    pub timeout_ms: u64,
}

impl ScanConfig {
    pub fn new(
        target_address: impl Into<String>,
        start_port: u16,
        end_port: u16,
        timeout_ms: u64,
    ) -> Self {
        Self {
            target_address: target_address.into(),
            start_port,
            end_port,
            timeout_ms,
        }
    }

    /// Check the range, timeout and address; returns the parsed target on success.
    pub fn validate(&self) -> Result<IpAddr, ConfigError> {
        if self.start_port == 0 || self.end_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.start_port > self.end_port {
            return Err(ConfigError::InvalidRange {
                start: self.start_port,
                end: self.end_port,
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        self.target_address
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidAddress(self.target_address.clone()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Number of ports in the inclusive range.
    pub fn port_count(&self) -> u32 {
        (self.end_port as u32 + 1).saturating_sub(self.start_port as u32)
    }
}

/// Lifecycle of a run: `Idle -> Scanning -> {Completed | Stopped}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Completed,
    Stopped,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Stopped)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "IDLE",
            ScanState::Scanning => "SCANNING",
            ScanState::Completed => "COMPLETED",
            ScanState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Emitted once per finished batch, and once more with the terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanUpdate {
    pub state: ScanState,
    pub cursor_port: u16,
    pub progress_percent: f64,
    pub new_results: Vec<PortResult>,
}

/// Per-status counters over a result list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub open: u64,
    pub closed: u64,
    pub blocked: u64,
    pub open_ports: Vec<u16>,
}

impl ScanSummary {
    pub fn from_results(results: &[PortResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            summary.record(r);
        }
        summary
    }

    pub fn record(&mut self, result: &PortResult) {
        match result.status {
            PortStatus::Open => {
                self.open += 1;
                self.open_ports.push(result.port);
            }
            PortStatus::Closed => self.closed += 1,
            PortStatus::Blocked => self.blocked += 1,
        }
    }
}

/// Final outcome of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub config: ScanConfig,
    pub state: ScanState,
    pub cursor_port: u16,
    pub progress_percent: f64,
    pub results: Vec<PortResult>,
    pub summary: ScanSummary,
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
