//! Error types for the scan engine.

use thiserror::Error;

/// Rejected scan configuration. Raised before any run state is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Start port is above end port.
    #[error("invalid port range {start}-{end} (start > end)")]
    InvalidRange { start: u16, end: u16 },

    /// Port 0 is not scannable.
    #[error("ports must be in 1..=65535")]
    ZeroPort,

    /// Per-port timeout must be positive.
    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    /// Target is not an IP literal.
    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    /// Batch width must be at least one.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
}
