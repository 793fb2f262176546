//! Error types for configuration loading and command delivery.
//!
//! Every delivery error is scoped to one target. Connection failures and
//! transmission failures are separate variants so callers can tell whether
//! any command reached the device.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while configuring or running a push.
#[derive(Error, Debug)]
pub enum PushError {
    /// The target address is not a valid `host:port` pair.
    #[error("invalid target address {0}")]
    InvalidAddress(String),

    /// The Telnet session could not be opened.
    ///
    /// Covers refused connections, unreachable networks and name resolution
    /// failures.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Writing one command of the batch failed.
    ///
    /// `sent` commands reached the session before the failure; the remaining
    /// ones were not attempted.
    #[error("could not write command {index} ({command:?}) to {addr} after {sent} sent: {source}")]
    Write {
        addr: String,
        index: usize,
        command: String,
        sent: usize,
        #[source]
        source: std::io::Error,
    },

    /// Writing one command of the batch did not complete in time.
    #[error("write of command {index} ({command:?}) to {addr} timed out after {timeout:?}, {sent} sent")]
    WriteTimeout {
        addr: String,
        index: usize,
        command: String,
        sent: usize,
        timeout: Duration,
    },

    /// The delivery task for a target panicked or was cancelled.
    #[error("delivery task for {addr} failed: {reason}")]
    Task { addr: String, reason: String },

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading a configuration or recording file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or recording document could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run recorder lock was poisoned.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl PushError {
    /// Number of commands that reached the target before this error.
    ///
    /// Zero for every error raised before the session was open.
    pub fn commands_sent(&self) -> usize {
        match self {
            PushError::Write { sent, .. } | PushError::WriteTimeout { sent, .. } => *sent,
            _ => 0,
        }
    }

    /// True when the session was never established.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            PushError::InvalidAddress(_)
                | PushError::Connect { .. }
                | PushError::ConnectTimeout { .. }
        )
    }
}
