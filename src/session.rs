//! Remote-terminal sessions used to deliver command batches.
//!
//! The dispatcher only needs two capabilities from a remote terminal: open a
//! session to an address, and write lines to it. They are expressed as the
//! [`Connector`] and [`Session`] traits so the delivery logic can be driven
//! by the Telnet client in production and by in-memory doubles in tests.
//!
//! # Main Components
//!
//! - [`TelnetConnector`] / [`TelnetSession`] - plaintext Telnet over TCP
//! - [`DeliveryRecorder`] - timestamped record of what happened per target

use std::future::Future;

use crate::error::PushError;

pub use recording::{DeliveryEvent, DeliveryRecordEntry, DeliveryRecorder, RecordLevel};
pub use telnet::{TelnetConnector, TelnetSession, encode_line};

/// Opens sessions to targets.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Opens a session to `addr` (`host:port`).
    ///
    /// Must fail with [`PushError::InvalidAddress`] for malformed addresses
    /// and [`PushError::Connect`] when the peer cannot be reached.
    fn connect(&self, addr: &str) -> impl Future<Output = Result<Self::Session, PushError>> + Send;
}

/// An open remote-terminal session.
///
/// Dropping a session releases its resources; [`Session::close`] performs an
/// orderly teardown first.
pub trait Session: Send + 'static {
    /// Writes one line followed by CR+LF.
    fn write_line(&mut self, line: &str) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Closes the session.
    fn close(&mut self) -> impl Future<Output = std::io::Result<()>> + Send;
}

mod recording;
mod telnet;
