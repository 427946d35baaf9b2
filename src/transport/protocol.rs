//! Connection abstraction consumed by the execution engine.
//!
//! This module defines the `ConnectionHandle` trait. The engine never owns a
//! connection; it borrows one through [`SharedConnection`] for each call and relies
//! on the handle to reconnect or redirect the underlying byte stream in place.

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Connection shared between a statement, its deadline task and its cancel handles.
pub type SharedConnection = Arc<Mutex<dyn ConnectionHandle>>;

/// Parallel-scan (PSO) session setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PsoSetting {
    On,
    #[default]
    Off,
    /// Enable above the given row threshold
    Threshold(i64),
}

impl fmt::Display for PsoSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsoSetting::On => write!(f, "ON"),
            PsoSetting::Off => write!(f, "OFF"),
            PsoSetting::Threshold(n) => write!(f, "{}", n),
        }
    }
}

/// Byte-stream connection to a database node.
///
/// Implementations must swap the underlying stream atomically on `reconnect` and
/// `redirect`: once either returns, no read or write may reach the previous stream.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Write the whole buffer to the current stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the stream is broken or absent.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Flush buffered output.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes.
    ///
    /// # Returns
    ///
    /// Number of bytes read; `0` means the peer closed the stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on I/O failure.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drop the current stream and establish a fresh one to the same target.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the new stream cannot be established.
    async fn reconnect(&mut self) -> Result<(), TransportError>;

    /// Switch the target to `host:port` and reconnect.
    ///
    /// # Arguments
    ///
    /// * `host` - New target host
    /// * `port` - New target port
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the new target cannot be reached.
    async fn redirect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Version string reported by the server, e.g. `"7.0.1"`.
    fn server_version(&self) -> String;

    /// Active schema used when a meta-command omits the qualifier.
    fn schema(&self) -> String;

    /// Change the active schema.
    async fn set_schema(&mut self, schema: &str) -> Result<(), TransportError>;

    /// Change the parallel-scan setting.
    async fn set_pso(&mut self, setting: PsoSetting) -> Result<(), TransportError>;

    /// Whether a result set produced on this connection is still open.
    fn has_open_result_set(&self) -> bool;

    /// Record whether a result set is open. At most one may be open at a time.
    fn set_result_set_open(&mut self, open: bool);

    /// Whether the connection has been closed by the application.
    fn is_closed(&self) -> bool;
}
