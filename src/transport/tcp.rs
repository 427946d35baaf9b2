//! TCP implementation of [`ConnectionHandle`].
//!
//! The stream is plain tokio TCP. Session-level settings (schema, PSO) are tracked
//! locally; authentication and handshakes are left to the server deployment.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::connection::ConnectionParams;
use crate::error::TransportError;

use super::protocol::{ConnectionHandle, PsoSetting};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    /// Stream dropped, waiting for reconnect
    Broken,
    Closed,
}

/// Connection to one database node over TCP.
pub struct TcpConnection {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    state: ConnectionState,
    schema: String,
    pso: PsoSetting,
    server_version: String,
    result_set_open: bool,
}

impl TcpConnection {
    /// Open a connection described by `params`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the node cannot be reached within the connect timeout.
    pub async fn connect(params: &ConnectionParams) -> Result<Self, TransportError> {
        let stream = open_stream(&params.host, params.port, params.connect_timeout).await?;
        Ok(Self {
            host: params.host.clone(),
            port: params.port,
            connect_timeout: params.connect_timeout,
            stream: Some(stream),
            state: ConnectionState::Connected,
            schema: params.schema.clone().unwrap_or_default(),
            pso: PsoSetting::default(),
            server_version: params.server_version.clone().unwrap_or_default(),
            result_set_open: false,
        })
    }

    /// Current target as `(host, port)`.
    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Current PSO setting.
    pub fn pso(&self) -> PsoSetting {
        self.pso
    }

    /// Shut the stream down. Further I/O fails with `NotConnected`.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        self.state = ConnectionState::Closed;
        self.result_set_open = false;
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Any I/O failure leaves the stream untrustworthy.
    fn mark_broken<T>(&mut self, result: std::io::Result<T>) -> Result<T, TransportError> {
        result.map_err(|e| {
            self.state = ConnectionState::Broken;
            TransportError::Io(e)
        })
    }
}

async fn open_stream(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| TransportError::ConnectionFailed {
            host: host.to_string(),
            port,
            message: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[async_trait]
impl ConnectionHandle for TcpConnection {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let result = self.stream_mut()?.write_all(buf).await;
        self.mark_broken(result)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let result = self.stream_mut()?.flush().await;
        self.mark_broken(result)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let result = self.stream_mut()?.read(buf).await;
        self.mark_broken(result)
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Err(TransportError::NotConnected);
        }

        // The old stream is dropped before dialing so nothing can reach it afterwards.
        self.stream = None;
        self.state = ConnectionState::Broken;
        self.result_set_open = false;

        info!(host = %self.host, port = self.port, "reconnecting");
        let stream = open_stream(&self.host, self.port, self.connect_timeout).await?;
        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn redirect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        info!(from = %self.host, to = %host, port, "redirecting connection");
        self.host = host.to_string();
        self.port = port;
        self.reconnect().await
    }

    fn server_version(&self) -> String {
        self.server_version.clone()
    }

    fn schema(&self) -> String {
        self.schema.clone()
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), TransportError> {
        debug!(schema, "schema changed");
        self.schema = schema.to_string();
        Ok(())
    }

    async fn set_pso(&mut self, setting: PsoSetting) -> Result<(), TransportError> {
        debug!(%setting, "pso changed");
        self.pso = setting;
        Ok(())
    }

    fn has_open_result_set(&self) -> bool {
        self.result_set_open
    }

    fn set_result_set_open(&mut self, open: bool) {
        self.result_set_open = open;
    }

    fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }
}
