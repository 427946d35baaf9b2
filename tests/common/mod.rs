//! Common test utilities for sqlrpc-exec integration tests.
//!
//! `ScriptedConnection` is an in-memory `ConnectionHandle` that decodes every
//! request written to it and answers from a queue of scripted replies. It records
//! requests, reconnects, redirects and session settings so tests can assert on
//! what the engine sent.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlrpc_exec::error::TransportError;
use sqlrpc_exec::transport::codec::{self, LENGTH_PREFIX_SIZE};
use sqlrpc_exec::transport::messages::{
    Confirmation, RequestEnvelope, ResponseEnvelope, ResponsePayload,
};
use sqlrpc_exec::transport::{ConnectionHandle, PsoSetting, SharedConnection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;

/// Bytes served per `read` call, to exercise partial reads.
const READ_CHUNK: usize = 7;

/// Scripted answer to one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this response
    Frame(ResponseEnvelope),
    /// Close the stream without answering
    Eof,
    /// Fail the read with an I/O error
    IoError,
    /// Fail the read with an I/O error once this much time has passed
    IoErrorAfter(Duration),
    /// Never answer
    Hang,
}

impl Reply {
    /// OK response carrying `payload`.
    pub fn ok(payload: ResponsePayload) -> Self {
        Reply::Frame(ResponseEnvelope::ok(payload))
    }

    pub fn with_confirmation(payload: ResponsePayload, confirmation: Confirmation) -> Self {
        Reply::Frame(ResponseEnvelope::ok(payload).with_confirmation(confirmation))
    }

    pub fn redirect(payload: ResponsePayload, host: &str, port: u16) -> Self {
        Reply::Frame(ResponseEnvelope::ok(payload).with_redirect(host, port))
    }
}

/// Observable state of a scripted connection.
#[derive(Debug, Default)]
pub struct Script {
    pub replies: VecDeque<Reply>,
    pub requests: Vec<RequestEnvelope>,
    pub reconnects: usize,
    pub redirects: Vec<(String, u16)>,
    pub schema: String,
    pub server_version: String,
    pub pso: Option<PsoSetting>,
    pub result_set_open: bool,
}

/// Shared view of a script for assertions.
#[derive(Debug, Clone)]
pub struct ScriptHandle(Arc<StdMutex<Script>>);

impl ScriptHandle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<RequestEnvelope> {
        self.lock().requests.clone()
    }

    pub fn reconnects(&self) -> usize {
        self.lock().reconnects
    }

    pub fn push(&self, reply: Reply) {
        self.lock().replies.push_back(reply);
    }
}

/// What the current stream will do on the next read.
#[derive(Debug, Default)]
enum ReadState {
    /// Serve the buffered bytes, then report end of stream
    #[default]
    Buffered,
    Failing,
    FailingAfter(Duration),
    Hanging,
}

pub struct ScriptedConnection {
    script: Arc<StdMutex<Script>>,
    written: Vec<u8>,
    readable: VecDeque<u8>,
    read_state: ReadState,
}

impl ScriptedConnection {
    /// Build a connection answering with `replies` in order.
    pub fn new(replies: Vec<Reply>) -> (SharedConnection, ScriptHandle) {
        Self::with_schema(replies, "public", "7.1.0")
    }

    pub fn with_schema(
        replies: Vec<Reply>,
        schema: &str,
        server_version: &str,
    ) -> (SharedConnection, ScriptHandle) {
        let script = Arc::new(StdMutex::new(Script {
            replies: replies.into(),
            schema: schema.to_string(),
            server_version: server_version.to_string(),
            ..Script::default()
        }));
        let conn = ScriptedConnection {
            script: Arc::clone(&script),
            written: Vec::new(),
            readable: VecDeque::new(),
            read_state: ReadState::Buffered,
        };
        let shared: SharedConnection = Arc::new(Mutex::new(conn));
        (shared, ScriptHandle(script))
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Decode complete request frames and queue their replies.
    fn process_written(&mut self) {
        loop {
            if self.written.len() < LENGTH_PREFIX_SIZE {
                return;
            }
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            prefix.copy_from_slice(&self.written[..LENGTH_PREFIX_SIZE]);
            let len = u32::from_be_bytes(prefix) as usize;
            if self.written.len() < LENGTH_PREFIX_SIZE + len {
                return;
            }
            let frame: Vec<u8> = self.written.drain(..LENGTH_PREFIX_SIZE + len).collect();
            let request = codec::decode_request(&frame[LENGTH_PREFIX_SIZE..]).unwrap();

            let reply = {
                let mut script = self.script();
                script.requests.push(request);
                script.replies.pop_front().unwrap_or(Reply::Eof)
            };
            match reply {
                Reply::Frame(response) => {
                    let bytes = codec::encode_response(&response).unwrap();
                    self.readable.extend(bytes.iter().copied());
                }
                Reply::Eof => self.read_state = ReadState::Buffered,
                Reply::IoError => self.read_state = ReadState::Failing,
                Reply::IoErrorAfter(delay) => self.read_state = ReadState::FailingAfter(delay),
                Reply::Hang => self.read_state = ReadState::Hanging,
            }
        }
    }

    fn reset_stream(&mut self) {
        self.written.clear();
        self.readable.clear();
        self.read_state = ReadState::Buffered;
    }
}

#[async_trait]
impl ConnectionHandle for ScriptedConnection {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.process_written();
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if let ReadState::FailingAfter(delay) = self.read_state {
            tokio::time::sleep(delay).await;
            self.read_state = ReadState::Failing;
        }
        match self.read_state {
            ReadState::Failing | ReadState::FailingAfter(_) => Err(TransportError::Io(
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer"),
            )),
            ReadState::Hanging => std::future::pending().await,
            ReadState::Buffered => {
                let n = READ_CHUNK.min(buf.len()).min(self.readable.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = self.readable.pop_front().unwrap_or_default();
                }
                Ok(n)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.reset_stream();
        let mut script = self.script();
        script.reconnects += 1;
        script.result_set_open = false;
        Ok(())
    }

    async fn redirect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.reset_stream();
        let mut script = self.script();
        script.redirects.push((host.to_string(), port));
        script.result_set_open = false;
        Ok(())
    }

    fn server_version(&self) -> String {
        self.script().server_version.clone()
    }

    fn schema(&self) -> String {
        self.script().schema.clone()
    }

    async fn set_schema(&mut self, schema: &str) -> Result<(), TransportError> {
        self.script().schema = schema.to_string();
        Ok(())
    }

    async fn set_pso(&mut self, setting: PsoSetting) -> Result<(), TransportError> {
        self.script().pso = Some(setting);
        Ok(())
    }

    fn has_open_result_set(&self) -> bool {
        self.script().result_set_open
    }

    fn set_result_set_open(&mut self, open: bool) {
        self.script().result_set_open = open;
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Install a test log writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
