//! Length-prefixed frame codec.
//!
//! A frame is a 4-byte big-endian body length followed by a bincode body. Requests
//! are written and flushed in one step; responses are read by looping partial reads
//! until the prefix and then the body are complete.

use crate::error::{ExecError, ServerWarning, TransportError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use super::messages::{
    Confirmation, RequestEnvelope, RequestType, ResponseEnvelope, ResponseStatus,
};
use super::protocol::ConnectionHandle;

/// Size of the frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest body accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Outcome of inspecting a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Warning(ServerWarning),
    Error {
        reason: String,
        sql_state: String,
        vendor_code: i32,
    },
    Invalid,
}

impl Classification {
    /// Apply the classification: OK is silent, WARNING is appended to `warnings`,
    /// ERROR and INVALID become errors.
    pub fn apply(self, warnings: &mut Vec<ServerWarning>) -> Result<(), ExecError> {
        match self {
            Classification::Ok => Ok(()),
            Classification::Warning(warning) => {
                tracing::warn!(%warning, "server warning");
                warnings.push(warning);
                Ok(())
            }
            Classification::Error {
                reason,
                sql_state,
                vendor_code,
            } => Err(ExecError::Server {
                reason,
                sql_state,
                vendor_code,
            }),
            Classification::Invalid => Err(ExecError::Protocol(
                "server returned an INVALID response type".to_string(),
            )),
        }
    }
}

/// Classify a confirmation sub-message.
pub fn classify(confirmation: &Confirmation) -> Classification {
    match confirmation.status {
        ResponseStatus::Ok => Classification::Ok,
        ResponseStatus::Warning => Classification::Warning(ServerWarning {
            reason: confirmation.reason.clone(),
            sql_state: confirmation.sql_state.clone(),
            vendor_code: confirmation.vendor_code,
        }),
        ResponseStatus::Error => Classification::Error {
            reason: confirmation.reason.clone(),
            sql_state: confirmation.sql_state.clone(),
            vendor_code: confirmation.vendor_code,
        },
        ResponseStatus::Invalid => Classification::Invalid,
    }
}

fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, ExecError> {
    let body = bincode::serialize(message)
        .map_err(|e| ExecError::Protocol(format!("failed to encode message: {}", e)))?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ExecError::Protocol(format!(
            "message of {} bytes exceeds the frame limit",
            body.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ExecError> {
    bincode::deserialize(body)
        .map_err(|e| ExecError::Protocol(format!("failed to decode message: {}", e)))
}

/// Encode a request into a complete frame.
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Bytes, ExecError> {
    envelope.validate().map_err(ExecError::Protocol)?;
    encode_frame(envelope)
}

/// Encode a response into a complete frame.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Bytes, ExecError> {
    encode_frame(envelope)
}

/// Decode a request body, rejecting a discriminator that does not match the payload.
pub fn decode_request(body: &[u8]) -> Result<RequestEnvelope, ExecError> {
    let envelope: RequestEnvelope = decode_body(body)?;
    envelope.validate().map_err(ExecError::Protocol)?;
    Ok(envelope)
}

/// Decode a response body that must answer `expected`.
pub fn decode_response(body: &[u8], expected: RequestType) -> Result<ResponseEnvelope, ExecError> {
    let envelope: ResponseEnvelope = decode_body(body)?;
    let actual = envelope.payload.request_type();
    if actual != expected {
        return Err(ExecError::Protocol(format!(
            "expected a {} response but received {}",
            expected, actual
        )));
    }
    Ok(envelope)
}

/// Write a frame and flush it.
pub async fn send(conn: &mut dyn ConnectionHandle, frame: &[u8]) -> Result<(), TransportError> {
    conn.write_all(frame).await?;
    conn.flush().await
}

/// Read one frame and return its body.
///
/// # Errors
///
/// `TransportError::UnexpectedEof` if the stream ends mid-frame, `ExecError::Protocol`
/// if the announced length exceeds [`MAX_FRAME_SIZE`].
pub async fn receive(conn: &mut dyn ConnectionHandle) -> Result<Bytes, ExecError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_full(conn, &mut prefix).await?;

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ExecError::Protocol(format!(
            "announced frame length {} exceeds the frame limit",
            length
        )));
    }

    let mut body = vec![0u8; length];
    read_full(conn, &mut body).await?;
    trace!(length, "frame received");
    Ok(Bytes::from(body))
}

async fn read_full(conn: &mut dyn ConnectionHandle, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = conn.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransportError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(())
}

/// Send a request and read back its response.
///
/// The confirmation is not inspected here.
pub async fn round_trip(
    conn: &mut dyn ConnectionHandle,
    envelope: &RequestEnvelope,
) -> Result<ResponseEnvelope, ExecError> {
    let frame = encode_request(envelope)?;
    debug!(
        request_type = %envelope.request_type,
        bytes = frame.len(),
        force = ?envelope.force,
        "sending request"
    );
    send(conn, &frame).await?;
    let body = receive(conn).await?;
    decode_response(&body, envelope.request_type)
}
