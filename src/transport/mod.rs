//! Transport layer for the statement RPC protocol.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - The `ConnectionHandle` trait the engine drives
//! - `messages` - Request and response message types
//! - `codec` - Length-prefixed framing and confirmation classification
//! - `tcp` - tokio TCP implementation of `ConnectionHandle`

pub mod codec;
pub mod messages;
pub mod protocol;
pub mod tcp;

// Re-export commonly used types
pub use messages::{
    ExplainFormat, RequestEnvelope, RequestPayload, RequestType, ResponseEnvelope,
    ResponsePayload, SystemMetadataCall, SystemMetadataRequest,
};
pub use protocol::{ConnectionHandle, PsoSetting, SharedConnection};
pub use tcp::TcpConnection;
