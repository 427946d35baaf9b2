//! Connection configuration.
//!
//! # Example
//!
//! ```
//! # use sqlrpc_exec::connection::{ConnectionBuilder, ConnectionParams};
//! # use std::str::FromStr;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Using ConnectionBuilder
//! let params = ConnectionBuilder::new()
//!     .host("localhost")
//!     .port(4050)
//!     .schema("sales")
//!     .query_timeout_secs(30)
//!     .build()?;
//! assert_eq!(params.statement.query_timeout_secs, 30);
//!
//! // Or parse from connection string
//! let params = ConnectionParams::from_str("sqlrpc://localhost:4050/sales?max_rows=100")?;
//! assert_eq!(params.statement.max_rows, 100);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod params;

pub use params::{ConnectionBuilder, ConnectionParams, StatementConfig};
