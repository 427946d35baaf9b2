//! # sqlrpc-exec
//!
//! Client-side statement execution engine for a SQL server that speaks a
//! length-prefixed binary RPC protocol.
//!
//! A [`Statement`] drives one session over a shared [`ConnectionHandle`]. It
//! substitutes bound parameters into the SQL text, routes client-side
//! meta-commands such as `LIST TABLES` or `SET MAXROWS` to their protocol calls,
//! retries once over a fresh stream after a transport failure, follows server
//! redirects and enforces client-side query timeouts. A [`CancelHandle`] cancels
//! the running call from another task.
//!
//! ## Example
//!
//! ```no_run
//! # use sqlrpc_exec::*;
//! # use std::sync::Arc;
//! # use tokio::sync::Mutex;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params: ConnectionParams = "sqlrpc://localhost:4050/sales?query_timeout=60".parse()?;
//! let conn: SharedConnection = Arc::new(Mutex::new(TcpConnection::connect(&params).await?));
//!
//! let mut stmt = Statement::new(conn, params.statement.clone());
//! match stmt.execute("LIST TABLES").await? {
//!     ExecuteOutcome::ResultSet(rs) => println!("{:?}", rs.rows()),
//!     ExecuteOutcome::UpdateCount(n) => println!("{} rows", n),
//! }
//!
//! stmt.close().await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod connection;
pub mod error;
pub mod query;
pub mod transport;
pub mod types;

// Re-export public API
pub use connection::{ConnectionBuilder, ConnectionParams, StatementConfig};
pub use error::{ConfigError, ErrorKind, ExecError, ServerWarning, TransportError};
pub use query::{
    CancelDecision, CancelHandle, ExecuteOutcome, Parameter, ResultSet, RowSet, Statement,
    StatementBuilder,
};
pub use transport::{ConnectionHandle, ExplainFormat, PsoSetting, SharedConnection, TcpConnection};
pub use types::SqlDecimal;
