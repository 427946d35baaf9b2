//! Statement execution.
//!
//! This module provides the statement execution engine: parameter substitution,
//! meta-command dispatch, failover, and cancellation and timeout coordination.
//!
//! # Overview
//!
//! The query module is organized into:
//! - `statement` - The `Statement` type and its protocol calls
//! - `substitution` - Positional parameters and their SQL literals
//! - `meta` - Meta-command recognition and statement classification
//! - `session` - Shared call state and cancel handles
//! - `deadline` - Client-side query timeouts
//! - `failover` - Reconnect-and-retry and redirects
//! - `results` - Cursors and in-memory row sets
//!
//! # Example
//!
//! ```no_run
//! use sqlrpc_exec::query::StatementBuilder;
//! use sqlrpc_exec::transport::{SharedConnection, TcpConnection};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params: sqlrpc_exec::ConnectionParams = "sqlrpc://localhost:4050/sales".parse()?;
//! let conn: SharedConnection = Arc::new(Mutex::new(TcpConnection::connect(&params).await?));
//!
//! let mut stmt = StatementBuilder::new(conn)
//!     .query_timeout_secs(30)
//!     .build();
//!
//! stmt.bind(0, 18i32);
//! let result_set = stmt.execute_query("SELECT * FROM users WHERE age > ?").await?;
//! println!("{:?}", result_set.cursor());
//! stmt.close_result_set().await?;
//! # Ok(())
//! # }
//! ```

mod deadline;
mod failover;
pub mod meta;
pub mod results;
pub mod session;
pub mod statement;
pub mod substitution;

// Re-export commonly used types
pub use meta::{MetaCommand, QualifiedName, StatementKind};
pub use results::{ColumnMap, Cursor, ExecuteOutcome, ResultSet, RowSet};
pub use session::{CallPhase, CancelDecision, CancelHandle, SessionShared};
pub use statement::{Statement, StatementBuilder};
pub use substitution::{substitute, Parameter};
