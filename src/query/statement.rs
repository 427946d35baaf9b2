//! SQL statement handling and execution.
//!
//! This module provides the `Statement` type. A statement owns one session on a
//! shared connection: it substitutes bound parameters, routes meta-commands to
//! their protocol calls, follows redirects, retries once on transport failure and
//! runs every call under the session's cancellation and timeout coordination.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::params::{StatementConfig, DEFAULT_FETCH_SIZE};
use crate::error::{ExecError, ServerWarning};
use crate::transport::codec;
use crate::transport::messages::{
    ExplainBody, ExplainFormat, RequestEnvelope, RequestPayload, ResponseEnvelope,
    ResponsePayload, SystemMetadataCall, SystemMetadataRequest, SystemMetadataResult,
};
use crate::transport::SharedConnection;

use super::deadline;
use super::failover::{self, ForceRouting, RedirectBudget};
use super::meta::{self, MetaCommand, QualifiedName, StatementKind};
use super::results::{Cursor, ExecuteOutcome, ResultSet, RowSet};
use super::session::{CancelDecision, CancelHandle, SessionShared};
use super::substitution::{self, Parameter};

/// Servers before this version return explain output as a structured plan.
const RENDERED_EXPLAIN_SINCE: [u64; 3] = [7, 0, 1];

/// Which result shape the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlMode {
    Any,
    Query,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExplainTarget {
    Sql,
    Plan,
}

/// One top-level statement call.
#[derive(Debug)]
enum Op {
    Sql { sql: String, mode: SqlMode },
    Explain {
        text: String,
        format: ExplainFormat,
        target: ExplainTarget,
    },
    ExecutePlan { plan: String, inline: bool },
    ListPlan,
    CancelQuery(String),
    KillQuery(String),
    ListAllQueries,
    Export(String),
    SystemMetadata(SystemMetadataRequest),
}

/// Result of a top-level call before it is narrowed for the public method.
#[derive(Debug)]
enum Reply {
    Outcome(ExecuteOutcome),
    Text(String),
    Names(Vec<String>),
    Metadata(SystemMetadataResult),
    Done,
}

impl Reply {
    fn mismatch(&self, expected: &str) -> ExecError {
        ExecError::InvalidState(format!("expected {} reply, got {:?}", expected, self))
    }

    fn into_outcome(self) -> Result<ExecuteOutcome, ExecError> {
        match self {
            Reply::Outcome(outcome) => Ok(outcome),
            other => Err(other.mismatch("outcome")),
        }
    }

    fn into_text(self) -> Result<String, ExecError> {
        match self {
            Reply::Text(text) => Ok(text),
            other => Err(other.mismatch("text")),
        }
    }

    fn into_names(self) -> Result<Vec<String>, ExecError> {
        match self {
            Reply::Names(names) => Ok(names),
            other => Err(other.mismatch("name list")),
        }
    }

    fn into_metadata(self) -> Result<SystemMetadataResult, ExecError> {
        match self {
            Reply::Metadata(result) => Ok(result),
            other => Err(other.mismatch("system metadata")),
        }
    }

    fn into_done(self) -> Result<(), ExecError> {
        match self {
            Reply::Done => Ok(()),
            other => Err(other.mismatch("empty")),
        }
    }
}

fn unexpected(payload: &ResponsePayload) -> ExecError {
    ExecError::Protocol(format!(
        "unexpected {} response payload",
        payload.request_type()
    ))
}

/// Whether a server of `version` only returns structured explain plans.
///
/// Unparseable or empty versions count as current servers.
fn is_legacy_explain(version: &str) -> bool {
    let mut parts = [0u64; 3];
    let mut parsed = false;
    for (slot, piece) in parts.iter_mut().zip(version.trim().split('.')) {
        let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
        match digits.parse() {
            Ok(n) => {
                *slot = n;
                parsed = true;
            }
            Err(_) => return false,
        }
    }
    parsed && parts < RENDERED_EXPLAIN_SINCE
}

/// Send one envelope over the shared connection.
async fn exchange(
    conn: &SharedConnection,
    envelope: &RequestEnvelope,
) -> Result<ResponseEnvelope, ExecError> {
    let mut guard = conn.lock().await;
    codec::round_trip(&mut *guard, envelope).await
}

/// SQL statement for query execution.
///
/// Calls take `&mut self`, so a statement runs one call at a time. Use
/// [`Statement::cancel_handle`] to cancel from another task.
pub struct Statement {
    /// Connection shared with cancel handles and deadline tasks
    conn: SharedConnection,
    /// Query id, cancel flag and call phase
    shared: Arc<SessionShared>,
    config: StatementConfig,
    routing: ForceRouting,
    /// Bound parameters (indexed by position)
    parameters: Vec<Parameter>,
    warnings: Vec<ServerWarning>,
    closed: bool,
}

impl Statement {
    /// Create a statement with the given settings.
    pub fn new(conn: SharedConnection, config: StatementConfig) -> Self {
        Self {
            conn,
            shared: Arc::new(SessionShared::new()),
            routing: ForceRouting::new(config.force),
            config,
            parameters: Vec::new(),
            warnings: Vec::new(),
            closed: false,
        }
    }

    pub fn builder(conn: SharedConnection) -> StatementBuilder {
        StatementBuilder::new(conn)
    }

    /// Connection this statement runs on.
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }

    pub fn config(&self) -> &StatementConfig {
        &self.config
    }

    pub fn query_timeout(&self) -> u64 {
        self.config.query_timeout_secs
    }

    /// Set the client-side query timeout in seconds. Zero disables it.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::InvalidArgument` for negative values.
    pub fn set_query_timeout(&mut self, secs: i64) -> Result<(), ExecError> {
        self.config.query_timeout_secs = u64::try_from(secs).map_err(|_| {
            ExecError::InvalidArgument(format!("query timeout must not be negative: {}", secs))
        })?;
        Ok(())
    }

    pub fn fetch_size(&self) -> u32 {
        self.config.fetch_size
    }

    /// Set the rows fetched per round trip. Zero restores the default.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::InvalidArgument` for negative or oversized values.
    pub fn set_fetch_size(&mut self, rows: i64) -> Result<(), ExecError> {
        let rows = u32::try_from(rows).map_err(|_| {
            ExecError::InvalidArgument(format!("invalid fetch size: {}", rows))
        })?;
        self.config.fetch_size = if rows == 0 { DEFAULT_FETCH_SIZE } else { rows };
        Ok(())
    }

    pub fn max_rows(&self) -> u32 {
        self.config.max_rows
    }

    /// Cap the rows returned by plain queries. Zero removes the cap.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::InvalidArgument` for negative or oversized values.
    pub fn set_max_rows(&mut self, rows: i64) -> Result<(), ExecError> {
        self.config.max_rows = u32::try_from(rows).map_err(|_| {
            ExecError::InvalidArgument(format!("invalid max rows: {}", rows))
        })?;
        Ok(())
    }

    /// Bind a parameter at the given index.
    ///
    /// Positions skipped over are bound to NULL.
    ///
    /// # Arguments
    /// * `index` - Parameter index (0-based)
    /// * `value` - Parameter value
    pub fn bind<T: Into<Parameter>>(&mut self, index: usize, value: T) {
        if index >= self.parameters.len() {
            self.parameters.resize(index + 1, Parameter::Null);
        }
        self.parameters[index] = value.into();
    }

    /// Replace all bound parameters.
    pub fn bind_all<I, T>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Parameter>,
    {
        self.parameters = values.into_iter().map(Into::into).collect();
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Warnings returned by the server since the last top-level call started.
    pub fn warnings(&self) -> &[ServerWarning] {
        &self.warnings
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Query id currently associated with this statement.
    pub fn query_id(&self) -> Option<String> {
        self.shared.query_id()
    }

    /// Handle that can cancel this statement from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.shared), Arc::clone(&self.conn))
    }

    /// Cancel the associated query. See [`CancelHandle::cancel`].
    pub async fn cancel(&self) -> CancelDecision {
        self.cancel_handle().cancel().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the statement and any result set it produced. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ExecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.parameters.clear();
        if let Some(query_id) = self.shared.dissociate() {
            debug!(query_id = %query_id, "closing result set with statement");
            self.conn.lock().await.set_result_set_open(false);
        }
        Ok(())
    }

    /// Mark the open result set as consumed so a new query can be issued.
    pub async fn close_result_set(&mut self) -> Result<(), ExecError> {
        self.ensure_open()?;
        self.conn.lock().await.set_result_set_open(false);
        self.shared.dissociate();
        Ok(())
    }

    /// Execute SQL text or a meta-command.
    ///
    /// # Returns
    ///
    /// A result set for query-shaped text and result-producing meta-commands,
    /// otherwise an update count.
    ///
    /// # Errors
    ///
    /// Returns `ExecError` if substitution, transport, the server, the deadline or
    /// a cancel ends the call.
    pub async fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome, ExecError> {
        self.run(Op::Sql {
            sql: sql.to_string(),
            mode: SqlMode::Any,
        })
        .await?
        .into_outcome()
    }

    /// Execute text that produces a result set.
    pub async fn execute_query(&mut self, sql: &str) -> Result<ResultSet, ExecError> {
        match self
            .run(Op::Sql {
                sql: sql.to_string(),
                mode: SqlMode::Query,
            })
            .await?
            .into_outcome()?
        {
            ExecuteOutcome::ResultSet(rs) => Ok(rs),
            ExecuteOutcome::UpdateCount(_) => Err(ExecError::InvalidState(
                "query produced an update count".to_string(),
            )),
        }
    }

    /// Execute text that produces an update count.
    pub async fn execute_update(&mut self, sql: &str) -> Result<i64, ExecError> {
        match self
            .run(Op::Sql {
                sql: sql.to_string(),
                mode: SqlMode::Update,
            })
            .await?
            .into_outcome()?
        {
            ExecuteOutcome::UpdateCount(n) => Ok(n),
            ExecuteOutcome::ResultSet(_) => Err(ExecError::InvalidState(
                "update produced a result set".to_string(),
            )),
        }
    }

    /// Explain `sql` and return the rendered plan.
    pub async fn explain(&mut self, sql: &str, format: ExplainFormat) -> Result<String, ExecError> {
        self.run(Op::Explain {
            text: sql.to_string(),
            format,
            target: ExplainTarget::Sql,
        })
        .await?
        .into_text()
    }

    /// Explain a stored or serialized plan.
    pub async fn explain_plan(
        &mut self,
        plan: &str,
        format: ExplainFormat,
    ) -> Result<String, ExecError> {
        self.run(Op::Explain {
            text: plan.to_string(),
            format,
            target: ExplainTarget::Plan,
        })
        .await?
        .into_text()
    }

    pub async fn execute_plan(&mut self, plan: &str) -> Result<ResultSet, ExecError> {
        self.run_plan(plan, false).await
    }

    /// Execute a plan given inline. The plan text is sent without substitution.
    pub async fn execute_inline_plan(&mut self, plan: &str) -> Result<ResultSet, ExecError> {
        self.run_plan(plan, true).await
    }

    async fn run_plan(&mut self, plan: &str, inline: bool) -> Result<ResultSet, ExecError> {
        match self
            .run(Op::ExecutePlan {
                plan: plan.to_string(),
                inline,
            })
            .await?
            .into_outcome()?
        {
            ExecuteOutcome::ResultSet(rs) => Ok(rs),
            ExecuteOutcome::UpdateCount(_) => Err(ExecError::InvalidState(
                "plan produced an update count".to_string(),
            )),
        }
    }

    /// Names of the plans stored on the server.
    pub async fn list_plan(&mut self) -> Result<Vec<String>, ExecError> {
        self.run(Op::ListPlan).await?.into_names()
    }

    /// Ask the server to cancel another query.
    pub async fn cancel_query(&mut self, query_id: &str) -> Result<(), ExecError> {
        self.run(Op::CancelQuery(query_id.to_string()))
            .await?
            .into_done()
    }

    /// Ask the server to kill another query.
    pub async fn kill_query(&mut self, query_id: &str) -> Result<(), ExecError> {
        self.run(Op::KillQuery(query_id.to_string()))
            .await?
            .into_done()
    }

    /// Queries running anywhere in the system.
    pub async fn list_all_queries(&mut self) -> Result<RowSet, ExecError> {
        match self.run(Op::ListAllQueries).await?.into_outcome()? {
            ExecuteOutcome::ResultSet(ResultSet::Rows(rows)) => Ok(rows),
            other => Err(ExecError::InvalidState(format!(
                "unexpected query listing: {:?}",
                other
            ))),
        }
    }

    /// DDL that recreates the exported table.
    pub async fn export_table(&mut self, statement: &str) -> Result<String, ExecError> {
        self.run(Op::Export(statement.to_string()))
            .await?
            .into_text()
    }

    pub async fn export_translation(&mut self, statement: &str) -> Result<String, ExecError> {
        self.run(Op::Export(statement.to_string()))
            .await?
            .into_text()
    }

    /// Integer-valued catalog call.
    pub async fn fetch_system_metadata_int(
        &mut self,
        request: SystemMetadataRequest,
    ) -> Result<i64, ExecError> {
        Ok(self.fetch_system_metadata(request).await?.int_val)
    }

    /// String-valued catalog call, e.g. the product version.
    pub async fn fetch_system_metadata_string(
        &mut self,
        request: SystemMetadataRequest,
    ) -> Result<String, ExecError> {
        Ok(self.fetch_system_metadata(request).await?.string_val)
    }

    /// Row-valued catalog call. A missing row set is returned as empty.
    pub async fn fetch_system_metadata_result_set(
        &mut self,
        request: SystemMetadataRequest,
    ) -> Result<RowSet, ExecError> {
        Ok(self
            .fetch_system_metadata(request)
            .await?
            .result_set
            .map(RowSet::from)
            .unwrap_or_default())
    }

    async fn fetch_system_metadata(
        &mut self,
        request: SystemMetadataRequest,
    ) -> Result<SystemMetadataResult, ExecError> {
        self.run(Op::SystemMetadata(request))
            .await?
            .into_metadata()
    }

    /// Run `call` under this statement's timeout and cancellation.
    ///
    /// Result consumers use this for fetches on the statement's cursor so that the
    /// query timeout and [`CancelHandle::cancel`] apply to them as well.
    pub async fn run_guarded<T, F>(&mut self, call: F) -> Result<T, ExecError>
    where
        F: Future<Output = Result<T, ExecError>>,
    {
        self.ensure_open()?;
        let result = deadline::run_guarded(
            &self.shared,
            &self.conn,
            self.config.query_timeout_secs,
            call,
        )
        .await;
        self.finish(result).await
    }

    fn ensure_open(&self) -> Result<(), ExecError> {
        if self.closed {
            Err(ExecError::Closed)
        } else {
            Ok(())
        }
    }

    async fn run(&mut self, op: Op) -> Result<Reply, ExecError> {
        self.begin().await?;
        debug!(?op, "statement call");

        let shared = Arc::clone(&self.shared);
        let conn = Arc::clone(&self.conn);
        let timeout_secs = self.config.query_timeout_secs;
        let result = deadline::run_guarded(&shared, &conn, timeout_secs, self.perform(op)).await;
        self.finish(result).await
    }

    /// Checks before a top-level call.
    async fn begin(&mut self) -> Result<(), ExecError> {
        self.ensure_open()?;
        self.warnings.clear();

        if self.shared.take_cancelled() {
            info!("statement was cancelled between calls");
            self.shared.dissociate();
            self.conn.lock().await.set_result_set_open(false);
            return Err(ExecError::Cancelled);
        }

        let conn = self.conn.lock().await;
        if conn.is_closed() {
            return Err(ExecError::InvalidState("connection is closed".to_string()));
        }
        if !conn.has_open_result_set() {
            if let Some(query_id) = self.shared.dissociate() {
                debug!(query_id = %query_id, "previous query finished");
            }
        }
        Ok(())
    }

    /// A cancel observed at any point of the call wins over its result.
    async fn finish<T>(&mut self, result: Result<T, ExecError>) -> Result<T, ExecError> {
        let flagged = self.shared.take_cancelled();
        if flagged || matches!(result, Err(ExecError::Cancelled)) {
            if let Some(query_id) = self.shared.dissociate() {
                info!(query_id = %query_id, "call cancelled");
            }
            self.conn.lock().await.set_result_set_open(false);
            return Err(ExecError::Cancelled);
        }
        result
    }

    async fn perform(&mut self, op: Op) -> Result<Reply, ExecError> {
        match op {
            Op::Sql { sql, mode } => self.perform_sql(&sql, mode).await.map(Reply::Outcome),
            Op::Explain {
                text,
                format,
                target,
            } => self.explain_text(&text, format, target).await.map(Reply::Text),
            Op::ExecutePlan { plan, inline } => self
                .open_plan(&plan, inline)
                .await
                .map(|rs| Reply::Outcome(ExecuteOutcome::ResultSet(rs))),
            Op::ListPlan => self.plan_names().await.map(Reply::Names),
            Op::CancelQuery(query_id) => {
                self.send_request(RequestPayload::CancelQuery, &query_id)
                    .await?;
                Ok(Reply::Done)
            }
            Op::KillQuery(query_id) => {
                self.send_request(RequestPayload::KillQuery, &query_id)
                    .await?;
                Ok(Reply::Done)
            }
            Op::ListAllQueries => self
                .system_queries()
                .await
                .map(|rows| Reply::Outcome(ExecuteOutcome::ResultSet(ResultSet::Rows(rows)))),
            Op::Export(statement) => self.export(&statement).await.map(Reply::Text),
            Op::SystemMetadata(request) => self.system_metadata(request).await.map(Reply::Metadata),
        }
    }

    async fn perform_sql(&mut self, sql: &str, mode: SqlMode) -> Result<ExecuteOutcome, ExecError> {
        let text = meta::strip_leading_comments(sql);
        if text.is_empty() {
            return Err(ExecError::InvalidArgument("empty statement".to_string()));
        }

        if let Some(command) = MetaCommand::parse(text)? {
            match mode {
                SqlMode::Query if !command.is_query() => {
                    return Err(ExecError::InvalidArgument(
                        "statement does not produce a result set".to_string(),
                    ))
                }
                SqlMode::Update if command.is_query() => {
                    return Err(ExecError::InvalidArgument(
                        "statement produces a result set".to_string(),
                    ))
                }
                _ => {}
            }
            return self.perform_meta(command).await;
        }

        let kind = match mode {
            SqlMode::Any => StatementKind::classify(text),
            SqlMode::Query => StatementKind::Query,
            SqlMode::Update => StatementKind::Update,
        };
        match kind {
            StatementKind::Query => self.open_query(text).await.map(ExecuteOutcome::ResultSet),
            StatementKind::Update => self.update(text).await.map(ExecuteOutcome::UpdateCount),
        }
    }

    async fn perform_meta(&mut self, command: MetaCommand) -> Result<ExecuteOutcome, ExecError> {
        debug!(?command, "dispatching meta-command");
        let rows = match command {
            MetaCommand::Explain { format, sql } => RowSet::single_column(
                "explain",
                [self.explain_text(&sql, format, ExplainTarget::Sql).await?],
            ),
            MetaCommand::ListTables { system, .. } => {
                let call = if system {
                    SystemMetadataCall::GetSystemTables
                } else {
                    SystemMetadataCall::GetTables
                };
                self.catalog(SystemMetadataRequest::new(call)).await?
            }
            MetaCommand::ListViews { .. } => {
                self.catalog(SystemMetadataRequest::new(SystemMetadataCall::GetViews))
                    .await?
            }
            MetaCommand::ListIndexes { table, .. } => {
                let schema = self.resolve_schema(&table).await;
                self.catalog(
                    SystemMetadataRequest::new(SystemMetadataCall::GetIndexInfo)
                        .with_schema(&schema)
                        .with_table(&table.name),
                )
                .await?
            }
            MetaCommand::DescribeTable { table, .. } => {
                let schema = self.resolve_schema(&table).await;
                self.catalog(
                    SystemMetadataRequest::new(SystemMetadataCall::GetColumns)
                        .with_schema(&schema)
                        .with_table(&table.name)
                        .with_column("%"),
                )
                .await?
            }
            MetaCommand::DescribeView { view, .. } => {
                let schema = self.resolve_schema(&view).await;
                self.catalog(
                    SystemMetadataRequest::new(SystemMetadataCall::GetViews)
                        .with_schema(&schema)
                        .with_view(&view.name),
                )
                .await?
            }
            MetaCommand::GetSchema => {
                let schema = self.conn.lock().await.schema();
                RowSet::single_column("schema", schema_lines(&schema))
            }
            MetaCommand::PlanExecute { inline, plan } => {
                return self
                    .open_plan(&plan, inline)
                    .await
                    .map(ExecuteOutcome::ResultSet)
            }
            MetaCommand::PlanExplain { format, plan } => RowSet::single_column(
                "explain",
                [self.explain_text(&plan, format, ExplainTarget::Plan).await?],
            ),
            MetaCommand::ListAllQueries => self.system_queries().await?,
            MetaCommand::ExportTable { statement } => {
                RowSet::single_column("export", [self.export(&statement).await?])
            }
            MetaCommand::ExportTranslation { statement } => {
                RowSet::single_column("translation", [self.export(&statement).await?])
            }
            MetaCommand::Kill { query_id } => {
                self.send_request(RequestPayload::KillQuery, &query_id)
                    .await?;
                return Ok(ExecuteOutcome::UpdateCount(0));
            }
            MetaCommand::Cancel { query_id } => {
                self.send_request(RequestPayload::CancelQuery, &query_id)
                    .await?;
                return Ok(ExecuteOutcome::UpdateCount(0));
            }
            MetaCommand::SetSchema { schema } => {
                info!(schema = %schema, "setting schema");
                self.conn.lock().await.set_schema(&schema).await?;
                return Ok(ExecuteOutcome::UpdateCount(0));
            }
            MetaCommand::SetMaxRows(rows) => {
                self.config.max_rows = rows;
                return Ok(ExecuteOutcome::UpdateCount(0));
            }
            MetaCommand::SetPso(setting) => {
                info!(%setting, "setting pso");
                self.conn.lock().await.set_pso(setting).await?;
                return Ok(ExecuteOutcome::UpdateCount(0));
            }
        };
        Ok(ExecuteOutcome::ResultSet(ResultSet::Rows(rows)))
    }

    async fn resolve_schema(&self, name: &QualifiedName) -> String {
        match &name.schema {
            Some(schema) => schema.clone(),
            None => self.conn.lock().await.schema(),
        }
    }

    async fn open_query(&mut self, sql: &str) -> Result<ResultSet, ExecError> {
        let sql = meta::apply_max_rows(sql, self.config.max_rows);
        let fetch_size = self.config.fetch_size;
        let response = self
            .send_request(RequestPayload::ExecuteQuery { fetch_size }, &sql)
            .await?;
        self.open_cursor(&response).await
    }

    async fn open_plan(&mut self, plan: &str, inline: bool) -> Result<ResultSet, ExecError> {
        let fetch_size = self.config.fetch_size;
        let payload = if inline {
            RequestPayload::ExecuteInlinePlan { fetch_size }
        } else {
            RequestPayload::ExecutePlan { fetch_size }
        };
        let response = self.send_request(payload, plan).await?;
        self.open_cursor(&response).await
    }

    async fn open_cursor(&mut self, response: &ResponseEnvelope) -> Result<ResultSet, ExecError> {
        self.conn.lock().await.set_result_set_open(true);
        Ok(ResultSet::Cursor(Cursor {
            query_id: response.payload.query_id().map(str::to_string),
            fetch_size: self.config.fetch_size,
        }))
    }

    async fn update(&mut self, sql: &str) -> Result<i64, ExecError> {
        let response = self
            .send_request(RequestPayload::ExecuteUpdate, sql)
            .await?;
        match response.payload {
            ResponsePayload::ExecuteUpdate { updated_rows } => Ok(updated_rows),
            other => Err(unexpected(&other)),
        }
    }

    async fn explain_text(
        &mut self,
        text: &str,
        format: ExplainFormat,
        target: ExplainTarget,
    ) -> Result<String, ExecError> {
        let version = self.conn.lock().await.server_version();
        let requested = if is_legacy_explain(&version) {
            debug!(version = %version, "server returns structured explain plans");
            None
        } else {
            Some(format)
        };
        let payload = match target {
            ExplainTarget::Sql => RequestPayload::ExecuteExplain { format: requested },
            ExplainTarget::Plan => RequestPayload::ExplainPlan { format: requested },
        };

        let response = self.send_request(payload, text).await?;
        let body = match response.payload {
            ResponsePayload::ExecuteExplain(body) | ResponsePayload::ExplainPlan(body) => body,
            other => return Err(unexpected(&other)),
        };
        Ok(match body {
            ExplainBody::Text(text) => text,
            ExplainBody::Legacy(plan) => plan.render(format),
        })
    }

    async fn plan_names(&mut self) -> Result<Vec<String>, ExecError> {
        let response = self.send_request(RequestPayload::ListPlan, "").await?;
        match response.payload {
            ResponsePayload::ListPlan { plan_names } => Ok(plan_names),
            other => Err(unexpected(&other)),
        }
    }

    async fn system_queries(&mut self) -> Result<RowSet, ExecError> {
        let response = self
            .send_request(RequestPayload::SystemWideQueries, "")
            .await?;
        match response.payload {
            ResponsePayload::SystemWideQueries { rows } => Ok(RowSet::system_queries(rows)),
            other => Err(unexpected(&other)),
        }
    }

    async fn export(&mut self, statement: &str) -> Result<String, ExecError> {
        let response = self
            .send_request(RequestPayload::ExecuteExport, statement)
            .await?;
        match response.payload {
            ResponsePayload::ExecuteExport { export_statement } => Ok(export_statement),
            other => Err(unexpected(&other)),
        }
    }

    async fn system_metadata(
        &mut self,
        request: SystemMetadataRequest,
    ) -> Result<SystemMetadataResult, ExecError> {
        let response = self
            .send_request(RequestPayload::FetchSystemMetadata(request), "")
            .await?;
        match response.payload {
            ResponsePayload::FetchSystemMetadata(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    async fn catalog(&mut self, request: SystemMetadataRequest) -> Result<RowSet, ExecError> {
        Ok(self
            .system_metadata(request)
            .await?
            .result_set
            .map(RowSet::from)
            .unwrap_or_default())
    }

    /// Send one request, following redirects and retrying once on transport failure.
    ///
    /// Warnings in the confirmation are collected; ERROR and INVALID confirmations
    /// become errors. A query id in the response is associated with the session.
    async fn send_request(
        &mut self,
        payload: RequestPayload,
        sql: &str,
    ) -> Result<ResponseEnvelope, ExecError> {
        let request_type = payload.request_type();
        let spec = request_type.spec();
        let sql = if spec.substitutes_parameters {
            substitution::substitute(sql, &self.parameters)?
        } else {
            sql.to_string()
        };

        if spec.carries_query_id && self.conn.lock().await.has_open_result_set() {
            return Err(ExecError::ResultSetStillOpen);
        }

        let mut redirects = RedirectBudget::new(self.config.max_redirects);
        loop {
            let mut envelope = RequestEnvelope::new(payload.clone()).with_sql(sql.as_str());
            if let Some(force) = self.routing.next(spec, envelope.sql.is_some()) {
                envelope = envelope.with_force(force);
            }

            let conn = &self.conn;
            let envelope = &envelope;
            let response =
                failover::with_retry(&self.shared, conn, move || exchange(conn, envelope)).await?;
            codec::classify(&response.confirmation).apply(&mut self.warnings)?;

            if spec.redirect_allowed {
                if let Some(redirect) = &response.redirect {
                    redirects.follow(&self.conn, redirect).await?;
                    self.routing.arm_one_shot();
                    continue;
                }
            }

            if let Some(query_id) = response.payload.query_id() {
                self.shared.associate(query_id)?;
            }
            return Ok(response);
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("config", &self.config)
            .field("query_id", &self.shared.query_id())
            .field("parameters", &self.parameters.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Lines of the schema text; empty text yields one empty row.
fn schema_lines(schema: &str) -> Vec<String> {
    let lines: Vec<String> = schema.lines().map(str::to_string).collect();
    if lines.is_empty() {
        vec![String::new()]
    } else {
        lines
    }
}

/// Builder for creating `Statement` instances with a fluent API.
pub struct StatementBuilder {
    conn: SharedConnection,
    config: StatementConfig,
}

impl StatementBuilder {
    /// Create a new statement builder with default settings.
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            config: StatementConfig::default(),
        }
    }

    /// Start from the connection's statement defaults.
    pub fn config(mut self, config: StatementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.config.query_timeout_secs = secs;
        self
    }

    /// Set the fetch size. Zero keeps the default.
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.config.fetch_size = if rows == 0 { DEFAULT_FETCH_SIZE } else { rows };
        self
    }

    pub fn max_rows(mut self, rows: u32) -> Self {
        self.config.max_rows = rows;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn max_redirects(mut self, redirects: u32) -> Self {
        self.config.max_redirects = redirects;
        self
    }

    pub fn build(self) -> Statement {
        Statement::new(self.conn, self.config)
    }
}
