//! Wire message types for the statement RPC protocol.
//!
//! Every request is a [`RequestEnvelope`] carrying a [`RequestType`] discriminator and
//! exactly one typed payload; every response is a [`ResponseEnvelope`] embedding a
//! [`Confirmation`]. Bodies are serialized with bincode, so all types here use plain
//! externally tagged serde representations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Request discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    ExecuteQuery,
    ExecuteUpdate,
    ExecuteExplain,
    ExplainPlan,
    ExecutePlan,
    ExecuteInlinePlan,
    ListPlan,
    CancelQuery,
    KillQuery,
    SystemWideQueries,
    ExecuteExport,
    FetchSystemMetadata,
}

/// Static routing flags for a request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSpec {
    /// Request may carry the force flag
    pub force_allowed: bool,
    /// Response may instruct a redirect
    pub redirect_allowed: bool,
    /// Response carries a freshly issued query id
    pub carries_query_id: bool,
    /// SQL text goes through parameter substitution
    pub substitutes_parameters: bool,
}

impl RequestType {
    /// Every request type, in wire order.
    pub const ALL: [RequestType; 12] = [
        RequestType::ExecuteQuery,
        RequestType::ExecuteUpdate,
        RequestType::ExecuteExplain,
        RequestType::ExplainPlan,
        RequestType::ExecutePlan,
        RequestType::ExecuteInlinePlan,
        RequestType::ListPlan,
        RequestType::CancelQuery,
        RequestType::KillQuery,
        RequestType::SystemWideQueries,
        RequestType::ExecuteExport,
        RequestType::FetchSystemMetadata,
    ];

    /// Routing flags for this request type.
    pub const fn spec(self) -> RequestSpec {
        let administrative = matches!(
            self,
            RequestType::ListPlan
                | RequestType::CancelQuery
                | RequestType::KillQuery
                | RequestType::SystemWideQueries
                | RequestType::ExecuteExport
        );
        RequestSpec {
            force_allowed: !administrative,
            redirect_allowed: !administrative,
            carries_query_id: matches!(
                self,
                RequestType::ExecuteQuery
                    | RequestType::ExecutePlan
                    | RequestType::ExecuteInlinePlan
            ),
            substitutes_parameters: !matches!(self, RequestType::ExecuteInlinePlan),
        }
    }

    /// Protocol name of this request type.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::ExecuteQuery => "EXECUTE_QUERY",
            RequestType::ExecuteUpdate => "EXECUTE_UPDATE",
            RequestType::ExecuteExplain => "EXECUTE_EXPLAIN",
            RequestType::ExplainPlan => "EXPLAIN_PLAN",
            RequestType::ExecutePlan => "EXECUTE_PLAN",
            RequestType::ExecuteInlinePlan => "EXECUTE_INLINE_PLAN",
            RequestType::ListPlan => "LIST_PLAN",
            RequestType::CancelQuery => "CANCEL_QUERY",
            RequestType::KillQuery => "KILL_QUERY",
            RequestType::SystemWideQueries => "SYSTEM_WIDE_QUERIES",
            RequestType::ExecuteExport => "EXECUTE_EXPORT",
            RequestType::FetchSystemMetadata => "FETCH_SYSTEM_METADATA",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering requested for an explained plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplainFormat {
    Proto,
    Json,
}

/// Catalog call carried by FETCH_SYSTEM_METADATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemMetadataCall {
    GetSchema,
    GetTables,
    GetSystemTables,
    GetViews,
    GetColumns,
    GetIndexInfo,
    GetTypeInfo,
    GetDatabaseProductName,
    GetDatabaseProductVersion,
}

/// Arguments of a FETCH_SYSTEM_METADATA call. Empty patterns default to `%`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetadataRequest {
    pub call: SystemMetadataCall,
    pub schema: String,
    pub table: String,
    pub view: String,
    pub column: String,
    pub test: bool,
}

impl SystemMetadataRequest {
    /// Request for `call` with every pattern set to `%`.
    pub fn new(call: SystemMetadataCall) -> Self {
        Self {
            call,
            schema: "%".to_string(),
            table: "%".to_string(),
            view: "%".to_string(),
            column: "%".to_string(),
            test: false,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn with_view(mut self, view: &str) -> Self {
        self.view = view.to_string();
        self
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }
}

/// Typed request payload, one variant per [`RequestType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    ExecuteQuery { fetch_size: u32 },
    ExecuteUpdate,
    ExecuteExplain { format: Option<ExplainFormat> },
    ExplainPlan { format: Option<ExplainFormat> },
    ExecutePlan { fetch_size: u32 },
    ExecuteInlinePlan { fetch_size: u32 },
    ListPlan,
    CancelQuery,
    KillQuery,
    SystemWideQueries,
    ExecuteExport,
    FetchSystemMetadata(SystemMetadataRequest),
}

impl RequestPayload {
    /// Discriminator matching this payload.
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestPayload::ExecuteQuery { .. } => RequestType::ExecuteQuery,
            RequestPayload::ExecuteUpdate => RequestType::ExecuteUpdate,
            RequestPayload::ExecuteExplain { .. } => RequestType::ExecuteExplain,
            RequestPayload::ExplainPlan { .. } => RequestType::ExplainPlan,
            RequestPayload::ExecutePlan { .. } => RequestType::ExecutePlan,
            RequestPayload::ExecuteInlinePlan { .. } => RequestType::ExecuteInlinePlan,
            RequestPayload::ListPlan => RequestType::ListPlan,
            RequestPayload::CancelQuery => RequestType::CancelQuery,
            RequestPayload::KillQuery => RequestType::KillQuery,
            RequestPayload::SystemWideQueries => RequestType::SystemWideQueries,
            RequestPayload::ExecuteExport => RequestType::ExecuteExport,
            RequestPayload::FetchSystemMetadata(_) => RequestType::FetchSystemMetadata,
        }
    }
}

/// Top-level request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_type: RequestType,
    pub payload: RequestPayload,
    pub sql: Option<String>,
    pub force: Option<bool>,
}

impl RequestEnvelope {
    /// Create an envelope whose discriminator is derived from the payload.
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            request_type: payload.request_type(),
            payload,
            sql: None,
            force: None,
        }
    }

    /// Attach SQL text. Empty text is left unset.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        self.sql = if sql.is_empty() { None } else { Some(sql) };
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    /// Check that the discriminator matches the payload.
    pub fn validate(&self) -> Result<(), String> {
        let actual = self.payload.request_type();
        if actual != self.request_type {
            return Err(format!(
                "request type {} carries a {} payload",
                self.request_type, actual
            ));
        }
        Ok(())
    }
}

/// Confirmation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    Warning,
    Error,
    Invalid,
}

/// Status sub-message embedded in every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub status: ResponseStatus,
    pub reason: String,
    pub sql_state: String,
    pub vendor_code: i32,
}

impl Confirmation {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            reason: String::new(),
            sql_state: "00000".to_string(),
            vendor_code: 0,
        }
    }

    pub fn warning(reason: &str, sql_state: &str, vendor_code: i32) -> Self {
        Self {
            status: ResponseStatus::Warning,
            reason: reason.to_string(),
            sql_state: sql_state.to_string(),
            vendor_code,
        }
    }

    pub fn error(reason: &str, sql_state: &str, vendor_code: i32) -> Self {
        Self {
            status: ResponseStatus::Error,
            reason: reason.to_string(),
            sql_state: sql_state.to_string(),
            vendor_code,
        }
    }

    pub fn invalid() -> Self {
        Self {
            status: ResponseStatus::Invalid,
            reason: String::new(),
            sql_state: String::new(),
            vendor_code: 0,
        }
    }
}

/// Server instruction to resume against another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub host: String,
    pub port: u16,
}

/// Single cell of a server-provided row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// Column descriptor of a wire row set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireColumn {
    pub name: String,
    pub type_name: String,
}

/// In-memory rows returned by catalog calls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireRows {
    pub columns: Vec<WireColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

/// Node of a structured plan returned by legacy servers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanNode {
    pub operator: String,
    pub properties: BTreeMap<String, String>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Render the plan in the requested format.
    pub fn render(&self, format: ExplainFormat) -> String {
        match format {
            ExplainFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{}"))
            }
            ExplainFormat::Proto => {
                let mut out = String::new();
                self.write_text(&mut out, 0);
                out
            }
        }
    }

    fn write_text(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        out.push_str(&format!("{}operator: \"{}\"\n", pad, self.operator));
        for (key, value) in &self.properties {
            out.push_str(&format!(
                "{}properties {{ key: \"{}\" value: \"{}\" }}\n",
                pad, key, value
            ));
        }
        for child in &self.children {
            out.push_str(&format!("{}children {{\n", pad));
            child.write_text(out, depth + 1);
            out.push_str(&format!("{}}}\n", pad));
        }
    }
}

/// Explain payload: pre-rendered text or a legacy structured plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplainBody {
    Text(String),
    Legacy(PlanNode),
}

/// One row of the system-wide query listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemQueryRow {
    pub query_id: String,
    pub user: String,
    pub importance: f64,
    pub estimated_time_ms: i64,
    pub elapsed_time_ms: i64,
    pub status: String,
    pub server: String,
    pub database: String,
    pub sql: String,
}

/// Result of a FETCH_SYSTEM_METADATA call. Which field is meaningful depends on the call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemMetadataResult {
    pub int_val: i64,
    pub string_val: String,
    pub result_set: Option<WireRows>,
}

/// Typed response payload, paired one-to-one with [`RequestPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    ExecuteQuery { query_id: String },
    ExecuteUpdate { updated_rows: i64 },
    ExecuteExplain(ExplainBody),
    ExplainPlan(ExplainBody),
    ExecutePlan { query_id: String },
    ExecuteInlinePlan { query_id: String },
    ListPlan { plan_names: Vec<String> },
    CancelQuery,
    KillQuery,
    SystemWideQueries { rows: Vec<SystemQueryRow> },
    ExecuteExport { export_statement: String },
    FetchSystemMetadata(SystemMetadataResult),
}

impl ResponsePayload {
    /// Request type this payload answers.
    pub fn request_type(&self) -> RequestType {
        match self {
            ResponsePayload::ExecuteQuery { .. } => RequestType::ExecuteQuery,
            ResponsePayload::ExecuteUpdate { .. } => RequestType::ExecuteUpdate,
            ResponsePayload::ExecuteExplain(_) => RequestType::ExecuteExplain,
            ResponsePayload::ExplainPlan(_) => RequestType::ExplainPlan,
            ResponsePayload::ExecutePlan { .. } => RequestType::ExecutePlan,
            ResponsePayload::ExecuteInlinePlan { .. } => RequestType::ExecuteInlinePlan,
            ResponsePayload::ListPlan { .. } => RequestType::ListPlan,
            ResponsePayload::CancelQuery => RequestType::CancelQuery,
            ResponsePayload::KillQuery => RequestType::KillQuery,
            ResponsePayload::SystemWideQueries { .. } => RequestType::SystemWideQueries,
            ResponsePayload::ExecuteExport { .. } => RequestType::ExecuteExport,
            ResponsePayload::FetchSystemMetadata(_) => RequestType::FetchSystemMetadata,
        }
    }

    /// Query id issued by the server, if any. Empty ids count as none.
    pub fn query_id(&self) -> Option<&str> {
        match self {
            ResponsePayload::ExecuteQuery { query_id }
            | ResponsePayload::ExecutePlan { query_id }
            | ResponsePayload::ExecuteInlinePlan { query_id }
                if !query_id.is_empty() =>
            {
                Some(query_id)
            }
            _ => None,
        }
    }
}

/// Top-level response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub confirmation: Confirmation,
    pub payload: ResponsePayload,
    pub redirect: Option<Redirect>,
}

impl ResponseEnvelope {
    /// OK response with no redirect.
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            confirmation: Confirmation::ok(),
            payload,
            redirect: None,
        }
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_redirect(mut self, host: &str, port: u16) -> Self {
        self.redirect = Some(Redirect {
            host: host.to_string(),
            port,
        });
        self
    }
}
