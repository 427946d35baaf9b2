//! Meta-command recognition and statement classification.
//!
//! Meta-commands are client-side statement forms such as `LIST TABLES` or
//! `SET MAXROWS 10` that map onto dedicated protocol calls instead of being sent
//! to the server as SQL. Everything else is classified by its leading keyword
//! into query-shaped or update-shaped text.

use crate::error::ExecError;
use crate::transport::messages::ExplainFormat;
use crate::transport::protocol::PsoSetting;

/// Leading keywords of statements that produce a result set.
const QUERY_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "SHOW", "EXPLAIN"];

/// Whether a plain statement produces rows or an update count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Update,
}

impl StatementKind {
    /// Classify comment-stripped SQL by its leading keyword, ignoring opening parentheses.
    pub fn classify(sql: &str) -> Self {
        let text = sql.trim_start().trim_start_matches('(');
        let mut scanner = Scanner::new(text);
        if QUERY_KEYWORDS.iter().any(|kw| scanner.keyword(kw)) {
            StatementKind::Query
        } else {
            StatementKind::Update
        }
    }
}

/// Strip leading `--` line comments and `/* */` block comments.
///
/// An unterminated comment swallows the rest of the text.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut text = sql.trim();
    loop {
        if let Some(rest) = text.strip_prefix("--") {
            text = match rest.find('\n') {
                Some(end) => rest[end + 1..].trim(),
                None => "",
            };
        } else if let Some(rest) = text.strip_prefix("/*") {
            text = match rest.find("*/") {
                Some(end) => rest[end + 2..].trim(),
                None => "",
            };
        } else {
            return text;
        }
    }
}

/// Wrap a plain query so that at most `max_rows` rows come back. Zero leaves it unchanged.
pub fn apply_max_rows(sql: &str, max_rows: u32) -> String {
    if max_rows == 0 {
        sql.to_string()
    } else {
        format!("SELECT * FROM ({}) LIMIT {}", sql, max_rows)
    }
}

/// Optionally schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

/// Client-side statement form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Explain { format: ExplainFormat, sql: String },
    ListTables { system: bool, verbose: bool },
    ListViews { verbose: bool },
    ListIndexes { table: QualifiedName, verbose: bool },
    DescribeTable { table: QualifiedName, verbose: bool },
    DescribeView { view: QualifiedName, verbose: bool },
    GetSchema,
    PlanExecute { inline: bool, plan: String },
    PlanExplain { format: ExplainFormat, plan: String },
    ListAllQueries,
    /// The whole command text is sent as the export statement
    ExportTable { statement: String },
    ExportTranslation { statement: String },
    Kill { query_id: String },
    Cancel { query_id: String },
    SetSchema { schema: String },
    SetMaxRows(u32),
    SetPso(PsoSetting),
}

impl MetaCommand {
    /// Recognize a meta-command in trimmed, comment-stripped text.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the text is not a meta-command.
    ///
    /// # Errors
    ///
    /// `ExecError::Syntax` when the text starts like a meta-command but is malformed.
    pub fn parse(sql: &str) -> Result<Option<Self>, ExecError> {
        let mut s = Scanner::new(sql);

        if s.keyword("EXPLAIN") {
            let format = s.explain_format();
            let sql = s.rest();
            if sql.is_empty() {
                return Err(syntax("Syntax: explain (json)? <sql>"));
            }
            return Ok(Some(MetaCommand::Explain {
                format,
                sql: sql.to_string(),
            }));
        }

        if s.keyword("LIST") {
            return parse_list(&mut s);
        }

        if s.keywords(&["GET", "SCHEMA"]) {
            return Ok(Some(MetaCommand::GetSchema));
        }

        if s.keyword("DESCRIBE") {
            return parse_describe(&mut s).map(Some);
        }

        if s.keyword("PLAN") {
            if s.keyword("EXECUTE") {
                let inline = s.keyword("INLINE");
                let plan = s.rest();
                if plan.is_empty() {
                    return Err(syntax("Syntax: plan execute (inline)? <plan>"));
                }
                return Ok(Some(MetaCommand::PlanExecute {
                    inline,
                    plan: plan.to_string(),
                }));
            }
            if s.keyword("EXPLAIN") {
                let format = s.explain_format();
                let plan = s.rest();
                if plan.is_empty() {
                    return Err(syntax("Syntax: plan explain (json)? <plan>"));
                }
                return Ok(Some(MetaCommand::PlanExplain {
                    format,
                    plan: plan.to_string(),
                }));
            }
            return Ok(None);
        }

        if s.keyword("EXPORT") {
            let statement = sql.to_string();
            if s.keyword("TABLE") {
                return Ok(Some(MetaCommand::ExportTable { statement }));
            }
            if s.keyword("TRANSLATION") {
                return Ok(Some(MetaCommand::ExportTranslation { statement }));
            }
            return Ok(None);
        }

        if s.keyword("KILL") {
            return Ok(Some(MetaCommand::Kill {
                query_id: required_rest(&mut s, "Syntax: kill <query id>")?,
            }));
        }

        if s.keyword("CANCEL") {
            return Ok(Some(MetaCommand::Cancel {
                query_id: required_rest(&mut s, "Syntax: cancel <query id>")?,
            }));
        }

        if s.keyword("SET") {
            return parse_set(&mut s);
        }

        Ok(None)
    }

    /// Whether this command produces a result set rather than an update count.
    pub fn is_query(&self) -> bool {
        !matches!(
            self,
            MetaCommand::Kill { .. }
                | MetaCommand::Cancel { .. }
                | MetaCommand::SetSchema { .. }
                | MetaCommand::SetMaxRows(_)
                | MetaCommand::SetPso(_)
        )
    }
}

fn syntax(message: &str) -> ExecError {
    ExecError::Syntax(message.to_string())
}

fn required_rest(s: &mut Scanner<'_>, usage: &str) -> Result<String, ExecError> {
    let rest = s.rest();
    if rest.is_empty() {
        Err(syntax(usage))
    } else {
        Ok(rest.to_string())
    }
}

fn parse_list(s: &mut Scanner<'_>) -> Result<Option<MetaCommand>, ExecError> {
    if s.keyword("TABLES") {
        let verbose = s.keyword("VERBOSE");
        s.expect_end("Syntax: list tables (verbose)?")?;
        return Ok(Some(MetaCommand::ListTables {
            system: false,
            verbose,
        }));
    }
    if s.keywords(&["SYSTEM", "TABLES"]) {
        let verbose = s.keyword("VERBOSE");
        s.expect_end("Syntax: list system tables (verbose)?")?;
        return Ok(Some(MetaCommand::ListTables {
            system: true,
            verbose,
        }));
    }
    if s.keyword("VIEWS") {
        let verbose = s.keyword("VERBOSE");
        s.expect_end("Syntax: list views (verbose)?")?;
        return Ok(Some(MetaCommand::ListViews { verbose }));
    }
    if s.keyword("INDEXES") || s.keyword("INDICES") {
        const USAGE: &str = "Syntax: list indexes (<schema>.)?<table>";
        let table = s.qualified_name(USAGE)?;
        let verbose = s.keyword("VERBOSE");
        s.expect_end(USAGE)?;
        return Ok(Some(MetaCommand::ListIndexes { table, verbose }));
    }
    if s.keywords(&["ALL", "QUERIES"]) {
        s.expect_end("Syntax: list all queries")?;
        return Ok(Some(MetaCommand::ListAllQueries));
    }
    Ok(None)
}

fn parse_describe(s: &mut Scanner<'_>) -> Result<MetaCommand, ExecError> {
    if s.keyword_before_name("VIEW") {
        const USAGE: &str = "Syntax: describe view (<schema>.)?<view>";
        let view = s.qualified_name(USAGE)?;
        let verbose = s.keyword("VERBOSE");
        s.expect_end(USAGE)?;
        return Ok(MetaCommand::DescribeView { view, verbose });
    }

    const USAGE: &str = "Syntax: describe (<schema>.)?<table>";
    s.keyword_before_name("TABLE");
    let table = s.qualified_name(USAGE)?;
    let verbose = s.keyword("VERBOSE");
    s.expect_end(USAGE)?;
    Ok(MetaCommand::DescribeTable { table, verbose })
}

fn parse_set(s: &mut Scanner<'_>) -> Result<Option<MetaCommand>, ExecError> {
    if s.keyword("SCHEMA") {
        let rest = s.rest();
        let schema = if let Some(quoted) = rest.strip_prefix('"') {
            quoted
                .strip_suffix('"')
                .ok_or_else(|| syntax("Unclosed quotes"))?
                .to_string()
        } else {
            rest.to_lowercase()
        };
        if schema.is_empty() {
            return Err(syntax("Syntax: set schema <schema>"));
        }
        return Ok(Some(MetaCommand::SetSchema { schema }));
    }

    if s.keyword("MAXROWS") {
        let rest = s.rest();
        let rows: i64 = rest
            .parse()
            .map_err(|_| syntax("Syntax: set maxrows <n>"))?;
        let rows = u32::try_from(rows).map_err(|_| {
            ExecError::InvalidArgument(format!("max rows must be between 0 and {}", u32::MAX))
        })?;
        return Ok(Some(MetaCommand::SetMaxRows(rows)));
    }

    if s.keyword("PSO") {
        let ending = s.rest().to_uppercase();
        let setting = match ending.as_str() {
            "ON" => PsoSetting::On,
            "OFF" => PsoSetting::Off,
            other => PsoSetting::Threshold(other.parse().map_err(|_| {
                ExecError::Syntax(format!(
                    "SET PSO command requires argument \"ON\" or \"OFF\" or an integer, got: {}",
                    ending
                ))
            })?),
        };
        return Ok(Some(MetaCommand::SetPso(setting)));
    }

    Ok(None)
}

/// Case-insensitive keyword scanner over command text.
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.remaining();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Consume `kw` if it is the next word.
    fn keyword(&mut self, kw: &str) -> bool {
        self.skip_ws();
        let rest = self.remaining();
        let Some(head) = rest.get(..kw.len()) else {
            return false;
        };
        if !head.eq_ignore_ascii_case(kw) {
            return false;
        }
        let boundary = rest[kw.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if boundary {
            self.pos += kw.len();
        }
        boundary
    }

    /// Consume the whole keyword sequence or nothing.
    fn keywords(&mut self, kws: &[&str]) -> bool {
        let start = self.pos;
        if kws.iter().all(|kw| self.keyword(kw)) {
            true
        } else {
            self.pos = start;
            false
        }
    }

    /// Consume `kw` only when a name follows, so a lone `kw` is left to be read as a name.
    fn keyword_before_name(&mut self, kw: &str) -> bool {
        let start = self.pos;
        if self.keyword(kw) {
            let next = self.remaining().trim_start().chars().next();
            if next.is_some_and(|c| c == '"' || is_word_char(c)) {
                return true;
            }
        }
        self.pos = start;
        false
    }

    fn explain_format(&mut self) -> ExplainFormat {
        if self.keyword("JSON") {
            ExplainFormat::Json
        } else {
            ExplainFormat::Proto
        }
    }

    /// Rest of the text, trimmed.
    fn rest(&mut self) -> &'a str {
        let rest = self.remaining().trim();
        self.pos = self.text.len();
        rest
    }

    fn expect_end(&mut self, usage: &str) -> Result<(), ExecError> {
        self.skip_ws();
        if self.remaining().is_empty() {
            Ok(())
        } else {
            Err(syntax(usage))
        }
    }

    /// Quoted identifiers keep their case; unquoted ones are lower-cased.
    fn identifier(&mut self) -> Option<String> {
        let rest = self.remaining();
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"')?;
            if end == 0 {
                return None;
            }
            self.pos += end + 2;
            return Some(quoted[..end].to_string());
        }

        let len = rest
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(rest[..len].to_lowercase())
    }

    fn qualified_name(&mut self, usage: &str) -> Result<QualifiedName, ExecError> {
        self.skip_ws();
        let first = self.identifier().ok_or_else(|| syntax(usage))?;
        if self.remaining().starts_with('.') {
            self.pos += 1;
            let name = self.identifier().ok_or_else(|| syntax(usage))?;
            return Ok(QualifiedName {
                schema: Some(first),
                name,
            });
        }
        Ok(QualifiedName {
            schema: None,
            name: first,
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> MetaCommand {
        MetaCommand::parse(sql).unwrap().expect("meta-command")
    }

    fn name(schema: Option<&str>, name: &str) -> QualifiedName {
        QualifiedName {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_strip_leading_comments() {
        assert_eq!(
            strip_leading_comments("  -- one\n/* two */ -- three\n SELECT 1 "),
            "SELECT 1"
        );
        assert_eq!(strip_leading_comments("/* never closed SELECT 1"), "");
        assert_eq!(strip_leading_comments("-- only a comment"), "");
        assert_eq!(strip_leading_comments("SELECT 1 -- trailing"), "SELECT 1 -- trailing");
    }

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("select 1"), StatementKind::Query);
        assert_eq!(StatementKind::classify("((SELECT 1))"), StatementKind::Query);
        assert_eq!(
            StatementKind::classify("WITH x AS (SELECT 1) SELECT * FROM x"),
            StatementKind::Query
        );
        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Update);
        assert_eq!(StatementKind::classify("SELECTED_TABLE"), StatementKind::Update);
    }

    #[test]
    fn test_max_rows_wrapping() {
        assert_eq!(
            apply_max_rows("SELECT * FROM t", 10),
            "SELECT * FROM (SELECT * FROM t) LIMIT 10"
        );
        assert_eq!(apply_max_rows("SELECT 1", 0), "SELECT 1");
    }

    #[test]
    fn test_plain_statements_are_not_meta() {
        for sql in ["SELECT 1", "INSERT INTO t VALUES (1)", "SET TIMEZONE 'UTC'", "LIST FOO", "KILLER"] {
            assert_eq!(MetaCommand::parse(sql).unwrap(), None, "{}", sql);
        }
    }

    #[test]
    fn test_explain() {
        assert_eq!(
            parse("explain json SELECT 1"),
            MetaCommand::Explain {
                format: ExplainFormat::Json,
                sql: "SELECT 1".to_string()
            }
        );
        assert_eq!(
            parse("EXPLAIN SELECT 1"),
            MetaCommand::Explain {
                format: ExplainFormat::Proto,
                sql: "SELECT 1".to_string()
            }
        );
        assert!(MetaCommand::parse("EXPLAIN").is_err());
    }

    #[test]
    fn test_list_forms() {
        assert_eq!(
            parse("LIST TABLES"),
            MetaCommand::ListTables {
                system: false,
                verbose: false
            }
        );
        assert_eq!(
            parse("list  system   tables verbose"),
            MetaCommand::ListTables {
                system: true,
                verbose: true
            }
        );
        assert_eq!(parse("LIST VIEWS"), MetaCommand::ListViews { verbose: false });
        assert_eq!(parse("LIST ALL QUERIES"), MetaCommand::ListAllQueries);
        assert!(MetaCommand::parse("LIST TABLES please").is_err());
    }

    #[test]
    fn test_list_indexes_case_folding() {
        assert_eq!(
            parse("LIST INDEXES myschema.MyTable"),
            MetaCommand::ListIndexes {
                table: name(Some("myschema"), "mytable"),
                verbose: false
            }
        );
        assert_eq!(
            parse("LIST INDICES \"MySchema\".\"MyTable\" VERBOSE"),
            MetaCommand::ListIndexes {
                table: name(Some("MySchema"), "MyTable"),
                verbose: true
            }
        );
        assert_eq!(
            parse("list indexes Orders"),
            MetaCommand::ListIndexes {
                table: name(None, "orders"),
                verbose: false
            }
        );
    }

    #[test]
    fn test_list_indexes_syntax_error() {
        let err = MetaCommand::parse("LIST INDEXES").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Syntax error: Syntax: list indexes (<schema>.)?<table>"
        );
        assert!(MetaCommand::parse("LIST INDEXES a.b.c").is_err());
        assert!(MetaCommand::parse("LIST INDEXES \"open").is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            parse("DESCRIBE TABLE s.\"T\""),
            MetaCommand::DescribeTable {
                table: name(Some("s"), "T"),
                verbose: false
            }
        );
        assert_eq!(
            parse("describe Items"),
            MetaCommand::DescribeTable {
                table: name(None, "items"),
                verbose: false
            }
        );
        assert_eq!(
            parse("DESCRIBE VIEW v1"),
            MetaCommand::DescribeView {
                view: name(None, "v1"),
                verbose: false
            }
        );
        assert!(matches!(
            MetaCommand::parse("DESCRIBE VIEW v1 extra"),
            Err(ExecError::Syntax(msg)) if msg == "Syntax: describe view (<schema>.)?<view>"
        ));
        assert!(matches!(
            MetaCommand::parse("DESCRIBE"),
            Err(ExecError::Syntax(msg)) if msg == "Syntax: describe (<schema>.)?<table>"
        ));
    }

    #[test]
    fn test_describe_keywords_as_names() {
        assert_eq!(
            parse("DESCRIBE view"),
            MetaCommand::DescribeTable {
                table: name(None, "view"),
                verbose: false
            }
        );
        assert_eq!(
            parse("describe table"),
            MetaCommand::DescribeTable {
                table: name(None, "table"),
                verbose: false
            }
        );
        assert_eq!(
            parse("DESCRIBE view VERBOSE"),
            MetaCommand::DescribeView {
                view: name(None, "verbose"),
                verbose: false
            }
        );
        assert_eq!(
            parse("DESCRIBE VIEW.items"),
            MetaCommand::DescribeTable {
                table: name(Some("view"), "items"),
                verbose: false
            }
        );
        assert_eq!(
            parse("DESCRIBE VIEW \"Sales\".v2 VERBOSE"),
            MetaCommand::DescribeView {
                view: name(Some("Sales"), "v2"),
                verbose: true
            }
        );
    }

    #[test]
    fn test_plan_commands() {
        assert_eq!(
            parse("PLAN EXECUTE INLINE {\"op\":1}"),
            MetaCommand::PlanExecute {
                inline: true,
                plan: "{\"op\":1}".to_string()
            }
        );
        assert_eq!(
            parse("plan execute my_plan"),
            MetaCommand::PlanExecute {
                inline: false,
                plan: "my_plan".to_string()
            }
        );
        assert_eq!(
            parse("PLAN EXPLAIN JSON my_plan"),
            MetaCommand::PlanExplain {
                format: ExplainFormat::Json,
                plan: "my_plan".to_string()
            }
        );
    }

    #[test]
    fn test_export_keeps_whole_text() {
        assert_eq!(
            parse("EXPORT TABLE sales.orders"),
            MetaCommand::ExportTable {
                statement: "EXPORT TABLE sales.orders".to_string()
            }
        );
        assert_eq!(
            parse("export translation foo"),
            MetaCommand::ExportTranslation {
                statement: "export translation foo".to_string()
            }
        );
    }

    #[test]
    fn test_kill_and_cancel() {
        assert_eq!(
            parse("KILL 1234-abcd"),
            MetaCommand::Kill {
                query_id: "1234-abcd".to_string()
            }
        );
        assert_eq!(
            parse("cancel q9"),
            MetaCommand::Cancel {
                query_id: "q9".to_string()
            }
        );
        assert!(MetaCommand::parse("KILL").is_err());
    }

    #[test]
    fn test_set_schema() {
        assert_eq!(
            parse("SET SCHEMA Sales"),
            MetaCommand::SetSchema {
                schema: "sales".to_string()
            }
        );
        assert_eq!(
            parse("SET SCHEMA \"Sales\""),
            MetaCommand::SetSchema {
                schema: "Sales".to_string()
            }
        );
        assert!(matches!(
            MetaCommand::parse("SET SCHEMA \"Sales"),
            Err(ExecError::Syntax(msg)) if msg == "Unclosed quotes"
        ));
    }

    #[test]
    fn test_set_maxrows() {
        assert_eq!(parse("SET MAXROWS 10"), MetaCommand::SetMaxRows(10));
        assert!(matches!(
            MetaCommand::parse("SET MAXROWS ten"),
            Err(ExecError::Syntax(_))
        ));
        assert!(matches!(
            MetaCommand::parse("SET MAXROWS -1"),
            Err(ExecError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_set_pso() {
        assert_eq!(parse("set pso on"), MetaCommand::SetPso(PsoSetting::On));
        assert_eq!(parse("SET PSO OFF"), MetaCommand::SetPso(PsoSetting::Off));
        assert_eq!(
            parse("SET PSO 5000"),
            MetaCommand::SetPso(PsoSetting::Threshold(5000))
        );
        let err = MetaCommand::parse("SET PSO maybe").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Syntax error: SET PSO command requires argument \"ON\" or \"OFF\" or an integer, got: MAYBE"
        );
    }

    #[test]
    fn test_is_query() {
        assert!(parse("GET SCHEMA").is_query());
        assert!(!parse("SET PSO ON").is_query());
        assert!(!parse("KILL x").is_query());
    }
}
