//! Connection and statement configuration.
//!
//! This module parses connection strings and builds validated connection
//! parameters, including the statement defaults every new `Statement` inherits.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default server port.
pub const DEFAULT_PORT: u16 = 4050;

/// Rows fetched per round trip when nothing else is configured.
pub const DEFAULT_FETCH_SIZE: u32 = 30_000;

/// Redirects followed for one call before giving up.
pub const DEFAULT_MAX_REDIRECTS: u32 = 8;

/// Statement-level settings inherited at construction and mutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementConfig {
    /// Client-side query timeout in whole seconds (0 disables)
    pub query_timeout_secs: u64,
    /// Rows fetched per round trip
    pub fetch_size: u32,
    /// Row cap applied to plain queries (0 disables)
    pub max_rows: u32,
    /// Force flag sent with routable requests
    pub force: bool,
    /// Redirects followed per call
    pub max_redirects: u32,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 0,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: 0,
            force: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Connection parameters for reaching a database node.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Database host address
    pub host: String,

    /// Database port (default: 4050)
    pub port: u16,

    /// Initial schema
    pub schema: Option<String>,

    /// Timeout for establishing the TCP stream
    pub connect_timeout: Duration,

    /// Server version, if known ahead of time
    pub server_version: Option<String>,

    /// Defaults for statements created on this connection
    pub statement: StatementConfig,
}

impl ConnectionParams {
    /// Create a new ConnectionBuilder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// `host:port` form of the target.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ConnectionParams {
    type Err = ConfigError;

    /// Parse a connection string in the format:
    /// `sqlrpc://host[:port][/schema][?param=value&...]`
    ///
    /// # Examples
    ///
    /// ```
    /// # use sqlrpc_exec::connection::ConnectionParams;
    /// # use std::str::FromStr;
    /// let params = ConnectionParams::from_str("sqlrpc://localhost:4050/sales?query_timeout=30")?;
    /// assert_eq!(params.statement.query_timeout_secs, 30);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = s.trim();

        let url = url.strip_prefix("sqlrpc://").ok_or_else(|| {
            ConfigError::ParseError("Connection string must start with 'sqlrpc://'".to_string())
        })?;

        let (main_part, query_string) = match url.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (url, None),
        };

        let params = parse_query_params(query_string)?;

        let (host_port, schema) = match main_part.split_once('/') {
            Some((host, schema)) if !schema.is_empty() => {
                let schema = urlencoding::decode(schema)
                    .map_err(|e| ConfigError::ParseError(format!("Failed to decode schema: {}", e)))?
                    .into_owned();
                (host, Some(schema))
            }
            Some((host, _)) => (host, None),
            None => (main_part, None),
        };

        let (host, port) = parse_host_port(host_port)?;

        let mut builder = ConnectionBuilder::new().host(&host).port(port);
        if let Some(schema) = schema {
            builder = builder.schema(&schema);
        }

        builder = apply_query_params(builder, params)?;

        builder.build()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionParams {{ address: {}, schema: {:?} }}",
            self.address(),
            self.schema
        )
    }
}

/// Builder for constructing ConnectionParams with validation.
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    host: Option<String>,
    port: Option<u16>,
    schema: Option<String>,
    connect_timeout: Option<Duration>,
    server_version: Option<String>,
    statement: StatementConfig,
}

impl ConnectionBuilder {
    /// Create a new ConnectionBuilder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database host.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the database port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the initial schema.
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Set the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Declare the server version.
    pub fn server_version(mut self, version: &str) -> Self {
        self.server_version = Some(version.to_string());
        self
    }

    /// Set the default query timeout in seconds.
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.statement.query_timeout_secs = secs;
        self
    }

    /// Set the default fetch size. Zero keeps the built-in default.
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.statement.fetch_size = if rows == 0 { DEFAULT_FETCH_SIZE } else { rows };
        self
    }

    /// Set the default row cap for plain queries.
    pub fn max_rows(mut self, rows: u32) -> Self {
        self.statement.max_rows = rows;
        self
    }

    /// Set the default force flag.
    pub fn force(mut self, force: bool) -> Self {
        self.statement.force = force;
        self
    }

    /// Set how many redirects a single call may follow.
    pub fn max_redirects(mut self, redirects: u32) -> Self {
        self.statement.max_redirects = redirects;
        self
    }

    /// Build the ConnectionParams with validation.
    pub fn build(self) -> Result<ConnectionParams, ConfigError> {
        let host = self.host.ok_or_else(|| ConfigError::InvalidParameter {
            parameter: "host".to_string(),
            message: "Host is required".to_string(),
        })?;

        if host.is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "host".to_string(),
                message: "Host cannot be empty".to_string(),
            });
        }

        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }

        let connect_timeout = self.connect_timeout.unwrap_or(Duration::from_secs(10));
        if connect_timeout.is_zero() {
            return Err(ConfigError::InvalidParameter {
                parameter: "connect_timeout".to_string(),
                message: "Connect timeout must be greater than 0".to_string(),
            });
        }

        Ok(ConnectionParams {
            host,
            port,
            schema: self.schema,
            connect_timeout,
            server_version: self.server_version,
            statement: self.statement,
        })
    }
}

/// Parse query parameters from URL query string.
fn parse_query_params(query: Option<&str>) -> Result<HashMap<String, String>, ConfigError> {
    let mut params = HashMap::new();

    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }

            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::ParseError(format!("Invalid query parameter format: {}", pair))
            })?;

            let key = urlencoding::decode(key)
                .map_err(|e| ConfigError::ParseError(format!("Failed to decode key: {}", e)))?
                .into_owned();
            let value = urlencoding::decode(value)
                .map_err(|e| ConfigError::ParseError(format!("Failed to decode value: {}", e)))?
                .into_owned();

            params.insert(key, value);
        }
    }

    Ok(params)
}

/// Parse host and port.
fn parse_host_port(host_port: &str) -> Result<(String, u16), ConfigError> {
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, port_part) = rest.split_once(']').ok_or_else(|| {
            ConfigError::ParseError(format!("Unterminated IPv6 address: {}", host_port))
        })?;

        let port = match port_part.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((host_port.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| ConfigError::ParseError(format!("Invalid port: {}", port)))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidParameter {
        parameter: key.to_string(),
        message: format!("Invalid numeric value: {}", value),
    })
}

/// Apply query parameters to builder.
fn apply_query_params(
    mut builder: ConnectionBuilder,
    params: HashMap<String, String>,
) -> Result<ConnectionBuilder, ConfigError> {
    for (key, value) in params {
        builder = match key.as_str() {
            "query_timeout" | "timeout" => builder.query_timeout_secs(parse_number(&key, &value)?),
            "connect_timeout" => {
                builder.connect_timeout(Duration::from_secs(parse_number(&key, &value)?))
            }
            "fetch_size" | "fetchsize" => builder.fetch_size(parse_number(&key, &value)?),
            "max_rows" | "maxrows" => builder.max_rows(parse_number(&key, &value)?),
            "max_redirects" => builder.max_redirects(parse_number(&key, &value)?),
            "force" => builder.force(parse_bool(&value)?),
            "server_version" => builder.server_version(&value),
            _ => {
                return Err(ConfigError::InvalidParameter {
                    parameter: key,
                    message: "Unknown parameter".to_string(),
                })
            }
        };
    }

    Ok(builder)
}

/// Parse boolean value from string.
fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidParameter {
            parameter: "boolean".to_string(),
            message: format!("Invalid boolean value: {}", s),
        }),
    }
}
