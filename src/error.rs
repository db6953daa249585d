//! Error types for the data access layer.
//!
//! This module defines all error types using `thiserror`. The `Query` variant
//! is the access-point family: facades embed it into a `QueryInfo` instead of
//! returning it. Every other variant propagates to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        /// Native engine error code, when the engine reported one
        code: Option<String>,
        suggestion: String,
    },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        code: Option<String>,
        /// Fully rendered query text
        query: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Access point not found: {name}")]
    AccessPointNotFound { name: String },

    #[error("Connection not found: {name}")]
    ConnectionNotFound { name: String },

    #[error("Unknown driver: {driver}")]
    UnknownDriver { driver: String },

    #[error("Operation '{operation}' is not supported by {driver}")]
    Unsupported { driver: String, operation: String },

    #[error("Migration of storage '{storage}' failed: {message}")]
    Migration { storage: String, message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            code: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error with an optional native code.
    pub fn query(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            code,
            query: String::new(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an access point not found error.
    pub fn access_point_not_found(name: impl Into<String>) -> Self {
        Self::AccessPointNotFound { name: name.into() }
    }

    /// Create a connection not found error.
    pub fn connection_not_found(name: impl Into<String>) -> Self {
        Self::ConnectionNotFound { name: name.into() }
    }

    /// Create an unknown driver error.
    pub fn unknown_driver(driver: impl Into<String>) -> Self {
        Self::UnknownDriver {
            driver: driver.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            driver: driver.into(),
            operation: operation.into(),
        }
    }

    /// Create a migration error.
    pub fn migration(storage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            storage: storage.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the rendered query text to a query error.
    pub fn with_query(mut self, text: impl Into<String>) -> Self {
        if let Self::Query { query, .. } = &mut self {
            *query = text.into();
        }
        self
    }

    /// Attach a native error code to a connection or query error.
    pub fn with_code(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Connection { code, .. } | Self::Query { code, .. } => *code = Some(value.into()),
            _ => {}
        }
        self
    }

    /// Bare message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Connection { message, .. }
            | Self::Query { message, .. }
            | Self::InvalidInput { message }
            | Self::Configuration { message }
            | Self::Migration { message, .. }
            | Self::Internal { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Native engine error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Connection { code, .. } | Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Rendered query text carried by a query error.
    pub fn query_text(&self) -> Option<&str> {
        match self {
            Self::Query { query, .. } if !query.is_empty() => Some(query),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Whether facades convert this error into a failed `QueryInfo`.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::query("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection is closed", "Reopen the access point")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::query(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::query(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert MsSql client errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;
        match err {
            TdsError::Server(token) => DbError::query(token.message(), Some(token.code().to_string())),
            TdsError::Io { message, .. } => DbError::connection(
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Set the 'trust_cert' option for self-signed certificates",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            TdsError::Conversion(msg) => DbError::query(format!("Conversion error: {}", msg), None),
            other => DbError::connection(other.to_string(), "Check database server compatibility"),
        }
    }
}

/// Convert MongoDB client errors to DbError.
impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::Command(cmd) => DbError::query(cmd.message.clone(), Some(cmd.code.to_string())),
            ErrorKind::Write(_) | ErrorKind::InsertMany(_) | ErrorKind::BsonSerialization(_) => {
                DbError::query(err.to_string(), None)
            }
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. } => DbError::connection(
                err.to_string(),
                "Check the MongoDB host, port and credentials",
            ),
            _ => DbError::internal(format!("MongoDB error: {}", err)),
        }
    }
}

/// Convert HTTP client errors (Solr) to DbError.
impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::timeout("solr request", 0)
        } else if err.is_connect() {
            DbError::connection(err.to_string(), "Check that the Solr server is reachable")
        } else if let Some(status) = err.status() {
            DbError::query(err.to_string(), Some(status.as_u16().to_string()))
        } else if err.is_decode() {
            DbError::query(format!("Invalid Solr response: {}", err), None)
        } else {
            DbError::connection(err.to_string(), "Check the Solr endpoint")
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::configuration(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for DbError {
    fn from(err: serde_yaml::Error) -> Self {
        DbError::configuration(format!("YAML error: {}", err))
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::connection(format!("I/O error: {}", err), "Check file and network access")
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
        let err = DbError::migration("users", "duplicate column");
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection("refused", "Check the host");
        assert_eq!(err.suggestion(), Some("Check the host"));
        assert_eq!(DbError::internal("x").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::invalid_input("bad").is_retryable());
    }

    #[test]
    fn test_query_error_family() {
        let err = DbError::query("syntax error", Some("42601".to_string()))
            .with_query("SELEC 1");
        assert!(err.is_query_error());
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(err.query_text(), Some("SELEC 1"));
        assert_eq!(err.message(), "syntax error");

        assert!(!DbError::configuration("bad").is_query_error());
        assert!(!DbError::access_point_not_found("main").is_query_error());
    }

    #[test]
    fn test_with_query_ignores_other_variants() {
        let err = DbError::internal("boom").with_query("select 1");
        assert!(err.query_text().is_none());
    }

    #[test]
    fn test_with_code_on_connection() {
        let err = DbError::connection("denied", "check user").with_code("1045");
        assert_eq!(err.code(), Some("1045"));
    }
}
