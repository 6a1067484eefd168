//! Error types for polyorm

use crate::value::Value;
use thiserror::Error;

/// Result type alias for polyorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query construction and execution
#[derive(Debug, Error)]
pub enum OrmError {
    // ── Configuration ──
    /// A WHERE/RETURNING step needs column resolution but no main alias is set
    #[error("Main alias is not set; call from()/into()/update() first")]
    MissingMainAlias,

    /// No entity metadata is registered for a target
    #[error("No metadata found for entity '{target}'")]
    MissingMetadata { target: String },

    /// Alias names are unique within one query
    #[error("Alias '{0}' is already defined in this query")]
    DuplicateAlias(String),

    /// Soft delete / restore against an entity without a delete date column
    #[error("Entity '{entity}' has no delete date column")]
    MissingDeleteDateColumn { entity: String },

    /// A relation path did not resolve against the entity metadata
    #[error("Relation '{path}' not found on entity '{entity}'")]
    UnknownRelation { entity: String, path: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    // ── Compilation ──
    /// Alias referenced by a condition or join is not defined
    #[error("Alias '{0}' is not defined in this query")]
    UnknownAlias(String),

    /// Property path did not resolve to any column
    #[error("Property '{path}' was not found on alias '{alias}'")]
    UnknownColumn { alias: String, path: String },

    /// Invalid shape of a where input or operator misuse
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Feature not supported by the selected dialect
    #[error("{feature} is not supported by {dialect}")]
    Unsupported {
        dialect: &'static str,
        feature: String,
    },

    /// A placeholder references a parameter that was never set
    #[error("Parameter '{0}' is referenced but not set")]
    MissingParameter(String),

    // ── Resource lifecycle ──
    /// Operation attempted on a released query runner
    #[error("Query runner is released; create a new one")]
    QueryRunnerReleased,

    /// `release()` called twice
    #[error("Query runner was already released")]
    QueryRunnerAlreadyReleased,

    /// Commit/rollback without an active transaction
    #[error("Transaction is not started")]
    TransactionNotStarted,

    /// Pessimistic lock used outside a transaction
    #[error("Pessimistic lock requires an active transaction")]
    LockRequiresTransaction,

    // ── Execution ──
    /// Statement failed; carries the statement for diagnostics
    #[error("Query failed: {source} (sql: {sql})")]
    QueryFailed {
        sql: String,
        parameters: Vec<Value>,
        #[source]
        source: Box<OrmError>,
    },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver-level error
    #[error("Driver error: {0}")]
    Driver(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid condition error
    pub fn invalid_condition(message: impl Into<String>) -> Self {
        Self::InvalidCondition(message.into())
    }

    /// Create an unsupported-feature error for a dialect
    pub fn unsupported(dialect: &'static str, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect,
            feature: feature.into(),
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(alias: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownColumn {
            alias: alias.into(),
            path: path.into(),
        }
    }

    /// Wrap a driver error with the statement that caused it
    pub fn query_failed(source: OrmError, sql: impl Into<String>, parameters: &[Value]) -> Self {
        Self::QueryFailed {
            sql: sql.into(),
            parameters: parameters.to_vec(),
            source: Box::new(source),
        }
    }

    /// The driver error underneath any `QueryFailed` wrapping.
    pub fn root(&self) -> &OrmError {
        match self {
            Self::QueryFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.root(), Self::UniqueViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Check if this error comes from using a released query runner
    pub fn is_released(&self) -> bool {
        matches!(
            self.root(),
            Self::QueryRunnerReleased | Self::QueryRunnerAlreadyReleased
        )
    }

    /// Check if this is an unknown column error
    pub fn is_unknown_column(&self) -> bool {
        matches!(self, Self::UnknownColumn { .. })
    }

    /// Check if this error was raised while compiling a statement
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            Self::UnknownAlias(_)
                | Self::UnknownColumn { .. }
                | Self::InvalidCondition(_)
                | Self::Unsupported { .. }
                | Self::MissingParameter(_)
        )
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    #[cfg(feature = "postgres")]
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{constraint}: {message}")),
                "23503" => return Self::ForeignKeyViolation(format!("{constraint}: {message}")),
                "23514" => return Self::CheckViolation(format!("{constraint}: {message}")),
                "57014" => return Self::Driver(format!("statement canceled: {message}")),
                _ => {}
            }
        }
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Driver(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
