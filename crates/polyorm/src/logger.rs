//! Query logging.
//!
//! The runner reports every statement to a [`QueryLogger`]. Logging is
//! fire-and-forget: a logger cannot fail a query or change its result.
//!
//! The default [`TracingLogger`] emits `tracing` events on the `polyorm.sql`
//! target:
//!
//! ```ignore
//! use polyorm::logger::TracingLogger;
//! use tracing::Level;
//!
//! let logger = TracingLogger::new().level(Level::INFO).max_sql_length(500);
//! let data_source = DataSource::builder(driver).logger(logger).build();
//! ```

use crate::sql::{starts_with_keyword, strip_sql_prefix};
use crate::value::Value;
use std::time::Duration;
use tracing::Level;

/// Truncate a SQL string to at most `max_bytes`, respecting UTF-8 char boundaries.
pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// The kind of statement being logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Transaction control (`BEGIN`, `SAVEPOINT`, `COMMIT`, ...)
    Transaction,
    Other,
}

impl StatementKind {
    /// Detect the statement kind from SQL text.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = strip_sql_prefix(sql);
        const TRANSACTION_KEYWORDS: [&str; 7] = [
            "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "SET TRANSACTION",
        ];
        if starts_with_keyword(trimmed, "SELECT") || starts_with_keyword(trimmed, "WITH") {
            StatementKind::Select
        } else if starts_with_keyword(trimmed, "INSERT") || starts_with_keyword(trimmed, "MERGE") {
            StatementKind::Insert
        } else if starts_with_keyword(trimmed, "UPDATE") {
            StatementKind::Update
        } else if starts_with_keyword(trimmed, "DELETE") {
            StatementKind::Delete
        } else if TRANSACTION_KEYWORDS.iter().any(|k| starts_with_keyword(trimmed, k)) {
            StatementKind::Transaction
        } else {
            StatementKind::Other
        }
    }
}

/// Sink for query lifecycle events.
pub trait QueryLogger: Send + Sync {
    /// A statement is about to run.
    fn log_query(&self, _sql: &str, _params: &[Value]) {}

    /// A statement finished after exceeding the slow query threshold.
    fn log_query_slow(&self, _elapsed: Duration, _sql: &str, _params: &[Value]) {}

    /// A statement failed.
    fn log_query_error(&self, _error: &str, _sql: &str, _params: &[Value]) {}

    /// Schema build progress. The engine itself never builds schemas.
    fn log_schema_build(&self, _message: &str) {}

    /// Free-form message.
    fn log(&self, _level: Level, _message: &str) {}
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl QueryLogger for NoopLogger {}

/// A `tracing`-based logger emitting the SQL that is actually executed.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    /// Tracing event level for successful statements.
    pub level: Level,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
    /// Include parameter values in events.
    pub log_parameters: bool,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(2048),
            log_parameters: false,
        }
    }
}

impl TracingLogger {
    /// Create a new logger with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tracing event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set maximum SQL length to display.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    /// Include bound parameter values in events.
    pub fn with_parameters(mut self) -> Self {
        self.log_parameters = true;
        self
    }

    fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }

    fn params_field(&self, params: &[Value]) -> String {
        if self.log_parameters {
            format!("{params:?}")
        } else {
            format!("<{} hidden>", params.len())
        }
    }
}

/// Dispatch a tracing event at a runtime-determined level.
macro_rules! emit_at_level {
    ($level:expr, $($field:tt)*) => {
        match $level {
            Level::ERROR => tracing::error!($($field)*),
            Level::WARN  => tracing::warn!($($field)*),
            Level::INFO  => tracing::info!($($field)*),
            Level::DEBUG => tracing::debug!($($field)*),
            Level::TRACE => tracing::trace!($($field)*),
        }
    };
}

impl QueryLogger for TracingLogger {
    fn log_query(&self, sql: &str, params: &[Value]) {
        let sql_text = self.truncate_sql(sql);
        emit_at_level!(
            self.level,
            target: "polyorm.sql",
            kind = ?StatementKind::from_sql(sql),
            param_count = params.len(),
            params = %self.params_field(params),
            sql = %sql_text,
        );
    }

    fn log_query_slow(&self, elapsed: Duration, sql: &str, params: &[Value]) {
        tracing::warn!(
            target: "polyorm.sql",
            elapsed_ms = elapsed.as_millis() as u64,
            param_count = params.len(),
            sql = %self.truncate_sql(sql),
            "slow query"
        );
    }

    fn log_query_error(&self, error: &str, sql: &str, params: &[Value]) {
        tracing::error!(
            target: "polyorm.sql",
            error,
            param_count = params.len(),
            params = %self.params_field(params),
            sql = %self.truncate_sql(sql),
            "query failed"
        );
    }

    fn log_schema_build(&self, message: &str) {
        tracing::info!(target: "polyorm.schema", "{message}");
    }

    fn log(&self, level: Level, message: &str) {
        emit_at_level!(level, target: "polyorm", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_kind_detection() {
        assert_eq!(StatementKind::from_sql("SELECT 1"), StatementKind::Select);
        assert_eq!(
            StatementKind::from_sql("/* c */ WITH x AS (SELECT 1) SELECT * FROM x"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::from_sql("MERGE INTO [t] USING ..."),
            StatementKind::Insert
        );
        assert_eq!(StatementKind::from_sql("SAVEPOINT txn_1"), StatementKind::Transaction);
        assert_eq!(StatementKind::from_sql("CREATE TABLE x ()"), StatementKind::Other);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let logger = TracingLogger::new().max_sql_length(8);
        assert_eq!(logger.truncate_sql("SELECT 1"), "SELECT 1");
        assert_eq!(logger.truncate_sql("SELECT 'é' FROM t"), "SELECT '...");
        assert_eq!(truncate_sql_bytes("ééé", 3), "é");
    }
}
