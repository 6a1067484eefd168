//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// What to do when a property path does not resolve to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownColumnPolicy {
    /// Fail compilation with `OrmError::UnknownColumn`.
    #[default]
    Error,
    /// Log a warning and drop the offending condition.
    WarnAndDrop,
}

/// How a `null` value in a structured condition compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullValues {
    /// `column IS NULL`
    #[default]
    IsNull,
    /// Skip the key
    Exclude,
    /// Reject with `OrmError::InvalidCondition`
    Throw,
}

/// How an absent (undefined) value in a structured condition compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UndefinedValues {
    /// Skip the key
    #[default]
    Exclude,
    /// `column IS NULL`
    IsNull,
    /// Reject with `OrmError::InvalidCondition`
    Throw,
}

/// Interpretation of null and absent values in structured conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NullPolicy {
    pub null_values: NullValues,
    pub undefined_values: UndefinedValues,
}

impl NullPolicy {
    pub fn new(null_values: NullValues, undefined_values: UndefinedValues) -> Self {
        Self {
            null_values,
            undefined_values,
        }
    }
}

/// Configuration shared by every query built from one data source.
///
/// ```ignore
/// let config = OrmConfig::new()
///     .with_unknown_column(UnknownColumnPolicy::WarnAndDrop)
///     .with_slow_query_threshold(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    pub unknown_column: UnknownColumnPolicy,
    pub null_policy: NullPolicy,
    /// Statements slower than this are reported through `log_query_slow`.
    pub max_query_execution_time: Option<Duration>,
    /// Server-side execution limit attached to SELECT text where the dialect has a hint for it.
    pub max_execution_time_hint: Option<Duration>,
    /// Maximum SQL length written to logs (bytes).
    pub max_logged_sql_length: Option<usize>,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            unknown_column: UnknownColumnPolicy::Error,
            null_policy: NullPolicy::default(),
            max_query_execution_time: None,
            max_execution_time_hint: None,
            max_logged_sql_length: Some(2048),
        }
    }
}

impl OrmConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unknown column policy.
    pub fn with_unknown_column(mut self, policy: UnknownColumnPolicy) -> Self {
        self.unknown_column = policy;
        self
    }

    /// Set the null/undefined interpretation for structured conditions.
    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Set the slow query threshold.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.max_query_execution_time = Some(threshold);
        self
    }

    /// Attach a server-side execution limit to SELECT statements.
    pub fn with_max_execution_time_hint(mut self, limit: Duration) -> Self {
        self.max_execution_time_hint = Some(limit);
        self
    }

    /// Set maximum SQL length written to logs.
    pub fn with_max_logged_sql_length(mut self, len: usize) -> Self {
        self.max_logged_sql_length = Some(len);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_policy_reads_from_json() {
        let policy: NullPolicy =
            serde_json::from_str(r#"{"nullValues": "is-null", "undefinedValues": "exclude"}"#).unwrap();
        assert_eq!(policy, NullPolicy::new(NullValues::IsNull, UndefinedValues::Exclude));

        let policy: NullPolicy = serde_json::from_str(r#"{"undefinedValues": "is-null"}"#).unwrap();
        assert_eq!(policy.undefined_values, UndefinedValues::IsNull);
        assert_eq!(policy.null_values, NullValues::IsNull);
    }

    #[test]
    fn defaults_fail_on_unknown_columns() {
        let config = OrmConfig::new();
        assert_eq!(config.unknown_column, UnknownColumnPolicy::Error);
        assert_eq!(config.null_policy.undefined_values, UndefinedValues::Exclude);
    }
}
