//! Driver seam: connection primitives and per-dialect placeholder rendering.
//!
//! A [`Driver`] hands out [`Connection`]s for the primary or a replica. The
//! [`DriverAdapter`] is the last step of assembly: it turns the parameter
//! references of a [`Sql`] fragment into dialect placeholders and collects the
//! bound values in exactly the order the driver will consume them.

use crate::dialect::{Capabilities, PlaceholderStyle};
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::sql::{Sql, SqlPart};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Which endpoint a query runner talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicationMode {
    #[default]
    Master,
    Slave,
}

/// Raw outcome of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Rows affected by a write, when the driver reports it
    pub affected: Option<u64>,
    /// Auto-increment id of the first inserted row (drivers without RETURNING)
    pub last_insert_id: Option<i64>,
}

impl QueryResult {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            affected: Some(rows.len() as u64),
            rows,
            last_insert_id: None,
        }
    }

    pub fn with_affected(affected: u64) -> Self {
        Self {
            affected: Some(affected),
            ..Self::default()
        }
    }
}

/// One checked-out session.
#[async_trait]
pub trait Connection: Send {
    /// Execute `sql` with positional `params`.
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<QueryResult>;

    /// Give the session back to its pool.
    async fn release(self: Box<Self>) -> OrmResult<()>;
}

/// Connection factory for one backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Syntax features of the backend.
    fn capabilities(&self) -> &'static Capabilities;

    /// Check out a session for the primary or a replica.
    async fn connect(&self, mode: ReplicationMode) -> OrmResult<Box<dyn Connection>>;

    /// Whether read replicas are configured.
    fn has_replicas(&self) -> bool {
        false
    }
}

/// Placeholder creation, identifier escaping and parameter ordering for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct DriverAdapter {
    caps: &'static Capabilities,
}

impl DriverAdapter {
    pub fn new(caps: &'static Capabilities) -> Self {
        Self { caps }
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        self.caps
    }

    /// Placeholder for the parameter at 1-based `position`.
    pub fn create_parameter(&self, _name: &str, position: usize) -> String {
        match self.caps.placeholder {
            PlaceholderStyle::Dollar => format!("${position}"),
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::AtP => format!("@p{position}"),
            PlaceholderStyle::Colon => format!(":{position}"),
        }
    }

    pub fn escape(&self, ident: &str) -> String {
        self.caps.escape(ident)
    }

    /// Replace parameter references with placeholders.
    ///
    /// Keys resolve against `native` first, then `named`. The returned values are
    /// ordered by placeholder position; for `?` dialects every occurrence binds its
    /// own copy, for indexed dialects a repeated key reuses its placeholder.
    pub fn finalize(
        &self,
        sql: &Sql,
        named: &HashMap<String, Value>,
        native: &HashMap<String, Value>,
    ) -> OrmResult<(String, Vec<Value>)> {
        let indexed = self.caps.placeholder.is_indexed();
        let mut out = String::new();
        let mut values: Vec<Value> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        let lookup = |key: &str| -> OrmResult<&Value> {
            native
                .get(key)
                .or_else(|| named.get(key))
                .ok_or_else(|| OrmError::MissingParameter(key.to_string()))
        };

        let mut bind = |out: &mut String, values: &mut Vec<Value>, slot: String, value: &Value| {
            if indexed {
                if let Some(&pos) = positions.get(&slot) {
                    out.push_str(&self.create_parameter(&slot, pos));
                    return;
                }
            }
            values.push(value.clone());
            let pos = values.len();
            out.push_str(&self.create_parameter(&slot, pos));
            if indexed {
                positions.insert(slot, pos);
            }
        };

        for part in sql.parts() {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param(key) => {
                    let value = lookup(key)?;
                    bind(&mut out, &mut values, key.clone(), value);
                }
                SqlPart::Spread(key) => match lookup(key)? {
                    Value::Array(items) if items.is_empty() => out.push_str("NULL"),
                    Value::Array(items) => {
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            let mut slot = key.clone();
                            let _ = write!(slot, "#{i}");
                            bind(&mut out, &mut values, slot, item);
                        }
                    }
                    single => bind(&mut out, &mut values, key.clone(), single),
                },
            }
        }
        Ok((out, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MSSQL, MYSQL, ORACLE, POSTGRES};

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn dollar_style_reuses_index_for_repeated_key() {
        let sql = Sql::parse_named("a = :x OR b = :x OR c = :y");
        let named = params(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let (text, values) = DriverAdapter::new(&POSTGRES)
            .finalize(&sql, &named, &HashMap::new())
            .unwrap();
        assert_eq!(text, "a = $1 OR b = $1 OR c = $2");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn question_style_binds_every_occurrence() {
        let sql = Sql::parse_named("a = :x OR b = :y OR c = :x");
        let named = params(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let (text, values) = DriverAdapter::new(&MYSQL)
            .finalize(&sql, &named, &HashMap::new())
            .unwrap();
        assert_eq!(text, "a = ? OR b = ? OR c = ?");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn spread_expands_arrays_and_empty_renders_null() {
        let sql = Sql::parse_named("id IN (:...ids) AND x IN (:...none)");
        let named = params(&[
            ("ids", Value::array([1, 2, 3])),
            ("none", Value::Array(vec![])),
        ]);
        let (text, values) = DriverAdapter::new(&MSSQL)
            .finalize(&sql, &named, &HashMap::new())
            .unwrap();
        assert_eq!(text, "id IN (@p1, @p2, @p3) AND x IN (NULL)");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn native_wins_and_missing_is_an_error() {
        let mut sql = Sql::new("a = ");
        sql.push_param("k");
        let named = params(&[("k", Value::Int(1))]);
        let native = params(&[("k", Value::Int(9))]);
        let (text, values) = DriverAdapter::new(&ORACLE).finalize(&sql, &named, &native).unwrap();
        assert_eq!(text, "a = :1");
        assert_eq!(values, vec![Value::Int(9)]);

        let err = DriverAdapter::new(&ORACLE)
            .finalize(&Sql::parse_named("a = :missing"), &named, &native)
            .unwrap_err();
        assert!(matches!(err, OrmError::MissingParameter(ref k) if k == "missing"));
    }
}
