//! Comparison operators usable as values of structured conditions.
//!
//! ```ignore
//! use polyorm::qb::{FindOperator, FindWhere};
//!
//! let cond = FindWhere::new()
//!     .op("viewCount", FindOperator::MoreThan(10.into()))
//!     .op("title", FindOperator::ilike("%rust%"))
//!     .op("id", FindOperator::in_list([1, 2, 3]));
//! ```

use crate::dialect::Capabilities;
use crate::error::{OrmError, OrmResult};
use crate::metadata::ColumnMetadata;
use crate::sql::Sql;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Raw SQL generated from the column reference.
///
/// The closure receives the rendered column (e.g. `"p"."title"`) and returns SQL
/// text that may reference `:name` parameters from `parameters`.
#[derive(Clone)]
pub struct RawSql {
    render: Arc<dyn Fn(&str) -> String + Send + Sync>,
    parameters: Vec<(String, Value)>,
}

impl fmt::Debug for RawSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSql")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RawSql {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.render, &other.render) && self.parameters == other.parameters
    }
}

/// Operator applied to one property in a [`FindWhere`](super::FindWhere).
#[derive(Debug, Clone, PartialEq)]
pub enum FindOperator {
    Equal(Value),
    Not(Box<FindOperator>),
    LessThan(Value),
    LessThanOrEqual(Value),
    MoreThan(Value),
    MoreThanOrEqual(Value),
    Like(Value),
    /// Case-insensitive LIKE; falls back to `UPPER(..) LIKE UPPER(..)`
    ILike(Value),
    Between(Value, Value),
    In(Vec<Value>),
    /// `= ANY(array)`, for dialects with array parameters
    Any(Vec<Value>),
    IsNull,
    Raw(RawSql),
}

impl FindOperator {
    pub fn not(inner: FindOperator) -> Self {
        FindOperator::Not(Box::new(inner))
    }

    pub fn not_equal(value: impl Into<Value>) -> Self {
        Self::not(FindOperator::Equal(value.into()))
    }

    pub fn like(pattern: impl Into<Value>) -> Self {
        FindOperator::Like(pattern.into())
    }

    pub fn ilike(pattern: impl Into<Value>) -> Self {
        FindOperator::ILike(pattern.into())
    }

    pub fn between(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        FindOperator::Between(from.into(), to.into())
    }

    pub fn in_list<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        FindOperator::In(values.into_iter().map(Into::into).collect())
    }

    pub fn any<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        FindOperator::Any(values.into_iter().map(Into::into).collect())
    }

    /// Raw SQL built from the column reference.
    pub fn raw(render: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self::raw_with(render, Vec::new())
    }

    /// Raw SQL with parameters referenced as `:name` in the generated text.
    pub fn raw_with(
        render: impl Fn(&str) -> String + Send + Sync + 'static,
        parameters: Vec<(String, Value)>,
    ) -> Self {
        FindOperator::Raw(RawSql {
            render: Arc::new(render),
            parameters,
        })
    }

    /// Render against `column`, storing bound values under `key` in `native`.
    pub(crate) fn render(
        &self,
        column: &str,
        meta: Option<&ColumnMetadata>,
        key: &str,
        caps: &Capabilities,
        native: &mut HashMap<String, Value>,
    ) -> OrmResult<Sql> {
        let binary = |op: &str, rhs: Sql| -> Sql {
            let mut sql = Sql::new(format!("{column} {op} "));
            sql.push_sql(rhs);
            sql
        };

        Ok(match self {
            FindOperator::Equal(Value::Null) | FindOperator::IsNull => Sql::new(format!("{column} IS NULL")),
            FindOperator::Equal(v) => binary("=", bind_value(native, meta, key.to_string(), v)),
            FindOperator::LessThan(v) => binary("<", bind_value(native, meta, key.to_string(), v)),
            FindOperator::LessThanOrEqual(v) => binary("<=", bind_value(native, meta, key.to_string(), v)),
            FindOperator::MoreThan(v) => binary(">", bind_value(native, meta, key.to_string(), v)),
            FindOperator::MoreThanOrEqual(v) => binary(">=", bind_value(native, meta, key.to_string(), v)),
            FindOperator::Like(v) => binary("LIKE", bind_value(native, meta, key.to_string(), v)),
            FindOperator::ILike(v) => {
                if caps.ilike {
                    binary("ILIKE", bind_value(native, meta, key.to_string(), v))
                } else {
                    let mut sql = Sql::new(format!("UPPER({column}) LIKE UPPER("));
                    sql.push_sql(bind_value(native, meta, key.to_string(), v));
                    sql.push(")");
                    sql
                }
            }
            FindOperator::Between(a, b) => {
                let mut sql = Sql::new(format!("{column} BETWEEN "));
                sql.push_sql(bind_value(native, meta, format!("{key}_0"), a));
                sql.push(" AND ");
                sql.push_sql(bind_value(native, meta, format!("{key}_1"), b));
                sql
            }
            FindOperator::In(values) if values.is_empty() => Sql::new("0=1"),
            FindOperator::In(values) => {
                let values: Vec<Value> = match meta {
                    Some(m) => values.iter().map(|v| m.to_database(v.clone())).collect(),
                    None => values.clone(),
                };
                native.insert(key.to_string(), Value::Array(values));
                let mut sql = Sql::new(format!("{column} IN ("));
                sql.push_spread(key);
                sql.push(")");
                sql
            }
            FindOperator::Any(values) => {
                if !caps.any_array {
                    return Err(OrmError::unsupported(caps.name, "ANY(array) operator"));
                }
                native.insert(key.to_string(), Value::Array(values.clone()));
                let mut sql = Sql::new(format!("{column} = ANY("));
                sql.push_param(key);
                sql.push(")");
                sql
            }
            FindOperator::Not(inner) => match inner.as_ref() {
                FindOperator::Equal(Value::Null) | FindOperator::IsNull => {
                    Sql::new(format!("{column} IS NOT NULL"))
                }
                FindOperator::Equal(v) => binary("!=", bind_value(native, meta, key.to_string(), v)),
                FindOperator::Not(_) => {
                    return Err(OrmError::invalid_condition("Not(Not(..)) is not allowed"));
                }
                other => {
                    let mut sql = Sql::new("NOT(");
                    sql.push_sql(other.render(column, meta, key, caps, native)?);
                    sql.push(")");
                    sql
                }
            },
            FindOperator::Raw(raw) => {
                for (name, value) in &raw.parameters {
                    crate::sql::validate_parameter_name(name)?;
                    native.insert(name.clone(), value.clone());
                }
                Sql::parse_named(&(raw.render)(column))
            }
        })
    }
}

fn bind_value(
    native: &mut HashMap<String, Value>,
    meta: Option<&ColumnMetadata>,
    key: String,
    value: &Value,
) -> Sql {
    let value = match meta {
        Some(m) => m.to_database(value.clone()),
        None => value.clone(),
    };
    native.insert(key.clone(), value);
    let mut sql = Sql::empty();
    sql.push_param(key);
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MYSQL, POSTGRES};

    fn render(op: FindOperator, caps: &Capabilities) -> (String, HashMap<String, Value>) {
        let mut native = HashMap::new();
        let sql = op.render("\"p\".\"title\"", None, "k", caps, &mut native).unwrap();
        (sql.to_named_sql(), native)
    }

    #[test]
    fn null_and_not_render_without_parameters() {
        assert_eq!(render(FindOperator::Equal(Value::Null), &POSTGRES).0, "\"p\".\"title\" IS NULL");
        assert_eq!(
            render(FindOperator::not(FindOperator::IsNull), &POSTGRES).0,
            "\"p\".\"title\" IS NOT NULL"
        );
        let (sql, native) = render(FindOperator::not_equal("a"), &POSTGRES);
        assert_eq!(sql, "\"p\".\"title\" != :k");
        assert_eq!(native["k"], Value::from("a"));
        assert_eq!(
            render(FindOperator::not(FindOperator::like("a%")), &POSTGRES).0,
            "NOT(\"p\".\"title\" LIKE :k)"
        );
    }

    #[test]
    fn ilike_follows_capabilities() {
        assert_eq!(render(FindOperator::ilike("%a%"), &POSTGRES).0, "\"p\".\"title\" ILIKE :k");
        assert_eq!(
            render(FindOperator::ilike("%a%"), &MYSQL).0,
            "UPPER(\"p\".\"title\") LIKE UPPER(:k)"
        );
    }

    #[test]
    fn in_and_between_use_distinct_keys() {
        let (sql, native) = render(FindOperator::in_list([1, 2]), &POSTGRES);
        assert_eq!(sql, "\"p\".\"title\" IN (:...k)");
        assert_eq!(native["k"], Value::array([1, 2]));
        assert_eq!(render(FindOperator::in_list(Vec::<i64>::new()), &POSTGRES).0, "0=1");

        let (sql, native) = render(FindOperator::between(1, 5), &POSTGRES);
        assert_eq!(sql, "\"p\".\"title\" BETWEEN :k_0 AND :k_1");
        assert_eq!(native.len(), 2);
    }

    #[test]
    fn any_requires_array_support() {
        let mut native = HashMap::new();
        let err = FindOperator::any([1])
            .render("c", None, "k", &MYSQL, &mut native)
            .unwrap_err();
        assert!(matches!(err, OrmError::Unsupported { dialect: "mysql", .. }));
    }

    #[test]
    fn raw_receives_the_column() {
        let op = FindOperator::raw_with(
            |col| format!("LENGTH({col}) > :min_len"),
            vec![("min_len".into(), Value::Int(3))],
        );
        let (sql, native) = render(op, &POSTGRES);
        assert_eq!(sql, "LENGTH(\"p\".\"title\") > :min_len");
        assert_eq!(native["min_len"], Value::Int(3));
    }
}
