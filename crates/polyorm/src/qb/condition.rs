//! WHERE / HAVING inputs and their compilation.
//!
//! A condition is one of:
//!
//! - SQL text, where `alias.property` chains are resolved to columns and
//!   `:name` references named parameters;
//! - a [`FindWhere`] object, property → value or [`FindOperator`], keys
//!   combined with AND;
//! - a list of `FindWhere` objects, combined with OR ("any of these");
//! - [`Brackets`], a parenthesized group built by a nested closure.
//!
//! Values from structured conditions never reach the SQL text. Each one is
//! stored as a native parameter under a key derived from its structural
//! position (`where_{clause}_{property}_{column}`), so the same property in two
//! OR'd objects never collides.

use crate::config::{NullValues, UndefinedValues};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, MetadataRegistry, RelationMetadata};
use crate::qb::alias::Alias;
use crate::qb::assembler::Assembler;
use crate::qb::operator::FindOperator;
use crate::qb::resolver::resolve_property;
use crate::sql::Sql;
use crate::value::Value;

/// How a where item attaches to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    And,
    Or,
    /// First item; rendered like `And` if it ends up in a later position
    #[default]
    None,
}

/// One recorded where/having item.
#[derive(Debug, Clone)]
pub struct WhereClause {
    pub conjunction: Conjunction,
    pub condition: WhereCondition,
}

#[derive(Debug, Clone)]
pub enum WhereCondition {
    Text(String),
    Object(FindWhere),
    /// OR over the objects
    AnyOf(Vec<FindWhere>),
    Brackets(Brackets),
}

impl From<&str> for WhereCondition {
    fn from(s: &str) -> Self {
        WhereCondition::Text(s.to_string())
    }
}

impl From<String> for WhereCondition {
    fn from(s: String) -> Self {
        WhereCondition::Text(s)
    }
}

impl From<FindWhere> for WhereCondition {
    fn from(w: FindWhere) -> Self {
        WhereCondition::Object(w)
    }
}

impl From<Vec<FindWhere>> for WhereCondition {
    fn from(list: Vec<FindWhere>) -> Self {
        WhereCondition::AnyOf(list)
    }
}

impl From<Brackets> for WhereCondition {
    fn from(b: Brackets) -> Self {
        WhereCondition::Brackets(b)
    }
}

/// Value of one property in a [`FindWhere`].
#[derive(Debug, Clone, PartialEq)]
pub enum WhereField {
    Value(Value),
    /// Property present but without a value; interpreted by `UndefinedValues`
    Undefined,
    Operator(FindOperator),
    /// Embedded object or relation
    Nested(FindWhere),
}

/// Structured condition: property → value, combined with AND.
///
/// ```ignore
/// let cond = FindWhere::new()
///     .eq("status", "published")
///     .op("viewCount", FindOperator::MoreThan(10.into()))
///     .nested("author", FindWhere::new().eq("name", "ann"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindWhere {
    pub entries: Vec<(String, WhereField)>,
}

impl FindWhere {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(mut self, key: impl Into<String>, field: WhereField) -> Self {
        self.entries.push((key.into(), field));
        self
    }

    /// `property = value` (`IS NULL` for a null value under the default policy).
    pub fn eq(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(key, WhereField::Value(value.into()))
    }

    pub fn op(self, key: impl Into<String>, op: FindOperator) -> Self {
        self.field(key, WhereField::Operator(op))
    }

    pub fn null(self, key: impl Into<String>) -> Self {
        self.field(key, WhereField::Value(Value::Null))
    }

    pub fn undefined(self, key: impl Into<String>) -> Self {
        self.field(key, WhereField::Undefined)
    }

    /// `None` becomes an undefined property.
    pub fn opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(key, v),
            None => self.undefined(key),
        }
    }

    pub fn nested(self, key: impl Into<String>, nested: FindWhere) -> Self {
        self.field(key, WhereField::Nested(nested))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parenthesized group of where items, optionally negated.
///
/// ```ignore
/// qb.where_("p.status = :s")
///     .and_where(Brackets::new(|b| b.where_("p.a = 1").or_where("p.b = 2")));
/// // ... WHERE p.status = $1 AND (p.a = 1 OR p.b = 2)
/// ```
#[derive(Debug, Clone, Default)]
pub struct Brackets {
    pub negated: bool,
    pub clauses: Vec<WhereClause>,
    pub parameters: Vec<(String, Value)>,
}

impl Brackets {
    pub fn new(build: impl FnOnce(WhereExpressionBuilder) -> WhereExpressionBuilder) -> Self {
        let b = build(WhereExpressionBuilder::default());
        Self {
            negated: false,
            clauses: b.clauses,
            parameters: b.parameters,
        }
    }

    /// `NOT (...)`
    pub fn not(build: impl FnOnce(WhereExpressionBuilder) -> WhereExpressionBuilder) -> Self {
        Self {
            negated: true,
            ..Self::new(build)
        }
    }
}

/// Collects where items inside [`Brackets`].
#[derive(Debug, Default)]
pub struct WhereExpressionBuilder {
    clauses: Vec<WhereClause>,
    parameters: Vec<(String, Value)>,
}

impl WhereExpressionBuilder {
    fn push(mut self, conjunction: Conjunction, condition: impl Into<WhereCondition>) -> Self {
        self.clauses.push(WhereClause {
            conjunction,
            condition: condition.into(),
        });
        self
    }

    pub fn where_(self, condition: impl Into<WhereCondition>) -> Self {
        self.push(Conjunction::None, condition)
    }

    pub fn and_where(self, condition: impl Into<WhereCondition>) -> Self {
        self.push(Conjunction::And, condition)
    }

    pub fn or_where(self, condition: impl Into<WhereCondition>) -> Self {
        self.push(Conjunction::Or, condition)
    }

    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

/// Whether a nested object on `relation` only touches the relation's own
/// foreign-key columns, so it compiles without joining the related table.
pub(crate) fn nested_uses_join_columns(
    entity: &EntityMetadata,
    registry: &MetadataRegistry,
    relation: &RelationMetadata,
    nested: &FindWhere,
) -> bool {
    relation.owns_join_columns()
        && nested.entries.iter().all(|(key, field)| {
            !matches!(field, WhereField::Nested(_))
                && !resolve_property(entity, registry, &format!("{}.{key}", relation.property_path))
                    .is_empty()
        })
}

/// Alias given to a relation joined implicitly by a nested condition.
pub(crate) fn implicit_join_alias(parent: &str, relation_path: &str) -> String {
    format!("{parent}_{}", relation_path.replace('.', "_"))
}

impl Assembler<'_> {
    /// Compile where/having items into one boolean expression, `None` when
    /// nothing restricts the rows.
    pub(crate) fn compile_where_clauses(
        &mut self,
        clauses: &[WhereClause],
        alias: &str,
        key: &str,
    ) -> OrmResult<Option<Sql>> {
        let mut out = Sql::empty();
        let mut emitted = 0usize;
        for (i, clause) in clauses.iter().enumerate() {
            let item_key = format!("{key}_{i}");
            let compiled = match self.compile_condition(&clause.condition, alias, &item_key) {
                Ok(sql) => sql,
                Err(err) => {
                    self.tolerate_unknown_column(err)?;
                    None
                }
            };
            let Some(sql) = compiled else { continue };
            if emitted > 0 {
                out.push(match clause.conjunction {
                    Conjunction::Or => " OR ",
                    Conjunction::And | Conjunction::None => " AND ",
                });
            }
            out.push_sql(sql);
            emitted += 1;
        }
        Ok((emitted > 0).then_some(out))
    }

    fn compile_condition(
        &mut self,
        condition: &WhereCondition,
        alias: &str,
        key: &str,
    ) -> OrmResult<Option<Sql>> {
        match condition {
            WhereCondition::Text(text) if text.trim().is_empty() => Ok(None),
            WhereCondition::Text(text) => self.compile_text(text).map(Some),
            WhereCondition::Object(object) => {
                let parts = self.compile_find_where(object, alias, key)?;
                Ok(join_and(parts))
            }
            WhereCondition::AnyOf(list) => {
                let mut alternatives = Vec::with_capacity(list.len());
                for (a, object) in list.iter().enumerate() {
                    let parts = self.compile_find_where(object, alias, &format!("{key}_{a}"))?;
                    match join_and(parts) {
                        Some(sql) => alternatives.push(sql),
                        // An unrestricted alternative matches every row.
                        None => return Ok(None),
                    }
                }
                match alternatives.len() {
                    0 => Ok(None),
                    1 => Ok(alternatives.pop()),
                    _ => {
                        let mut sql = Sql::empty();
                        sql.push_joined(alternatives, " OR ");
                        Ok(Some(sql.parenthesized()))
                    }
                }
            }
            WhereCondition::Brackets(brackets) => {
                let Some(inner) = self.compile_where_clauses(&brackets.clauses, alias, key)? else {
                    return Ok(None);
                };
                let mut sql = Sql::new(if brackets.negated { "NOT (" } else { "(" });
                sql.push_sql(inner);
                sql.push(")");
                Ok(Some(sql))
            }
        }
    }

    /// Compile one object into AND-ed parts.
    pub(crate) fn compile_find_where(
        &mut self,
        object: &FindWhere,
        alias_name: &str,
        key: &str,
    ) -> OrmResult<Vec<Sql>> {
        let map = self.map;
        let alias = map.alias(alias_name)?;
        let mut parts = Vec::new();
        for (j, (path, field)) in object.entries.iter().enumerate() {
            match self.compile_field(alias, path, field, &format!("{key}_{j}")) {
                Ok(mut compiled) => parts.append(&mut compiled),
                Err(err) => self.tolerate_unknown_column(err)?,
            }
        }
        Ok(parts)
    }

    fn compile_field(
        &mut self,
        alias: &Alias,
        path: &str,
        field: &WhereField,
        key: &str,
    ) -> OrmResult<Vec<Sql>> {
        let policy = self.env.config.null_policy;
        let op = match field {
            WhereField::Undefined => match policy.undefined_values {
                UndefinedValues::Exclude => return Ok(Vec::new()),
                UndefinedValues::IsNull => FindOperator::IsNull,
                UndefinedValues::Throw => {
                    return Err(OrmError::invalid_condition(format!(
                        "undefined value for property '{path}'"
                    )));
                }
            },
            WhereField::Value(Value::Null) => match policy.null_values {
                NullValues::IsNull => FindOperator::IsNull,
                NullValues::Exclude => return Ok(Vec::new()),
                NullValues::Throw => {
                    return Err(OrmError::invalid_condition(format!(
                        "null value for property '{path}'"
                    )));
                }
            },
            WhereField::Value(v) => FindOperator::Equal(v.clone()),
            WhereField::Operator(op) => op.clone(),
            WhereField::Nested(nested) => return self.compile_nested(alias, path, nested, key),
        };

        let Some(entity) = alias.metadata.as_deref() else {
            let column = self.column_ref(&alias.name, path);
            return Ok(vec![op.render(&column, None, key, self.env.caps, &mut self.native)?]);
        };
        let targets = resolve_property(entity, self.env.registry, path);
        if targets.is_empty() {
            return Err(OrmError::unknown_column(&alias.name, path));
        }
        let mut parts = Vec::with_capacity(targets.len());
        for (c, target) in targets.iter().enumerate() {
            let column = self.column_ref(&alias.name, target.database_name());
            parts.push(op.render(
                &column,
                target.metadata(),
                &format!("{key}_{c}"),
                self.env.caps,
                &mut self.native,
            )?);
        }
        Ok(parts)
    }

    fn compile_nested(
        &mut self,
        alias: &Alias,
        path: &str,
        nested: &FindWhere,
        key: &str,
    ) -> OrmResult<Vec<Sql>> {
        let Some(entity) = alias.metadata.as_deref() else {
            return Err(OrmError::invalid_condition(format!(
                "nested condition on '{path}' needs an entity alias"
            )));
        };
        if let Some(relation) = entity.find_relation_with_property_path(path) {
            if !nested_uses_join_columns(entity, self.env.registry, relation, nested) {
                let joined = implicit_join_alias(&alias.name, path);
                return self.compile_find_where(nested, &joined, key);
            }
        }
        // Embedded object, or a relation compared through its foreign key
        let mut parts = Vec::new();
        for (j, (sub, field)) in nested.entries.iter().enumerate() {
            let sub_path = format!("{path}.{sub}");
            match self.compile_field(alias, &sub_path, field, &format!("{key}_{j}")) {
                Ok(mut compiled) => parts.append(&mut compiled),
                Err(err) => self.tolerate_unknown_column(err)?,
            }
        }
        Ok(parts)
    }
}

fn join_and(mut parts: Vec<Sql>) -> Option<Sql> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => {
            let mut sql = Sql::empty();
            sql.push_joined(parts, " AND ");
            Some(sql.parenthesized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_where_keeps_call_order() {
        let w = FindWhere::new().eq("a", 1).null("b").opt::<i64>("c", None);
        let keys: Vec<_> = w.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(w.entries[2].1, WhereField::Undefined);
    }

    #[test]
    fn brackets_collect_clauses_and_parameters() {
        let b = Brackets::not(|b| {
            b.where_("p.a = :a")
                .or_where("p.b = 2")
                .set_parameter("a", 1)
        });
        assert!(b.negated);
        assert_eq!(b.clauses.len(), 2);
        assert_eq!(b.clauses[1].conjunction, Conjunction::Or);
        assert_eq!(b.parameters, vec![("a".to_string(), Value::Int(1))]);
    }
}
