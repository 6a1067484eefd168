//! Relation queries: linking and unlinking related rows without loading them.
//!
//! ```ignore
//! data_source
//!     .create_query_builder()
//!     .relation("Post", "tags")?
//!     .of([1])
//!     .add([3, 4])
//!     .await?;
//! ```
//!
//! | relation                         | `add` / `remove`                    | `set`                        |
//! |----------------------------------|-------------------------------------|------------------------------|
//! | many-to-many                     | junction INSERT / DELETE            | -                            |
//! | one-to-many                      | target foreign key UPDATE           | -                            |
//! | owner many-to-one / one-to-one   | -                                   | owner foreign key UPDATE     |
//! | inverse one-to-one               | -                                   | target foreign key UPDATEs   |

use crate::error::{OrmError, OrmResult};
use crate::metadata::{JoinColumn, RelationKind, RelationMetadata};
use crate::qb::alias::{AliasDescriptor, AliasType};
use crate::qb::builder::QueryBuilder;
use crate::qb::condition::{Conjunction, FindWhere, WhereClause, WhereCondition};
use crate::qb::expression_map::{ExpressionMap, QueryType, RelationTarget, ValueSet};
use crate::qb::operator::FindOperator;
use crate::value::Value;

/// Builder for relation queries.
#[derive(Debug, Clone)]
pub struct RelationQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl RelationQueryBuilder {
    impl_builder_common!();

    pub(crate) fn new(mut qb: QueryBuilder, relation: RelationMetadata) -> Self {
        qb.expression_map.relation = Some(RelationTarget {
            relation,
            of: Vec::new(),
        });
        Self { qb }
    }

    /// Rewrap a builder whose map already describes a relation query.
    pub(crate) fn resume(qb: QueryBuilder) -> Self {
        Self { qb }
    }

    /// Primary key values of the owning entities.
    pub fn of<T: Into<Value>>(mut self, ids: impl IntoIterator<Item = T>) -> Self {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        match self.qb.expression_map.relation.as_mut() {
            Some(target) => target.of = ids,
            None => self
                .qb
                .record_error(OrmError::validation("of() called on a builder without a relation")),
        }
        self
    }

    /// Link the related rows with these primary keys.
    pub async fn add<T: Into<Value>>(&self, ids: impl IntoIterator<Item = T>) -> OrmResult<()> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let statements = self.link_statements(&ids)?;
        self.run(statements).await
    }

    /// Unlink the related rows with these primary keys.
    pub async fn remove<T: Into<Value>>(&self, ids: impl IntoIterator<Item = T>) -> OrmResult<()> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let statements = self.unlink_statements(&ids)?;
        self.run(statements).await
    }

    /// Point a single-valued relation at `id`, or clear it with `None`.
    pub async fn set<T: Into<Value>>(&self, id: Option<T>) -> OrmResult<()> {
        let id = id.map(Into::into).unwrap_or(Value::Null);
        let statements = self.set_statements(id)?;
        self.run(statements).await
    }

    // ==================== Statement planning ====================

    fn target(&self) -> OrmResult<&RelationTarget> {
        let target = self
            .qb
            .expression_map
            .relation
            .as_ref()
            .ok_or_else(|| OrmError::validation("relation query without a relation"))?;
        if target.of.is_empty() {
            return Err(OrmError::validation("relation query needs of() before running"));
        }
        Ok(target)
    }

    fn link_statements(&self, ids: &[Value]) -> OrmResult<Vec<ExpressionMap>> {
        let target = self.target()?;
        let relation = &target.relation;
        match relation.kind {
            RelationKind::ManyToMany => {
                let junction = junction(relation)?;
                let owner = single_column(&junction.owner_columns, relation)?;
                let inverse = single_column(&junction.inverse_columns, relation)?;
                let rows = target
                    .of
                    .iter()
                    .flat_map(|of| {
                        ids.iter().map(move |id| {
                            ValueSet::new()
                                .set(owner.name.clone(), of.clone())
                                .set(inverse.name.clone(), id.clone())
                        })
                    })
                    .collect::<Vec<_>>();
                if rows.is_empty() {
                    return Ok(Vec::new());
                }
                let mut map = table_map(QueryType::Insert, &junction.table_path)?;
                map.value_sets = rows;
                Ok(vec![map])
            }
            RelationKind::OneToMany => {
                let owner = single_owner(target)?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let foreign = single_column(&relation.join_columns, relation)?;
                let mut map = self.target_table_update(relation, &foreign.name, owner.clone())?;
                map.add_where(in_clause(Conjunction::None, &self.target_primary(relation)?, ids));
                Ok(vec![map])
            }
            _ => Err(wrong_operation(relation, "add", "set")),
        }
    }

    fn unlink_statements(&self, ids: &[Value]) -> OrmResult<Vec<ExpressionMap>> {
        let target = self.target()?;
        let relation = &target.relation;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        match relation.kind {
            RelationKind::ManyToMany => {
                let junction = junction(relation)?;
                let owner = single_column(&junction.owner_columns, relation)?;
                let inverse = single_column(&junction.inverse_columns, relation)?;
                let mut map = table_map(QueryType::Delete, &junction.table_path)?;
                map.add_where(in_clause(Conjunction::None, &owner.name, &target.of));
                map.add_where(in_clause(Conjunction::And, &inverse.name, ids));
                Ok(vec![map])
            }
            RelationKind::OneToMany => {
                let owner = single_owner(target)?;
                let foreign = single_column(&relation.join_columns, relation)?;
                let mut map = self.target_table_update(relation, &foreign.name, Value::Null)?;
                map.add_where(in_clause(Conjunction::None, &self.target_primary(relation)?, ids));
                map.add_where(WhereClause {
                    conjunction: Conjunction::And,
                    condition: FindWhere::new().eq(foreign.name.clone(), owner.clone()).into(),
                });
                Ok(vec![map])
            }
            _ => Err(wrong_operation(relation, "remove", "set")),
        }
    }

    fn set_statements(&self, id: Value) -> OrmResult<Vec<ExpressionMap>> {
        let target = self.target()?;
        let relation = &target.relation;
        match relation.kind {
            RelationKind::ManyToOne | RelationKind::OneToOne if relation.owns_join_columns() => {
                let foreign = single_column(&relation.join_columns, relation)?;
                let owner = self.qb.expression_map.main_alias()?.metadata()?;
                let primary = single_primary(owner.primary_columns().map(|c| c.database_name.as_str()), &owner.name)?;
                let mut map = table_map(QueryType::Update, &owner.table_path)?;
                map.value_sets = vec![ValueSet::new().set(foreign.name.clone(), id)];
                map.add_where(in_clause(Conjunction::None, primary, &target.of));
                Ok(vec![map])
            }
            RelationKind::OneToOne => {
                // Inverse side: detach the current row, then attach the new one.
                let owner = single_owner(target)?;
                let foreign = single_column(&relation.join_columns, relation)?;
                let mut detach = self.target_table_update(relation, &foreign.name, Value::Null)?;
                detach.add_where(WhereClause {
                    conjunction: Conjunction::None,
                    condition: FindWhere::new().eq(foreign.name.clone(), owner.clone()).into(),
                });
                let mut statements = vec![detach];
                if !id.is_null() {
                    let mut attach = self.target_table_update(relation, &foreign.name, owner.clone())?;
                    attach.add_where(in_clause(
                        Conjunction::None,
                        &self.target_primary(relation)?,
                        std::slice::from_ref(&id),
                    ));
                    statements.push(attach);
                }
                Ok(statements)
            }
            _ => Err(wrong_operation(relation, "set", "add() or remove")),
        }
    }

    /// `UPDATE target SET foreign = value` without conditions yet.
    fn target_table_update(
        &self,
        relation: &RelationMetadata,
        foreign: &str,
        value: Value,
    ) -> OrmResult<ExpressionMap> {
        let entity = self.qb.data_source.entity(&relation.target)?;
        let mut map = table_map(QueryType::Update, &entity.table_path)?;
        map.value_sets = vec![ValueSet::new().set(foreign, value)];
        Ok(map)
    }

    fn target_primary(&self, relation: &RelationMetadata) -> OrmResult<String> {
        let entity = self.qb.data_source.entity(&relation.target)?;
        single_primary(entity.primary_columns().map(|c| c.database_name.as_str()), &entity.name)
            .map(str::to_string)
    }

    async fn run(&self, maps: Vec<ExpressionMap>) -> OrmResult<()> {
        if maps.is_empty() {
            return Ok(());
        }
        let mut statements = Vec::with_capacity(maps.len());
        for mut map in maps {
            map.comment = self.qb.expression_map.comment.clone();
            map.disable_escaping = self.qb.expression_map.disable_escaping;
            statements.push(self.qb.finalize_map(&map)?);
        }
        self.qb.run_statements(statements).await?;
        Ok(())
    }

    /// The statements `add`, `remove` and `set` would run, rendered for the
    /// driver, without running them.
    pub fn plan_add<T: Into<Value>>(&self, ids: impl IntoIterator<Item = T>) -> OrmResult<Vec<(String, Vec<Value>)>> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.render(self.link_statements(&ids)?)
    }

    pub fn plan_remove<T: Into<Value>>(
        &self,
        ids: impl IntoIterator<Item = T>,
    ) -> OrmResult<Vec<(String, Vec<Value>)>> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.render(self.unlink_statements(&ids)?)
    }

    pub fn plan_set<T: Into<Value>>(&self, id: Option<T>) -> OrmResult<Vec<(String, Vec<Value>)>> {
        let id = id.map(Into::into).unwrap_or(Value::Null);
        self.render(self.set_statements(id)?)
    }

    fn render(&self, maps: Vec<ExpressionMap>) -> OrmResult<Vec<(String, Vec<Value>)>> {
        maps.iter().map(|map| self.qb.finalize_map(map)).collect()
    }
}

/// Map over a plain table; relation statements address columns by name.
fn table_map(query_type: QueryType, table_path: &str) -> OrmResult<ExpressionMap> {
    let mut map = ExpressionMap::new(query_type);
    map.create_alias(
        AliasDescriptor::new(AliasType::From)
            .named(table_path)
            .table(table_path),
    )?;
    map.set_main_alias(table_path)?;
    map.call_listeners = false;
    Ok(map)
}

fn in_clause(conjunction: Conjunction, column: &str, values: &[Value]) -> WhereClause {
    let condition = match values {
        [single] => FindWhere::new().eq(column, single.clone()),
        _ => FindWhere::new().op(column, FindOperator::In(values.to_vec())),
    };
    WhereClause {
        conjunction,
        condition: WhereCondition::from(condition),
    }
}

fn junction(relation: &RelationMetadata) -> OrmResult<&crate::metadata::JunctionMetadata> {
    relation.junction.as_ref().ok_or_else(|| OrmError::MissingMetadata {
        target: format!("junction of '{}'", relation.property_path),
    })
}

fn single_column<'r>(columns: &'r [JoinColumn], relation: &RelationMetadata) -> OrmResult<&'r JoinColumn> {
    match columns {
        [column] => Ok(column),
        _ => Err(OrmError::invalid_condition(format!(
            "relation queries need exactly one join column on '{}'",
            relation.property_path
        ))),
    }
}

fn single_primary<'c>(mut columns: impl Iterator<Item = &'c str>, entity: &str) -> OrmResult<&'c str> {
    match (columns.next(), columns.next()) {
        (Some(column), None) => Ok(column),
        _ => Err(OrmError::invalid_condition(format!(
            "relation queries need exactly one primary column on '{entity}'"
        ))),
    }
}

fn single_owner(target: &RelationTarget) -> OrmResult<&Value> {
    match target.of.as_slice() {
        [owner] => Ok(owner),
        _ => Err(OrmError::invalid_condition(format!(
            "relation '{}' can only be changed for one owner at a time",
            target.relation.property_path
        ))),
    }
}

fn wrong_operation(relation: &RelationMetadata, used: &str, instead: &str) -> OrmError {
    OrmError::invalid_condition(format!(
        "{used}() is not available on {:?} relation '{}', use {instead}()",
        relation.kind, relation.property_path
    ))
}
