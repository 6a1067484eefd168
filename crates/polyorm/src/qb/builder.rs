//! Untyped builder core shared by every typed builder.
//!
//! A [`QueryBuilder`] owns one [`ExpressionMap`], a handle to its
//! [`DataSource`] and optionally a caller-supplied [`QueryRunner`]. Typed
//! builders ([`SelectQueryBuilder`], [`InsertQueryBuilder`], ...) wrap it and
//! switch between each other by changing the map's query type, so a chain such
//! as `from(..).where_(..).update()` keeps its aliases and conditions.

use crate::data_source::DataSource;
use crate::driver::{QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::metadata::EntityMetadata;
use crate::qb::alias::{AliasDescriptor, AliasType};
use crate::qb::assembler::{self, CompiledQuery, Env};
use crate::qb::condition::{
    Conjunction, FindWhere, WhereClause, WhereCondition, WhereField, implicit_join_alias,
    nested_uses_join_columns,
};
use crate::qb::delete::{DeleteQueryBuilder, SoftDeleteQueryBuilder};
use crate::qb::expression_map::{
    CommonTableExpression, CteOptions, CteQuery, ExpressionMap, JoinAttribute, JoinType, QueryType,
};
use crate::qb::insert::InsertQueryBuilder;
use crate::qb::relation::RelationQueryBuilder;
use crate::qb::select::{JoinTarget, SelectQueryBuilder};
use crate::qb::update::UpdateQueryBuilder;
use crate::runner::QueryRunner;
use crate::sql::validate_parameter_name;
use crate::transaction::with_auto_transaction;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Entry point of the fluent API.
///
/// ```ignore
/// let posts = data_source
///     .create_query_builder()
///     .select(&["p.id", "p.title"])
///     .from("Post", "p")?
///     .where_with("p.viewCount > :min", params! { "min" => 10 })
///     .order_by("p.id", Order::Desc)
///     .get_raw_many()
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
    pub(crate) data_source: DataSource,
    pub(crate) runner: Option<Arc<QueryRunner>>,
    pub(crate) expression_map: ExpressionMap,
    /// First error recorded by an infallible builder call, reported at compile time
    pub(crate) build_error: Option<String>,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("expression_map", &self.expression_map)
            .field("has_runner", &self.runner.is_some())
            .field("build_error", &self.build_error)
            .finish()
    }
}

impl QueryBuilder {
    pub(crate) fn new(data_source: DataSource, runner: Option<Arc<QueryRunner>>) -> Self {
        Self {
            data_source,
            runner,
            expression_map: ExpressionMap::new(QueryType::Select),
            build_error: None,
        }
    }

    // ==================== Entry points ====================

    /// Start a SELECT with the given selection (alias names, property paths or expressions).
    pub fn select(mut self, selection: &[&str]) -> SelectQueryBuilder {
        self.expression_map.query_type = QueryType::Select;
        self.expression_map.selects.clear();
        for item in selection {
            self.expression_map.add_select(*item, None);
        }
        SelectQueryBuilder { qb: self }
    }

    /// Start a SELECT from an entity.
    pub fn from(mut self, entity: &str, alias: &str) -> OrmResult<SelectQueryBuilder> {
        self.expression_map.query_type = QueryType::Select;
        SelectQueryBuilder { qb: self }.from(entity, alias)
    }

    /// Start an INSERT; the target is set with `into`.
    pub fn insert(mut self) -> InsertQueryBuilder {
        self.expression_map.query_type = QueryType::Insert;
        InsertQueryBuilder { qb: self }
    }

    /// Start an UPDATE of an entity.
    pub fn update(mut self, entity: &str) -> OrmResult<UpdateQueryBuilder> {
        self.expression_map.query_type = QueryType::Update;
        self.set_main_entity(entity, None)?;
        Ok(UpdateQueryBuilder { qb: self })
    }

    /// Start a DELETE; the target is set with `from`.
    pub fn delete(mut self) -> DeleteQueryBuilder {
        self.expression_map.query_type = QueryType::Delete;
        DeleteQueryBuilder { qb: self }
    }

    /// Start a soft delete; the target is set with `from`.
    pub fn soft_delete(mut self) -> SoftDeleteQueryBuilder {
        self.expression_map.query_type = QueryType::SoftDelete;
        SoftDeleteQueryBuilder { qb: self }
    }

    /// Start a restore of soft-deleted rows; the target is set with `from`.
    pub fn restore(mut self) -> SoftDeleteQueryBuilder {
        self.expression_map.query_type = QueryType::Restore;
        SoftDeleteQueryBuilder { qb: self }
    }

    /// Start a relation query on `entity.property`.
    pub fn relation(mut self, entity: &str, property: &str) -> OrmResult<RelationQueryBuilder> {
        self.expression_map.query_type = QueryType::Relation;
        self.set_main_entity(entity, None)?;
        let metadata = self.expression_map.main_alias()?.metadata()?;
        let relation = metadata
            .find_relation_with_property_path(property)
            .cloned()
            .ok_or_else(|| OrmError::UnknownRelation {
                entity: metadata.name.clone(),
                path: property.to_string(),
            })?;
        Ok(RelationQueryBuilder::new(self, relation))
    }

    /// The typed builder matching the map's current query type.
    pub fn into_typed(self) -> AnyQueryBuilder {
        match self.expression_map.query_type {
            QueryType::Select => AnyQueryBuilder::Select(SelectQueryBuilder { qb: self }),
            QueryType::Insert => AnyQueryBuilder::Insert(InsertQueryBuilder { qb: self }),
            QueryType::Update => AnyQueryBuilder::Update(UpdateQueryBuilder { qb: self }),
            QueryType::Delete => AnyQueryBuilder::Delete(DeleteQueryBuilder { qb: self }),
            QueryType::SoftDelete | QueryType::Restore => {
                AnyQueryBuilder::SoftDelete(SoftDeleteQueryBuilder { qb: self })
            }
            QueryType::Relation => AnyQueryBuilder::Relation(RelationQueryBuilder::resume(self)),
        }
    }

    pub fn expression_map(&self) -> &ExpressionMap {
        &self.expression_map
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    // ==================== Compilation ====================

    pub(crate) fn env(&self) -> Env<'_> {
        Env {
            registry: self.data_source.registry(),
            caps: self.data_source.capabilities(),
            config: self.data_source.config(),
        }
    }

    pub(crate) fn compile(&self) -> OrmResult<CompiledQuery> {
        self.compile_map(&self.expression_map)
    }

    /// Compile another map (a derived count, reload or pre-select query) in
    /// this builder's environment.
    pub(crate) fn compile_map(&self, map: &ExpressionMap) -> OrmResult<CompiledQuery> {
        if let Some(message) = &self.build_error {
            return Err(OrmError::validation(message.clone()));
        }
        assembler::compile(map, &self.env())
    }

    /// Compile and render placeholders for `map`.
    pub(crate) fn finalize_map(&self, map: &ExpressionMap) -> OrmResult<(String, Vec<Value>)> {
        let compiled = self.compile_map(map)?;
        compiled.finalize(self.data_source.capabilities(), &map.parameters)
    }

    pub(crate) fn get_query(&self) -> OrmResult<String> {
        Ok(self.compile()?.sql.to_named_sql())
    }

    pub(crate) fn get_query_and_parameters(&self) -> OrmResult<(String, Vec<Value>)> {
        self.finalize_map(&self.expression_map)
    }

    pub(crate) fn get_parameters(&self) -> OrmResult<HashMap<String, Value>> {
        let compiled = self.compile()?;
        let mut params = self.expression_map.parameters.clone();
        params.extend(compiled.native);
        Ok(params)
    }

    // ==================== Mutation helpers ====================

    pub(crate) fn record_error(&mut self, err: OrmError) {
        if self.build_error.is_none() {
            self.build_error = Some(match err {
                OrmError::Validation(message) => message,
                other => other.to_string(),
            });
        }
    }

    pub(crate) fn set_parameter(&mut self, name: &str, value: Value) {
        match validate_parameter_name(name) {
            Ok(()) => self.expression_map.set_parameter(name, value),
            Err(err) => self.record_error(err),
        }
    }

    /// Bind the main alias to an entity. Without an explicit alias an existing
    /// main alias for the same entity is kept, so switching query types does not
    /// invalidate conditions written against it.
    pub(crate) fn set_main_entity(&mut self, entity: &str, alias: Option<&str>) -> OrmResult<()> {
        let metadata = self.data_source.entity(entity)?;
        if alias.is_none() {
            if let Ok(main) = self.expression_map.main_alias() {
                if main.metadata.as_ref().is_some_and(|m| m.name == metadata.name) {
                    return Ok(());
                }
            }
        }
        let name = alias.map_or_else(|| metadata.name.clone(), str::to_string);
        self.expression_map.replace_alias(
            AliasDescriptor::new(AliasType::From)
                .named(name.clone())
                .entity(metadata),
        )?;
        self.expression_map.set_main_alias(&name)
    }

    /// Bind the main alias to a table without metadata.
    pub(crate) fn set_main_table(&mut self, table: &str, alias: Option<&str>) -> OrmResult<()> {
        let name = alias.unwrap_or(table).to_string();
        self.expression_map.replace_alias(
            AliasDescriptor::new(AliasType::From)
                .named(name.clone())
                .table(table),
        )?;
        self.expression_map.set_main_alias(&name)
    }

    pub(crate) fn add_where(&mut self, conjunction: Conjunction, condition: WhereCondition) {
        self.absorb_bracket_parameters(&condition);
        if self.expression_map.query_type == QueryType::Select {
            if let Err(err) = self.join_nested_relations(&condition) {
                self.record_error(err);
            }
        }
        self.expression_map.add_where(WhereClause {
            conjunction,
            condition,
        });
    }

    pub(crate) fn add_having(&mut self, conjunction: Conjunction, condition: WhereCondition) {
        self.absorb_bracket_parameters(&condition);
        self.expression_map.havings.push(WhereClause {
            conjunction,
            condition,
        });
    }

    pub(crate) fn add_where_ids(&mut self, conjunction: Conjunction, ids: Vec<Value>) -> OrmResult<()> {
        let condition = self.expression_map.ids_condition(&ids)?;
        self.add_where(conjunction, condition.into());
        Ok(())
    }

    fn absorb_bracket_parameters(&mut self, condition: &WhereCondition) {
        let mut params = Vec::new();
        collect_bracket_parameters(condition, &mut params);
        for (name, value) in params {
            self.set_parameter(&name, value);
        }
    }

    /// LEFT JOIN every relation a nested object condition reaches through,
    /// under the alias the condition compiler expects.
    fn join_nested_relations(&mut self, condition: &WhereCondition) -> OrmResult<()> {
        let Some(main) = self.expression_map.main_alias.clone() else {
            return Ok(());
        };
        let mut objects = Vec::new();
        collect_objects(condition, &mut objects);
        for object in objects {
            self.join_object(&main, &object)?;
        }
        Ok(())
    }

    fn join_object(&mut self, alias_name: &str, object: &FindWhere) -> OrmResult<()> {
        let Some(entity) = self
            .expression_map
            .find_alias(alias_name)
            .and_then(|a| a.metadata.clone())
        else {
            return Ok(());
        };
        for (path, field) in &object.entries {
            let WhereField::Nested(nested) = field else {
                continue;
            };
            let Some(relation) = entity.find_relation_with_property_path(path) else {
                continue;
            };
            if nested_uses_join_columns(&entity, self.data_source.registry(), relation, nested) {
                continue;
            }
            let joined = implicit_join_alias(alias_name, path);
            if self.expression_map.find_alias(&joined).is_none() {
                let target = self.data_source.entity(&relation.target)?;
                self.expression_map.create_alias(
                    AliasDescriptor::new(AliasType::Join)
                        .named(joined.clone())
                        .entity(target),
                )?;
                self.expression_map.add_join(JoinAttribute {
                    join_type: JoinType::Left,
                    alias: joined.clone(),
                    relation: Some((alias_name.to_string(), relation.clone())),
                    condition: None,
                    is_selected: false,
                });
                self.expression_map.implicit_joins.push(joined.clone());
            }
            self.join_object(&joined, nested)?;
        }
        Ok(())
    }

    /// Register a join and its alias. Relation joins derive their ON condition
    /// from metadata and AND `condition` onto it; other targets need `condition`.
    pub(crate) fn add_join(
        &mut self,
        join_type: JoinType,
        target: JoinTarget,
        alias: &str,
        condition: Option<&str>,
        select: bool,
    ) -> OrmResult<()> {
        let (descriptor, relation) = match target {
            JoinTarget::Relation(path) => {
                let (parent, property) = path.split_once('.').ok_or_else(|| {
                    OrmError::invalid_condition(format!(
                        "relation join '{path}' must be written as alias.property"
                    ))
                })?;
                let entity = self.expression_map.alias(parent)?.metadata()?;
                let relation = entity
                    .find_relation_with_property_path(property)
                    .cloned()
                    .ok_or_else(|| OrmError::UnknownRelation {
                        entity: entity.name.clone(),
                        path: property.to_string(),
                    })?;
                let target = self.data_source.entity(&relation.target)?;
                (
                    AliasDescriptor::new(AliasType::Join).named(alias).entity(target),
                    Some((parent.to_string(), relation)),
                )
            }
            JoinTarget::Entity(name) => {
                let target = self.data_source.entity(&name)?;
                (AliasDescriptor::new(AliasType::Join).named(alias).entity(target), None)
            }
            JoinTarget::Table(table) => (
                AliasDescriptor::new(AliasType::Join).named(alias).table(table),
                None,
            ),
            JoinTarget::SubQuery(sub) => {
                let map = self.adopt(sub.qb);
                (AliasDescriptor::new(AliasType::Join).named(alias).sub_query(map), None)
            }
        };
        if relation.is_none() && condition.is_none() {
            return Err(OrmError::invalid_condition(format!(
                "join '{alias}' needs an ON condition"
            )));
        }
        self.expression_map.create_alias(descriptor)?;
        self.expression_map.add_join(JoinAttribute {
            join_type,
            alias: alias.to_string(),
            relation,
            condition: condition.map(str::to_string),
            is_selected: select,
        });
        if select {
            self.expression_map.add_select(alias, None);
        }
        Ok(())
    }

    /// Child SELECT builder with its own parameter key prefix.
    pub(crate) fn sub_query(&mut self) -> SelectQueryBuilder {
        let mut map = ExpressionMap::new(QueryType::Select);
        map.param_prefix = self.expression_map.next_sub_query_prefix();
        SelectQueryBuilder {
            qb: QueryBuilder {
                data_source: self.data_source.clone(),
                runner: self.runner.clone(),
                expression_map: map,
                build_error: None,
            },
        }
    }

    /// Take ownership of a child builder's map for structural embedding.
    pub(crate) fn adopt(&mut self, child: QueryBuilder) -> ExpressionMap {
        if let Some(message) = child.build_error {
            if self.build_error.is_none() {
                self.build_error = Some(message);
            }
        }
        self.adopt_map(child.expression_map)
    }

    /// Scope an embedded map's generated keys and merge its named parameters.
    pub(crate) fn adopt_map(&mut self, mut map: ExpressionMap) -> ExpressionMap {
        if map.param_prefix.is_empty() {
            map.param_prefix = self.expression_map.next_sub_query_prefix();
        }
        for (name, value) in &map.parameters {
            self.expression_map.set_parameter(name.clone(), value.clone());
        }
        map
    }

    pub(crate) fn add_cte(&mut self, query: CteQuery, alias: &str, options: CteOptions) {
        let query = match query {
            CteQuery::Builder(map) => CteQuery::Builder(Box::new(self.adopt_map(*map))),
            text => text,
        };
        self.expression_map.ctes.push(CommonTableExpression {
            alias: alias.to_string(),
            query,
            options,
        });
    }

    // ==================== Execution ====================

    /// Entity the write hooks fire for, when listeners are on.
    pub(crate) fn listened_entity(&self) -> Option<Arc<EntityMetadata>> {
        if !self.expression_map.call_listeners || self.data_source.subscribers().is_empty() {
            return None;
        }
        self.expression_map.main_alias().ok()?.metadata.clone()
    }

    pub(crate) fn lease(&self, mode: ReplicationMode) -> RunnerLease {
        match &self.runner {
            Some(runner) => RunnerLease {
                runner: Arc::clone(runner),
                owned: false,
            },
            None => RunnerLease {
                runner: self.data_source.create_query_runner(mode),
                owned: true,
            },
        }
    }

    /// Run a read. Unlocked reads may go to a replica; locked reads go to the
    /// primary and need an open transaction.
    pub(crate) async fn run_read(&self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let lock = self.expression_map.lock.as_ref();
        let mode = if lock.is_some() {
            ReplicationMode::Master
        } else {
            ReplicationMode::Slave
        };
        let lease = self.lease(mode);
        let result = match lock {
            Some(lock) if lock.mode.requires_transaction() && !lease.runner.is_transaction_active() => {
                Err(OrmError::LockRequiresTransaction)
            }
            _ => lease.runner.query(sql, params).await,
        };
        lease.finish().await;
        result
    }

    /// Run finished statements on the primary, in order, honouring `use_transaction`.
    pub(crate) async fn run_statements(
        &self,
        statements: Vec<(String, Vec<Value>)>,
    ) -> OrmResult<Vec<QueryResult>> {
        let lease = self.lease(ReplicationMode::Master);
        let runner = &lease.runner;
        let result = with_auto_transaction(runner, self.expression_map.use_transaction, async {
            let mut results = Vec::with_capacity(statements.len());
            for (sql, params) in &statements {
                results.push(runner.query(sql, params).await?);
            }
            Ok(results)
        })
        .await;
        lease.finish().await;
        result
    }
}

/// A runner borrowed for one execution; released afterwards when the builder
/// acquired it itself.
pub(crate) struct RunnerLease {
    pub(crate) runner: Arc<QueryRunner>,
    owned: bool,
}

impl RunnerLease {
    pub(crate) async fn finish(self) {
        if self.owned {
            if let Err(err) = self.runner.release().await {
                tracing::warn!(target: "polyorm", error = %err, "failed to release query runner");
            }
        }
    }
}

fn collect_bracket_parameters(condition: &WhereCondition, out: &mut Vec<(String, Value)>) {
    if let WhereCondition::Brackets(brackets) = condition {
        out.extend(brackets.parameters.iter().cloned());
        for clause in &brackets.clauses {
            collect_bracket_parameters(&clause.condition, out);
        }
    }
}

fn collect_objects(condition: &WhereCondition, out: &mut Vec<FindWhere>) {
    match condition {
        WhereCondition::Text(_) => {}
        WhereCondition::Object(object) => out.push(object.clone()),
        WhereCondition::AnyOf(list) => out.extend(list.iter().cloned()),
        WhereCondition::Brackets(brackets) => {
            for clause in &brackets.clauses {
                collect_objects(&clause.condition, out);
            }
        }
    }
}

/// A builder of whichever type the expression map currently describes.
#[derive(Debug, Clone)]
pub enum AnyQueryBuilder {
    Select(SelectQueryBuilder),
    Insert(InsertQueryBuilder),
    Update(UpdateQueryBuilder),
    Delete(DeleteQueryBuilder),
    /// Soft delete or restore
    SoftDelete(SoftDeleteQueryBuilder),
    Relation(RelationQueryBuilder),
}

impl AnyQueryBuilder {
    fn inner(&self) -> &QueryBuilder {
        match self {
            AnyQueryBuilder::Select(b) => &b.qb,
            AnyQueryBuilder::Insert(b) => &b.qb,
            AnyQueryBuilder::Update(b) => &b.qb,
            AnyQueryBuilder::Delete(b) => &b.qb,
            AnyQueryBuilder::SoftDelete(b) => &b.qb,
            AnyQueryBuilder::Relation(b) => &b.qb,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.inner().expression_map.query_type
    }

    pub fn get_query(&self) -> OrmResult<String> {
        self.inner().get_query()
    }

    pub fn get_query_and_parameters(&self) -> OrmResult<(String, Vec<Value>)> {
        self.inner().get_query_and_parameters()
    }
}
