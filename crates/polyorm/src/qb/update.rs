//! UPDATE assembly and the UPDATE builder.

use crate::dialect::UpdateJoinStyle;
use crate::driver::{QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::qb::assembler::Assembler;
use crate::qb::builder::QueryBuilder;
use crate::qb::expression_map::{
    ExpressionMap, JoinType, Order, OrderByItem, QueryType, ValueSet, WriteValue,
};
use crate::qb::resolver::resolve_property;
use crate::qb::returning;
use crate::qb::select::JoinTarget;
use crate::row::Row;
use crate::runner::QueryRunner;
use crate::sql::Sql;
use crate::subscriber::{WriteEvent, broadcast_after, broadcast_before};
use crate::transaction::with_auto_transaction;

impl<'a> Assembler<'a> {
    pub(crate) fn update_statement(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let main = self.main_alias()?;
        let table_path = main.table_path().ok_or_else(|| OrmError::MissingMetadata {
            target: main.name.clone(),
        })?;
        let table = self.escape_table(table_path);
        let values = match map.value_sets.first() {
            Some(set) if !set.is_empty() => set,
            _ => return Err(OrmError::validation("UPDATE needs at least one value to set")),
        };
        let style = match (map.joins.is_empty(), caps.update_join) {
            (true, _) => None,
            (false, UpdateJoinStyle::None) => return Err(self.unsupported("joins in UPDATE")),
            (false, style) => Some(style),
        };

        let mut sql = self.cte_prefix()?;
        sql.push("UPDATE ");
        let alias = self.escape(&main.name);
        match style {
            None => {
                sql.push(&table);
            }
            Some(UpdateJoinStyle::FromTarget) => {
                sql.push(&alias);
            }
            Some(UpdateJoinStyle::Join) => {
                sql.push(&format!("{table} {alias}"));
                sql.push_sql(self.update_joins()?);
            }
            Some(_) => {
                sql.push(&format!("{table} {alias}"));
            }
        }

        let assignments = self.update_assignments(values, style == Some(UpdateJoinStyle::Join))?;
        sql.push(" SET ");
        sql.push_joined(assignments, ", ");
        sql.push(&self.output_clause("INSERTED")?);

        let mut leading = Vec::new();
        match style {
            Some(UpdateJoinStyle::From) => {
                let mut sources = Vec::with_capacity(map.joins.len());
                for join in &map.joins {
                    let joined = map.alias(&join.alias)?;
                    let mut source = self.alias_source(joined)?;
                    source.push(&format!(" {}", self.escape(&joined.name)));
                    sources.push(source);
                    let mut on = Sql::empty();
                    on.push_joined(self.join_conditions(join)?, " AND ");
                    leading.push(on);
                }
                sql.push(" FROM ");
                sql.push_joined(sources, ", ");
            }
            Some(UpdateJoinStyle::FromTarget) => {
                sql.push(&format!(" FROM {table} {alias}"));
                sql.push_sql(self.update_joins()?);
            }
            _ => {}
        }
        sql.push_sql(self.where_expression(leading)?);

        if !map.order_bys.is_empty() || map.limit.is_some() {
            if !caps.update_limit {
                return Err(self.unsupported("ORDER BY / LIMIT in UPDATE"));
            }
            sql.push_sql(self.order_by_expression()?);
            if let Some(limit) = map.limit {
                sql.push(&format!(" LIMIT {limit}"));
            }
        }
        sql.push(&self.returning_clause()?);
        sql.push(&self.comment_suffix());
        Ok(sql)
    }

    /// ` INNER JOIN "t" "a" ON ...` for every join of the map.
    fn update_joins(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let mut sql = Sql::empty();
        for join in &map.joins {
            let joined = map.alias(&join.alias)?;
            sql.push(&format!(" {} ", join.join_type.as_sql()));
            sql.push_sql(self.alias_source(joined)?);
            sql.push(&format!(" {} ON ", self.escape(&joined.name)));
            sql.push_joined(self.join_conditions(join)?, " AND ");
        }
        Ok(sql)
    }

    /// `"col" = value` items, followed by the automatic update-date and
    /// version columns when the caller did not set them.
    fn update_assignments(&mut self, values: &'a ValueSet, qualify: bool) -> OrmResult<Vec<Sql>> {
        let main = self.main_alias()?;
        let entity = main.metadata.as_deref();
        let caps = self.caps();
        let target = |this: &Self, column: &str| {
            if qualify {
                this.qualified(&main.name, column)
            } else {
                this.escape(column)
            }
        };

        let mut items = Vec::new();
        let mut written: Vec<&str> = Vec::new();
        for (i, (key, value)) in values.entries.iter().enumerate() {
            let (column_name, column) = match entity {
                Some(entity) => {
                    let targets = resolve_property(entity, self.env.registry, key);
                    match targets.as_slice() {
                        [] => {
                            self.tolerate_unknown_column(OrmError::unknown_column(&main.name, key))?;
                            continue;
                        }
                        [single] => (single.database_name(), single.metadata()),
                        _ => {
                            return Err(OrmError::invalid_condition(format!(
                                "'{key}' maps to several columns; set them one by one"
                            )));
                        }
                    }
                }
                None => (key.as_str(), None),
            };
            let rendered = match value {
                WriteValue::Value(v) => {
                    let v = match column {
                        Some(meta) => meta.to_database(v.clone()),
                        None => v.clone(),
                    };
                    let key = self.key(&format!("upd_{i}"));
                    self.bind(key, v)
                }
                WriteValue::Raw(expression) => self.compile_text(expression)?,
                WriteValue::Default => Sql::new(self.default_value()),
            };
            let mut item = Sql::new(format!("{} = ", target(self, column_name)));
            item.push_sql(rendered);
            items.push(item);
            written.push(column_name);
        }
        if items.is_empty() {
            return Err(OrmError::validation("UPDATE needs at least one value to set"));
        }

        if let Some(entity) = entity {
            if let Some(column) = entity.update_date_column() {
                if !written.contains(&column.database_name.as_str()) {
                    items.push(Sql::new(format!(
                        "{} = {}",
                        target(self, &column.database_name),
                        caps.current_timestamp
                    )));
                }
            }
            if let Some(column) = entity.version_column() {
                if !written.contains(&column.database_name.as_str()) {
                    let name = target(self, &column.database_name);
                    items.push(Sql::new(format!("{name} = {name} + 1")));
                }
            }
        }
        Ok(items)
    }
}

/// What an UPDATE produced.
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub affected: Option<u64>,
    /// Database-generated values per updated row (returned or reloaded)
    pub generated_maps: Vec<Row>,
    pub raw: QueryResult,
}

/// Builder for UPDATE statements.
#[derive(Debug, Clone)]
pub struct UpdateQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl UpdateQueryBuilder {
    impl_builder_common!();
    impl_where_methods!();

    /// Replace the SET list.
    pub fn set(mut self, values: ValueSet) -> Self {
        self.qb.expression_map.value_sets = vec![values];
        self
    }

    /// Set one property.
    pub fn set_value(mut self, key: &str, value: impl Into<WriteValue>) -> Self {
        let sets = &mut self.qb.expression_map.value_sets;
        if sets.is_empty() {
            sets.push(ValueSet::new());
        }
        sets[0].insert(key.to_string(), value.into());
        self
    }

    /// Set one property to a SQL expression, e.g. `viewCount + 1`.
    pub fn set_raw(self, key: &str, expression: &str) -> Self {
        self.set_value(key, WriteValue::Raw(expression.to_string()))
    }

    /// `INNER JOIN` a relation of the main alias.
    pub fn inner_join(mut self, relation: &str, alias: &str) -> OrmResult<Self> {
        self.qb
            .add_join(JoinType::Inner, JoinTarget::Relation(relation.to_string()), alias, None, false)?;
        Ok(self)
    }

    /// `INNER JOIN` an entity on an explicit condition.
    pub fn inner_join_on(mut self, entity: &str, alias: &str, condition: &str) -> OrmResult<Self> {
        self.qb.add_join(
            JoinType::Inner,
            JoinTarget::Entity(entity.to_string()),
            alias,
            Some(condition),
            false,
        )?;
        Ok(self)
    }

    /// Return these properties (`"*"` for all) from the updated rows.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.qb.expression_map.returning = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Read back the update-date and version columns. On by default.
    pub fn update_entity(mut self, enabled: bool) -> Self {
        self.qb.expression_map.update_entity = enabled;
        self
    }

    /// Replace the ordering; only dialects with `UPDATE ... ORDER BY` accept it.
    pub fn order_by(mut self, expression: &str, order: Order) -> Self {
        self.qb.expression_map.order_bys.clear();
        self.qb.expression_map.add_order_by(OrderByItem {
            expression: expression.to_string(),
            order,
            nulls: None,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.qb.expression_map.limit = Some(limit);
        self
    }

    /// Run the UPDATE, firing subscribers and reading back generated values.
    pub async fn execute(&self) -> OrmResult<UpdateResult> {
        let mut map = self.qb.expression_map.clone();
        let listened = self.qb.listened_entity();
        let subscribers = self.qb.data_source.subscribers();

        let lease = self.qb.lease(ReplicationMode::Master);
        let runner = &lease.runner;
        let result = with_auto_transaction(runner, map.use_transaction, async {
            let mut event = None;
            if let Some(entity) = listened {
                let mut before = WriteEvent::new(entity, QueryType::Update, map.value_sets.clone());
                broadcast_before(subscribers, &mut before).await?;
                map.value_sets = before.values.clone();
                event = Some(before);
            }

            let keys = self.qb.preselect_keys(&map, runner).await?;
            let (sql, params) = self.qb.finalize_map(&map)?;
            let raw = runner.query(&sql, &params).await?;
            let generated_maps = self.qb.read_back(&map, &raw, &keys, runner).await?;

            if let Some(mut event) = event {
                event.affected = raw.affected;
                event.generated = generated_maps.clone();
                broadcast_after(subscribers, &event).await?;
            }
            Ok(UpdateResult {
                affected: raw.affected,
                generated_maps,
                raw,
            })
        })
        .await;
        lease.finish().await;
        result
    }
}

// ==================== Reload after write ====================

impl QueryBuilder {
    /// Whether generated values must be re-selected after the statement.
    pub(crate) fn needs_reload(&self, map: &ExpressionMap) -> OrmResult<bool> {
        if self.data_source.capabilities().supports_returning() {
            return Ok(false);
        }
        if map.main_alias()?.metadata.is_none() {
            return Ok(false);
        }
        let env = self.env();
        Ok(!Assembler::new(map, &env).returning_columns()?.is_empty())
    }

    /// Primary keys of the rows an UPDATE-shaped write is about to touch.
    pub(crate) async fn preselect_keys(&self, map: &ExpressionMap, runner: &QueryRunner) -> OrmResult<Vec<Row>> {
        if !self.needs_reload(map)? {
            return Ok(Vec::new());
        }
        let main = map.main_alias()?;
        let entity = main.metadata()?;
        let mut select = map.clone();
        select.query_type = QueryType::Select;
        select.selects.clear();
        for pk in entity.primary_columns() {
            select.add_select(
                format!("{}.{}", main.name, pk.property_path),
                Some(pk.database_name.clone()),
            );
        }
        select.value_sets.clear();
        select.returning.clear();
        select.with_deleted = true;
        let (sql, params) = self.finalize_map(&select)?;
        Ok(runner.query(&sql, &params).await?.rows)
    }

    /// Generated values of the written rows: returned ones, or re-selected by key.
    pub(crate) async fn read_back(
        &self,
        map: &ExpressionMap,
        raw: &QueryResult,
        keys: &[Row],
        runner: &QueryRunner,
    ) -> OrmResult<Vec<Row>> {
        if self.data_source.capabilities().supports_returning() {
            return Ok(raw.rows.clone());
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let main = map.main_alias()?;
        let Some(entity) = main.metadata.clone() else {
            return Ok(Vec::new());
        };
        let env = self.env();
        let columns = Assembler::new(map, &env).returning_columns()?;
        let reload = returning::reload_map(&main.name, &entity, &columns, keys)?;
        let (sql, params) = self.finalize_map(&reload)?;
        let rows = runner.query(&sql, &params).await?.rows;
        Ok(returning::align_rows(&entity, keys, rows))
    }
}
