//! SELECT assembly and the SELECT builder.

use crate::dialect::PaginationStyle;
use crate::driver::QueryResult;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, RelationKind};
use crate::qb::alias::{Alias, AliasDescriptor, AliasType};
use crate::qb::assembler::{Assembler, CompiledQuery};
use crate::qb::builder::QueryBuilder;
use crate::qb::condition::{Conjunction, WhereCondition};
use crate::qb::delete::{DeleteQueryBuilder, SoftDeleteQueryBuilder};
use crate::qb::expression_map::{
    CteQuery, ExpressionMap, JoinAttribute, JoinType, LockMode, LockSpec, Nulls, Order, OrderByItem, QueryType,
    SelectItem,
};
use crate::qb::resolver::resolve_property;
use crate::qb::update::UpdateQueryBuilder;
use crate::row::{FromRow, Row};
use crate::sql::Sql;
use crate::value::Value;
use std::time::Duration;

impl<'a> Assembler<'a> {
    pub(crate) fn select_statement(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let main = self.main_alias()?;

        let mut sql = self.cte_prefix()?;
        sql.push("SELECT ");
        sql.push(&self.execution_time_hint());
        if !map.distinct_on.is_empty() {
            if !caps.distinct_on {
                return Err(self.unsupported("DISTINCT ON"));
            }
            let mut expressions = Vec::with_capacity(map.distinct_on.len());
            for expression in &map.distinct_on {
                expressions.push(self.compile_text(expression)?);
            }
            sql.push("DISTINCT ON (");
            sql.push_joined(expressions, ", ");
            sql.push(") ");
        } else if map.distinct {
            sql.push("DISTINCT ");
        }
        if caps.pagination == PaginationStyle::Top && map.offset.is_none() {
            if let Some(limit) = map.limit {
                sql.push(&format!("TOP {limit} "));
            }
        }
        sql.push_sql(self.selection()?);

        sql.push(" FROM ");
        sql.push_sql(self.alias_source(main)?);
        sql.push(" ");
        sql.push(&self.escape(&main.name));
        sql.push(&self.table_hint()?);
        sql.push_sql(self.join_expression()?);
        sql.push_sql(self.where_expression(Vec::new())?);

        if !map.group_bys.is_empty() {
            let mut items = Vec::with_capacity(map.group_bys.len());
            for expression in &map.group_bys {
                items.push(self.compile_text(expression)?);
            }
            sql.push(" GROUP BY ");
            sql.push_joined(items, ", ");
        }
        let having_key = self.key("having");
        if let Some(having) = self.compile_where_clauses(&map.havings, &main.name, &having_key)? {
            sql.push(" HAVING ");
            sql.push_sql(having);
        }

        let order = self.order_by_expression()?;
        let has_order = !order.is_empty();
        sql.push_sql(order);
        sql.push(&self.pagination_suffix(has_order));
        sql.push(&self.lock_clause()?);

        if caps.pagination == PaginationStyle::RowNum {
            sql = self.wrap_rownum(sql)?;
        }
        sql.push(&self.comment_suffix());
        Ok(sql)
    }

    /// Oracle 11g style pagination through a filtered sub-select.
    fn wrap_rownum(&self, inner: Sql) -> OrmResult<Sql> {
        let map = self.map;
        Ok(match (map.limit, map.offset) {
            (None, None) => inner,
            (Some(limit), None) => {
                let mut sql = Sql::new("SELECT * FROM ");
                sql.push_sql(inner.parenthesized());
                sql.push(&format!(" WHERE ROWNUM <= {limit}"));
                sql
            }
            (limit, Some(offset)) => {
                let q = self.escape("rownum_q");
                let rn = self.escape("rownum_");
                let mut sql = Sql::new(format!("SELECT * FROM (SELECT {q}.*, ROWNUM {rn} FROM "));
                sql.push_sql(inner.parenthesized());
                sql.push(&format!(" {q}"));
                if let Some(limit) = limit {
                    let last = offset
                        .checked_add(limit)
                        .ok_or_else(|| OrmError::validation("offset plus limit overflows"))?;
                    sql.push(&format!(" WHERE ROWNUM <= {last}"));
                }
                sql.push(&format!(") WHERE {rn} > {offset}"));
                sql
            }
        })
    }

    // ==================== Selection ====================

    fn selection(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let main = self.main_alias()?;
        let mut items = Vec::new();
        if map.selects.is_empty() {
            match main.metadata.as_deref() {
                Some(entity) => items.extend(self.entity_columns(main, entity, true)),
                None => items.push(Sql::new("*")),
            }
        }
        for select in &map.selects {
            items.extend(self.select_item(select, main)?);
        }
        let mut sql = Sql::empty();
        sql.push_joined(items, ", ");
        Ok(sql)
    }

    /// Every column of an entity alias; joined aliases get `"a_col"` names.
    fn entity_columns(&self, alias: &Alias, entity: &EntityMetadata, is_main: bool) -> Vec<Sql> {
        entity
            .columns
            .iter()
            .map(|column| {
                let mut text = self.qualified(&alias.name, &column.database_name);
                if !is_main {
                    text.push_str(&format!(
                        " AS {}",
                        self.escape(&format!("{}_{}", alias.name, column.database_name))
                    ));
                }
                Sql::new(text)
            })
            .collect()
    }

    fn select_item(&mut self, select: &SelectItem, main: &Alias) -> OrmResult<Vec<Sql>> {
        let map = self.map;
        let selection = select.selection.trim();

        if let Some(alias) = map.find_alias(selection) {
            return Ok(match alias.metadata.as_deref() {
                Some(entity) => self.entity_columns(alias, entity, alias.name == main.name),
                None => vec![Sql::new(format!("{}.*", self.escape(&alias.name)))],
            });
        }

        if is_property_path(selection) {
            if let Some((alias_name, path)) = selection.split_once('.') {
                if let Some(entity) = map.find_alias(alias_name).and_then(|a| a.metadata.as_deref()) {
                    let targets = resolve_property(entity, self.env.registry, path);
                    if targets.is_empty() {
                        return Err(OrmError::unknown_column(alias_name, path));
                    }
                    let single = targets.len() == 1;
                    return Ok(targets
                        .iter()
                        .map(|target| {
                            let column = target.database_name();
                            let mut text = self.qualified(alias_name, column);
                            let as_name = match &select.alias_name {
                                Some(name) if single => Some(name.clone()),
                                _ if alias_name != main.name => Some(format!("{alias_name}_{column}")),
                                _ => None,
                            };
                            if let Some(name) = as_name {
                                text.push_str(&format!(" AS {}", self.escape(&name)));
                            }
                            Sql::new(text)
                        })
                        .collect());
                }
            }
        }

        let mut sql = self.compile_text(selection)?;
        if let Some(name) = &select.alias_name {
            sql.push(&format!(" AS {}", self.escape(name)));
        }
        Ok(vec![sql])
    }

    // ==================== Joins ====================

    fn join_expression(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let mut sql = Sql::empty();
        for join in &map.joins {
            let alias = map.alias(&join.alias)?;
            let hint = self.table_hint()?;
            let keyword = join.join_type.as_sql();

            let mut on: Vec<Sql> = match &join.relation {
                Some((parent, relation)) if relation.kind == RelationKind::ManyToMany => {
                    let junction = relation.junction.as_ref().ok_or_else(|| {
                        OrmError::invalid_condition(format!(
                            "many-to-many relation '{}' has no junction table",
                            relation.property_path
                        ))
                    })?;
                    let junction_alias = join.junction_alias();
                    let owner_on: Vec<Sql> = junction
                        .owner_columns
                        .iter()
                        .map(|c| {
                            Sql::new(format!(
                                "{} = {}",
                                self.qualified(&junction_alias, &c.name),
                                self.qualified(parent, &c.referenced)
                            ))
                        })
                        .collect();
                    sql.push(&format!(
                        " {keyword} {} {}{hint} ON ",
                        self.escape_table(&junction.table_path),
                        self.escape(&junction_alias)
                    ));
                    sql.push_joined(owner_on, " AND ");
                    junction
                        .inverse_columns
                        .iter()
                        .map(|c| {
                            Sql::new(format!(
                                "{} = {}",
                                self.qualified(&alias.name, &c.referenced),
                                self.qualified(&junction_alias, &c.name)
                            ))
                        })
                        .collect()
                }
                Some((parent, relation)) => relation
                    .join_columns
                    .iter()
                    .map(|c| {
                        let text = if relation.owns_join_columns() {
                            format!(
                                "{} = {}",
                                self.qualified(&alias.name, &c.referenced),
                                self.qualified(parent, &c.name)
                            )
                        } else {
                            format!(
                                "{} = {}",
                                self.qualified(&alias.name, &c.name),
                                self.qualified(parent, &c.referenced)
                            )
                        };
                        Sql::new(text)
                    })
                    .collect(),
                None => Vec::new(),
            };

            if let Some(condition) = &join.condition {
                let compiled = self.compile_text(condition)?;
                on.push(if join.relation.is_some() {
                    compiled.parenthesized()
                } else {
                    compiled
                });
            }
            if !map.with_deleted {
                if let Some(column) = alias.metadata.as_deref().and_then(|e| e.delete_date_column()) {
                    on.push(Sql::new(format!(
                        "{} IS NULL",
                        self.qualified(&alias.name, &column.database_name)
                    )));
                }
            }
            if on.is_empty() {
                return Err(OrmError::invalid_condition(format!(
                    "join '{}' has no ON condition",
                    alias.name
                )));
            }

            sql.push(&format!(" {keyword} "));
            sql.push_sql(self.alias_source(alias)?);
            sql.push(&format!(" {}{hint} ON ", self.escape(&alias.name)));
            sql.push_joined(on, " AND ");
        }
        Ok(sql)
    }

    /// ON conditions of the joins, for `UPDATE ... FROM` / `UPDATE ... JOIN`.
    pub(crate) fn join_conditions(&mut self, join: &JoinAttribute) -> OrmResult<Vec<Sql>> {
        let map = self.map;
        let alias = map.alias(&join.alias)?;
        let mut on = Vec::new();
        match &join.relation {
            Some((_, relation)) if relation.kind == RelationKind::ManyToMany => {
                return Err(self.unsupported("many-to-many joins in UPDATE"));
            }
            Some((parent, relation)) => {
                for c in &relation.join_columns {
                    let (left, right) = if relation.owns_join_columns() {
                        (self.qualified(&alias.name, &c.referenced), self.qualified(parent, &c.name))
                    } else {
                        (self.qualified(&alias.name, &c.name), self.qualified(parent, &c.referenced))
                    };
                    on.push(Sql::new(format!("{left} = {right}")));
                }
            }
            None => {}
        }
        if let Some(condition) = &join.condition {
            on.push(self.compile_text(condition)?);
        }
        if on.is_empty() {
            return Err(OrmError::invalid_condition(format!(
                "join '{}' has no ON condition",
                alias.name
            )));
        }
        Ok(on)
    }
}

/// `alias.path.to.property` with nothing else around it.
fn is_property_path(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// What a join attaches.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    /// Relation property of an existing alias: `"p.author"`
    Relation(String),
    /// Registered entity, joined with an explicit ON condition
    Entity(String),
    /// Table without metadata
    Table(String),
    SubQuery(SelectQueryBuilder),
}

/// Builder for SELECT statements.
#[derive(Debug, Clone)]
pub struct SelectQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl SelectQueryBuilder {
    impl_builder_common!();
    impl_where_methods!();

    // ==================== Selection ====================

    /// Replace the selection.
    pub fn select(mut self, selection: &[&str]) -> Self {
        self.qb.expression_map.selects.clear();
        for item in selection {
            self.qb.expression_map.add_select(*item, None);
        }
        self
    }

    /// Add an alias name, property path or expression to the selection.
    pub fn add_select(mut self, selection: &str) -> Self {
        self.qb.expression_map.add_select(selection, None);
        self
    }

    /// Add a selection under a result column name.
    pub fn add_select_as(mut self, selection: &str, alias: &str) -> Self {
        self.qb
            .expression_map
            .add_select(selection, Some(alias.to_string()));
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.qb.expression_map.distinct = distinct;
        self
    }

    /// `DISTINCT ON (...)`; fails at compile time where unsupported.
    pub fn distinct_on(mut self, expressions: &[&str]) -> Self {
        self.qb.expression_map.distinct_on = expressions.iter().map(|e| e.to_string()).collect();
        self
    }

    // ==================== Source ====================

    /// Select from an entity. Without a prior selection the entity alias is selected.
    pub fn from(mut self, entity: &str, alias: &str) -> OrmResult<Self> {
        self.qb.set_main_entity(entity, Some(alias))?;
        self.select_main_if_empty(alias);
        Ok(self)
    }

    /// Select from a table that has no registered metadata.
    pub fn from_table(mut self, table: &str, alias: &str) -> OrmResult<Self> {
        self.qb.set_main_table(table, Some(alias))?;
        self.select_main_if_empty(alias);
        Ok(self)
    }

    /// Select from a sub-query, embedded structurally.
    pub fn from_sub_query(mut self, sub: SelectQueryBuilder, alias: &str) -> OrmResult<Self> {
        let map = self.qb.adopt(sub.qb);
        self.qb.expression_map.replace_alias(
            AliasDescriptor::new(AliasType::From)
                .named(alias)
                .sub_query(map),
        )?;
        self.qb.expression_map.set_main_alias(alias)?;
        self.select_main_if_empty(alias);
        Ok(self)
    }

    fn select_main_if_empty(&mut self, alias: &str) {
        if self.qb.expression_map.selects.is_empty() {
            self.qb.expression_map.add_select(alias, None);
        }
    }

    // ==================== Joins ====================

    /// `LEFT JOIN` a relation: `left_join("p.author", "a")`.
    pub fn left_join(self, relation: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Left, JoinTarget::Relation(relation.to_string()), alias, None, false)
    }

    pub fn left_join_and_select(self, relation: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Left, JoinTarget::Relation(relation.to_string()), alias, None, true)
    }

    pub fn inner_join(self, relation: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Inner, JoinTarget::Relation(relation.to_string()), alias, None, false)
    }

    pub fn inner_join_and_select(self, relation: &str, alias: &str) -> OrmResult<Self> {
        self.join(JoinType::Inner, JoinTarget::Relation(relation.to_string()), alias, None, true)
    }

    /// `LEFT JOIN` an entity on an explicit condition.
    pub fn left_join_on(self, entity: &str, alias: &str, condition: &str) -> OrmResult<Self> {
        self.join(
            JoinType::Left,
            JoinTarget::Entity(entity.to_string()),
            alias,
            Some(condition),
            false,
        )
    }

    /// `INNER JOIN` an entity on an explicit condition.
    pub fn inner_join_on(self, entity: &str, alias: &str, condition: &str) -> OrmResult<Self> {
        self.join(
            JoinType::Inner,
            JoinTarget::Entity(entity.to_string()),
            alias,
            Some(condition),
            false,
        )
    }

    /// Add a join. Relation joins derive their ON condition from metadata and
    /// AND `condition` onto it; other targets need `condition`.
    pub fn join(
        mut self,
        join_type: JoinType,
        target: JoinTarget,
        alias: &str,
        condition: Option<&str>,
        select: bool,
    ) -> OrmResult<Self> {
        self.qb.add_join(join_type, target, alias, condition, select)?;
        Ok(self)
    }

    // ==================== Having / grouping / ordering ====================

    pub fn having(mut self, condition: impl Into<WhereCondition>) -> Self {
        self.qb.expression_map.havings.clear();
        self.qb.add_having(Conjunction::None, condition.into());
        self
    }

    pub fn and_having(mut self, condition: impl Into<WhereCondition>) -> Self {
        self.qb.add_having(Conjunction::And, condition.into());
        self
    }

    pub fn or_having(mut self, condition: impl Into<WhereCondition>) -> Self {
        self.qb.add_having(Conjunction::Or, condition.into());
        self
    }

    /// Replace the grouping.
    pub fn group_by(mut self, expression: &str) -> Self {
        self.qb.expression_map.group_bys.clear();
        self.qb.expression_map.add_group_by(expression);
        self
    }

    pub fn add_group_by(mut self, expression: &str) -> Self {
        self.qb.expression_map.add_group_by(expression);
        self
    }

    /// Replace the ordering. `expression` may be a selection alias.
    pub fn order_by(mut self, expression: &str, order: Order) -> Self {
        self.qb.expression_map.order_bys.clear();
        self.add_order(expression, order, None)
    }

    pub fn add_order_by(self, expression: &str, order: Order) -> Self {
        self.add_order(expression, order, None)
    }

    /// Order with `NULLS FIRST` / `NULLS LAST`.
    pub fn add_order_by_nulls(self, expression: &str, order: Order, nulls: Nulls) -> Self {
        self.add_order(expression, order, Some(nulls))
    }

    fn add_order(mut self, expression: &str, order: Order, nulls: Option<Nulls>) -> Self {
        self.qb.expression_map.add_order_by(OrderByItem {
            expression: expression.to_string(),
            order,
            nulls,
        });
        self
    }

    // ==================== Pagination / locking ====================

    pub fn limit(mut self, limit: u64) -> Self {
        self.qb.expression_map.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.qb.expression_map.offset = Some(offset);
        self
    }

    /// Same as [`limit`](Self::limit).
    pub fn take(self, take: u64) -> Self {
        self.limit(take)
    }

    /// Same as [`offset`](Self::offset).
    pub fn skip(self, skip: u64) -> Self {
        self.offset(skip)
    }

    pub fn set_lock(self, mode: LockMode) -> Self {
        self.set_lock_of(mode, &[])
    }

    /// Lock only the rows of the given aliases (`FOR UPDATE OF ...`).
    pub fn set_lock_of(mut self, mode: LockMode, tables: &[&str]) -> Self {
        self.qb.expression_map.lock = Some(LockSpec {
            mode,
            tables: tables.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    /// Include soft-deleted rows.
    pub fn with_deleted(mut self) -> Self {
        self.qb.expression_map.with_deleted = true;
        self
    }

    /// Server-side execution limit, where the dialect has a hint for it.
    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.qb.expression_map.max_execution_time = Some(limit);
        self
    }

    // ==================== Mode switches ====================

    /// Turn into an UPDATE of the main alias, keeping the conditions.
    pub fn update(mut self) -> UpdateQueryBuilder {
        self.qb.expression_map.query_type = QueryType::Update;
        UpdateQueryBuilder { qb: self.qb }
    }

    /// Turn into a DELETE of the main alias, keeping the conditions.
    pub fn delete(mut self) -> DeleteQueryBuilder {
        self.qb.expression_map.query_type = QueryType::Delete;
        DeleteQueryBuilder { qb: self.qb }
    }

    /// Turn into a soft delete of the main alias.
    pub fn soft_delete(mut self) -> OrmResult<SoftDeleteQueryBuilder> {
        self.qb.expression_map.query_type = QueryType::SoftDelete;
        SoftDeleteQueryBuilder::checked(self.qb)
    }

    /// Turn into a restore of the main alias.
    pub fn restore(mut self) -> OrmResult<SoftDeleteQueryBuilder> {
        self.qb.expression_map.query_type = QueryType::Restore;
        SoftDeleteQueryBuilder::checked(self.qb)
    }

    // ==================== Terminals ====================

    async fn load(&self) -> OrmResult<QueryResult> {
        let (sql, params) = self.qb.get_query_and_parameters()?;
        self.qb.run_read(&sql, &params).await
    }

    /// All rows as returned by the database.
    pub async fn get_raw_many(&self) -> OrmResult<Vec<Row>> {
        Ok(self.load().await?.rows)
    }

    /// The first row, if any.
    pub async fn get_raw_one(&self) -> OrmResult<Option<Row>> {
        Ok(self.load().await?.rows.into_iter().next())
    }

    pub async fn get_many<T: FromRow>(&self) -> OrmResult<Vec<T>> {
        self.get_raw_many().await?.iter().map(T::from_row).collect()
    }

    pub async fn get_one<T: FromRow>(&self) -> OrmResult<Option<T>> {
        self.get_raw_one().await?.as_ref().map(T::from_row).transpose()
    }

    /// Like [`get_one`](Self::get_one) but `NotFound` when nothing matches.
    pub async fn get_one_or_fail<T: FromRow>(&self) -> OrmResult<T> {
        let target = self
            .qb
            .expression_map
            .main_alias
            .clone()
            .unwrap_or_default();
        self.get_one()
            .await?
            .ok_or_else(|| OrmError::not_found(format!("no row matched the query on '{target}'")))
    }

    /// Number of distinct main rows matching the conditions.
    pub async fn get_count(&self) -> OrmResult<i64> {
        let map = self.count_map()?;
        let (sql, params) = self.qb.finalize_map(&map)?;
        let result = self.qb.run_read(&sql, &params).await?;
        match result.rows.first() {
            Some(row) => row.try_get_column("cnt"),
            None => Ok(0),
        }
    }

    /// Whether any row matches the conditions.
    pub async fn get_exists(&self) -> OrmResult<bool> {
        let (sql, params) = self.exists_query()?;
        let result = self.qb.run_read(&sql, &params).await?;
        match result.rows.first() {
            Some(row) => row.try_get_column("exists"),
            None => Ok(false),
        }
    }

    /// The COUNT query derived from this one, without ordering or pagination.
    pub(crate) fn count_map(&self) -> OrmResult<ExpressionMap> {
        let mut map = self.qb.expression_map.clone();
        let main = map.main_alias()?;
        let primary: Vec<_> = main
            .metadata
            .as_deref()
            .map(|e| e.primary_columns().collect())
            .unwrap_or_default();
        let selection = match primary.as_slice() {
            [pk] => format!("COUNT(DISTINCT({}.{}))", main.name, pk.property_path),
            _ => "COUNT(*)".to_string(),
        };
        map.selects = vec![SelectItem {
            selection,
            alias_name: Some("cnt".to_string()),
        }];
        map.distinct = false;
        map.distinct_on.clear();
        map.order_bys.clear();
        map.limit = None;
        map.offset = None;
        Ok(map)
    }

    /// `SELECT CASE WHEN EXISTS(...) THEN 1 ELSE 0 END AS "exists"`
    pub(crate) fn exists_query(&self) -> OrmResult<(String, Vec<Value>)> {
        let mut map = self.qb.expression_map.clone();
        map.selects = vec![SelectItem {
            selection: "1".to_string(),
            alias_name: None,
        }];
        map.order_bys.clear();
        map.limit = None;
        map.offset = None;
        let inner = self.qb.compile_map(&map)?;
        let caps = self.qb.data_source.capabilities();

        let mut sql = Sql::new("SELECT CASE WHEN EXISTS(");
        sql.push_sql(inner.sql);
        sql.push(&format!(") THEN 1 ELSE 0 END AS {}", caps.escape("exists")));
        if let Some(dummy) = caps.dummy_table {
            sql.push(&format!(" FROM {dummy}"));
        }
        CompiledQuery {
            sql,
            native: inner.native,
        }
        .finalize(caps, &map.parameters)
    }
}

impl From<SelectQueryBuilder> for CteQuery {
    fn from(builder: SelectQueryBuilder) -> Self {
        CteQuery::Builder(Box::new(builder.qb.expression_map))
    }
}
