//! Mutable intermediate representation of one query under construction.
//!
//! Every builder owns exactly one [`ExpressionMap`]. Builder calls append to its
//! ordered collections; assembly reads it without mutating it, so compiling the
//! same map twice yields the same statement. `Clone` is a deep copy: entity
//! metadata is shared through `Arc` but is immutable, every collection that a
//! builder can mutate is owned by the copy.

use crate::error::{OrmError, OrmResult};
use crate::metadata::RelationMetadata;
use crate::qb::alias::{Alias, AliasDescriptor};
use crate::qb::condition::{FindWhere, WhereClause};
use crate::value::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Which statement the map describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    SoftDelete,
    Restore,
    Relation,
}

impl QueryType {
    pub fn is_write(self) -> bool {
        !matches!(self, QueryType::Select)
    }
}

/// One entry of the selection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// Alias name (expands to its columns), property path or SQL expression
    pub selection: String,
    pub alias_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// One join, in call order.
#[derive(Debug, Clone)]
pub struct JoinAttribute {
    pub join_type: JoinType,
    /// Name of the joined alias (present in `aliases`)
    pub alias: String,
    /// Relation path the join was derived from: `(parent alias, relation)`
    pub relation: Option<(String, RelationMetadata)>,
    /// Extra condition in user SQL text
    pub condition: Option<String>,
    pub is_selected: bool,
}

impl JoinAttribute {
    /// Alias of the junction table for many-to-many joins.
    pub fn junction_alias(&self) -> String {
        match &self.relation {
            Some((parent, _)) => format!("{parent}_{}", self.alias),
            None => self.alias.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByItem {
    pub expression: String,
    pub order: Order,
    pub nulls: Option<Nulls>,
}

/// Pessimistic and dirty-read lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    PessimisticRead,
    PessimisticWrite,
    /// `FOR UPDATE SKIP LOCKED`
    PessimisticPartialWrite,
    /// `FOR UPDATE NOWAIT`
    PessimisticWriteOrFail,
    ForNoKeyUpdate,
    ForKeyShare,
    /// Read uncommitted rows (table hint dialects only)
    DirtyRead,
}

impl LockMode {
    /// Row locks only make sense inside a transaction.
    pub fn requires_transaction(self) -> bool {
        !matches!(self, LockMode::DirtyRead)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub mode: LockMode,
    /// Aliases named in `FOR UPDATE OF ...`
    pub tables: Vec<String>,
}

/// Options of a common table expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CteOptions {
    pub recursive: bool,
    /// `Some(true)` → `MATERIALIZED`, `Some(false)` → `NOT MATERIALIZED`
    pub materialized: Option<bool>,
    pub column_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum CteQuery {
    /// SQL text with `:name` parameters
    Text(String),
    Builder(Box<ExpressionMap>),
}

impl From<&str> for CteQuery {
    fn from(text: &str) -> Self {
        CteQuery::Text(text.to_string())
    }
}

impl From<String> for CteQuery {
    fn from(text: String) -> Self {
        CteQuery::Text(text)
    }
}

impl From<ExpressionMap> for CteQuery {
    fn from(map: ExpressionMap) -> Self {
        CteQuery::Builder(Box::new(map))
    }
}

#[derive(Debug, Clone)]
pub struct CommonTableExpression {
    pub alias: String,
    pub query: CteQuery,
    pub options: CteOptions,
}

/// A value written by INSERT or UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Value(Value),
    /// SQL expression in user text, e.g. `viewCount + 1`
    Raw(String),
    /// `DEFAULT` (or `NULL` where the dialect lacks the keyword)
    Default,
}

impl<T: Into<Value>> From<T> for WriteValue {
    fn from(v: T) -> Self {
        WriteValue::Value(v.into())
    }
}

/// One row of INSERT values or the SET list of an UPDATE, keyed by property path
/// or column name, in call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    pub entries: Vec<(String, WriteValue)>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing an earlier value for the same key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<WriteValue>) -> Self {
        self.insert(key.into(), value.into());
        self
    }

    /// Set a raw SQL expression.
    pub fn set_raw(mut self, key: impl Into<String>, expression: impl Into<String>) -> Self {
        self.insert(key.into(), WriteValue::Raw(expression.into()));
        self
    }

    pub fn insert(&mut self, key: String, value: WriteValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&WriteValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<WriteValue>> FromIterator<(K, V)> for ValueSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for (k, v) in iter {
            set.insert(k.into(), v.into());
        }
        set
    }
}

/// Insert-or-update behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Partial unique index predicate, SQL text (`ON CONFLICT (...) WHERE ...`)
    pub index_predicate: Option<String>,
    /// Only update when at least one overwritten column changes
    pub skip_update_if_no_values_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
    /// Keep the existing row
    Ignore,
    Update {
        /// Properties taken from the proposed row
        overwrite: Vec<String>,
        /// Properties forming the conflicting unique key
        conflict_target: Vec<String>,
        options: UpsertOptions,
    },
}

/// Target of a relation query.
#[derive(Debug, Clone)]
pub struct RelationTarget {
    pub relation: RelationMetadata,
    /// Primary key values of the owning entities
    pub of: Vec<Value>,
}

/// The intermediate representation of one query.
#[derive(Debug, Clone, Default)]
pub struct ExpressionMap {
    pub query_type: QueryType,
    /// Name of the main alias inside `aliases`
    pub main_alias: Option<String>,
    pub aliases: Vec<Alias>,
    alias_counter: usize,
    pub selects: Vec<SelectItem>,
    pub distinct: bool,
    pub distinct_on: Vec<String>,
    pub joins: Vec<JoinAttribute>,
    /// Aliases joined only because a nested where condition reached them
    pub implicit_joins: Vec<String>,
    pub wheres: Vec<WhereClause>,
    pub havings: Vec<WhereClause>,
    pub order_bys: Vec<OrderByItem>,
    pub group_bys: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: Option<LockSpec>,
    pub with_deleted: bool,
    /// Appended after the implicit guards, SQL text
    pub extra_condition: Option<String>,
    pub ctes: Vec<CommonTableExpression>,
    pub value_sets: Vec<ValueSet>,
    pub on_conflict: Option<OnConflict>,
    /// Properties returned by writes; `*` means every column
    pub returning: Vec<String>,
    /// Reload generated columns after a write
    pub update_entity: bool,
    pub relation: Option<RelationTarget>,
    pub parameters: HashMap<String, Value>,
    pub native_parameters: HashMap<String, Value>,
    /// Prefix for generated parameter keys; non-empty for sub-queries
    pub param_prefix: String,
    sub_query_counter: usize,
    pub comment: Option<String>,
    pub disable_escaping: bool,
    pub use_transaction: bool,
    pub call_listeners: bool,
    pub max_execution_time: Option<Duration>,
}

impl ExpressionMap {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            call_listeners: true,
            update_entity: true,
            ..Self::default()
        }
    }

    /// Append an alias. Names are unique; a missing name is generated.
    pub fn create_alias(&mut self, descriptor: AliasDescriptor) -> OrmResult<&Alias> {
        let name = match descriptor.name {
            Some(name) => {
                if self.find_alias(&name).is_some() {
                    return Err(OrmError::DuplicateAlias(name));
                }
                name
            }
            None => loop {
                self.alias_counter += 1;
                let candidate = format!("alias_{}", self.alias_counter);
                if self.find_alias(&candidate).is_none() {
                    break candidate;
                }
            },
        };
        self.aliases.push(Alias {
            name,
            alias_type: descriptor.alias_type,
            metadata: descriptor.metadata,
            table_path: descriptor.table_path,
            sub_query: descriptor.sub_query,
        });
        let idx = self.aliases.len() - 1;
        Ok(&self.aliases[idx])
    }

    /// Make `name` the main alias. Setting the same alias again is a no-op.
    pub fn set_main_alias(&mut self, name: &str) -> OrmResult<()> {
        if self.find_alias(name).is_none() {
            return Err(OrmError::UnknownAlias(name.to_string()));
        }
        self.main_alias = Some(name.to_string());
        Ok(())
    }

    /// Replace the alias named `name`, or create it when absent.
    pub(crate) fn replace_alias(&mut self, descriptor: AliasDescriptor) -> OrmResult<String> {
        if let Some(name) = &descriptor.name {
            self.aliases.retain(|a| &a.name != name);
        }
        Ok(self.create_alias(descriptor)?.name.clone())
    }

    pub fn main_alias(&self) -> OrmResult<&Alias> {
        let name = self.main_alias.as_deref().ok_or(OrmError::MissingMainAlias)?;
        self.alias(name)
    }

    pub fn find_alias(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    pub fn alias(&self, name: &str) -> OrmResult<&Alias> {
        self.find_alias(name)
            .ok_or_else(|| OrmError::UnknownAlias(name.to_string()))
    }

    pub fn add_select(&mut self, selection: impl Into<String>, alias_name: Option<String>) {
        self.selects.push(SelectItem {
            selection: selection.into(),
            alias_name,
        });
    }

    pub fn add_join(&mut self, join: JoinAttribute) {
        self.joins.push(join);
    }

    pub fn add_where(&mut self, clause: WhereClause) {
        self.wheres.push(clause);
    }

    /// Drop every where condition together with the joins they implied.
    pub fn clear_wheres(&mut self) {
        self.wheres.clear();
        let implicit = std::mem::take(&mut self.implicit_joins);
        self.joins.retain(|join| !implicit.contains(&join.alias));
        self.aliases.retain(|alias| !implicit.contains(&alias.name));
    }

    pub fn add_order_by(&mut self, item: OrderByItem) {
        self.order_bys.push(item);
    }

    pub fn add_group_by(&mut self, expression: impl Into<String>) {
        self.group_bys.push(expression.into());
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), value);
    }

    /// Key prefix for the next sub-query forked from this map.
    pub(crate) fn next_sub_query_prefix(&mut self) -> String {
        let prefix = format!("{}sq{}_", self.param_prefix, self.sub_query_counter);
        self.sub_query_counter += 1;
        prefix
    }

    /// Column references carry the alias (`"p"."id"`) only in statements that
    /// alias their tables: SELECT always, UPDATE when it joins other tables.
    pub fn alias_name_prefixing_enabled(&self) -> bool {
        match self.query_type {
            QueryType::Select => true,
            QueryType::Update => !self.joins.is_empty(),
            _ => false,
        }
    }

    /// Primary-key IN condition for `where_in_ids`.
    pub(crate) fn ids_condition(&self, ids: &[Value]) -> OrmResult<FindWhere> {
        let metadata = self.main_alias()?.metadata()?;
        let mut primary = metadata.primary_columns();
        let (Some(pk), None) = (primary.next(), primary.next()) else {
            return Err(OrmError::invalid_condition(format!(
                "where_in_ids needs exactly one primary column on '{}'",
                metadata.name
            )));
        };
        Ok(FindWhere::new().op(
            pk.property_path.clone(),
            crate::qb::operator::FindOperator::In(ids.to_vec()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::alias::AliasType;
    use crate::qb::condition::{Conjunction, WhereCondition};

    #[test]
    fn create_alias_enforces_unique_names_and_generates_missing_ones() {
        let mut map = ExpressionMap::new(QueryType::Select);
        map.create_alias(AliasDescriptor::new(AliasType::From).named("p"))
            .unwrap();
        let err = map
            .create_alias(AliasDescriptor::new(AliasType::Join).named("p"))
            .unwrap_err();
        assert!(matches!(err, OrmError::DuplicateAlias(ref n) if n == "p"));

        let first = map
            .create_alias(AliasDescriptor::new(AliasType::Other))
            .unwrap()
            .name
            .clone();
        let second = map
            .create_alias(AliasDescriptor::new(AliasType::Other))
            .unwrap()
            .name
            .clone();
        assert_eq!(first, "alias_1");
        assert_eq!(second, "alias_2");
    }

    #[test]
    fn set_main_alias_is_idempotent() {
        let mut map = ExpressionMap::new(QueryType::Select);
        map.create_alias(AliasDescriptor::new(AliasType::From).named("p"))
            .unwrap();
        map.set_main_alias("p").unwrap();
        map.set_main_alias("p").unwrap();
        assert_eq!(map.main_alias().unwrap().name, "p");
        assert!(map.set_main_alias("q").is_err());
    }

    #[test]
    fn clone_is_independent() {
        let mut map = ExpressionMap::new(QueryType::Select);
        map.add_where(WhereClause {
            conjunction: Conjunction::None,
            condition: WhereCondition::Text("a = 1".into()),
        });
        let mut copy = map.clone();
        copy.add_where(WhereClause {
            conjunction: Conjunction::And,
            condition: WhereCondition::Text("b = 2".into()),
        });
        copy.set_parameter("x", Value::Int(1));
        assert_eq!(map.wheres.len(), 1);
        assert!(map.parameters.is_empty());
        assert_eq!(copy.wheres.len(), 2);
    }

    #[test]
    fn sub_query_prefixes_nest() {
        let mut map = ExpressionMap::new(QueryType::Select);
        assert_eq!(map.next_sub_query_prefix(), "sq0_");
        let mut child = ExpressionMap::new(QueryType::Select);
        child.param_prefix = map.next_sub_query_prefix();
        assert_eq!(child.next_sub_query_prefix(), "sq1_sq0_");
    }
}
