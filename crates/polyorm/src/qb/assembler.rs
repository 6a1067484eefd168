//! Statement assembly shared by every query type.
//!
//! [`compile`] reads an [`ExpressionMap`] (never mutating it) and produces a
//! [`CompiledQuery`]: a [`Sql`] fragment whose parameter references point either
//! at the map's named parameters or at native parameters extracted during
//! compilation. Only the [`DriverAdapter`] turns references into placeholders.
//!
//! Every branch here is taken on a [`Capabilities`] flag, never on a dialect
//! name.

use crate::config::{OrmConfig, UnknownColumnPolicy};
use crate::dialect::{Capabilities, LockStyle, PaginationStyle, ReturningStyle};
use crate::driver::DriverAdapter;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, EntityMetadata, MetadataRegistry};
use crate::qb::alias::Alias;
use crate::qb::expression_map::{CteQuery, ExpressionMap, LockMode, Nulls, QueryType};
use crate::qb::resolver::resolve_property;
use crate::sql::Sql;
use crate::value::Value;
use std::collections::HashMap;

/// Everything assembly reads besides the expression map.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub registry: &'a MetadataRegistry,
    pub caps: &'static Capabilities,
    pub config: &'a OrmConfig,
}

/// A statement with parameter references, ready for the driver adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: Sql,
    /// Values extracted from structured conditions and write values
    pub native: HashMap<String, Value>,
}

impl CompiledQuery {
    /// Render placeholders and order parameters for `caps`.
    pub fn finalize(
        &self,
        caps: &'static Capabilities,
        named: &HashMap<String, Value>,
    ) -> OrmResult<(String, Vec<Value>)> {
        DriverAdapter::new(caps).finalize(&self.sql, named, &self.native)
    }
}

/// Compile `map` into a statement.
pub fn compile(map: &ExpressionMap, env: &Env<'_>) -> OrmResult<CompiledQuery> {
    let mut assembler = Assembler::new(map, env);
    let sql = match map.query_type {
        QueryType::Select => assembler.select_statement()?,
        QueryType::Insert => assembler.insert_statement()?,
        QueryType::Update => assembler.update_statement()?,
        QueryType::Delete => assembler.delete_statement()?,
        QueryType::SoftDelete | QueryType::Restore => assembler.soft_delete_statement()?,
        QueryType::Relation => {
            return Err(OrmError::invalid_condition(
                "relation queries run through add(), remove() or set()",
            ));
        }
    };
    Ok(CompiledQuery {
        sql,
        native: assembler.native,
    })
}

pub(crate) struct Assembler<'a> {
    pub(crate) map: &'a ExpressionMap,
    pub(crate) env: &'a Env<'a>,
    pub(crate) native: HashMap<String, Value>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(map: &'a ExpressionMap, env: &'a Env<'a>) -> Self {
        Self {
            map,
            env,
            native: HashMap::new(),
        }
    }

    pub(crate) fn caps(&self) -> &'static Capabilities {
        self.env.caps
    }

    pub(crate) fn unsupported(&self, feature: impl Into<String>) -> OrmError {
        OrmError::unsupported(self.env.caps.name, feature)
    }

    /// Native parameter key, scoped by the map's sub-query prefix.
    pub(crate) fn key(&self, name: &str) -> String {
        format!("{}{name}", self.map.param_prefix)
    }

    /// Store a native parameter and return a fragment referencing it.
    pub(crate) fn bind(&mut self, key: String, value: Value) -> Sql {
        self.native.insert(key.clone(), value);
        let mut sql = Sql::empty();
        sql.push_param(key);
        sql
    }

    /// Swallow an unknown-column error under the warn-and-drop policy.
    pub(crate) fn tolerate_unknown_column(&self, err: OrmError) -> OrmResult<()> {
        if err.is_unknown_column() && self.env.config.unknown_column == UnknownColumnPolicy::WarnAndDrop {
            tracing::warn!(target: "polyorm", error = %err, "dropping condition on unknown column");
            return Ok(());
        }
        Err(err)
    }

    // ==================== Identifiers ====================

    pub(crate) fn escape(&self, ident: &str) -> String {
        if self.map.disable_escaping {
            ident.to_string()
        } else {
            self.env.caps.escape(ident)
        }
    }

    pub(crate) fn escape_table(&self, path: &str) -> String {
        if self.map.disable_escaping {
            path.to_string()
        } else {
            self.env.caps.escape_path(path)
        }
    }

    /// Column reference honouring the map's alias prefixing rule.
    pub(crate) fn column_ref(&self, alias: &str, column: &str) -> String {
        if self.map.alias_name_prefixing_enabled() {
            self.qualified(alias, column)
        } else {
            self.escape(column)
        }
    }

    /// Always `"alias"."column"`.
    pub(crate) fn qualified(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.escape(alias), self.escape(column))
    }

    pub(crate) fn main_alias(&self) -> OrmResult<&'a Alias> {
        let map = self.map;
        map.main_alias()
    }

    pub(crate) fn main_entity(&self) -> OrmResult<Option<&'a EntityMetadata>> {
        Ok(self.main_alias()?.metadata.as_deref())
    }

    /// `"table"` or `(sub-query)` for an alias.
    pub(crate) fn alias_source(&mut self, alias: &Alias) -> OrmResult<Sql> {
        if let Some(sub) = &alias.sub_query {
            let inner = self.compile_nested_map(sub)?;
            return Ok(inner.parenthesized());
        }
        match alias.table_path() {
            Some(path) => Ok(Sql::new(self.escape_table(path))),
            None => Err(OrmError::MissingMetadata {
                target: alias.name.clone(),
            }),
        }
    }

    /// Compile a structurally embedded map, merging its native parameters.
    pub(crate) fn compile_nested_map(&mut self, map: &ExpressionMap) -> OrmResult<Sql> {
        let compiled = compile(map, self.env)?;
        self.native.extend(compiled.native);
        Ok(compiled.sql)
    }

    /// Resolve property paths or column names of the main entity to columns.
    pub(crate) fn resolve_main_columns(&self, paths: &[String]) -> OrmResult<Vec<&'a ColumnMetadata>> {
        let alias = self.main_alias()?;
        let entity = alias.metadata()?;
        let mut out = Vec::new();
        for path in paths {
            if path == "*" {
                out.extend(entity.columns.iter());
                continue;
            }
            let targets = resolve_property(entity, self.env.registry, path);
            let columns: Vec<_> = targets.iter().filter_map(|t| t.metadata()).collect();
            if columns.is_empty() {
                return Err(OrmError::unknown_column(&alias.name, path));
            }
            out.extend(columns);
        }
        let mut seen = std::collections::HashSet::new();
        out.retain(|c| seen.insert(c.database_name.as_str()));
        Ok(out)
    }

    // ==================== Common clauses ====================

    /// `WITH [RECURSIVE] "a" AS (...), ... `
    pub(crate) fn cte_prefix(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        if map.ctes.is_empty() {
            return Ok(Sql::empty());
        }
        let caps = self.caps();
        if !caps.cte.enabled {
            return Err(self.unsupported("common table expressions"));
        }
        let recursive = map.ctes.iter().any(|c| c.options.recursive);
        let mut sql = Sql::new("WITH ");
        if recursive && caps.cte.recursive_keyword {
            sql.push("RECURSIVE ");
        }
        let mut parts = Vec::with_capacity(map.ctes.len());
        for cte in &map.ctes {
            let mut part = Sql::new(self.escape(&cte.alias));
            if !cte.options.column_names.is_empty() {
                let cols: Vec<_> = cte.options.column_names.iter().map(|c| self.escape(c)).collect();
                part.push(&format!("({})", cols.join(", ")));
            }
            part.push(" AS ");
            match cte.options.materialized {
                Some(true) if caps.cte.materialized_hint => {
                    part.push("MATERIALIZED ");
                }
                Some(false) if caps.cte.materialized_hint => {
                    part.push("NOT MATERIALIZED ");
                }
                _ => {}
            }
            let body = match &cte.query {
                CteQuery::Text(text) => self.compile_text(text)?,
                CteQuery::Builder(inner) => {
                    if inner.query_type.is_write() && !caps.cte.writable {
                        return Err(self.unsupported("data-modifying statements in WITH"));
                    }
                    self.compile_nested_map(inner)?
                }
            };
            part.push_sql(body.parenthesized());
            parts.push(part);
        }
        sql.push_joined(parts, ", ");
        sql.push(" ");
        Ok(sql)
    }

    /// ` WHERE ...` with user conditions followed by the implicit guards.
    ///
    /// `leading` conditions (join conditions of `UPDATE ... FROM`) come first.
    pub(crate) fn where_expression(&mut self, leading: Vec<Sql>) -> OrmResult<Sql> {
        let map = self.map;
        let mut conditions = leading;

        let main = self.main_alias()?;
        let key = self.key("where");
        if let Some(user) = self.compile_where_clauses(&map.wheres, &main.name, &key)? {
            conditions.push(user);
        }

        if let Some(entity) = main.metadata.as_deref() {
            if map.query_type == QueryType::Select && !map.with_deleted {
                if let Some(column) = entity.delete_date_column() {
                    let col = self.column_ref(&main.name, &column.database_name);
                    conditions.push(Sql::new(format!("{col} IS NULL")));
                }
            }
            if let Some(inheritance) = entity.inheritance.as_ref().filter(|i| !i.is_root) {
                let col = self.column_ref(&main.name, &inheritance.column);
                let key = self.key("discriminator_values");
                self.native.insert(key.clone(), Value::array(inheritance.values.iter().cloned()));
                let mut sql = Sql::new(format!("{col} IN ("));
                sql.push_spread(key);
                sql.push(")");
                conditions.push(sql);
            }
        }

        if let Some(extra) = &map.extra_condition {
            conditions.push(self.compile_text(extra)?);
        }

        Ok(match conditions.len() {
            0 => Sql::empty(),
            1 => {
                let mut sql = Sql::new(" WHERE ");
                sql.push_sql(conditions.remove(0));
                sql
            }
            _ => {
                let mut sql = Sql::new(" WHERE ( ");
                sql.push_joined(conditions, " ) AND ( ");
                sql.push(" )");
                sql
            }
        })
    }

    /// ` ORDER BY ...`
    pub(crate) fn order_by_expression(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        if map.order_bys.is_empty() {
            return Ok(Sql::empty());
        }
        let mut items = Vec::with_capacity(map.order_bys.len());
        for item in &map.order_bys {
            let selected_alias = map
                .selects
                .iter()
                .any(|s| s.alias_name.as_deref() == Some(item.expression.as_str()));
            let mut sql = if selected_alias {
                Sql::new(self.escape(&item.expression))
            } else {
                self.compile_text(&item.expression)?
            };
            sql.push(" ");
            sql.push(item.order.as_sql());
            if let Some(nulls) = item.nulls {
                if !self.caps().nulls_ordering {
                    return Err(self.unsupported("NULLS FIRST/LAST ordering"));
                }
                sql.push(match nulls {
                    Nulls::First => " NULLS FIRST",
                    Nulls::Last => " NULLS LAST",
                });
            }
            items.push(sql);
        }
        let mut sql = Sql::new(" ORDER BY ");
        sql.push_joined(items, ", ");
        Ok(sql)
    }

    /// Trailing pagination for `LimitOffset`, `Top` (offset form) and
    /// `FetchFirst`; `Top` without offset and `RowNum` are handled by the
    /// SELECT assembler.
    pub(crate) fn pagination_suffix(&self, has_order: bool) -> String {
        let map = self.map;
        let caps = self.caps();
        match caps.pagination {
            PaginationStyle::LimitOffset => match (map.limit, map.offset) {
                (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
                (Some(l), None) => format!(" LIMIT {l}"),
                (None, Some(o)) => match caps.unbounded_limit {
                    Some(unbounded) => format!(" LIMIT {unbounded} OFFSET {o}"),
                    None => format!(" OFFSET {o}"),
                },
                (None, None) => String::new(),
            },
            // TOP n is written after SELECT when there is no offset.
            PaginationStyle::Top => match map.offset {
                None => String::new(),
                Some(o) => {
                    let mut out = String::new();
                    if !has_order {
                        out.push_str(" ORDER BY (SELECT NULL)");
                    }
                    out.push_str(&format!(" OFFSET {o} ROWS"));
                    if let Some(l) = map.limit {
                        out.push_str(&format!(" FETCH NEXT {l} ROWS ONLY"));
                    }
                    out
                }
            },
            PaginationStyle::FetchFirst => {
                let mut out = String::new();
                if let Some(o) = map.offset {
                    out.push_str(&format!(" OFFSET {o} ROWS"));
                }
                if let Some(l) = map.limit {
                    out.push_str(&format!(" FETCH NEXT {l} ROWS ONLY"));
                }
                out
            }
            PaginationStyle::RowNum => String::new(),
        }
    }

    /// Trailing `FOR UPDATE ...` clause.
    pub(crate) fn lock_clause(&self) -> OrmResult<String> {
        let Some(lock) = &self.map.lock else {
            return Ok(String::new());
        };
        let caps = self.caps();
        match caps.lock.style {
            LockStyle::TableHint => {
                if !lock.tables.is_empty() {
                    return Err(self.unsupported("lock tables"));
                }
                // Rendered as table hints after FROM.
                self.table_hint().map(|_| String::new())
            }
            LockStyle::None => Err(self.unsupported("row locking")),
            LockStyle::ForClause => {
                let base = match lock.mode {
                    LockMode::PessimisticRead if caps.lock.for_share.is_empty() => {
                        return Err(self.unsupported("shared row locks"));
                    }
                    LockMode::PessimisticRead => caps.lock.for_share,
                    LockMode::PessimisticWrite
                    | LockMode::PessimisticPartialWrite
                    | LockMode::PessimisticWriteOrFail => "FOR UPDATE",
                    LockMode::ForNoKeyUpdate | LockMode::ForKeyShare if !caps.lock.key_locks => {
                        return Err(self.unsupported(format!("{:?} lock", lock.mode)));
                    }
                    LockMode::ForNoKeyUpdate => "FOR NO KEY UPDATE",
                    LockMode::ForKeyShare => "FOR KEY SHARE",
                    LockMode::DirtyRead => return Err(self.unsupported("dirty read")),
                };
                let mut out = format!(" {base}");
                if !lock.tables.is_empty() {
                    if !caps.lock.lock_tables {
                        return Err(self.unsupported("lock tables"));
                    }
                    let tables: Vec<_> = lock.tables.iter().map(|t| self.escape(t)).collect();
                    out.push_str(&format!(" OF {}", tables.join(", ")));
                }
                match lock.mode {
                    LockMode::PessimisticPartialWrite if caps.lock.skip_locked => out.push_str(" SKIP LOCKED"),
                    LockMode::PessimisticWriteOrFail if caps.lock.nowait => out.push_str(" NOWAIT"),
                    LockMode::PessimisticPartialWrite => return Err(self.unsupported("SKIP LOCKED")),
                    LockMode::PessimisticWriteOrFail => return Err(self.unsupported("NOWAIT")),
                    _ => {}
                }
                Ok(out)
            }
        }
    }

    /// ` WITH (...)` table hint for table-hint lock styles.
    pub(crate) fn table_hint(&self) -> OrmResult<String> {
        let Some(lock) = &self.map.lock else {
            return Ok(String::new());
        };
        if self.caps().lock.style != LockStyle::TableHint {
            return Ok(String::new());
        }
        Ok(match lock.mode {
            LockMode::PessimisticRead => " WITH (HOLDLOCK, ROWLOCK)".to_string(),
            LockMode::PessimisticWrite => " WITH (UPDLOCK, ROWLOCK)".to_string(),
            LockMode::PessimisticPartialWrite => " WITH (UPDLOCK, ROWLOCK, READPAST)".to_string(),
            LockMode::PessimisticWriteOrFail => " WITH (UPDLOCK, ROWLOCK, NOWAIT)".to_string(),
            LockMode::DirtyRead => " WITH (NOLOCK)".to_string(),
            LockMode::ForNoKeyUpdate | LockMode::ForKeyShare => {
                return Err(self.unsupported(format!("{:?} lock", lock.mode)));
            }
        })
    }

    /// Columns written rows return: the explicit `returning` list plus, when
    /// `update_entity` is on, the columns the database fills in.
    pub(crate) fn returning_columns(&self) -> OrmResult<Vec<&'a ColumnMetadata>> {
        let map = self.map;
        let Some(entity) = self.main_entity()? else {
            return Ok(Vec::new());
        };
        let mut columns = self.resolve_main_columns(&map.returning)?;
        if map.update_entity {
            for column in &entity.columns {
                let generated = match map.query_type {
                    QueryType::Insert => {
                        column.is_generated()
                            || column.is_create_date
                            || column.is_update_date
                            || column.is_version
                    }
                    QueryType::Update | QueryType::SoftDelete | QueryType::Restore => {
                        column.is_update_date || column.is_version
                    }
                    _ => false,
                };
                if generated && !columns.iter().any(|c| c.database_name == column.database_name) {
                    columns.push(column);
                }
            }
        }
        Ok(columns)
    }

    /// ` RETURNING "a", "b"` for trailing-returning dialects.
    pub(crate) fn returning_clause(&self) -> OrmResult<String> {
        if self.caps().returning != ReturningStyle::Returning {
            return Ok(String::new());
        }
        let columns = self.returning_columns()?;
        if columns.is_empty() {
            return Ok(String::new());
        }
        let cols: Vec<_> = columns.iter().map(|c| self.escape(&c.database_name)).collect();
        Ok(format!(" RETURNING {}", cols.join(", ")))
    }

    /// ` OUTPUT INSERTED."a"` for output-clause dialects.
    pub(crate) fn output_clause(&self, source: &str) -> OrmResult<String> {
        if self.caps().returning != ReturningStyle::Output {
            return Ok(String::new());
        }
        let columns = self.returning_columns()?;
        if columns.is_empty() {
            return Ok(String::new());
        }
        let cols: Vec<_> = columns
            .iter()
            .map(|c| format!("{source}.{}", self.escape(&c.database_name)))
            .collect();
        Ok(format!(" OUTPUT {}", cols.join(", ")))
    }

    /// ` /* comment */`
    pub(crate) fn comment_suffix(&self) -> String {
        match &self.map.comment {
            Some(comment) => {
                let mut text = comment.replace("*/", "");
                while text.contains("*/") {
                    text = text.replace("*/", "");
                }
                format!(" /* {text} */")
            }
            None => String::new(),
        }
    }

    /// `/*+ MAX_EXECUTION_TIME(ms) */ ` optimizer hint.
    pub(crate) fn execution_time_hint(&self) -> String {
        if !self.caps().max_execution_time_hint {
            return String::new();
        }
        match self.map.max_execution_time.or(self.env.config.max_execution_time_hint) {
            Some(limit) => format!("/*+ MAX_EXECUTION_TIME({}) */ ", limit.as_millis()),
            None => String::new(),
        }
    }

    /// Value written for an omitted column inside VALUES.
    pub(crate) fn default_value(&self) -> &'static str {
        if self.caps().default_keyword { "DEFAULT" } else { "NULL" }
    }
}
