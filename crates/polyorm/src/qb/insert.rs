//! INSERT and upsert assembly and the INSERT builder.

use crate::dialect::UpsertStyle;
use crate::driver::{QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::metadata::ColumnMetadata;
use crate::qb::assembler::Assembler;
use crate::qb::builder::QueryBuilder;
use crate::qb::expression_map::{ExpressionMap, OnConflict, QueryType, UpsertOptions, ValueSet, WriteValue};
use crate::qb::returning::{self, column_keys};
use crate::row::Row;
use crate::runner::QueryRunner;
use crate::sql::Sql;
use crate::subscriber::{WriteEvent, broadcast_after, broadcast_before};
use crate::transaction::with_auto_transaction;
use crate::value::Value;
use std::collections::HashSet;

/// One entry of the INSERT column list.
struct InsertColumn<'a> {
    name: &'a str,
    column: Option<&'a ColumnMetadata>,
    /// Value-set keys feeding this column
    keys: Vec<&'a str>,
    /// Written when a row provides nothing
    fill: Option<Value>,
}

impl<'a> Assembler<'a> {
    pub(crate) fn insert_statement(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let main = self.main_alias()?;
        if map.value_sets.is_empty() {
            return Err(OrmError::validation("INSERT needs at least one row of values"));
        }
        let table_path = main.table_path().ok_or_else(|| OrmError::MissingMetadata {
            target: main.name.clone(),
        })?;
        let table = self.escape_table(table_path);
        let columns = self.insert_columns()?;

        if map.on_conflict.is_some() && caps.upsert == UpsertStyle::MergeInto {
            return self.merge_statement(&table, &columns);
        }

        let mut sql = self.cte_prefix()?;
        let ignore = map.on_conflict == Some(OnConflict::Ignore) && caps.upsert == UpsertStyle::OnDuplicateKey;
        let insert_into = if ignore { "INSERT IGNORE INTO " } else { "INSERT INTO " };

        if columns.is_empty() {
            sql.push(insert_into);
            sql.push(&table);
            sql.push(&self.output_clause("INSERTED")?);
            sql.push(" DEFAULT VALUES");
        } else {
            let missing = self.default_value();
            let rows = self.insert_rows(&columns, missing)?;
            let names: Vec<_> = columns.iter().map(|c| self.escape(c.name)).collect();
            let list = format!("({})", names.join(", "));

            if rows.len() > 1 && !caps.multi_row_values {
                sql.push("INSERT ALL");
                for row in rows {
                    sql.push(&format!(" INTO {table} {list} VALUES ("));
                    sql.push_joined(row, ", ");
                    sql.push(")");
                }
                sql.push(&format!(" SELECT 1 FROM {}", caps.dummy_table.unwrap_or("DUAL")));
            } else {
                sql.push(insert_into);
                sql.push(&format!("{table} {list}"));
                sql.push(&self.output_clause("INSERTED")?);
                sql.push(" VALUES ");
                let tuples: Vec<_> = rows
                    .into_iter()
                    .map(|row| {
                        let mut tuple = Sql::empty();
                        tuple.push_joined(row, ", ");
                        tuple.parenthesized()
                    })
                    .collect();
                sql.push_joined(tuples, ", ");
            }
        }

        sql.push_sql(self.upsert_clause(&table)?);
        sql.push(&self.returning_clause()?);
        sql.push(&self.comment_suffix());
        Ok(sql)
    }

    /// Columns written by the INSERT, in entity order. Unknown value keys go
    /// through the unknown-column policy.
    fn insert_columns(&self) -> OrmResult<Vec<InsertColumn<'a>>> {
        let map = self.map;
        let main = self.main_alias()?;
        let provided = |keys: &[&str]| {
            map.value_sets
                .iter()
                .any(|set| keys.iter().any(|key| set.get(key).is_some()))
        };

        let Some(entity) = main.metadata.as_deref() else {
            let mut columns: Vec<InsertColumn<'a>> = Vec::new();
            for set in &map.value_sets {
                for (key, _) in &set.entries {
                    if !columns.iter().any(|c| c.name == key.as_str()) {
                        columns.push(InsertColumn {
                            name: key.as_str(),
                            column: None,
                            keys: vec![key.as_str()],
                            fill: None,
                        });
                    }
                }
            }
            return Ok(columns);
        };

        // Single-column relations may be written through their property name.
        let mut relation_keys: Vec<(&'a str, &'a str)> = Vec::new();
        for relation in entity.relations.iter().filter(|r| r.owns_join_columns()) {
            if let [join_column] = relation.join_columns.as_slice() {
                relation_keys.push((join_column.name.as_str(), relation.property_path.as_str()));
            }
        }

        let mut columns = Vec::new();
        let mut consumed: HashSet<&str> = HashSet::new();
        for column in &entity.columns {
            let mut keys = column_keys(column);
            for &(name, key) in &relation_keys {
                if name == column.database_name && !keys.contains(&key) {
                    keys.push(key);
                }
            }
            let fill = if column.is_version {
                Some(Value::Int(1))
            } else if column.is_discriminator {
                entity
                    .inheritance
                    .as_ref()
                    .and_then(|i| i.values.first())
                    .map(|v| Value::Text(v.clone()))
            } else {
                None
            };
            if provided(keys.as_slice()) || fill.is_some() {
                consumed.extend(keys.iter().copied());
                columns.push(InsertColumn {
                    name: &column.database_name,
                    column: Some(column),
                    keys,
                    fill,
                });
            }
        }
        for relation in entity.relations.iter().filter(|r| r.owns_join_columns()) {
            for join_column in &relation.join_columns {
                if columns.iter().any(|c| c.name == join_column.name) {
                    continue;
                }
                let mut keys = vec![join_column.name.as_str()];
                if relation.join_columns.len() == 1 {
                    keys.push(relation.property_path.as_str());
                }
                if provided(keys.as_slice()) {
                    consumed.extend(keys.iter().copied());
                    columns.push(InsertColumn {
                        name: &join_column.name,
                        column: None,
                        keys,
                        fill: None,
                    });
                }
            }
        }

        for set in &map.value_sets {
            for (key, _) in &set.entries {
                if !consumed.contains(key.as_str()) {
                    self.tolerate_unknown_column(OrmError::unknown_column(&main.name, key))?;
                }
            }
        }
        Ok(columns)
    }

    /// One list of value fragments per row; `missing` fills gaps.
    fn insert_rows(&mut self, columns: &[InsertColumn<'a>], missing: &str) -> OrmResult<Vec<Vec<Sql>>> {
        let map = self.map;
        let mut rows = Vec::with_capacity(map.value_sets.len());
        for (r, set) in map.value_sets.iter().enumerate() {
            let mut row = Vec::with_capacity(columns.len());
            for (c, column) in columns.iter().enumerate() {
                let key = self.key(&format!("i{r}_{c}"));
                let item = match column.keys.iter().find_map(|k| set.get(k)) {
                    Some(WriteValue::Value(value)) => {
                        let value = match column.column {
                            Some(meta) => meta.to_database(value.clone()),
                            None => value.clone(),
                        };
                        self.bind(key, value)
                    }
                    Some(WriteValue::Raw(expression)) => self.compile_text(expression)?,
                    Some(WriteValue::Default) => Sql::new(missing),
                    None => match &column.fill {
                        Some(value) => self.bind(key, value.clone()),
                        None => Sql::new(missing),
                    },
                };
                row.push(item);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Column names for upsert targets. An empty list falls back to the
    /// primary key when `primary_fallback` is set.
    fn upsert_columns(&self, paths: &[String], primary_fallback: bool) -> OrmResult<Vec<String>> {
        let main = self.main_alias()?;
        let names: Vec<String> = match main.metadata.as_deref() {
            Some(entity) if paths.is_empty() && primary_fallback => {
                entity.primary_columns().map(|c| c.database_name.clone()).collect()
            }
            Some(_) => self
                .resolve_main_columns(paths)?
                .into_iter()
                .map(|c| c.database_name.clone())
                .collect(),
            None => paths.to_vec(),
        };
        if names.is_empty() && primary_fallback {
            return Err(OrmError::invalid_condition(format!(
                "upsert on '{}' needs a conflict target",
                main.name
            )));
        }
        Ok(names)
    }

    /// `ON CONFLICT ...` / `ON DUPLICATE KEY UPDATE ...`
    fn upsert_clause(&mut self, table: &str) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let Some(on_conflict) = &map.on_conflict else {
            return Ok(Sql::empty());
        };
        match (caps.upsert, on_conflict) {
            (UpsertStyle::None, _) => Err(self.unsupported("upsert")),
            (UpsertStyle::MergeInto, _) | (UpsertStyle::OnDuplicateKey, OnConflict::Ignore) => Ok(Sql::empty()),
            (UpsertStyle::OnConflict, OnConflict::Ignore) => Ok(Sql::new(" ON CONFLICT DO NOTHING")),
            (
                UpsertStyle::OnConflict,
                OnConflict::Update {
                    overwrite,
                    conflict_target,
                    options,
                },
            ) => {
                let target = self.upsert_columns(conflict_target, true)?;
                let overwrite = self.overwrite_columns(overwrite)?;
                let target: Vec<_> = target.iter().map(|c| self.escape(c)).collect();
                let mut sql = Sql::new(format!(" ON CONFLICT ( {} )", target.join(", ")));
                if let Some(predicate) = &options.index_predicate {
                    if !caps.upsert_index_predicate {
                        return Err(self.unsupported("partial index predicate in ON CONFLICT"));
                    }
                    sql.push(" WHERE ");
                    sql.push_sql(self.compile_text(predicate)?);
                }
                let sets: Vec<_> = overwrite
                    .iter()
                    .map(|c| {
                        let c = self.escape(c);
                        format!("{c} = EXCLUDED.{c}")
                    })
                    .collect();
                sql.push(" DO UPDATE SET ");
                sql.push(&sets.join(", "));
                if options.skip_update_if_no_values_changed {
                    let op = if caps.is_distinct_from { "IS DISTINCT FROM" } else { "IS NOT" };
                    let changed: Vec<_> = overwrite
                        .iter()
                        .map(|c| {
                            let c = self.escape(c);
                            format!("{table}.{c} {op} EXCLUDED.{c}")
                        })
                        .collect();
                    sql.push(&format!(" WHERE ({})", changed.join(" OR ")));
                }
                Ok(sql)
            }
            (UpsertStyle::OnDuplicateKey, OnConflict::Update { overwrite, options, .. }) => {
                if options.index_predicate.is_some() {
                    return Err(self.unsupported("partial index predicate in upsert"));
                }
                if options.skip_update_if_no_values_changed {
                    return Err(self.unsupported("conditional upsert updates"));
                }
                let overwrite = self.overwrite_columns(overwrite)?;
                let sets: Vec<_> = overwrite
                    .iter()
                    .map(|c| {
                        let c = self.escape(c);
                        format!("{c} = VALUES({c})")
                    })
                    .collect();
                Ok(Sql::new(format!(" ON DUPLICATE KEY UPDATE {}", sets.join(", "))))
            }
        }
    }

    fn overwrite_columns(&self, paths: &[String]) -> OrmResult<Vec<String>> {
        let columns = self.upsert_columns(paths, false)?;
        if columns.is_empty() {
            return Err(OrmError::validation("or_update needs at least one column to overwrite"));
        }
        Ok(columns)
    }

    /// `MERGE INTO` upsert: the rows become a `UNION ALL` source.
    fn merge_statement(&mut self, table: &str, columns: &[InsertColumn<'a>]) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        if columns.is_empty() {
            return Err(OrmError::validation("MERGE upsert needs at least one column"));
        }
        let (overwrite, conflict_target) = match &map.on_conflict {
            Some(OnConflict::Update {
                overwrite,
                conflict_target,
                options,
            }) => {
                if options.index_predicate.is_some() {
                    return Err(self.unsupported("partial index predicate in MERGE"));
                }
                (self.overwrite_columns(overwrite)?, self.upsert_columns(conflict_target, true)?)
            }
            _ => (Vec::new(), self.upsert_columns(&[], true)?),
        };

        let target = self.escape("mergeIntoTarget");
        let source = self.escape("mergeIntoSource");
        let names: Vec<_> = columns.iter().map(|c| self.escape(c.name)).collect();
        let rows = self.insert_rows(columns, "NULL")?;

        let mut sql = self.cte_prefix()?;
        sql.push(&format!("MERGE INTO {table} {target} USING ("));
        let selects: Vec<_> = rows
            .into_iter()
            .map(|row| {
                let items: Vec<_> = row
                    .into_iter()
                    .zip(&names)
                    .map(|(mut item, name)| {
                        item.push(&format!(" AS {name}"));
                        item
                    })
                    .collect();
                let mut select = Sql::new("SELECT ");
                select.push_joined(items, ", ");
                if let Some(dummy) = caps.dummy_table {
                    select.push(&format!(" FROM {dummy}"));
                }
                select
            })
            .collect();
        sql.push_joined(selects, " UNION ALL ");

        let on: Vec<_> = conflict_target
            .iter()
            .map(|c| {
                let c = self.escape(c);
                format!("{target}.{c} = {source}.{c}")
            })
            .collect();
        sql.push(&format!(") {source} ON ({})", on.join(" AND ")));
        if !overwrite.is_empty() {
            let sets: Vec<_> = overwrite
                .iter()
                .map(|c| {
                    let c = self.escape(c);
                    format!("{target}.{c} = {source}.{c}")
                })
                .collect();
            sql.push(&format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(", ")));
        }
        let values: Vec<_> = names.iter().map(|n| format!("{source}.{n}")).collect();
        sql.push(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            names.join(", "),
            values.join(", ")
        ));
        sql.push(&self.output_clause("INSERTED")?);
        sql.push(&self.comment_suffix());
        sql.push(caps.merge_terminator);
        Ok(sql)
    }
}

/// What an INSERT produced.
#[derive(Debug, Clone, Default)]
pub struct InsertResult {
    /// Primary keys of the inserted rows, where known
    pub identifiers: Vec<Row>,
    /// Database-generated values per row (returned or reloaded)
    pub generated_maps: Vec<Row>,
    pub raw: QueryResult,
}

/// Builder for INSERT statements.
#[derive(Debug, Clone)]
pub struct InsertQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl InsertQueryBuilder {
    impl_builder_common!();

    /// Insert into an entity's table.
    pub fn into(mut self, entity: &str) -> OrmResult<Self> {
        self.qb.set_main_entity(entity, None)?;
        Ok(self)
    }

    /// Insert into a table without metadata; value keys are column names.
    pub fn into_table(mut self, table: &str) -> OrmResult<Self> {
        self.qb.set_main_table(table, None)?;
        Ok(self)
    }

    /// Replace the rows to insert.
    pub fn values(mut self, rows: Vec<ValueSet>) -> Self {
        self.qb.expression_map.value_sets = rows;
        self
    }

    /// Add one row.
    pub fn value(mut self, row: ValueSet) -> Self {
        self.qb.expression_map.value_sets.push(row);
        self
    }

    /// Keep existing rows on a key conflict.
    pub fn or_ignore(mut self) -> Self {
        self.qb.expression_map.on_conflict = Some(OnConflict::Ignore);
        self
    }

    /// Overwrite `overwrite` on a conflict over `conflict_target` (primary key
    /// when empty).
    pub fn or_update(mut self, overwrite: &[&str], conflict_target: &[&str], options: UpsertOptions) -> Self {
        self.qb.expression_map.on_conflict = Some(OnConflict::Update {
            overwrite: overwrite.iter().map(|c| c.to_string()).collect(),
            conflict_target: conflict_target.iter().map(|c| c.to_string()).collect(),
            options,
        });
        self
    }

    /// Return these properties (`"*"` for all) from the written rows.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.qb.expression_map.returning = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Read back generated columns after the write. On by default.
    pub fn update_entity(mut self, enabled: bool) -> Self {
        self.qb.expression_map.update_entity = enabled;
        self
    }

    /// Run the INSERT, firing subscribers and reading back generated values.
    pub async fn execute(&self) -> OrmResult<InsertResult> {
        let mut map = self.qb.expression_map.clone();
        let entity = map.main_alias()?.metadata.clone();
        if let Some(entity) = entity {
            returning::fill_generated_uuids(&entity, &mut map.value_sets);
        }
        let listened = self.qb.listened_entity();
        let subscribers = self.qb.data_source.subscribers();

        let lease = self.qb.lease(ReplicationMode::Master);
        let runner = &lease.runner;
        let result = with_auto_transaction(runner, map.use_transaction, async {
            let mut event = None;
            if let Some(entity) = listened {
                let mut before = WriteEvent::new(entity, QueryType::Insert, map.value_sets.clone());
                broadcast_before(subscribers, &mut before).await?;
                map.value_sets = before.values.clone();
                event = Some(before);
            }

            let (sql, params) = self.qb.finalize_map(&map)?;
            let raw = runner.query(&sql, &params).await?;
            let (identifiers, generated_maps) = self.read_back(&map, &raw, runner).await?;

            if let Some(mut event) = event {
                event.affected = raw.affected;
                event.generated = generated_maps.clone();
                broadcast_after(subscribers, &event).await?;
            }
            Ok(InsertResult {
                identifiers,
                generated_maps,
                raw,
            })
        })
        .await;
        lease.finish().await;
        result
    }

    async fn read_back(
        &self,
        map: &ExpressionMap,
        raw: &QueryResult,
        runner: &QueryRunner,
    ) -> OrmResult<(Vec<Row>, Vec<Row>)> {
        let main = map.main_alias()?;
        let Some(entity) = main.metadata.clone() else {
            return Ok((Vec::new(), raw.rows.clone()));
        };
        if self.qb.data_source.capabilities().supports_returning() {
            let identifiers = returning::insert_identifiers(&entity, &map.value_sets, &raw.rows, None);
            return Ok((identifiers, raw.rows.clone()));
        }

        let identifiers =
            returning::insert_identifiers(&entity, &map.value_sets, &[], raw.last_insert_id);
        let env = self.qb.env();
        let columns = Assembler::new(map, &env).returning_columns()?;
        if columns.is_empty() || identifiers.is_empty() {
            return Ok((identifiers, Vec::new()));
        }
        let reload = returning::reload_map(&main.name, &entity, &columns, &identifiers)?;
        let (sql, params) = self.qb.finalize_map(&reload)?;
        let rows = runner.query(&sql, &params).await?.rows;
        let generated = returning::align_rows(&entity, &identifiers, rows);
        Ok((identifiers, generated))
    }
}
