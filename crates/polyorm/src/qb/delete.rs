//! DELETE, soft delete and restore.

use crate::driver::{QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::qb::assembler::Assembler;
use crate::qb::builder::QueryBuilder;
use crate::qb::expression_map::{Order, OrderByItem, QueryType};
use crate::qb::update::UpdateResult;
use crate::row::Row;
use crate::sql::Sql;
use crate::subscriber::{WriteEvent, broadcast_after, broadcast_before};
use crate::transaction::with_auto_transaction;

impl Assembler<'_> {
    pub(crate) fn delete_statement(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let main = self.main_alias()?;
        if !map.joins.is_empty() {
            return Err(self.unsupported("joins in DELETE"));
        }
        let table_path = main.table_path().ok_or_else(|| OrmError::MissingMetadata {
            target: main.name.clone(),
        })?;

        let mut sql = self.cte_prefix()?;
        sql.push("DELETE FROM ");
        sql.push(&self.escape_table(table_path));
        sql.push(&self.output_clause("DELETED")?);
        sql.push_sql(self.where_expression(Vec::new())?);
        sql.push_sql(self.write_limit(caps.delete_limit, "DELETE")?);
        sql.push(&self.returning_clause()?);
        sql.push(&self.comment_suffix());
        Ok(sql)
    }

    /// UPDATE of the delete-date column: the current timestamp for a soft
    /// delete, NULL for a restore.
    pub(crate) fn soft_delete_statement(&mut self) -> OrmResult<Sql> {
        let map = self.map;
        let caps = self.caps();
        let main = self.main_alias()?;
        let entity = main.metadata()?;
        let delete_date = entity
            .delete_date_column()
            .ok_or_else(|| OrmError::MissingDeleteDateColumn {
                entity: entity.name.clone(),
            })?;
        if !map.joins.is_empty() {
            return Err(self.unsupported("joins in soft delete"));
        }

        let deleted_at = if map.query_type == QueryType::Restore {
            "NULL"
        } else {
            caps.current_timestamp
        };
        let mut assignments = vec![format!("{} = {deleted_at}", self.escape(&delete_date.database_name))];
        if let Some(column) = entity
            .update_date_column()
            .filter(|c| c.database_name != delete_date.database_name)
        {
            assignments.push(format!(
                "{} = {}",
                self.escape(&column.database_name),
                caps.current_timestamp
            ));
        }
        if let Some(column) = entity.version_column() {
            let name = self.escape(&column.database_name);
            assignments.push(format!("{name} = {name} + 1"));
        }

        let mut sql = self.cte_prefix()?;
        sql.push("UPDATE ");
        sql.push(&self.escape_table(&entity.table_path));
        sql.push(" SET ");
        sql.push(&assignments.join(", "));
        sql.push(&self.output_clause("INSERTED")?);
        sql.push_sql(self.where_expression(Vec::new())?);
        sql.push_sql(self.write_limit(caps.update_limit, "UPDATE")?);
        sql.push(&self.returning_clause()?);
        sql.push(&self.comment_suffix());
        Ok(sql)
    }

    /// ` ORDER BY ... LIMIT n` on a write, where the dialect allows it.
    fn write_limit(&mut self, supported: bool, statement: &str) -> OrmResult<Sql> {
        let map = self.map;
        if map.order_bys.is_empty() && map.limit.is_none() {
            return Ok(Sql::empty());
        }
        if !supported {
            return Err(self.unsupported(format!("ORDER BY / LIMIT in {statement}")));
        }
        let mut sql = self.order_by_expression()?;
        if let Some(limit) = map.limit {
            sql.push(&format!(" LIMIT {limit}"));
        }
        Ok(sql)
    }
}

/// What a DELETE produced.
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub affected: Option<u64>,
    pub raw: QueryResult,
}

/// Builder for DELETE statements.
#[derive(Debug, Clone)]
pub struct DeleteQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl DeleteQueryBuilder {
    impl_builder_common!();
    impl_where_methods!();

    /// Delete from an entity's table.
    pub fn from(mut self, entity: &str) -> OrmResult<Self> {
        self.qb.set_main_entity(entity, None)?;
        Ok(self)
    }

    /// Delete from a table without metadata.
    pub fn from_table(mut self, table: &str) -> OrmResult<Self> {
        self.qb.set_main_table(table, None)?;
        Ok(self)
    }

    /// Return these properties from the deleted rows.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.qb.expression_map.returning = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Only dialects with `DELETE ... ORDER BY` accept it.
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

    pub async fn execute(&self) -> OrmResult<DeleteResult> {
        let (raw, _) = execute_write(&self.qb, QueryType::Delete).await?;
        Ok(DeleteResult {
            affected: raw.affected,
            raw,
        })
    }
}

/// Builder for soft deletes and restores.
#[derive(Debug, Clone)]
pub struct SoftDeleteQueryBuilder {
    pub(crate) qb: QueryBuilder,
}

impl SoftDeleteQueryBuilder {
    impl_builder_common!();
    impl_where_methods!();

    /// Wrap `qb`, failing when its main entity has no delete-date column.
    pub(crate) fn checked(qb: QueryBuilder) -> OrmResult<Self> {
        let builder = Self { qb };
        builder.ensure_delete_date()?;
        Ok(builder)
    }

    fn ensure_delete_date(&self) -> OrmResult<()> {
        let entity = self.qb.expression_map.main_alias()?.metadata()?;
        if entity.delete_date_column().is_none() {
            return Err(OrmError::MissingDeleteDateColumn {
                entity: entity.name.clone(),
            });
        }
        Ok(())
    }

    /// Target an entity; it must have a delete-date column.
    pub fn from(mut self, entity: &str) -> OrmResult<Self> {
        self.qb.set_main_entity(entity, None)?;
        self.ensure_delete_date()?;
        Ok(self)
    }

    /// Return these properties from the updated rows.
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.qb.expression_map.returning = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn update_entity(mut self, enabled: bool) -> Self {
        self.qb.expression_map.update_entity = enabled;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.qb.expression_map.limit = Some(limit);
        self
    }

    pub async fn execute(&self) -> OrmResult<UpdateResult> {
        let query_type = self.qb.expression_map.query_type;
        let (raw, generated_maps) = execute_write(&self.qb, query_type).await?;
        Ok(UpdateResult {
            affected: raw.affected,
            generated_maps,
            raw,
        })
    }
}

/// Run a write whose only payload is its WHERE clause, with subscribers.
/// Soft deletes and restores also hand back the generated values they touched.
async fn execute_write(qb: &QueryBuilder, query_type: QueryType) -> OrmResult<(QueryResult, Vec<Row>)> {
    let listened = qb.listened_entity();
    let subscribers = qb.data_source.subscribers();
    let lease = qb.lease(ReplicationMode::Master);
    let runner = &lease.runner;
    let result = with_auto_transaction(runner, qb.expression_map.use_transaction, async {
        let mut event = None;
        if let Some(entity) = listened {
            let mut before = WriteEvent::new(entity, query_type, Vec::new());
            broadcast_before(subscribers, &mut before).await?;
            event = Some(before);
        }
        let map = &qb.expression_map;
        let reload = query_type != QueryType::Delete;
        let keys = if reload { qb.preselect_keys(map, runner).await? } else { Vec::new() };
        let (sql, params) = qb.get_query_and_parameters()?;
        let raw = runner.query(&sql, &params).await?;
        let generated = if reload {
            qb.read_back(map, &raw, &keys, runner).await?
        } else {
            raw.rows.clone()
        };
        if let Some(mut event) = event {
            event.affected = raw.affected;
            event.generated = generated.clone();
            broadcast_after(subscribers, &event).await?;
        }
        Ok((raw, generated))
    })
    .await;
    lease.finish().await;
    result
}
