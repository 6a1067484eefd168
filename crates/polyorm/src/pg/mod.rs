//! PostgreSQL driver on top of `tokio-postgres` and a `deadpool` pool.
//!
//! Values are bound with the server-inferred parameter types: an
//! [`Value::Int`] bound to an `int4` column is narrowed, a text value bound to
//! a `uuid` column is parsed, and so on. Result columns are decoded into
//! [`Value`]s by their declared type.
//!
//! ```ignore
//! let primary = polyorm::create_pool(&std::env::var("DATABASE_URL")?)?;
//! let replica = polyorm::create_pool(&std::env::var("REPLICA_URL")?)?;
//! let driver = PgDriver::new(primary).with_replica(replica);
//! ```

mod types;

use crate::dialect::{Capabilities, POSTGRES};
use crate::driver::{Connection, Driver, QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use futures_util::{TryStreamExt, pin_mut};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_postgres::types::ToSql;

pub use types::decode_row;

/// A [`Driver`] for PostgreSQL and wire-compatible servers.
pub struct PgDriver {
    caps: &'static Capabilities,
    primary: Pool,
    replicas: Vec<Pool>,
    next_replica: AtomicUsize,
}

impl fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgDriver")
            .field("dialect", &self.caps.name)
            .field("primary", &self.primary.status())
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

impl PgDriver {
    pub fn new(primary: Pool) -> Self {
        Self {
            caps: &POSTGRES,
            primary,
            replicas: Vec::new(),
            next_replica: AtomicUsize::new(0),
        }
    }

    /// Add a read replica. Replica sessions are handed out round-robin.
    pub fn with_replica(mut self, pool: Pool) -> Self {
        self.replicas.push(pool);
        self
    }

    /// Use another wire-compatible descriptor, e.g. `COCKROACHDB`.
    pub fn with_capabilities(mut self, caps: &'static Capabilities) -> Self {
        self.caps = caps;
        self
    }

    fn pool(&self, mode: ReplicationMode) -> &Pool {
        match mode {
            ReplicationMode::Slave if !self.replicas.is_empty() => {
                let idx = self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
                &self.replicas[idx]
            }
            _ => &self.primary,
        }
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn capabilities(&self) -> &'static Capabilities {
        self.caps
    }

    async fn connect(&self, mode: ReplicationMode) -> OrmResult<Box<dyn Connection>> {
        let client = self.pool(mode).get().await?;
        Ok(Box::new(PgConnection { client }))
    }

    fn has_replicas(&self) -> bool {
        !self.replicas.is_empty()
    }
}

struct PgConnection {
    client: Object,
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let stream = self
            .client
            .query_raw(sql, params.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await
            .map_err(OrmError::from_db_error)?;
        pin_mut!(stream);

        let mut rows = Vec::new();
        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = stream.try_next().await.map_err(OrmError::from_db_error)? {
            let names = columns
                .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect());
            rows.push(decode_row(&row, Arc::clone(names))?);
        }

        Ok(QueryResult {
            rows,
            affected: stream.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn release(self: Box<Self>) -> OrmResult<()> {
        // Dropping the deadpool object returns the client to its pool.
        drop(self.client);
        Ok(())
    }
}

