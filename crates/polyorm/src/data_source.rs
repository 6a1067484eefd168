//! The data source: driver, entity metadata, configuration, logger and
//! subscribers behind one cheaply clonable handle.
//!
//! ```ignore
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     EntityMetadata::new("Post", "post")
//!         .column(ColumnMetadata::primary("id").generated())
//!         .column(ColumnMetadata::new("title")),
//! );
//!
//! let ds = DataSource::builder(PgDriver::new(pool))
//!     .registry(registry)
//!     .config(OrmConfig::new().with_slow_query_threshold(Duration::from_millis(200)))
//!     .build();
//!
//! let rows = ds.create_query_builder().from("Post", "p")?.get_raw_many().await?;
//! ```

use crate::config::OrmConfig;
use crate::dialect::{Capabilities, IsolationLevel};
use crate::driver::{Driver, QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::logger::{QueryLogger, TracingLogger};
use crate::metadata::{EntityMetadata, MetadataRegistry};
use crate::qb::QueryBuilder;
use crate::runner::QueryRunner;
use crate::subscriber::EntitySubscriber;
use crate::transaction::run_in_transaction;
use crate::value::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

struct Inner {
    driver: Arc<dyn Driver>,
    registry: MetadataRegistry,
    config: OrmConfig,
    logger: Arc<dyn QueryLogger>,
    subscribers: Vec<Arc<dyn EntitySubscriber>>,
}

/// Shared entry point for building and running queries.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<Inner>,
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("dialect", &self.capabilities().name)
            .field("entities", &self.inner.registry.len())
            .field("subscribers", &self.inner.subscribers.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl DataSource {
    pub fn builder(driver: impl Driver + 'static) -> DataSourceBuilder {
        DataSourceBuilder::new(Arc::new(driver))
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &OrmConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        self.inner.driver.capabilities()
    }

    pub fn logger(&self) -> &Arc<dyn QueryLogger> {
        &self.inner.logger
    }

    pub fn subscribers(&self) -> &[Arc<dyn EntitySubscriber>] {
        &self.inner.subscribers
    }

    /// Metadata of a registered entity, looked up by name then by table path.
    pub fn entity(&self, name: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.inner
            .registry
            .get(name)
            .or_else(|| self.inner.registry.find_by_table(name))
            .cloned()
            .ok_or_else(|| OrmError::MissingMetadata {
                target: name.to_string(),
            })
    }

    /// A new runner. Replica runners fall back to the primary when no
    /// replicas are configured.
    pub fn create_query_runner(&self, mode: ReplicationMode) -> Arc<QueryRunner> {
        let mode = match mode {
            ReplicationMode::Slave if !self.inner.driver.has_replicas() => ReplicationMode::Master,
            mode => mode,
        };
        Arc::new(QueryRunner::new(
            Arc::clone(&self.inner.driver),
            Arc::clone(&self.inner.logger),
            mode,
            self.inner.config.max_query_execution_time,
        ))
    }

    /// A builder that acquires a runner per execution.
    pub fn create_query_builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.clone(), None)
    }

    /// A builder bound to `runner`, e.g. to run inside its transaction.
    pub fn create_query_builder_with_runner(&self, runner: Arc<QueryRunner>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), Some(runner))
    }

    /// Run raw SQL with positional parameters on a fresh primary runner.
    pub async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let runner = self.create_query_runner(ReplicationMode::Master);
        let result = runner.query(sql, params).await;
        release(&runner).await;
        result
    }

    /// Run `f` inside a transaction on a dedicated primary runner.
    ///
    /// ```ignore
    /// ds.transaction(|runner| async move {
    ///     ds.create_query_builder_with_runner(runner.clone())
    ///         .update("Post")?
    ///         .set_value("title", "renamed")
    ///         .where_in_ids([1])?
    ///         .execute()
    ///         .await?;
    ///     Ok(())
    /// })
    /// .await?;
    /// ```
    pub async fn transaction<T, F, Fut>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(Arc<QueryRunner>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        self.transaction_with_isolation(None, f).await
    }

    pub async fn transaction_with_isolation<T, F, Fut>(
        &self,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> OrmResult<T>
    where
        F: FnOnce(Arc<QueryRunner>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let runner = self.create_query_runner(ReplicationMode::Master);
        let result = run_in_transaction(&runner, isolation, f(Arc::clone(&runner))).await;
        release(&runner).await;
        result
    }
}

async fn release(runner: &QueryRunner) {
    if let Err(err) = runner.release().await {
        tracing::warn!(target: "polyorm", error = %err, "failed to release query runner");
    }
}

/// Builder for [`DataSource`].
pub struct DataSourceBuilder {
    driver: Arc<dyn Driver>,
    registry: MetadataRegistry,
    config: OrmConfig,
    logger: Option<Arc<dyn QueryLogger>>,
    subscribers: Vec<Arc<dyn EntitySubscriber>>,
}

impl DataSourceBuilder {
    fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            registry: MetadataRegistry::new(),
            config: OrmConfig::default(),
            logger: None,
            subscribers: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one more entity.
    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.registry.register(entity);
        self
    }

    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`TracingLogger`].
    pub fn logger(mut self, logger: impl QueryLogger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn subscriber(mut self, subscriber: impl EntitySubscriber + 'static) -> Self {
        self.subscribers.push(Arc::new(subscriber));
        self
    }

    pub fn build(self) -> DataSource {
        let logger = self.logger.unwrap_or_else(|| {
            let logger = match self.config.max_logged_sql_length {
                Some(len) => TracingLogger::new().max_sql_length(len),
                None => TracingLogger::new().no_truncate(),
            };
            Arc::new(logger)
        });
        DataSource {
            inner: Arc::new(Inner {
                driver: self.driver,
                registry: self.registry,
                config: self.config,
                logger,
                subscribers: self.subscribers,
            }),
        }
    }
}
