//! Pools behind [`PgDriver`]: one for the primary, one per read replica.
//!
//! ```ignore
//! let driver = PoolConfig::new(std::env::var("DATABASE_URL")?)
//!     .with_replica(std::env::var("REPLICA_URL")?)
//!     .with_max_size(32)
//!     .with_wait_timeout(Duration::from_secs(5))
//!     .build_driver()?;
//! let ds = DataSource::builder(driver).registry(registry).build();
//! ```

use crate::error::{OrmError, OrmResult};
use crate::pg::PgDriver;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{NoTls, Socket};

/// Connection settings for a [`PgDriver`], loadable from a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Primary connection string
    pub url: String,
    /// Read replicas; reads are spread over them round-robin
    pub replica_urls: Vec<String>,
    /// Sessions per pool
    pub max_size: usize,
    /// How long a checkout waits for a free session
    pub wait_timeout: Option<Duration>,
    /// How long opening a new session may take
    pub create_timeout: Option<Duration>,
    /// Run a test query before reusing a session instead of checking only its state
    pub verify_on_recycle: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            replica_urls: Vec::new(),
            max_size: 16,
            wait_timeout: None,
            create_timeout: None,
            verify_on_recycle: false,
        }
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_replica(mut self, url: impl Into<String>) -> Self {
        self.replica_urls.push(url.into());
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = Some(timeout);
        self
    }

    pub fn verify_on_recycle(mut self, verify: bool) -> Self {
        self.verify_on_recycle = verify;
        self
    }

    /// Build the driver without TLS. Sessions open lazily on first use.
    pub fn build_driver(&self) -> OrmResult<PgDriver> {
        self.build_driver_with_tls(NoTls)
    }

    /// Build the driver with a TLS connector shared by the primary and replicas.
    pub fn build_driver_with_tls<T>(&self, tls: T) -> OrmResult<PgDriver>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let mut driver = PgDriver::new(self.build_pool(&self.url, tls.clone())?);
        for url in &self.replica_urls {
            driver = driver.with_replica(self.build_pool(url, tls.clone())?);
        }
        Ok(driver)
    }

    fn build_pool<T>(&self, url: &str, tls: T) -> OrmResult<Pool>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        if url.trim().is_empty() {
            return Err(OrmError::Connection("empty database url".to_string()));
        }
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;

        let recycling_method = if self.verify_on_recycle {
            RecyclingMethod::Verified
        } else {
            RecyclingMethod::Fast
        };
        let mgr = Manager::from_config(pg_config, tls, ManagerConfig { recycling_method });
        let mut builder = Pool::builder(mgr).max_size(self.max_size);
        // Timeouts are enforced by the runtime.
        if self.wait_timeout.is_some() || self.create_timeout.is_some() {
            builder = builder
                .runtime(Runtime::Tokio1)
                .wait_timeout(self.wait_timeout)
                .create_timeout(self.create_timeout);
        }
        builder.build().map_err(|e| OrmError::Pool(e.to_string()))
    }
}

/// A primary-only pool with default settings.
pub fn create_pool(database_url: &str) -> OrmResult<Pool> {
    PoolConfig::new(database_url).build_pool(database_url, NoTls)
}
