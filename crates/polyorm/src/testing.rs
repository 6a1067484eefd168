//! In-memory driver that records statements and replays scripted results.
//!
//! Used by the crate's own tests and available to applications that want to
//! assert on generated SQL without a database.
//!
//! ```ignore
//! let driver = RecordingDriver::new(Dialect::Postgres);
//! driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("cnt", 3)])]));
//! let ds = DataSource::builder(driver.clone()).registry(registry).build();
//!
//! let count = ds.create_query_builder().from("Post", "p")?.get_count().await?;
//! assert_eq!(count, 3);
//! assert!(driver.statements()[0].starts_with("SELECT COUNT"));
//! ```

use crate::dialect::{Capabilities, Dialect};
use crate::driver::{Connection, Driver, QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One statement as the driver received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub mode: ReplicationMode,
    /// Sequence number of the connection that ran it, starting at 1
    pub connection: usize,
}

#[derive(Default)]
struct Script {
    log: Vec<RecordedStatement>,
    results: VecDeque<OrmResult<QueryResult>>,
    /// Statements containing the needle fail with a driver error
    failures: Vec<(String, String)>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

/// A [`Driver`] that never touches the network.
///
/// Results are consumed in push order; once the queue is empty every statement
/// succeeds with an empty [`QueryResult`]. Clones share the log and the queue.
#[derive(Clone)]
pub struct RecordingDriver {
    caps: &'static Capabilities,
    replicas: bool,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecordingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingDriver")
            .field("dialect", &self.caps.name)
            .field("replicas", &self.replicas)
            .finish_non_exhaustive()
    }
}

impl RecordingDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_capabilities(dialect.capabilities())
    }

    pub fn with_capabilities(caps: &'static Capabilities) -> Self {
        Self {
            caps,
            replicas: false,
            shared: Arc::default(),
        }
    }

    /// Pretend read replicas are configured.
    pub fn with_replicas(mut self) -> Self {
        self.replicas = true;
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not hide the log from the others.
        self.shared
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the result of the next statement.
    pub fn push_result(&self, result: QueryResult) {
        self.script().results.push_back(Ok(result));
    }

    /// Queue a failure for the next statement.
    pub fn push_error(&self, error: OrmError) {
        self.script().results.push_back(Err(error));
    }

    /// Fail every statement containing `needle`, regardless of the queue.
    pub fn fail_on(&self, needle: impl Into<String>, message: impl Into<String>) {
        self.script().failures.push((needle.into(), message.into()));
    }

    pub fn recorded(&self) -> Vec<RecordedStatement> {
        self.script().log.clone()
    }

    /// SQL text of every statement, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.script().log.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn clear(&self) {
        let mut script = self.script();
        script.log.clear();
        script.results.clear();
    }

    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn connections_released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn capabilities(&self) -> &'static Capabilities {
        self.caps
    }

    async fn connect(&self, mode: ReplicationMode) -> OrmResult<Box<dyn Connection>> {
        let id = self.shared.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(RecordingConnection {
            driver: self.clone(),
            mode,
            id,
        }))
    }

    fn has_replicas(&self) -> bool {
        self.replicas
    }
}

struct RecordingConnection {
    driver: RecordingDriver,
    mode: ReplicationMode,
    id: usize,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let mut script = self.driver.script();
        script.log.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
            mode: self.mode,
            connection: self.id,
        });
        if let Some((_, message)) = script.failures.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Err(OrmError::Driver(message.clone()));
        }
        script.results.pop_front().unwrap_or_else(|| Ok(QueryResult::default()))
    }

    async fn release(self: Box<Self>) -> OrmResult<()> {
        self.driver.shared.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_results_in_order_and_records_statements() {
        let driver = RecordingDriver::new(Dialect::Postgres);
        driver.push_result(QueryResult::with_affected(2));
        driver.push_error(OrmError::Driver("boom".into()));

        let mut conn = driver.connect(ReplicationMode::Master).await.unwrap();
        assert_eq!(conn.query("UPDATE a", &[]).await.unwrap().affected, Some(2));
        assert!(conn.query("UPDATE b", &[Value::Int(1)]).await.is_err());
        assert_eq!(conn.query("SELECT 1", &[]).await.unwrap(), QueryResult::default());
        conn.release().await.unwrap();

        assert_eq!(driver.statements(), vec!["UPDATE a", "UPDATE b", "SELECT 1"]);
        assert_eq!(driver.recorded()[1].params, vec![Value::Int(1)]);
        assert_eq!(driver.connections_opened(), 1);
        assert_eq!(driver.connections_released(), 1);
    }

    #[tokio::test]
    async fn fail_on_matches_substrings() {
        let driver = RecordingDriver::new(Dialect::MySql);
        driver.fail_on("ROLLBACK", "connection reset");
        let mut conn = driver.connect(ReplicationMode::Slave).await.unwrap();
        assert!(conn.query("SELECT 1", &[]).await.is_ok());
        let err = conn.query("ROLLBACK", &[]).await.unwrap_err();
        assert!(matches!(err, OrmError::Driver(ref m) if m == "connection reset"));
        assert_eq!(driver.recorded()[0].mode, ReplicationMode::Slave);
    }
}
