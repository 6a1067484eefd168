//! Query runners: one checked-out session plus its transaction state.
//!
//! A runner moves through `Idle -> Connected -> InTransaction(depth) -> Released`.
//! The session is acquired lazily on the first statement. Nested
//! transactions are savepoints named `txn_N`, where `N` is the depth the
//! savepoint was opened at; only the outermost level issues a real
//! `COMMIT`/`ROLLBACK`.
//!
//! ```ignore
//! let runner = data_source.create_query_runner(ReplicationMode::Master);
//! runner.start_transaction(None).await?;          // BEGIN
//! runner.start_transaction(None).await?;          // SAVEPOINT txn_1
//! runner.rollback_transaction().await?;           // ROLLBACK TO SAVEPOINT txn_1
//! assert!(runner.is_transaction_active());
//! runner.commit_transaction().await?;             // COMMIT
//! runner.release().await?;
//! ```
//!
//! Every operation holds the runner's mutex for its whole duration, so
//! statements run strictly in submission order and nobody observes a
//! half-finished depth change.

use crate::dialect::{Capabilities, IsolationLevel};
use crate::driver::{Connection, Driver, QueryResult, ReplicationMode};
use crate::error::{OrmError, OrmResult};
use crate::logger::QueryLogger;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[cfg(test)]
mod tests;

/// Mutable part of a runner, guarded by its mutex.
#[derive(Default)]
struct RunnerState {
    connection: Option<Box<dyn Connection>>,
    depth: usize,
    released: bool,
}

/// A handle to one database session and its transaction depth.
pub struct QueryRunner {
    driver: Arc<dyn Driver>,
    logger: Arc<dyn QueryLogger>,
    mode: ReplicationMode,
    slow_threshold: Option<Duration>,
    state: Mutex<RunnerState>,
    // Lock-free mirrors of `state` for the synchronous accessors
    depth: AtomicUsize,
    released: AtomicBool,
}

impl fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRunner")
            .field("mode", &self.mode)
            .field("depth", &self.transaction_depth())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl QueryRunner {
    pub fn new(
        driver: Arc<dyn Driver>,
        logger: Arc<dyn QueryLogger>,
        mode: ReplicationMode,
        slow_threshold: Option<Duration>,
    ) -> Self {
        Self {
            driver,
            logger,
            mode,
            slow_threshold,
            state: Mutex::new(RunnerState::default()),
            depth: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Endpoint this runner talks to.
    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn capabilities(&self) -> &'static Capabilities {
        self.driver.capabilities()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Number of open transaction levels; 0 outside a transaction.
    pub fn transaction_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    // ==================== Statements ====================

    /// Acquire the session now instead of on the first statement.
    pub async fn connect(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await
    }

    /// Execute one statement with positional parameters.
    pub async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        let mut state = self.state.lock().await;
        self.execute(&mut state, sql, params).await
    }

    async fn ensure_connected(&self, state: &mut RunnerState) -> OrmResult<()> {
        if state.released {
            return Err(OrmError::QueryRunnerReleased);
        }
        if state.connection.is_none() {
            state.connection = Some(self.driver.connect(self.mode).await?);
        }
        Ok(())
    }

    async fn execute(&self, state: &mut RunnerState, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        self.ensure_connected(state).await?;
        let connection = state
            .connection
            .as_mut()
            .ok_or(OrmError::QueryRunnerReleased)?;

        self.logger.log_query(sql, params);
        let start = Instant::now();
        let result = connection.query(sql, params).await;
        let elapsed = start.elapsed();

        match result {
            Ok(result) => {
                if self.slow_threshold.is_some_and(|threshold| elapsed > threshold) {
                    self.logger.log_query_slow(elapsed, sql, params);
                }
                Ok(result)
            }
            Err(err) => {
                self.logger.log_query_error(&err.to_string(), sql, params);
                Err(OrmError::query_failed(err, sql, params))
            }
        }
    }

    // ==================== Transactions ====================

    /// Open a transaction, or a savepoint when one is already open.
    ///
    /// The isolation level only applies to the outermost transaction.
    pub async fn start_transaction(&self, isolation: Option<IsolationLevel>) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if state.released {
            return Err(OrmError::QueryRunnerReleased);
        }
        let tx = &self.capabilities().transaction;

        if state.depth == 0 {
            let isolation_sql = match isolation {
                Some(level) if !self.capabilities().supports_isolation(level) => {
                    return Err(OrmError::unsupported(
                        self.capabilities().name,
                        format!("isolation level {}", level.as_sql()),
                    ));
                }
                Some(level) => Some(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql())),
                None => None,
            };
            // Oracle opens transactions implicitly and has no begin statement.
            let begin = (!tx.begin.is_empty()).then_some(tx.begin);
            let statements = if tx.isolation_before_begin {
                [isolation_sql.as_deref(), begin]
            } else {
                [begin, isolation_sql.as_deref()]
            };
            for sql in statements.into_iter().flatten() {
                self.execute(&mut state, sql, &[]).await?;
            }
        } else {
            if !tx.savepoints {
                return Err(OrmError::unsupported(self.capabilities().name, "nested transactions"));
            }
            let sql = format!("{} {}", tx.savepoint, savepoint_name(state.depth));
            self.execute(&mut state, &sql, &[]).await?;
        }
        let depth = state.depth + 1;
        self.set_depth(&mut state, depth);
        Ok(())
    }

    /// Commit the innermost level: release its savepoint, or COMMIT at depth 1.
    pub async fn commit_transaction(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        self.check_transaction(&state)?;
        let tx = &self.capabilities().transaction;
        if state.depth == 1 {
            self.execute(&mut state, tx.commit, &[]).await?;
        } else if let Some(release) = tx.release_savepoint {
            let sql = format!("{release} {}", savepoint_name(state.depth - 1));
            self.execute(&mut state, &sql, &[]).await?;
        }
        let depth = state.depth - 1;
        self.set_depth(&mut state, depth);
        Ok(())
    }

    /// Roll back the innermost level: back to its savepoint, or ROLLBACK at depth 1.
    pub async fn rollback_transaction(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        self.check_transaction(&state)?;
        let tx = &self.capabilities().transaction;
        if state.depth == 1 {
            self.execute(&mut state, tx.rollback, &[]).await?;
        } else {
            let sql = format!("{} {}", tx.rollback_to_savepoint, savepoint_name(state.depth - 1));
            self.execute(&mut state, &sql, &[]).await?;
        }
        let depth = state.depth - 1;
        self.set_depth(&mut state, depth);
        Ok(())
    }

    fn check_transaction(&self, state: &RunnerState) -> OrmResult<()> {
        if state.released {
            return Err(OrmError::QueryRunnerReleased);
        }
        if state.depth == 0 {
            return Err(OrmError::TransactionNotStarted);
        }
        Ok(())
    }

    fn set_depth(&self, state: &mut RunnerState, depth: usize) {
        state.depth = depth;
        self.depth.store(depth, Ordering::Release);
    }

    // ==================== Release ====================

    /// Give the session back. An open transaction is rolled back first.
    ///
    /// Releasing twice fails with [`OrmError::QueryRunnerAlreadyReleased`].
    pub async fn release(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if state.released {
            return Err(OrmError::QueryRunnerAlreadyReleased);
        }
        if state.depth > 0 && state.connection.is_some() {
            tracing::warn!(
                target: "polyorm",
                depth = state.depth,
                "releasing query runner with an open transaction, rolling back"
            );
            let rollback = self.capabilities().transaction.rollback;
            if let Err(err) = self.execute(&mut state, rollback, &[]).await {
                tracing::warn!(target: "polyorm", error = %err, "rollback on release failed");
            }
        }
        self.set_depth(&mut state, 0);
        state.released = true;
        self.released.store(true, Ordering::Release);
        match state.connection.take() {
            Some(connection) => connection.release().await,
            None => Ok(()),
        }
    }
}

fn savepoint_name(depth: usize) -> String {
    format!("txn_{depth}")
}
