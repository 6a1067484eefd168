//! Transaction scopes with automatic rollback.
//!
//! A scope commits when its body returns `Ok` and rolls back when it returns
//! `Err`. A failing rollback never replaces the body's error: it is logged and
//! the original error is returned. Scopes opened on a runner that is already
//! inside a transaction become savepoints.
//!
//! ```ignore
//! let runner = data_source.create_query_runner(ReplicationMode::Master);
//! polyorm::transaction!(runner, {
//!     runner.query("UPDATE account SET balance = balance - $1 WHERE id = $2", &[100.into(), 1.into()]).await?;
//!     runner.query("UPDATE account SET balance = balance + $1 WHERE id = $2", &[100.into(), 2.into()]).await?;
//!     Ok(())
//! })?;
//! runner.release().await?;
//! ```

use crate::dialect::IsolationLevel;
use crate::error::OrmResult;
use crate::runner::QueryRunner;
use std::future::Future;

/// Runs the given block inside a transaction on a query runner.
///
/// - Starts a transaction (a savepoint when one is already open).
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)` and returns that error.
///
/// The block must evaluate to `polyorm::OrmResult<T>`. An isolation level can
/// be given for the outermost transaction.
#[macro_export]
macro_rules! transaction {
    ($runner:expr, $body:block) => {
        $crate::transaction::run_in_transaction(&$runner, None, async { $body }).await
    };
    ($runner:expr, isolation = $level:expr, $body:block) => {
        $crate::transaction::run_in_transaction(&$runner, Some($level), async { $body }).await
    };
}

/// Run `body` inside a transaction (or savepoint) on `runner`.
pub async fn run_in_transaction<T, F>(
    runner: &QueryRunner,
    isolation: Option<IsolationLevel>,
    body: F,
) -> OrmResult<T>
where
    F: Future<Output = OrmResult<T>>,
{
    runner.start_transaction(isolation).await?;
    match body.await {
        Ok(value) => {
            runner.commit_transaction().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_err) = runner.rollback_transaction().await {
                tracing::warn!(
                    target: "polyorm",
                    error = %error,
                    rollback_error = %rollback_err,
                    "rollback failed, returning the original error"
                );
            }
            Err(error)
        }
    }
}

/// Run `body` in a transaction the caller did not open itself, when `enabled`
/// and no transaction is active yet. Otherwise `body` runs as is.
pub(crate) async fn with_auto_transaction<T, F>(runner: &QueryRunner, enabled: bool, body: F) -> OrmResult<T>
where
    F: Future<Output = OrmResult<T>>,
{
    if enabled && !runner.is_transaction_active() {
        run_in_transaction(runner, None, body).await
    } else {
        body.await
    }
}
