use super::*;
use crate::dialect::Dialect;
use crate::logger::NoopLogger;
use crate::testing::RecordingDriver;

fn new_runner(driver: &RecordingDriver) -> QueryRunner {
    QueryRunner::new(
        Arc::new(driver.clone()),
        Arc::new(NoopLogger),
        ReplicationMode::Master,
        None,
    )
}

#[tokio::test]
async fn nested_transactions_use_savepoints() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let runner = new_runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.start_transaction(None).await.unwrap();
    assert_eq!(runner.transaction_depth(), 2);

    runner.rollback_transaction().await.unwrap();
    assert!(runner.is_transaction_active());
    assert_eq!(runner.transaction_depth(), 1);

    runner.start_transaction(None).await.unwrap();
    runner.commit_transaction().await.unwrap();
    runner.commit_transaction().await.unwrap();
    assert!(!runner.is_transaction_active());

    assert_eq!(
        driver.statements(),
        vec![
            "START TRANSACTION",
            "SAVEPOINT txn_1",
            "ROLLBACK TO SAVEPOINT txn_1",
            "SAVEPOINT txn_1",
            "RELEASE SAVEPOINT txn_1",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn mssql_savepoints_have_no_release_statement() {
    let driver = RecordingDriver::new(Dialect::Mssql);
    let runner = new_runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.start_transaction(None).await.unwrap();
    runner.commit_transaction().await.unwrap();
    runner.rollback_transaction().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["BEGIN TRANSACTION", "SAVE TRANSACTION txn_1", "ROLLBACK"]
    );
}

#[tokio::test]
async fn isolation_level_follows_descriptor_placement() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let runner = new_runner(&driver);
    runner
        .start_transaction(Some(IsolationLevel::Serializable))
        .await
        .unwrap();
    assert_eq!(
        driver.statements(),
        vec!["START TRANSACTION", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"]
    );

    let driver = RecordingDriver::new(Dialect::Mssql);
    let runner = new_runner(&driver);
    runner
        .start_transaction(Some(IsolationLevel::ReadCommitted))
        .await
        .unwrap();
    assert_eq!(
        driver.statements(),
        vec!["SET TRANSACTION ISOLATION LEVEL READ COMMITTED", "BEGIN TRANSACTION"]
    );
}

#[tokio::test]
async fn unsupported_isolation_level_is_rejected_before_io() {
    let driver = RecordingDriver::new(Dialect::CockroachDb);
    let runner = new_runner(&driver);
    let err = runner
        .start_transaction(Some(IsolationLevel::ReadUncommitted))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Unsupported { .. }));
    assert!(driver.statements().is_empty());
    assert_eq!(runner.transaction_depth(), 0);
}

#[tokio::test]
async fn commit_without_transaction_fails() {
    let driver = RecordingDriver::new(Dialect::Sqlite);
    let runner = new_runner(&driver);
    assert!(matches!(
        runner.commit_transaction().await,
        Err(OrmError::TransactionNotStarted)
    ));
    assert!(matches!(
        runner.rollback_transaction().await,
        Err(OrmError::TransactionNotStarted)
    ));
}

#[tokio::test]
async fn released_runner_rejects_everything() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let runner = new_runner(&driver);
    runner.query("SELECT 1", &[]).await.unwrap();
    runner.release().await.unwrap();

    assert!(runner.is_released());
    assert!(matches!(
        runner.query("SELECT 1", &[]).await,
        Err(OrmError::QueryRunnerReleased)
    ));
    assert!(matches!(
        runner.start_transaction(None).await,
        Err(OrmError::QueryRunnerReleased)
    ));
    assert!(matches!(
        runner.release().await,
        Err(OrmError::QueryRunnerAlreadyReleased)
    ));
    assert_eq!(driver.connections_released(), 1);
}

#[tokio::test]
async fn release_rolls_back_an_open_transaction() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let runner = new_runner(&driver);
    runner.start_transaction(None).await.unwrap();
    runner.start_transaction(None).await.unwrap();
    runner.release().await.unwrap();

    assert_eq!(runner.transaction_depth(), 0);
    assert_eq!(driver.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn session_is_acquired_lazily_and_once() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let runner = new_runner(&driver);
    assert_eq!(driver.connections_opened(), 0);
    runner.query("SELECT 1", &[]).await.unwrap();
    runner.query("SELECT 2", &[]).await.unwrap();
    assert_eq!(driver.connections_opened(), 1);

    // Never connected: nothing to give back.
    let idle = QueryRunner::new(
        Arc::new(driver.clone()),
        Arc::new(NoopLogger),
        ReplicationMode::Slave,
        None,
    );
    idle.release().await.unwrap();
    assert_eq!(driver.connections_opened(), 1);
}

#[tokio::test]
async fn driver_errors_carry_the_statement() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_error(OrmError::UniqueViolation("post_pkey".into()));
    let runner = new_runner(&driver);

    let err = runner
        .query("INSERT INTO \"post\" (\"id\") VALUES ($1)", &[Value::Int(1)])
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
    match err {
        OrmError::QueryFailed { sql, parameters, .. } => {
            assert!(sql.starts_with("INSERT INTO"));
            assert_eq!(parameters, vec![Value::Int(1)]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_begin_leaves_depth_unchanged() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.fail_on("START TRANSACTION", "connection lost");
    let runner = new_runner(&driver);
    assert!(runner.start_transaction(None).await.is_err());
    assert_eq!(runner.transaction_depth(), 0);
}

#[tokio::test]
async fn implicit_begin_sends_no_statement() {
    let driver = RecordingDriver::new(Dialect::Oracle);
    let runner = new_runner(&driver);
    runner.start_transaction(None).await.unwrap();
    assert!(runner.is_transaction_active());
    assert!(driver.statements().is_empty());
    runner.commit_transaction().await.unwrap();
    assert_eq!(driver.statements(), vec!["COMMIT"]);
}
