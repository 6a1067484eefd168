//! Builder execution against the recording driver: result reading, runner
//! routing, automatic transactions and subscribers.

use async_trait::async_trait;
use polyorm::qb::QueryType;
use polyorm::testing::RecordingDriver;
use polyorm::{
    ColumnMetadata, DataSource, Dialect, EntityMetadata, EntitySubscriber, FindWhere, JoinColumn,
    JunctionMetadata, LockMode, MetadataRegistry, NoopLogger, Order, OrmError, OrmResult,
    QueryLogger, QueryResult, RelationMetadata, ReplicationMode, Row, Value, ValueSet, WriteEvent,
};
use std::sync::{Arc, Mutex};

fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityMetadata::new("User", "user")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("name"))
            .relation(RelationMetadata::one_to_many(
                "posts",
                "Post",
                vec![JoinColumn::new("authorId", "id")],
            )),
    );
    registry.register(
        EntityMetadata::new("Post", "post")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("title"))
            .column(ColumnMetadata::new("viewCount"))
            .column(ColumnMetadata::new("authorId").nullable())
            .relation(RelationMetadata::many_to_one(
                "author",
                "User",
                vec![JoinColumn::new("authorId", "id")],
            ))
            .relation(RelationMetadata::many_to_many(
                "tags",
                "Tag",
                JunctionMetadata {
                    table_path: "post_tags".into(),
                    owner_columns: vec![JoinColumn::new("postId", "id")],
                    inverse_columns: vec![JoinColumn::new("tagId", "id")],
                },
            )),
    );
    registry.register(
        EntityMetadata::new("Tag", "tag")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("name")),
    );
    registry.register(
        EntityMetadata::new("Article", "article")
            .column(ColumnMetadata::primary("id"))
            .column(ColumnMetadata::new("title"))
            .column(ColumnMetadata::new("updatedAt").update_date())
            .column(ColumnMetadata::new("version").version())
            .column(ColumnMetadata::new("deletedAt").delete_date()),
    );
    registry
}

fn setup(driver: &RecordingDriver) -> DataSource {
    DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .build()
}

/// Remembers which hooks ran, and can be told to fail after inserts.
#[derive(Clone, Default)]
struct Journal {
    seen: Arc<Mutex<Vec<String>>>,
    fail_after_insert: bool,
}

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitySubscriber for Journal {
    fn listen_to(&self) -> Option<&str> {
        Some("Post")
    }

    async fn before_insert(&self, event: &mut WriteEvent) -> OrmResult<()> {
        self.seen.lock().unwrap().push("before_insert".into());
        for row in &mut event.values {
            if row.get("viewCount").is_none() {
                row.insert("viewCount".into(), 0.into());
            }
        }
        Ok(())
    }

    async fn after_insert(&self, event: &WriteEvent) -> OrmResult<()> {
        self.seen.lock().unwrap().push(format!(
            "after_insert affected={:?} generated={}",
            event.affected,
            event.generated.len()
        ));
        if self.fail_after_insert {
            return Err(OrmError::validation("audit table is read-only"));
        }
        Ok(())
    }

    async fn before_update(&self, event: &mut WriteEvent) -> OrmResult<()> {
        assert_eq!(event.query_type, QueryType::Update);
        self.seen.lock().unwrap().push("before_update".into());
        Ok(())
    }

    async fn after_remove(&self, event: &WriteEvent) -> OrmResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("after_remove affected={:?}", event.affected));
        Ok(())
    }
}

// ==================== Reads ====================

#[tokio::test]
async fn count_drops_ordering_and_pagination() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("cnt", 3)])]));
    let ds = setup(&driver);

    let count = ds
        .create_query_builder()
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().eq("title", "rust"))
        .order_by("p.id", Order::Desc)
        .limit(2)
        .get_count()
        .await
        .unwrap();

    assert_eq!(count, 3);
    let sql = &driver.statements()[0];
    assert!(sql.starts_with("SELECT COUNT(DISTINCT(\"p\".\"id\")) AS \"cnt\" FROM \"post\" \"p\""));
    assert!(!sql.contains("ORDER BY"));
    assert!(!sql.contains("LIMIT"));
}

#[tokio::test]
async fn count_of_nothing_is_zero() {
    let driver = RecordingDriver::new(Dialect::Sqlite);
    let ds = setup(&driver);
    let count = ds.create_query_builder().from("Post", "p").unwrap().get_count().await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn exists_wraps_the_query() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("exists", 1)])]));
    let ds = setup(&driver);

    let found = ds
        .create_query_builder()
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().eq("id", 7))
        .get_exists()
        .await
        .unwrap();

    assert!(found);
    let sql = &driver.statements()[0];
    assert!(sql.starts_with("SELECT CASE WHEN EXISTS(SELECT 1 FROM \"post\" \"p\""));
    assert!(sql.ends_with("THEN 1 ELSE 0 END AS \"exists\""));
}

#[tokio::test]
async fn exists_selects_from_dual_on_oracle() {
    let driver = RecordingDriver::new(Dialect::Oracle);
    let ds = setup(&driver);

    let found = ds.create_query_builder().from("Post", "p").unwrap().get_exists().await.unwrap();

    assert!(!found);
    assert!(driver.statements()[0].ends_with(" FROM DUAL"));
}

#[tokio::test]
async fn get_one_or_fail_reports_missing_rows() {
    let driver = RecordingDriver::new(Dialect::MySql);
    let ds = setup(&driver);

    let err = ds
        .create_query_builder()
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().eq("id", 404))
        .get_one_or_fail::<Row>()
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn get_many_maps_rows() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_rows(vec![
        Row::from_pairs([("id", Value::Int(1)), ("title", Value::from("a"))]),
        Row::from_pairs([("id", Value::Int(2)), ("title", Value::from("b"))]),
    ]));
    let ds = setup(&driver);

    let rows: Vec<Row> = ds
        .create_query_builder()
        .select(&["p.id", "p.title"])
        .from("Post", "p")
        .unwrap()
        .get_many()
        .await
        .unwrap();

    let titles: Vec<String> = rows.iter().map(|r| r.try_get_column("title").unwrap()).collect();
    assert_eq!(titles, vec!["a", "b"]);
}

// ==================== Runner routing ====================

#[tokio::test]
async fn reads_go_to_replicas_and_writes_to_the_primary() {
    let driver = RecordingDriver::new(Dialect::Postgres).with_replicas();
    let ds = setup(&driver);

    ds.create_query_builder().from("Post", "p").unwrap().get_raw_many().await.unwrap();
    ds.create_query_builder()
        .insert()
        .into("Post")
        .unwrap()
        .value(ValueSet::new().set("title", "hello"))
        .execute()
        .await
        .unwrap();

    let modes: Vec<_> = driver.recorded().iter().map(|s| s.mode).collect();
    assert_eq!(modes, vec![ReplicationMode::Slave, ReplicationMode::Master]);
}

#[tokio::test]
async fn reads_fall_back_to_the_primary_without_replicas() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);

    ds.create_query_builder().from("Post", "p").unwrap().get_raw_one().await.unwrap();

    assert_eq!(driver.recorded()[0].mode, ReplicationMode::Master);
}

#[tokio::test]
async fn pessimistic_lock_outside_a_transaction_is_refused() {
    let driver = RecordingDriver::new(Dialect::Postgres).with_replicas();
    let ds = setup(&driver);

    let err = ds
        .create_query_builder()
        .from("Post", "p")
        .unwrap()
        .set_lock(LockMode::PessimisticWrite)
        .get_raw_many()
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::LockRequiresTransaction));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn pessimistic_lock_inside_a_transaction_uses_its_runner() {
    let driver = RecordingDriver::new(Dialect::Postgres).with_replicas();
    let ds = setup(&driver);

    let rows = ds
        .transaction(|runner| {
            let ds = ds.clone();
            async move {
                ds.create_query_builder_with_runner(runner)
                    .from("Post", "p")?
                    .where_(FindWhere::new().eq("id", 1))
                    .set_lock(LockMode::PessimisticWrite)
                    .get_raw_many()
                    .await
            }
        })
        .await
        .unwrap();

    assert!(rows.is_empty());
    let statements = driver.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0], "START TRANSACTION");
    assert!(statements[1].ends_with(" FOR UPDATE"));
    assert_eq!(statements[2], "COMMIT");
    assert!(driver.recorded().iter().all(|s| s.mode == ReplicationMode::Master));
    assert!(driver.recorded().iter().all(|s| s.connection == 1));
}

#[tokio::test]
async fn builders_release_the_runners_they_acquire() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);

    let posts = ds.create_query_builder().from("Post", "p").unwrap();
    posts.get_raw_many().await.unwrap();
    posts.get_count().await.unwrap();

    assert_eq!(driver.connections_opened(), 2);
    assert_eq!(driver.connections_released(), 2);
}

#[tokio::test]
async fn builders_leave_a_given_runner_open() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);
    let runner = ds.create_query_runner(ReplicationMode::Master);

    let posts = ds.create_query_builder_with_runner(runner.clone()).from("Post", "p").unwrap();
    posts.get_raw_many().await.unwrap();
    posts.get_raw_many().await.unwrap();

    assert_eq!(driver.connections_opened(), 1);
    assert_eq!(driver.connections_released(), 0);
    assert!(!runner.is_released());
    runner.release().await.unwrap();
    assert_eq!(driver.connections_released(), 1);
}

#[tokio::test]
async fn raw_queries_run_on_a_fresh_runner() {
    let driver = RecordingDriver::new(Dialect::MySql);
    driver.push_result(QueryResult::with_affected(4));
    let ds = setup(&driver);

    let result = ds.query("UPDATE post SET viewCount = 0", &[]).await.unwrap();

    assert_eq!(result.affected, Some(4));
    assert_eq!(driver.connections_released(), 1);
}

// ==================== Writes ====================

#[tokio::test]
async fn insert_reads_returned_keys() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_rows(vec![
        Row::from_pairs([("id", 41)]),
        Row::from_pairs([("id", 42)]),
    ]));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .insert()
        .into("Post")
        .unwrap()
        .values(vec![
            ValueSet::new().set("title", "a"),
            ValueSet::new().set("title", "b"),
        ])
        .execute()
        .await
        .unwrap();

    let ids: Vec<_> = result.identifiers.iter().map(|r| r.get("id").cloned()).collect();
    assert_eq!(ids, vec![Some(Value::Int(41)), Some(Value::Int(42))]);
    assert_eq!(result.generated_maps.len(), 2);
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn insert_without_returning_reloads_generated_columns() {
    let driver = RecordingDriver::new(Dialect::MySql);
    driver.push_result(QueryResult::with_affected(1));
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([
        ("id", Value::Int(7)),
        ("version", Value::Int(1)),
    ])]));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .insert()
        .into("Article")
        .unwrap()
        .value(ValueSet::new().set("id", 7).set("title", "draft"))
        .execute()
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("INSERT INTO `article`"));
    assert!(statements[1].starts_with("SELECT"));
    assert!(statements[1].contains("`version`"));
    assert_eq!(result.identifiers[0].get("id"), Some(&Value::Int(7)));
    assert_eq!(result.generated_maps[0].get("version"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn update_without_returning_reloads_touched_rows() {
    let driver = RecordingDriver::new(Dialect::MySql);
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("id", 3)])]));
    driver.push_result(QueryResult::with_affected(1));
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([
        ("id", Value::Int(3)),
        ("version", Value::Int(4)),
    ])]));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .update("Article")
        .unwrap()
        .set_value("title", "final")
        .where_(FindWhere::new().eq("id", 3))
        .execute()
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("SELECT"));
    assert!(statements[1].starts_with("UPDATE `article`"));
    assert!(statements[2].starts_with("SELECT"));
    assert_eq!(result.affected, Some(1));
    assert_eq!(result.generated_maps[0].get("version"), Some(&Value::Int(4)));
}

#[tokio::test]
async fn soft_delete_without_returning_reloads_touched_rows() {
    let driver = RecordingDriver::new(Dialect::MySql);
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("id", 3)])]));
    driver.push_result(QueryResult::with_affected(1));
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([
        ("id", Value::Int(3)),
        ("version", Value::Int(5)),
    ])]));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .soft_delete()
        .from("Article")
        .unwrap()
        .where_(FindWhere::new().eq("id", 3))
        .execute()
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("SELECT"));
    assert!(statements[1].starts_with("UPDATE `article` SET `deletedAt` = CURRENT_TIMESTAMP"));
    assert!(statements[2].starts_with("SELECT"));
    assert_eq!(result.affected, Some(1));
    assert_eq!(result.generated_maps[0].get("version"), Some(&Value::Int(5)));
}

#[tokio::test]
async fn restore_without_update_entity_runs_alone() {
    let driver = RecordingDriver::new(Dialect::MySql);
    driver.push_result(QueryResult::with_affected(1));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .restore()
        .from("Article")
        .unwrap()
        .where_(FindWhere::new().eq("id", 3))
        .update_entity(false)
        .execute()
        .await
        .unwrap();

    assert_eq!(driver.statements().len(), 1);
    assert!(result.generated_maps.is_empty());
}

#[tokio::test]
async fn delete_reports_affected_rows() {
    let driver = RecordingDriver::new(Dialect::Sqlite);
    driver.push_result(QueryResult::with_affected(2));
    let ds = setup(&driver);

    let result = ds
        .create_query_builder()
        .delete()
        .from("Post")
        .unwrap()
        .where_(FindWhere::new().eq("authorId", 9))
        .execute()
        .await
        .unwrap();

    assert_eq!(result.affected, Some(2));
    assert_eq!(driver.statements(), vec!["DELETE FROM \"post\" WHERE \"authorId\" = ?"]);
}

#[tokio::test]
async fn use_transaction_rolls_back_a_failed_write() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.fail_on("INSERT", "duplicate key value violates unique constraint");
    let ds = setup(&driver);

    let err = ds
        .create_query_builder()
        .insert()
        .into("Post")
        .unwrap()
        .value(ValueSet::new().set("title", "dup"))
        .use_transaction(true)
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err.root(), OrmError::Driver(_)));
    let statements = driver.statements();
    assert_eq!(statements.first().map(String::as_str), Some("START TRANSACTION"));
    assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(driver.connections_released(), 1);
}

#[tokio::test]
async fn use_transaction_commits_a_successful_write() {
    let driver = RecordingDriver::new(Dialect::Sqlite);
    let ds = setup(&driver);

    ds.create_query_builder()
        .delete()
        .from("Post")
        .unwrap()
        .where_(FindWhere::new().eq("id", 1))
        .use_transaction(true)
        .execute()
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        vec!["BEGIN TRANSACTION", "DELETE FROM \"post\" WHERE \"id\" = ?", "COMMIT"]
    );
}

// ==================== Subscribers ====================

#[tokio::test]
async fn subscribers_wrap_inserts() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("id", 5)])]));
    let journal = Journal::default();
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .subscriber(journal.clone())
        .build();

    ds.create_query_builder()
        .insert()
        .into("Post")
        .unwrap()
        .value(ValueSet::new().set("title", "hooked"))
        .execute()
        .await
        .unwrap();

    assert_eq!(
        journal.entries(),
        vec!["before_insert", "after_insert affected=Some(1) generated=1"]
    );
    let recorded = &driver.recorded()[0];
    assert!(recorded.sql.contains("\"viewCount\""));
    assert!(recorded.params.contains(&Value::Int(0)));
}

#[tokio::test]
async fn subscribers_only_hear_their_entity() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let journal = Journal::default();
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .subscriber(journal.clone())
        .build();

    ds.create_query_builder()
        .insert()
        .into("User")
        .unwrap()
        .value(ValueSet::new().set("name", "ada"))
        .execute()
        .await
        .unwrap();

    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn call_listeners_false_silences_subscribers() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_affected(1));
    let journal = Journal::default();
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .subscriber(journal.clone())
        .build();

    ds.create_query_builder()
        .delete()
        .from("Post")
        .unwrap()
        .where_in_ids([1])
        .unwrap()
        .call_listeners(false)
        .execute()
        .await
        .unwrap();

    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn failing_after_hook_rolls_back_the_automatic_transaction() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::default());
    driver.push_result(QueryResult::with_rows(vec![Row::from_pairs([("id", 5)])]));
    let journal = Journal {
        fail_after_insert: true,
        ..Journal::default()
    };
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .subscriber(journal.clone())
        .build();

    let err = ds
        .create_query_builder()
        .insert()
        .into("Post")
        .unwrap()
        .value(ValueSet::new().set("title", "rejected"))
        .use_transaction(true)
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Validation(_)));
    let statements = driver.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0], "START TRANSACTION");
    assert!(statements[1].starts_with("INSERT INTO \"post\""));
    assert_eq!(statements[2], "ROLLBACK");
}

#[tokio::test]
async fn update_and_delete_hooks_fire() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.push_result(QueryResult::with_affected(1));
    driver.push_result(QueryResult::with_affected(3));
    let journal = Journal::default();
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(NoopLogger)
        .subscriber(journal.clone())
        .build();

    ds.create_query_builder()
        .update("Post")
        .unwrap()
        .set_value("title", "renamed")
        .where_in_ids([1])
        .unwrap()
        .execute()
        .await
        .unwrap();
    ds.create_query_builder()
        .delete()
        .from("Post")
        .unwrap()
        .where_(FindWhere::new().eq("authorId", 2))
        .execute()
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["before_update", "after_remove affected=Some(3)"]);
}

// ==================== Transactions ====================

#[tokio::test]
async fn nested_scopes_become_savepoints() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);
    let runner = ds.create_query_runner(ReplicationMode::Master);

    let outcome: OrmResult<()> = polyorm::transaction!(runner, {
        runner.query("UPDATE account SET balance = balance - 10 WHERE id = 1", &[]).await?;
        let inner: OrmResult<()> = polyorm::transaction!(runner, {
            runner.query("UPDATE account SET balance = balance + 10 WHERE id = 2", &[]).await?;
            Err::<(), _>(OrmError::validation("account 2 is frozen"))
        });
        assert!(inner.is_err());
        assert_eq!(runner.transaction_depth(), 1);
        Ok::<_, OrmError>(())
    });
    outcome.unwrap();
    runner.release().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "START TRANSACTION",
            "UPDATE account SET balance = balance - 10 WHERE id = 1",
            "SAVEPOINT txn_1",
            "UPDATE account SET balance = balance + 10 WHERE id = 2",
            "ROLLBACK TO SAVEPOINT txn_1",
            "COMMIT",
        ]
    );
    assert_eq!(runner.transaction_depth(), 0);
    assert_eq!(driver.connections_released(), 1);
}

#[tokio::test]
async fn data_source_transaction_commits_builder_writes() {
    let driver = RecordingDriver::new(Dialect::MySql);
    let ds = setup(&driver);

    ds.transaction(|runner| {
        let ds = ds.clone();
        async move {
            ds.create_query_builder_with_runner(runner.clone())
                .update("Post")?
                .set_value("title", "a")
                .where_in_ids([1])?
                .use_transaction(true)
                .execute()
                .await?;
            ds.create_query_builder_with_runner(runner)
                .delete()
                .from("Post")?
                .where_in_ids([2])?
                .execute()
                .await?;
            Ok::<_, OrmError>(())
        }
    })
    .await
    .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 4);
    assert_eq!(statements[0], "START TRANSACTION");
    assert!(statements[1].starts_with("UPDATE `post`"));
    assert!(statements[2].starts_with("DELETE FROM `post`"));
    assert_eq!(statements[3], "COMMIT");
    assert!(driver.recorded().iter().all(|s| s.connection == 1));
    assert_eq!(driver.connections_released(), 1);
}

#[tokio::test]
async fn data_source_transaction_sets_isolation() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);

    ds.transaction_with_isolation(Some(polyorm::IsolationLevel::Serializable), |runner| async move {
        runner.query("SELECT 1", &[]).await?;
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    let statements = driver.statements();
    assert!(statements.iter().any(|s| s == "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
}

// ==================== Relations ====================

#[tokio::test]
async fn many_to_many_links_through_the_junction() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);
    let tags = ds.create_query_builder().relation("Post", "tags").unwrap().of([1]);

    let plan = tags.plan_add([3, 4]).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan[0].0,
        "INSERT INTO \"post_tags\" (\"postId\", \"tagId\") VALUES ($1, $2), ($3, $4)"
    );
    assert_eq!(plan[0].1, vec![Value::Int(1), Value::Int(3), Value::Int(1), Value::Int(4)]);

    tags.remove([3, 4]).await.unwrap();
    let recorded = &driver.recorded()[0];
    assert!(recorded.sql.starts_with("DELETE FROM \"post_tags\" WHERE"));
    assert!(recorded.sql.contains("\"tagId\" IN ($2, $3)"));
    assert_eq!(recorded.params, vec![Value::Int(1), Value::Int(3), Value::Int(4)]);
}

#[tokio::test]
async fn one_to_many_add_updates_foreign_keys() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);

    ds.create_query_builder()
        .relation("User", "posts")
        .unwrap()
        .of([1])
        .add([5, 6])
        .await
        .unwrap();

    let recorded = &driver.recorded()[0];
    assert_eq!(recorded.sql, "UPDATE \"post\" SET \"authorId\" = $1 WHERE \"id\" IN ($2, $3)");
    assert_eq!(recorded.params, vec![Value::Int(1), Value::Int(5), Value::Int(6)]);
}

#[tokio::test]
async fn many_to_one_set_updates_the_owner() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);
    let author = ds.create_query_builder().relation("Post", "author").unwrap().of([9]);

    let plan = author.plan_set(Some(2)).unwrap();
    assert_eq!(plan[0].0, "UPDATE \"post\" SET \"authorId\" = $1 WHERE \"id\" = $2");
    assert_eq!(plan[0].1, vec![Value::Int(2), Value::Int(9)]);

    let cleared = author.plan_set(None::<i64>).unwrap();
    assert_eq!(cleared[0].1, vec![Value::Null, Value::Int(9)]);
}

#[tokio::test]
async fn relation_misuse_is_rejected() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    let ds = setup(&driver);

    let posts = ds.create_query_builder().relation("User", "posts").unwrap();
    assert!(matches!(posts.plan_add([1]).unwrap_err(), OrmError::Validation(_)));
    assert!(matches!(
        posts.of([1]).plan_set(Some(3)).unwrap_err(),
        OrmError::InvalidCondition(_)
    ));
    assert!(matches!(
        ds.create_query_builder().relation("User", "friends").unwrap_err(),
        OrmError::UnknownRelation { .. }
    ));
    assert!(driver.statements().is_empty());
}

// ==================== Logging ====================

#[derive(Clone, Default)]
struct CapturingLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl QueryLogger for CapturingLogger {
    fn log_query(&self, sql: &str, _params: &[Value]) {
        self.lines.lock().unwrap().push(format!("query: {sql}"));
    }

    fn log_query_error(&self, error: &str, sql: &str, _params: &[Value]) {
        self.lines.lock().unwrap().push(format!("error: {error} in {sql}"));
    }
}

#[tokio::test]
async fn every_statement_reaches_the_logger() {
    let driver = RecordingDriver::new(Dialect::Postgres);
    driver.fail_on("broken", "relation \"broken\" does not exist");
    let logger = CapturingLogger::default();
    let ds = DataSource::builder(driver.clone())
        .registry(registry())
        .logger(logger.clone())
        .build();

    ds.query("SELECT 1", &[]).await.unwrap();
    let err = ds.query("SELECT * FROM broken", &[]).await.unwrap_err();

    assert!(matches!(err, OrmError::QueryFailed { ref sql, .. } if sql == "SELECT * FROM broken"));
    let lines = logger.lines.lock().unwrap().clone();
    assert_eq!(
        lines,
        vec![
            "query: SELECT 1",
            "query: SELECT * FROM broken",
            "error: Driver error: relation \"broken\" does not exist in SELECT * FROM broken",
        ]
    );
}
