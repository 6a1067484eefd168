use super::*;

/// PostgreSQL 12+.
pub const POSTGRES: Capabilities = Capabilities {
    name: "postgres",
    identifier_quote: IdentifierQuote::Double,
    placeholder: PlaceholderStyle::Dollar,
    pagination: PaginationStyle::LimitOffset,
    unbounded_limit: None,
    returning: ReturningStyle::Returning,
    upsert: UpsertStyle::OnConflict,
    upsert_index_predicate: true,
    merge_terminator: "",
    is_distinct_from: true,
    ilike: true,
    any_array: true,
    distinct_on: true,
    nulls_ordering: true,
    cte: CteSupport {
        enabled: true,
        recursive_keyword: true,
        materialized_hint: true,
        writable: true,
    },
    lock: LockSupport {
        style: LockStyle::ForClause,
        for_share: "FOR SHARE",
        skip_locked: true,
        nowait: true,
        key_locks: true,
        lock_tables: true,
    },
    update_join: UpdateJoinStyle::From,
    update_limit: false,
    delete_limit: false,
    default_keyword: true,
    multi_row_values: true,
    max_execution_time_hint: false,
    current_timestamp: "CURRENT_TIMESTAMP",
    dummy_table: None,
    transaction: TransactionSupport {
        begin: "START TRANSACTION",
        commit: "COMMIT",
        rollback: "ROLLBACK",
        savepoints: true,
        savepoint: "SAVEPOINT",
        release_savepoint: Some("RELEASE SAVEPOINT"),
        rollback_to_savepoint: "ROLLBACK TO SAVEPOINT",
        isolation_before_begin: false,
        isolation_levels: ALL_ISOLATION_LEVELS,
    },
};

/// CockroachDB speaks the Postgres wire protocol with a narrower feature set.
pub const COCKROACHDB: Capabilities = Capabilities {
    name: "cockroachdb",
    upsert_index_predicate: false,
    lock: LockSupport {
        key_locks: false,
        ..POSTGRES.lock
    },
    transaction: TransactionSupport {
        isolation_levels: &[IsolationLevel::ReadCommitted, IsolationLevel::Serializable],
        ..POSTGRES.transaction
    },
    ..POSTGRES
};
