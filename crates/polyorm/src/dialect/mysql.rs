use super::*;

/// MySQL 8 / MariaDB.
pub const MYSQL: Capabilities = Capabilities {
    name: "mysql",
    identifier_quote: IdentifierQuote::Backtick,
    placeholder: PlaceholderStyle::Question,
    pagination: PaginationStyle::LimitOffset,
    unbounded_limit: Some("18446744073709551615"),
    returning: ReturningStyle::None,
    upsert: UpsertStyle::OnDuplicateKey,
    upsert_index_predicate: false,
    merge_terminator: "",
    is_distinct_from: false,
    ilike: false,
    any_array: false,
    distinct_on: false,
    nulls_ordering: false,
    cte: CteSupport {
        enabled: true,
        recursive_keyword: true,
        materialized_hint: false,
        writable: false,
    },
    lock: LockSupport {
        style: LockStyle::ForClause,
        for_share: "LOCK IN SHARE MODE",
        skip_locked: true,
        nowait: true,
        key_locks: false,
        lock_tables: true,
    },
    update_join: UpdateJoinStyle::Join,
    update_limit: true,
    delete_limit: true,
    default_keyword: true,
    multi_row_values: true,
    max_execution_time_hint: true,
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
        isolation_before_begin: true,
        isolation_levels: ALL_ISOLATION_LEVELS,
    },
};
