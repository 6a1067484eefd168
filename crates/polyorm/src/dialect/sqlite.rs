use super::*;

/// SQLite 3.35+ (RETURNING, ON CONFLICT DO UPDATE).
pub const SQLITE: Capabilities = Capabilities {
    name: "sqlite",
    identifier_quote: IdentifierQuote::Double,
    placeholder: PlaceholderStyle::Question,
    pagination: PaginationStyle::LimitOffset,
    unbounded_limit: Some("-1"),
    returning: ReturningStyle::Returning,
    upsert: UpsertStyle::OnConflict,
    upsert_index_predicate: true,
    merge_terminator: "",
    is_distinct_from: false,
    ilike: false,
    any_array: false,
    distinct_on: false,
    nulls_ordering: true,
    cte: CteSupport {
        enabled: true,
        recursive_keyword: true,
        materialized_hint: true,
        writable: false,
    },
    lock: LockSupport {
        style: LockStyle::None,
        for_share: "",
        skip_locked: false,
        nowait: false,
        key_locks: false,
        lock_tables: false,
    },
    update_join: UpdateJoinStyle::From,
    update_limit: false,
    delete_limit: false,
    default_keyword: false,
    multi_row_values: true,
    max_execution_time_hint: false,
    current_timestamp: "CURRENT_TIMESTAMP",
    dummy_table: None,
    transaction: TransactionSupport {
        begin: "BEGIN TRANSACTION",
        commit: "COMMIT",
        rollback: "ROLLBACK",
        savepoints: true,
        savepoint: "SAVEPOINT",
        release_savepoint: Some("RELEASE SAVEPOINT"),
        rollback_to_savepoint: "ROLLBACK TO SAVEPOINT",
        isolation_before_begin: true,
        isolation_levels: &[IsolationLevel::ReadUncommitted, IsolationLevel::Serializable],
    },
};
