use super::*;

/// Oracle 12c+.
pub const ORACLE: Capabilities = Capabilities {
    name: "oracle",
    identifier_quote: IdentifierQuote::Double,
    placeholder: PlaceholderStyle::Colon,
    pagination: PaginationStyle::FetchFirst,
    unbounded_limit: None,
    returning: ReturningStyle::None,
    upsert: UpsertStyle::MergeInto,
    upsert_index_predicate: false,
    merge_terminator: "",
    is_distinct_from: false,
    ilike: false,
    any_array: false,
    distinct_on: false,
    nulls_ordering: true,
    cte: CteSupport {
        enabled: true,
        recursive_keyword: false,
        materialized_hint: false,
        writable: false,
    },
    lock: LockSupport {
        style: LockStyle::ForClause,
        for_share: "",
        skip_locked: true,
        nowait: true,
        key_locks: false,
        lock_tables: true,
    },
    update_join: UpdateJoinStyle::None,
    update_limit: false,
    delete_limit: false,
    default_keyword: true,
    multi_row_values: false,
    max_execution_time_hint: false,
    current_timestamp: "CURRENT_TIMESTAMP",
    dummy_table: Some("DUAL"),
    transaction: TransactionSupport {
        // Transactions open implicitly with the first statement.
        begin: "",
        commit: "COMMIT",
        rollback: "ROLLBACK",
        savepoints: true,
        savepoint: "SAVEPOINT",
        release_savepoint: None,
        rollback_to_savepoint: "ROLLBACK TO SAVEPOINT",
        isolation_before_begin: true,
        isolation_levels: &[IsolationLevel::ReadCommitted, IsolationLevel::Serializable],
    },
};

/// Oracle 11g and earlier.
pub const ORACLE_LEGACY: Capabilities = Capabilities {
    name: "oracle-legacy",
    pagination: PaginationStyle::RowNum,
    ..ORACLE
};
