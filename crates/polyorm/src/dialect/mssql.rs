use super::*;

/// Microsoft SQL Server 2012+.
pub const MSSQL: Capabilities = Capabilities {
    name: "mssql",
    identifier_quote: IdentifierQuote::Bracket,
    placeholder: PlaceholderStyle::AtP,
    pagination: PaginationStyle::Top,
    unbounded_limit: None,
    returning: ReturningStyle::Output,
    upsert: UpsertStyle::MergeInto,
    upsert_index_predicate: false,
    merge_terminator: ";",
    is_distinct_from: false,
    ilike: false,
    any_array: false,
    distinct_on: false,
    nulls_ordering: false,
    cte: CteSupport {
        enabled: true,
        recursive_keyword: false,
        materialized_hint: false,
        writable: false,
    },
    lock: LockSupport {
        style: LockStyle::TableHint,
        for_share: "",
        skip_locked: true,
        nowait: true,
        key_locks: false,
        lock_tables: false,
    },
    update_join: UpdateJoinStyle::FromTarget,
    update_limit: false,
    delete_limit: false,
    default_keyword: true,
    multi_row_values: true,
    max_execution_time_hint: false,
    current_timestamp: "GETDATE()",
    dummy_table: None,
    transaction: TransactionSupport {
        begin: "BEGIN TRANSACTION",
        commit: "COMMIT",
        rollback: "ROLLBACK",
        savepoints: true,
        savepoint: "SAVE TRANSACTION",
        release_savepoint: None,
        rollback_to_savepoint: "ROLLBACK TRANSACTION",
        isolation_before_begin: true,
        isolation_levels: ALL_ISOLATION_LEVELS,
    },
};
