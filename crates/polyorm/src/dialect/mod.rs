//! Per-dialect capability descriptors.
//!
//! A [`Capabilities`] value is a flat, read-only record of which SQL syntax
//! variants a backend accepts. The statement assembler only ever looks at these
//! flags; it never asks which dialect it is talking to. Adding a backend means
//! adding one more descriptor constant.
//!
//! | Feature | Postgres | CockroachDB | MySQL | SQLite | MSSQL | Oracle |
//! |---------|----------|-------------|-------|--------|-------|--------|
//! | Placeholders | `$N` | `$N` | `?` | `?` | `@pN` | `:N` |
//! | Pagination | LIMIT/OFFSET | LIMIT/OFFSET | LIMIT/OFFSET | LIMIT/OFFSET | TOP / OFFSET FETCH | FETCH FIRST (12c), ROWNUM (11g) |
//! | Returning | RETURNING | RETURNING | ❌ | RETURNING | OUTPUT | ❌ |
//! | Upsert | ON CONFLICT | ON CONFLICT | ON DUPLICATE KEY | ON CONFLICT | MERGE | MERGE |
//! | ILIKE | ✓ | ✓ | ❌ | ❌ | ❌ | ❌ |
//! | DISTINCT ON | ✓ | ✓ | ❌ | ❌ | ❌ | ❌ |
//! | Savepoints | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ |
//!
//! # Usage
//!
//! ```ignore
//! use polyorm::dialect::{Dialect, PaginationStyle};
//!
//! let caps = Dialect::Mssql.capabilities();
//! assert_eq!(caps.pagination, PaginationStyle::Top);
//! assert_eq!(caps.escape("user"), "[user]");
//! ```

mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;

pub use mssql::MSSQL;
pub use mysql::MYSQL;
pub use oracle::{ORACLE, ORACLE_LEGACY};
pub use postgres::{COCKROACHDB, POSTGRES};
pub use sqlite::SQLITE;

use serde::Deserialize;

/// How identifiers are quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierQuote {
    /// `"name"`
    Double,
    /// `` `name` ``
    Backtick,
    /// `[name]`
    Bracket,
}

/// Positional placeholder syntax handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`; a repeated parameter reuses its index.
    Dollar,
    /// `?`; one bound value per occurrence.
    Question,
    /// `@p1, @p2, ...`; a repeated parameter reuses its index.
    AtP,
    /// `:1, :2, ...`; a repeated parameter reuses its index.
    Colon,
}

impl PlaceholderStyle {
    /// Indexed styles bind each distinct parameter once; `?` binds every occurrence.
    pub fn is_indexed(self) -> bool {
        !matches!(self, PlaceholderStyle::Question)
    }
}

/// How row limits and offsets are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `SELECT TOP n ...`, or `OFFSET m ROWS FETCH NEXT n ROWS ONLY` once an offset is involved
    Top,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    FetchFirst,
    /// Wrapping sub-select filtered on `ROWNUM`
    RowNum,
}

/// How written rows are returned from INSERT/UPDATE/DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// Trailing `RETURNING cols`
    Returning,
    /// `OUTPUT INSERTED.col` / `OUTPUT DELETED.col` before VALUES/WHERE
    Output,
    /// Not available; written rows are reloaded with a follow-up SELECT
    None,
}

/// Insert-or-update syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON CONFLICT (...) DO UPDATE SET ... | DO NOTHING`
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE ...` / `INSERT IGNORE`
    OnDuplicateKey,
    /// `MERGE INTO ... USING ... WHEN MATCHED ...`
    MergeInto,
    /// No upsert support
    None,
}

/// Where row locks are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStyle {
    /// Trailing `FOR UPDATE` / `FOR SHARE` clause
    ForClause,
    /// Table hints after the FROM/JOIN table: `WITH (UPDLOCK, ROWLOCK)`
    TableHint,
    /// No row locking
    None,
}

/// How an UPDATE references other tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateJoinStyle {
    /// `UPDATE t SET ... FROM other WHERE ...`
    From,
    /// `UPDATE alias SET ... FROM t alias JOIN other ON ...`
    FromTarget,
    /// `UPDATE t JOIN other ON ... SET ...`
    Join,
    /// Joins in UPDATE are rejected
    None,
}

/// Row locking support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSupport {
    pub style: LockStyle,
    /// Shared lock clause (`FOR SHARE`, `LOCK IN SHARE MODE`)
    pub for_share: &'static str,
    pub skip_locked: bool,
    pub nowait: bool,
    /// `FOR NO KEY UPDATE` / `FOR KEY SHARE`
    pub key_locks: bool,
    /// `FOR UPDATE OF "alias"`
    pub lock_tables: bool,
}

/// Common table expression support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CteSupport {
    pub enabled: bool,
    /// Recursive CTEs need `WITH RECURSIVE`
    pub recursive_keyword: bool,
    /// `AS MATERIALIZED (...)` / `AS NOT MATERIALIZED (...)`
    pub materialized_hint: bool,
    /// INSERT/UPDATE/DELETE inside a CTE
    pub writable: bool,
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSupport {
    pub begin: &'static str,
    pub commit: &'static str,
    pub rollback: &'static str,
    /// Nested transactions are emulated with savepoints
    pub savepoints: bool,
    /// Statement creating a savepoint (`SAVEPOINT`, `SAVE TRANSACTION`)
    pub savepoint: &'static str,
    /// Statement releasing a savepoint, when the backend has one
    pub release_savepoint: Option<&'static str>,
    pub rollback_to_savepoint: &'static str,
    /// `SET TRANSACTION ISOLATION LEVEL` must run before the begin statement
    pub isolation_before_begin: bool,
    pub isolation_levels: &'static [IsolationLevel],
}

/// Syntax features of one SQL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub name: &'static str,
    pub identifier_quote: IdentifierQuote,
    pub placeholder: PlaceholderStyle,
    pub pagination: PaginationStyle,
    /// Literal used as LIMIT when only an offset is requested
    pub unbounded_limit: Option<&'static str>,
    pub returning: ReturningStyle,
    pub upsert: UpsertStyle,
    /// `ON CONFLICT (...) WHERE <predicate>`
    pub upsert_index_predicate: bool,
    /// Statement terminator required after MERGE
    pub merge_terminator: &'static str,
    pub is_distinct_from: bool,
    pub ilike: bool,
    pub any_array: bool,
    pub distinct_on: bool,
    pub nulls_ordering: bool,
    pub cte: CteSupport,
    pub lock: LockSupport,
    pub update_join: UpdateJoinStyle,
    pub update_limit: bool,
    pub delete_limit: bool,
    /// `DEFAULT` keyword inside VALUES
    pub default_keyword: bool,
    /// `VALUES (..), (..)`; otherwise multi-row inserts use `INSERT ALL`
    pub multi_row_values: bool,
    /// Optimizer hint `/*+ MAX_EXECUTION_TIME(ms) */`
    pub max_execution_time_hint: bool,
    pub current_timestamp: &'static str,
    /// Table needed by `SELECT` without a real source (`DUAL`)
    pub dummy_table: Option<&'static str>,
    pub transaction: TransactionSupport,
}

impl Capabilities {
    /// Quote one identifier, doubling embedded quote characters.
    pub fn escape(&self, ident: &str) -> String {
        match self.identifier_quote {
            IdentifierQuote::Double => format!("\"{}\"", ident.replace('"', "\"\"")),
            IdentifierQuote::Backtick => format!("`{}`", ident.replace('`', "``")),
            IdentifierQuote::Bracket => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Quote a dotted table path (`schema.table`) part by part.
    pub fn escape_path(&self, path: &str) -> String {
        path.split('.')
            .map(|part| self.escape(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn supports_returning(&self) -> bool {
        self.returning != ReturningStyle::None
    }

    pub fn supports_isolation(&self, level: IsolationLevel) -> bool {
        self.transaction.isolation_levels.contains(&level)
    }
}

/// Known SQL backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    CockroachDb,
    MySql,
    Sqlite,
    Mssql,
    Oracle,
    /// Oracle before 12c: no OFFSET/FETCH, pagination via ROWNUM
    OracleLegacy,
}

impl Dialect {
    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            Dialect::Postgres => &POSTGRES,
            Dialect::CockroachDb => &COCKROACHDB,
            Dialect::MySql => &MYSQL,
            Dialect::Sqlite => &SQLITE,
            Dialect::Mssql => &MSSQL,
            Dialect::Oracle => &ORACLE,
            Dialect::OracleLegacy => &ORACLE_LEGACY,
        }
    }
}

const ALL_ISOLATION_LEVELS: &[IsolationLevel] = &[
    IsolationLevel::ReadUncommitted,
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_quote_characters() {
        assert_eq!(POSTGRES.escape("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(MYSQL.escape("a`b"), "`a``b`");
        assert_eq!(MSSQL.escape("a]b"), "[a]]b]");
        assert_eq!(POSTGRES.escape_path("public.post"), "\"public\".\"post\"");
    }

    #[test]
    fn descriptors_are_distinct_per_dialect() {
        assert_eq!(Dialect::Postgres.capabilities().upsert, UpsertStyle::OnConflict);
        assert_eq!(Dialect::MySql.capabilities().upsert, UpsertStyle::OnDuplicateKey);
        assert_eq!(Dialect::Mssql.capabilities().upsert, UpsertStyle::MergeInto);
        assert_eq!(
            Dialect::OracleLegacy.capabilities().pagination,
            PaginationStyle::RowNum
        );
        assert!(!Dialect::MySql.capabilities().supports_returning());
        assert!(Dialect::Sqlite.capabilities().transaction.savepoints);
    }
}
