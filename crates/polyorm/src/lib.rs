//! # polyorm
//!
//! A query construction and execution engine for entity-mapped SQL that
//! speaks several dialects.
//!
//! ## Features
//!
//! - **One builder, many dialects**: the same builder chain renders PostgreSQL,
//!   CockroachDB, MySQL, SQLite, SQL Server and Oracle SQL from a capability descriptor
//! - **Entity metadata**: property paths (`p.author.name`, `p.address.city`) resolve to
//!   columns and joins; unknown properties fail loudly
//! - **Object conditions**: find-style where objects with operators (`In`, `Between`,
//!   `ILike`, `Raw`, ...) next to plain SQL text with named parameters
//! - **Writes with feedback**: generated ids, defaults and versions come back through
//!   RETURNING / OUTPUT or a follow-up SELECT
//! - **Query runners**: lazily acquired sessions, savepoint-based nested transactions,
//!   replica routing for reads
//! - **Observability**: every statement goes through a [`QueryLogger`]; the default
//!   logs through `tracing`
//!
//! ## Query Builder (qb)
//!
//! ```ignore
//! use polyorm::{DataSource, Order, params};
//!
//! // SELECT
//! let posts = ds
//!     .create_query_builder()
//!     .select(&["p.id", "p.title"])
//!     .from("Post", "p")?
//!     .where_with("p.viewCount > :min", params! { "min" => 10 })
//!     .order_by("p.id", Order::Desc)
//!     .get_raw_many()
//!     .await?;
//!
//! // INSERT
//! ds.create_query_builder()
//!     .insert()
//!     .into("Post")?
//!     .value(ValueSet::new().set("title", "hello"))
//!     .execute()
//!     .await?;
//!
//! // UPDATE
//! ds.create_query_builder()
//!     .update("Post")?
//!     .set_value("title", "renamed")
//!     .where_in_ids([1])?
//!     .execute()
//!     .await?;
//!
//! // DELETE
//! ds.create_query_builder()
//!     .delete()
//!     .from("Post")?
//!     .where_(FindWhere::new().eq("id", 1))
//!     .execute()
//!     .await?;
//! ```

pub mod config;
pub mod data_source;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod logger;
pub mod metadata;
pub mod qb;
pub mod row;
pub mod runner;
pub mod sql;
pub mod subscriber;
pub mod testing;
pub mod transaction;
pub mod value;

pub use config::{NullPolicy, NullValues, OrmConfig, UndefinedValues, UnknownColumnPolicy};
pub use data_source::{DataSource, DataSourceBuilder};
pub use dialect::{Capabilities, Dialect, IsolationLevel};
pub use driver::{Connection, Driver, DriverAdapter, QueryResult, ReplicationMode};
pub use error::{OrmError, OrmResult};
pub use logger::{NoopLogger, QueryLogger, StatementKind, TracingLogger};
pub use metadata::{
    ColumnMetadata, EntityMetadata, Generation, JoinColumn, JunctionMetadata, MetadataRegistry,
    RelationKind, RelationMetadata, ValueTransformer,
};
pub use row::{FromRow, FromValue, Row};
pub use runner::QueryRunner;
pub use sql::Sql;
pub use subscriber::{EntitySubscriber, WriteEvent};
pub use value::Value;

// Re-export the builder types for easy access
pub use qb::{
    AnyQueryBuilder, Brackets, CteOptions, DeleteQueryBuilder, DeleteResult, FindOperator,
    FindWhere, InsertQueryBuilder, InsertResult, JoinType, LockMode, Nulls, Order, QueryBuilder,
    RawSql, RelationQueryBuilder, SelectQueryBuilder, SoftDeleteQueryBuilder, UpdateQueryBuilder,
    UpdateResult, UpsertOptions, ValueSet, WhereCondition, WriteValue,
};

#[cfg(feature = "postgres")]
pub mod pg;

#[cfg(feature = "postgres")]
pub mod pool;

#[cfg(feature = "postgres")]
pub use pg::PgDriver;

#[cfg(feature = "postgres")]
pub use pool::{PoolConfig, create_pool};
