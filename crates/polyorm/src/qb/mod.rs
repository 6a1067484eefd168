//! Query construction: expression maps, condition compilation and statement
//! assembly for every supported dialect.
//!
//! # Features
//!
//! - **One intermediate representation**: every builder fills an [`ExpressionMap`];
//!   switching `select -> update -> delete` keeps aliases and conditions
//! - **Capability driven**: assembly branches on [`Capabilities`](crate::dialect::Capabilities)
//!   flags, never on dialect names
//! - **No value formatting**: values travel as parameter references until the
//!   driver adapter renders placeholders
//!
//! # Usage
//!
//! ```ignore
//! // SELECT with a structured condition
//! let rows = ds
//!     .create_query_builder()
//!     .from("Post", "p")?
//!     .where_(FindWhere::new().op("viewCount", FindOperator::MoreThan(10.into())))
//!     .order_by("p.id", Order::Desc)
//!     .get_raw_many()
//!     .await?;
//!
//! // INSERT with upsert
//! ds.create_query_builder()
//!     .insert()
//!     .into("Post")?
//!     .values(vec![ValueSet::new().set("id", 1).set("title", "hello")])
//!     .or_update(&["title"], &["id"], UpsertOptions::default())
//!     .execute()
//!     .await?;
//!
//! // Soft delete what a SELECT matched
//! ds.create_query_builder()
//!     .from("Post", "p")?
//!     .where_("p.id = :id")
//!     .set_parameter("id", 1)
//!     .soft_delete()?
//!     .execute()
//!     .await?;
//! ```

#[macro_use]
mod macros;

mod alias;
mod assembler;
mod builder;
mod condition;
mod delete;
mod expression_map;
mod insert;
mod operator;
mod relation;
mod resolver;
mod returning;
mod select;
mod update;


pub use alias::{Alias, AliasDescriptor, AliasType};
pub use assembler::{CompiledQuery, Env, compile};
pub use builder::{AnyQueryBuilder, QueryBuilder};
pub use condition::{Brackets, Conjunction, FindWhere, WhereClause, WhereCondition, WhereExpressionBuilder, WhereField};
pub use delete::{DeleteQueryBuilder, DeleteResult, SoftDeleteQueryBuilder};
pub use expression_map::{
    CommonTableExpression, CteOptions, CteQuery, ExpressionMap, JoinAttribute, JoinType, LockMode,
    LockSpec, Nulls, OnConflict, Order, OrderByItem, QueryType, RelationTarget, SelectItem,
    UpsertOptions, ValueSet, WriteValue,
};
pub use insert::{InsertQueryBuilder, InsertResult};
pub use operator::{FindOperator, RawSql};
pub use relation::RelationQueryBuilder;
pub use resolver::{ColumnTarget, resolve_property};
pub use select::{JoinTarget, SelectQueryBuilder};
pub use update::{UpdateQueryBuilder, UpdateResult};
