//! SQL produced through the public builder API for entities with renamed,
//! embedded, transformed and inherited columns.

use polyorm::testing::RecordingDriver;
use polyorm::{
    AnyQueryBuilder, Brackets, ColumnMetadata, DataSource, Dialect, EntityMetadata, FindOperator,
    FindWhere, MetadataRegistry, NoopLogger, NullPolicy, NullValues, OrmConfig, OrmError,
    QueryBuilder, UndefinedValues, Value, ValueTransformer, params,
};
use polyorm::qb::QueryType;
use std::sync::Arc;

struct Lowercase;

impl ValueTransformer for Lowercase {
    fn to_database(&self, value: Value) -> Value {
        match value {
            Value::Text(s) => Value::Text(s.to_lowercase()),
            other => other,
        }
    }
}

fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityMetadata::new("Customer", "customer")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("name").named("full_name"))
            .column(ColumnMetadata::new("city").named("address_city").embedded_in("address"))
            .column(ColumnMetadata::new("zip").named("address_zip").embedded_in("address"))
            .column(ColumnMetadata::new("email").transformer(Arc::new(Lowercase))),
    );
    registry.register(
        EntityMetadata::new("Car", "vehicle")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("type").discriminator())
            .column(ColumnMetadata::new("model"))
            .child_of("type", &["car", "sports_car"]),
    );
    registry.register(
        EntityMetadata::new("Post", "post")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("title"))
            .column(ColumnMetadata::new("viewCount"))
            .column(ColumnMetadata::new("authorId").nullable()),
    );
    registry
}

fn builder(dialect: Dialect, config: OrmConfig) -> QueryBuilder {
    DataSource::builder(RecordingDriver::new(dialect))
        .registry(registry())
        .config(config)
        .logger(NoopLogger)
        .build()
        .create_query_builder()
}

fn pg() -> QueryBuilder {
    builder(Dialect::Postgres, OrmConfig::new())
}

// ==================== Column mapping ====================

#[test]
fn renamed_columns_resolve_in_selections_and_text() {
    let (sql, params) = pg()
        .select(&["c.name"])
        .from("Customer", "c")
        .unwrap()
        .where_with("c.name = :n", params! { "n" => "Ada" })
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"c\".\"full_name\" FROM \"customer\" \"c\" WHERE \"c\".\"full_name\" = $1"
    );
    assert_eq!(params, vec![Value::from("Ada")]);
}

#[test]
fn embedded_objects_expand_to_their_columns() {
    let sql = pg()
        .select(&["c.address"])
        .from("Customer", "c")
        .unwrap()
        .get_sql()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"c\".\"address_city\", \"c\".\"address_zip\" FROM \"customer\" \"c\""
    );
}

#[test]
fn nested_embedded_conditions_compare_each_column() {
    let (sql, params) = pg()
        .select(&["c.id"])
        .from("Customer", "c")
        .unwrap()
        .where_(FindWhere::new().nested(
            "address",
            FindWhere::new().eq("city", "Oslo").eq("zip", "0150"),
        ))
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"c\".\"id\" FROM \"customer\" \"c\" WHERE (\"c\".\"address_city\" = $1 AND \"c\".\"address_zip\" = $2)"
    );
    assert_eq!(params, vec![Value::from("Oslo"), Value::from("0150")]);
}

#[test]
fn transformers_apply_to_condition_values() {
    let (_, params) = pg()
        .from("Customer", "c")
        .unwrap()
        .where_(FindWhere::new().op("email", FindOperator::in_list(["Ada@Example.com", "BOB@example.com"])))
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        params,
        vec![Value::from("ada@example.com"), Value::from("bob@example.com")]
    );
}

#[test]
fn transformers_apply_to_written_values() {
    let (sql, params) = pg()
        .update("Customer")
        .unwrap()
        .set_value("email", "Ada@Example.com")
        .where_in_ids([1])
        .unwrap()
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(sql, "UPDATE \"customer\" SET \"email\" = $1 WHERE \"id\" IN ($2)");
    assert_eq!(params, vec![Value::from("ada@example.com"), Value::Int(1)]);
}

// ==================== Inheritance ====================

#[test]
fn child_entities_filter_on_their_discriminator() {
    let (sql, params) = pg().from("Car", "v").unwrap().get_query_and_parameters().unwrap();

    assert_eq!(
        sql,
        "SELECT \"v\".\"id\", \"v\".\"type\", \"v\".\"model\" FROM \"vehicle\" \"v\" WHERE \"v\".\"type\" IN ($1, $2)"
    );
    assert_eq!(params, vec![Value::from("car"), Value::from("sports_car")]);
}

#[test]
fn discriminator_is_combined_with_user_conditions() {
    let (sql, params) = pg()
        .select(&["v.id"])
        .from("Car", "v")
        .unwrap()
        .where_(FindWhere::new().eq("model", "Roadster"))
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"v\".\"id\" FROM \"vehicle\" \"v\" WHERE ( \"v\".\"model\" = $1 ) AND ( \"v\".\"type\" IN ($2, $3) )"
    );
    assert_eq!(params.len(), 3);
}

// ==================== Conditions ====================

#[test]
fn brackets_group_alternatives() {
    let sql = pg()
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_with("p.title = :t", params! { "t" => "x" })
        .and_where(Brackets::new(|b| {
            b.where_("p.viewCount > 10").or_where("p.authorId IS NULL")
        }))
        .get_sql()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE \"p\".\"title\" = $1 AND (\"p\".\"viewCount\" > 10 OR \"p\".\"authorId\" IS NULL)"
    );
}

#[test]
fn negated_brackets_carry_their_parameters() {
    let (sql, params) = pg()
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_(Brackets::not(|b| b.where_("p.title = :t").set_parameter("t", "draft")))
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(sql, "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE NOT (\"p\".\"title\" = $1)");
    assert_eq!(params, vec![Value::from("draft")]);
}

#[test]
fn null_values_follow_the_configured_policy() {
    let condition = FindWhere::new().eq("title", "x").null("authorId");
    let select = |config: OrmConfig| {
        builder(Dialect::Postgres, config)
            .select(&["p.id"])
            .from("Post", "p")
            .unwrap()
            .where_(condition.clone())
            .get_sql()
    };

    assert_eq!(
        select(OrmConfig::new()).unwrap(),
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE (\"p\".\"title\" = $1 AND \"p\".\"authorId\" IS NULL)"
    );

    let exclude = OrmConfig::new().with_null_policy(NullPolicy::new(NullValues::Exclude, UndefinedValues::Exclude));
    assert_eq!(
        select(exclude).unwrap(),
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE \"p\".\"title\" = $1"
    );

    let throw = OrmConfig::new().with_null_policy(NullPolicy::new(NullValues::Throw, UndefinedValues::Exclude));
    assert!(matches!(select(throw).unwrap_err(), OrmError::InvalidCondition(_)));
}

#[test]
fn undefined_values_are_skipped_by_default() {
    let condition = FindWhere::new().opt::<i64>("viewCount", None).eq("title", "x");

    let sql = pg()
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_(condition.clone())
        .get_sql()
        .unwrap();
    assert_eq!(sql, "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE \"p\".\"title\" = $1");

    let is_null = OrmConfig::new().with_null_policy(NullPolicy::new(NullValues::IsNull, UndefinedValues::IsNull));
    let sql = builder(Dialect::Postgres, is_null)
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_(condition)
        .get_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE (\"p\".\"viewCount\" IS NULL AND \"p\".\"title\" = $1)"
    );
}

#[test]
fn raw_operator_renders_around_the_column() {
    let (sql, params) = pg()
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().op(
            "title",
            FindOperator::raw_with(|column| format!("LENGTH({column}) > :len"), vec![("len".into(), Value::Int(3))]),
        ))
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE LENGTH(\"p\".\"title\") > $1"
    );
    assert_eq!(params, vec![Value::Int(3)]);
}

// ==================== Parameters ====================

#[test]
fn spread_parameters_expand_per_dialect() {
    let ids = || params! { "ids" => Value::array([1, 2, 3]) };

    let (sql, params) = pg()
        .select(&["p.title"])
        .from("Post", "p")
        .unwrap()
        .where_with("p.id IN (:...ids)", ids())
        .get_query_and_parameters()
        .unwrap();
    assert_eq!(sql, "SELECT \"p\".\"title\" FROM \"post\" \"p\" WHERE \"p\".\"id\" IN ($1, $2, $3)");
    assert_eq!(params, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

    let sql = builder(Dialect::Mssql, OrmConfig::new())
        .select(&["p.title"])
        .from("Post", "p")
        .unwrap()
        .where_with("p.id IN (:...ids)", ids())
        .get_sql()
        .unwrap();
    assert_eq!(sql, "SELECT [p].[title] FROM [post] [p] WHERE [p].[id] IN (@p1, @p2, @p3)");
}

#[test]
fn repeated_parameters_bind_once_or_per_occurrence() {
    let query = |dialect| {
        builder(dialect, OrmConfig::new())
            .select(&["p.id"])
            .from("Post", "p")
            .unwrap()
            .where_with("p.title = :q OR p.title LIKE :q", params! { "q" => "rust" })
            .get_query_and_parameters()
            .unwrap()
    };

    let (sql, params) = query(Dialect::Postgres);
    assert!(sql.ends_with("WHERE \"p\".\"title\" = $1 OR \"p\".\"title\" LIKE $1"));
    assert_eq!(params.len(), 1);

    let (sql, params) = query(Dialect::MySql);
    assert!(sql.ends_with("WHERE `p`.`title` = ? OR `p`.`title` LIKE ?"));
    assert_eq!(params, vec![Value::from("rust"), Value::from("rust")]);

    let (sql, _) = query(Dialect::Oracle);
    assert!(sql.ends_with("WHERE \"p\".\"title\" = :1 OR \"p\".\"title\" LIKE :1"));
}

#[test]
fn unset_parameters_are_reported() {
    let err = pg()
        .from("Post", "p")
        .unwrap()
        .where_("p.title = :missing")
        .get_sql()
        .unwrap_err();

    assert!(matches!(err, OrmError::MissingParameter(ref name) if name == "missing"));
}

#[test]
fn named_query_keeps_generated_keys() {
    let select = pg()
        .select(&["p.id"])
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().eq("title", "x"));

    assert_eq!(
        select.get_query().unwrap(),
        "SELECT \"p\".\"id\" FROM \"post\" \"p\" WHERE \"p\".\"title\" = :where_0_0_0"
    );
    let params = select.get_parameters().unwrap();
    assert_eq!(params.get("where_0_0_0"), Some(&Value::from("x")));
}

// ==================== Sub-queries ====================

#[test]
fn from_sub_query_embeds_the_child_statement() {
    let qb = pg();
    let per_author = qb
        .clone()
        .select(&["p.authorId"])
        .add_select_as("COUNT(p.id)", "total")
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().op("viewCount", FindOperator::MoreThan(100.into())))
        .group_by("p.authorId");

    let (sql, params) = qb
        .select(&["s.authorId", "s.total"])
        .from_sub_query(per_author, "s")
        .unwrap()
        .get_query_and_parameters()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT s.authorId, s.total FROM (SELECT \"p\".\"authorId\", COUNT(\"p\".\"id\") AS \"total\" FROM \"post\" \"p\" WHERE \"p\".\"viewCount\" > $1 GROUP BY \"p\".\"authorId\") \"s\""
    );
    assert_eq!(params, vec![Value::Int(100)]);
}

// ==================== Typed builders ====================

#[test]
fn into_typed_follows_the_query_type() {
    let update = pg().update("Post").unwrap().set_value("title", "x").into_query_builder();
    let typed = update.into_typed();

    assert_eq!(typed.query_type(), QueryType::Update);
    assert!(matches!(typed, AnyQueryBuilder::Update(_)));
    assert_eq!(
        typed.get_query_and_parameters().unwrap().0,
        "UPDATE \"post\" SET \"title\" = $1"
    );
}

// ==================== Builder state ====================

#[test]
fn cloned_builder_is_independent() {
    let original = pg()
        .from("Post", "p")
        .unwrap()
        .where_(FindWhere::new().eq("title", "a"));
    let before = original.get_query_and_parameters().unwrap();

    let forked = original
        .clone()
        .and_where(FindWhere::new().eq("viewCount", 3))
        .take(5);

    assert_eq!(original.get_query_and_parameters().unwrap(), before);
    assert_ne!(forked.get_query_and_parameters().unwrap(), before);
}

#[test]
fn rendering_twice_gives_the_same_statement() {
    let qb = builder(Dialect::MySql, OrmConfig::new())
        .from("Post", "p")
        .unwrap()
        .where_with("p.title = :t OR p.title = :t", params! { "t" => "x" })
        .and_where(FindWhere::new().op("id", FindOperator::in_list([1, 2])));

    let first = qb.get_query_and_parameters().unwrap();
    let second = qb.get_query_and_parameters().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.1.len(), 4);
}
