use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use polyorm::testing::RecordingDriver;
use polyorm::{
    ColumnMetadata, DataSource, Dialect, EntityMetadata, FindOperator, FindWhere, JoinColumn,
    MetadataRegistry, NoopLogger, Order, RelationMetadata, ValueSet, params,
};

fn data_source(dialect: Dialect) -> DataSource {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityMetadata::new("User", "user")
            .column(ColumnMetadata::primary("id").generated())
            .column(ColumnMetadata::new("name")),
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
            )),
    );
    DataSource::builder(RecordingDriver::new(dialect))
        .registry(registry)
        .logger(NoopLogger)
        .build()
}

const DIALECTS: [(&str, Dialect); 5] = [
    ("postgres", Dialect::Postgres),
    ("mysql", Dialect::MySql),
    ("sqlite", Dialect::Sqlite),
    ("mssql", Dialect::Mssql),
    ("oracle", Dialect::Oracle),
];

fn bench_select_with_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/select_with_join");

    for (name, dialect) in DIALECTS {
        let ds = data_source(dialect);
        group.bench_with_input(BenchmarkId::from_parameter(name), &ds, |b, ds| {
            b.iter(|| {
                let qb = ds
                    .create_query_builder()
                    .from("Post", "p")
                    .and_then(|qb| qb.left_join_and_select("p.author", "a"))
                    .map(|qb| {
                        qb.where_with("p.viewCount > :min", params! { "min" => 10 })
                            .and_where(FindWhere::new().op("title", FindOperator::like("%rust%")))
                            .order_by("p.id", Order::Desc)
                            .take(20)
                            .skip(40)
                    });
                black_box(qb.and_then(|qb| qb.get_query_and_parameters()))
            });
        });
    }

    group.finish();
}

fn bench_where_in_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/where_in_list");
    let ds = data_source(Dialect::Postgres);

    for n in [5, 20, 100, 500] {
        let ids: Vec<i64> = (0..n).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &ids, |b, ids| {
            b.iter(|| {
                let qb = ds.create_query_builder().from("Post", "p").map(|qb| {
                    qb.where_(FindWhere::new().op("id", FindOperator::in_list(ids.iter().copied())))
                });
                black_box(qb.and_then(|qb| qb.get_query_and_parameters()))
            });
        });
    }

    group.finish();
}

fn bench_insert_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/insert_batch");

    for (name, dialect) in [("postgres", Dialect::Postgres), ("oracle", Dialect::Oracle)] {
        let ds = data_source(dialect);
        for n in [1, 10, 100] {
            let rows: Vec<ValueSet> = (0..n)
                .map(|i| {
                    ValueSet::new()
                        .set("title", format!("post {i}"))
                        .set("viewCount", i)
                })
                .collect();
            group.bench_with_input(BenchmarkId::new(name, n), &rows, |b, rows| {
                b.iter(|| {
                    let qb = ds
                        .create_query_builder()
                        .insert()
                        .into("Post")
                        .map(|qb| qb.values(rows.clone()));
                    black_box(qb.and_then(|qb| qb.get_query_and_parameters()))
                });
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_select_with_join,
    bench_where_in_list,
    bench_insert_batch
);
criterion_main!(benches);
