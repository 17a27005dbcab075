use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dframe_columnar::{ColumnSchema, ColumnType, Frame, FrameBuilder, FrameOptions, Value};
use dframe_mr::{
    broadcast_join, build_encoding_table, Cluster, ClusterOptions, EncodingColumns,
    EncodingFrameNames,
};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("DFRAME_MR_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (10_000..=10_000_000).contains(&v))
        .unwrap_or(500_000)
}

fn build_frame(rows: usize) -> Frame {
    let levels: Vec<String> = (0..1_000).map(|i| format!("level-{i}")).collect();
    let schema = vec![
        ColumnSchema::new("level", ColumnType::Categorical),
        ColumnSchema::new("fold", ColumnType::Integer),
        ColumnSchema::new("num", ColumnType::Number),
        ColumnSchema::new("den", ColumnType::Number),
    ];
    let options = FrameOptions { chunk_rows: 16_384 };
    let mut builder = FrameBuilder::with_options("train", schema, options);
    for i in 0..rows {
        builder
            .append_row(&[
                Value::from(levels[(i * 7919) % levels.len()].as_str()),
                Value::from((i % 5) as i64),
                Value::from((i % 2) as f64),
                Value::from(1.0),
            ])
            .unwrap();
    }
    builder.finalize().unwrap()
}

fn bench_broadcast_join(c: &mut Criterion) {
    let rows = bench_rows();
    let frame = build_frame(rows);
    let cluster = Cluster::new(ClusterOptions {
        nodes: 4,
        ..ClusterOptions::default()
    })
    .unwrap();
    let columns = EncodingColumns::single(0, Some(1), 2, 3);

    let table = build_encoding_table(&cluster, &frame, &columns).unwrap();
    let names = EncodingFrameNames::new("encodings", vec!["level".into()], Some("fold".into()));
    let right = table.to_frame(&names).unwrap();

    let mut group = c.benchmark_group("broadcast_join");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(rows as u64));

    group.bench_with_input(BenchmarkId::new("aggregate", rows), &rows, |b, _| {
        b.iter(|| black_box(build_encoding_table(&cluster, &frame, &columns).unwrap()))
    });

    group.bench_with_input(BenchmarkId::new("join", rows), &rows, |b, _| {
        b.iter(|| {
            let joined = broadcast_join(&cluster, &frame, &[0], Some(1), &right, &[0], Some(1)).unwrap();
            black_box(joined);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast_join);
criterion_main!(benches);
