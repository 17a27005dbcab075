use dframe_columnar::{ColumnSchema, ColumnType, Frame, FrameBuilder, Value};
use dframe_mr::{
    broadcast_join, build_encoding_table, Cluster, ClusterOptions, CompositeKey, EncodingAggregator,
    EncodingColumns, EncodingData, EncodingFrameNames, EncodingTable, EngineError, MapReduce,
    TaskError, Wire, DENOMINATOR_COL, NO_GROUP, NUMERATOR_COL,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn schema(fold_type: ColumnType) -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("ColA", ColumnType::Categorical),
        ColumnSchema::new("fold", fold_type),
        ColumnSchema::new("num", ColumnType::Number),
        ColumnSchema::new("den", ColumnType::Number),
    ]
}

fn frame(fold_type: ColumnType, sizes: &[usize], rows: Vec<Vec<Value>>) -> Frame {
    let mut builder = FrameBuilder::new("testFrame", schema(fold_type)).with_chunk_layout(sizes);
    for row in rows {
        builder.append_row(&row).unwrap();
    }
    builder.finalize().unwrap()
}

fn row(level: &str, fold: impl Into<Value>, num: f64, den: f64) -> Vec<Value> {
    vec![Value::from(level), fold.into(), Value::from(num), Value::from(den)]
}

fn columns() -> EncodingColumns {
    EncodingColumns::single(0, Some(1), 2, 3)
}

fn clusters() -> Vec<Cluster> {
    let mut out = vec![Cluster::single_node()];
    for nodes in [2, 3] {
        out.push(
            Cluster::new(ClusterOptions {
                nodes,
                threads: Some(2),
                wire_transport: true,
            })
            .unwrap(),
        );
    }
    out
}

fn table(entries: &[(&str, i32, f64, f64)]) -> EncodingTable {
    entries
        .iter()
        .map(|(l, g, n, d)| (CompositeKey::new(*l, *g), EncodingData::new(*n, *d)))
        .collect()
}

#[test]
fn aggregates_across_chunks_and_nodes() {
    let frame = frame(
        ColumnType::Integer,
        &[2, 2, 1],
        vec![
            row("a", 1, 1.0, 1.0),
            row("b", 0, 0.0, 1.0),
            row("a", 1, 1.0, 1.0),
            row("a", 0, 0.0, 1.0),
            row("b", 0, 1.0, 1.0),
        ],
    );
    let expected = table(&[("a", 1, 2.0, 2.0), ("a", 0, 0.0, 1.0), ("b", 0, 1.0, 2.0)]);

    for cluster in clusters() {
        let result = build_encoding_table(&cluster, &frame, &columns()).unwrap();
        assert_eq!(result, expected);
    }
}

#[test]
fn group_value_past_i32_max_aborts_the_job() {
    let frame = frame(
        ColumnType::Number,
        &[2, 1],
        vec![
            row("a", 1.0, 1.0, 1.0),
            row("b", 0.0, 1.0, 1.0),
            row("c", 2_147_483_648.0, 1.0, 1.0),
        ],
    );

    for cluster in clusters() {
        let err = build_encoding_table(&cluster, &frame, &columns()).unwrap_err();
        match &err {
            EngineError::Distributed { node, chunk, .. } => {
                assert_eq!(*chunk, Some(1));
                assert_eq!(*node, cluster.home_node(1));
            }
            other => panic!("expected a distributed failure, got {other:?}"),
        }
        assert!(matches!(
            err.task_error(),
            Some(TaskError::KeyDomainOverflow { row: 2, .. })
        ));
    }
}

#[test]
fn group_value_at_i32_max_is_accepted() {
    let frame = frame(
        ColumnType::Integer,
        &[2, 1],
        vec![
            row("a", i64::from(i32::MAX), 1.0, 2.0),
            row("b", i64::from(i32::MIN), 1.0, 2.0),
            row("a", i64::from(i32::MAX), 1.0, 2.0),
        ],
    );
    let result = build_encoding_table(&Cluster::single_node(), &frame, &columns()).unwrap();
    assert_eq!(
        result,
        table(&[("a", i32::MAX, 2.0, 4.0), ("b", i32::MIN, 1.0, 2.0)])
    );
}

#[test]
fn missing_cells_follow_the_aggregation_policy() {
    let frame = frame(
        ColumnType::Integer,
        &[5],
        vec![
            vec![Value::Null, Value::from(1), Value::from(5.0), Value::from(5.0)],
            vec![Value::from("a"), Value::Null, Value::from(5.0), Value::from(5.0)],
            vec![Value::from("a"), Value::from(1), Value::Null, Value::from(2.0)],
            vec![Value::from("a"), Value::from(1), Value::from(3.0), Value::Null],
            vec![Value::from("b"), Value::from(1), Value::Null, Value::Null],
        ],
    );
    let result = build_encoding_table(&Cluster::single_node(), &frame, &columns()).unwrap();
    assert_eq!(result, table(&[("a", 1, 3.0, 2.0), ("b", 1, 0.0, 0.0)]));
}

#[test]
fn no_group_column_keys_by_label_only() {
    let frame = frame(
        ColumnType::Integer,
        &[1, 2],
        vec![row("a", 1, 1.0, 1.0), row("a", 2, 1.0, 1.0), row("b", 3, 0.0, 1.0)],
    );
    let columns = EncodingColumns::single(0, None, 2, 3);
    let result = build_encoding_table(&Cluster::single_node(), &frame, &columns).unwrap();
    assert_eq!(
        result,
        table(&[("a", NO_GROUP, 2.0, 2.0), ("b", NO_GROUP, 0.0, 1.0)])
    );
}

#[test]
fn non_numeric_columns_are_rejected_up_front() {
    let frame = frame(ColumnType::Integer, &[1], vec![row("a", 1, 1.0, 1.0)]);
    let err = EncodingAggregator::new(&frame, EncodingColumns::single(0, Some(0), 2, 3)).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedColumn { expected: "numeric", .. }));

    let err = EncodingAggregator::new(&frame, EncodingColumns::single(2, None, 2, 3)).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedColumn { expected: "categorical", .. }));
}

#[test]
fn task_output_serializes_right_after_construction_and_after_insertion() {
    let frame = frame(ColumnType::Integer, &[], Vec::new());
    let task = EncodingAggregator::new(&frame, columns()).unwrap();

    let empty = task.empty();
    let decoded = EncodingTable::from_bytes(&empty.to_bytes().unwrap()).unwrap();
    assert!(decoded.is_empty());

    let mut filled = task.empty();
    filled.insert(CompositeKey::new("test", NO_GROUP), EncodingData::new(0.0, 0.0));
    filled.insert(CompositeKey::new("a", 3), EncodingData::new(1.5, 2.0));
    assert_eq!(EncodingTable::from_bytes(&filled.to_bytes().unwrap()).unwrap(), filled);
}

#[test]
fn encoded_tables_feed_the_join() {
    let train = frame(
        ColumnType::Integer,
        &[2, 2],
        vec![
            row("a", 1, 10.0, 20.0),
            row("a", 1, 12.0, 24.0),
            row("c", 0, 42.0, 84.0),
            row("b", 0, 33.0, 66.0),
        ],
    );
    let cluster = Cluster::new(ClusterOptions {
        nodes: 2,
        threads: Some(2),
        wire_transport: true,
    })
    .unwrap();
    let encodings = build_encoding_table(&cluster, &train, &columns()).unwrap();
    let names = EncodingFrameNames::new("encodings", vec!["ColA".into()], Some("fold".into()));
    let right = encodings.to_frame(&names).unwrap();

    let mut left = FrameBuilder::new(
        "holdout",
        vec![
            ColumnSchema::new("ColA", ColumnType::Categorical),
            ColumnSchema::new("fold", ColumnType::Integer),
        ],
    )
    .with_chunk_layout(&[2, 1]);
    for (level, fold) in [("a", 1), ("c", 0), ("b", 1)] {
        left.append_row(&[Value::from(level), Value::from(fold)]).unwrap();
    }
    let left = left.finalize().unwrap();

    let joined = broadcast_join(&cluster, &left, &[0], Some(1), &right, &[0], Some(1)).unwrap();
    let num = joined.column_index(NUMERATOR_COL).unwrap();
    let den = joined.column_index(DENOMINATOR_COL).unwrap();
    assert_eq!(
        joined.column_values(num),
        vec![Value::Number(22.0), Value::Number(42.0), Value::Null]
    );
    assert_eq!(
        joined.column_values(den),
        vec![Value::Number(44.0), Value::Number(84.0), Value::Null]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn only_out_of_range_groups_abort(fold in any::<i64>(), position in 0usize..3) {
        let mut rows = vec![row("a", 0, 1.0, 1.0), row("b", 1, 1.0, 1.0), row("c", 2, 1.0, 1.0)];
        rows[position][1] = Value::Integer(fold);
        let frame = frame(ColumnType::Integer, &[2, 1], rows);

        let result = build_encoding_table(&Cluster::single_node(), &frame, &columns());
        if i32::try_from(fold).is_ok() {
            prop_assert_eq!(result.unwrap().len(), 3);
        } else {
            let err = result.unwrap_err();
            let expected_chunk = if position < 2 { 0 } else { 1 };
            let is_expected = matches!(
                err,
                EngineError::Distributed {
                    chunk: Some(c),
                    source: TaskError::KeyDomainOverflow { .. },
                    ..
                } if c == expected_chunk
            );
            prop_assert!(is_expected);
        }
    }
}
