//! End-to-end query tests over the engine surface: plans in, rows out.
//!
//! The SQL front-end is an external adapter, so these tests construct
//! plan trees directly — the same shape the planner hands the executor.

use tempfile::tempdir;
use wrendb::{
    AggregateExpr, AggregateFunc, BinaryOp, ColumnSpec, DataType, Engine, EngineConfig, Expr,
    PlanNode, Value,
};

fn open_engine(dir: &std::path::Path) -> Engine {
    Engine::open(EngineConfig::new(dir).max_cached_pages(64).wal_sync(false)).unwrap()
}

fn create_table(engine: &Engine, name: &str, columns: Vec<ColumnSpec>) {
    let result = engine.execute(&PlanNode::create_table(name, columns, false));
    assert!(result.success, "CREATE TABLE failed: {:?}", result.error);
}

fn insert_rows(engine: &Engine, table: &str, rows: Vec<Vec<Expr>>) -> u64 {
    let result = engine.execute(&PlanNode::insert(table, vec![], rows));
    assert!(result.success, "INSERT failed: {:?}", result.error);
    result.rows_affected
}

/// Seeds `t(id INTEGER, v INTEGER)` with rows `(i, i*2)` for i in 0..n.
fn seed_numbers(engine: &Engine, n: i64) {
    create_table(
        engine,
        "t",
        vec![
            ColumnSpec::new("id", DataType::Integer),
            ColumnSpec::new("v", DataType::Integer),
        ],
    );
    let rows: Vec<Vec<Expr>> = (0..n)
        .map(|i| vec![Expr::integer(i), Expr::integer(i * 2)])
        .collect();
    assert_eq!(insert_rows(engine, "t", rows), n as u64);
}

fn int(v: i64) -> Value {
    Value::Integer(v)
}

#[test]
fn create_insert_select_star_round_trip() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    create_table(
        &engine,
        "users",
        vec![
            ColumnSpec::new("id", DataType::Integer),
            ColumnSpec::new("name", DataType::Text),
        ],
    );

    let affected = insert_rows(
        &engine,
        "users",
        vec![
            vec![Expr::integer(1), Expr::string("a")],
            vec![Expr::integer(2), Expr::string("b")],
            vec![Expr::integer(3), Expr::string("c")],
        ],
    );
    assert_eq!(affected, 3);

    let result = engine.execute(&PlanNode::project(
        PlanNode::table_scan("users"),
        vec![Expr::Star],
        vec![String::new()],
    ));
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.column_names, vec!["id", "name"]);
    assert_eq!(result.rows.len(), 3);

    // Insertion order is preserved by the scan.
    for (i, expected) in ["a", "b", "c"].iter().enumerate() {
        assert_eq!(result.rows[i].values[0], int(i as i64 + 1));
        assert_eq!(result.rows[i].values[1], Value::Text(expected.to_string()));
    }
    assert_eq!(result.stats.rows_returned, 3);
}

#[test]
fn where_order_by_desc_limit() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 100);

    // SELECT id, v FROM t WHERE v >= 100 ORDER BY id DESC LIMIT 5
    let plan = PlanNode::limit(
        PlanNode::sort(
            PlanNode::filter(
                PlanNode::table_scan("t"),
                Expr::binary(BinaryOp::GtEq, Expr::column("v"), Expr::integer(100)),
            ),
            vec![Expr::column("id")],
            vec![false],
        ),
        5,
        0,
    );

    let result = engine.execute(&plan);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.rows.len(), 5);

    let expected = [(99, 198), (98, 196), (97, 194), (96, 192), (95, 190)];
    for (row, (id, v)) in result.rows.iter().zip(expected.iter()) {
        assert_eq!(row.values[0], int(*id));
        assert_eq!(row.values[1], int(*v));
    }
}

#[test]
fn limit_with_offset_skips_rows() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 10);

    let plan = PlanNode::limit(PlanNode::table_scan("t"), 3, 4);
    let result = engine.execute(&plan);
    assert!(result.success);
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.rows[0].values[0], int(4));
    assert_eq!(result.rows[2].values[0], int(6));
}

#[test]
fn negative_limit_means_unbounded() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 10);

    let plan = PlanNode::limit(PlanNode::table_scan("t"), -1, 8);
    let result = engine.execute(&plan);
    assert!(result.success);
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn projection_evaluates_expressions_with_output_names() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 3);

    let plan = PlanNode::project(
        PlanNode::table_scan("t"),
        vec![
            Expr::column("id"),
            Expr::binary(BinaryOp::Add, Expr::column("v"), Expr::integer(1)),
        ],
        vec!["id".to_string(), "v_plus_one".to_string()],
    );

    let result = engine.execute(&plan);
    assert!(result.success);
    assert_eq!(result.column_names, vec!["id", "v_plus_one"]);
    assert_eq!(result.rows[2].values[1], int(5));
}

#[test]
fn sort_places_nulls_first_and_is_stable() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    create_table(
        &engine,
        "s",
        vec![
            ColumnSpec::new("k", DataType::Integer),
            ColumnSpec::new("tag", DataType::Text),
        ],
    );
    insert_rows(
        &engine,
        "s",
        vec![
            vec![Expr::integer(2), Expr::string("first-two")],
            vec![Expr::null(), Expr::string("null-row")],
            vec![Expr::integer(1), Expr::string("one")],
            vec![Expr::integer(2), Expr::string("second-two")],
        ],
    );

    let plan = PlanNode::sort(
        PlanNode::table_scan("s"),
        vec![Expr::column("k")],
        vec![true],
    );
    let result = engine.execute(&plan);
    assert!(result.success);

    assert_eq!(result.rows[0].values[0], Value::Null);
    assert_eq!(result.rows[1].values[0], int(1));
    // Stability: equal keys keep insertion order.
    assert_eq!(result.rows[2].values[1], Value::Text("first-two".into()));
    assert_eq!(result.rows[3].values[1], Value::Text("second-two".into()));
}

#[test]
fn filter_treats_null_comparison_as_no_match() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    create_table(
        &engine,
        "n",
        vec![ColumnSpec::new("x", DataType::Integer)],
    );
    insert_rows(
        &engine,
        "n",
        vec![
            vec![Expr::integer(5)],
            vec![Expr::null()],
            vec![Expr::integer(10)],
        ],
    );

    let plan = PlanNode::filter(
        PlanNode::table_scan("n"),
        Expr::binary(BinaryOp::Gt, Expr::column("x"), Expr::integer(1)),
    );
    let result = engine.execute(&plan);
    assert!(result.success);
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn aggregates_over_all_rows() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 10);

    let plan = PlanNode::aggregate(
        PlanNode::table_scan("t"),
        vec![
            AggregateExpr {
                func: AggregateFunc::Count,
                arg: None,
                distinct: false,
                output_name: "cnt".to_string(),
            },
            AggregateExpr {
                func: AggregateFunc::Sum,
                arg: Some(Expr::column("v")),
                distinct: false,
                output_name: "total".to_string(),
            },
            AggregateExpr {
                func: AggregateFunc::Min,
                arg: Some(Expr::column("id")),
                distinct: false,
                output_name: "lo".to_string(),
            },
            AggregateExpr {
                func: AggregateFunc::Max,
                arg: Some(Expr::column("id")),
                distinct: false,
                output_name: "hi".to_string(),
            },
            AggregateExpr {
                func: AggregateFunc::Avg,
                arg: Some(Expr::column("id")),
                distinct: false,
                output_name: "mid".to_string(),
            },
        ],
    );

    let result = engine.execute(&plan);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(
        result.column_names,
        vec!["cnt", "total", "lo", "hi", "mid"]
    );

    let row = &result.rows[0];
    assert_eq!(row.values[0], int(10));
    assert_eq!(row.values[1], int(90)); // sum of 0,2,..,18
    assert_eq!(row.values[2], int(0));
    assert_eq!(row.values[3], int(9));
    assert_eq!(row.values[4], Value::Float(4.5));
}

#[test]
fn count_distinct_collapses_duplicates() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    create_table(&engine, "d", vec![ColumnSpec::new("x", DataType::Integer)]);
    insert_rows(
        &engine,
        "d",
        vec![
            vec![Expr::integer(1)],
            vec![Expr::integer(1)],
            vec![Expr::integer(2)],
            vec![Expr::null()],
        ],
    );

    let plan = PlanNode::aggregate(
        PlanNode::table_scan("d"),
        vec![AggregateExpr {
            func: AggregateFunc::Count,
            arg: Some(Expr::column("x")),
            distinct: true,
            output_name: "distinct_x".to_string(),
        }],
    );

    let result = engine.execute(&plan);
    assert!(result.success);
    // NULL never counts; duplicates collapse.
    assert_eq!(result.rows[0].values[0], int(2));
}

#[test]
fn aggregates_over_empty_input() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    create_table(&engine, "e", vec![ColumnSpec::new("x", DataType::Integer)]);

    let plan = PlanNode::aggregate(
        PlanNode::table_scan("e"),
        vec![
            AggregateExpr {
                func: AggregateFunc::Count,
                arg: None,
                distinct: false,
                output_name: "cnt".to_string(),
            },
            AggregateExpr {
                func: AggregateFunc::Sum,
                arg: Some(Expr::column("x")),
                distinct: false,
                output_name: "total".to_string(),
            },
        ],
    );

    let result = engine.execute(&plan);
    assert!(result.success);
    assert_eq!(result.rows[0].values[0], int(0));
    assert_eq!(result.rows[0].values[1], Value::Null);
}

#[test]
fn insert_validates_arity_and_types() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    create_table(
        &engine,
        "strict",
        vec![
            ColumnSpec::new("id", DataType::Integer).not_null(),
            ColumnSpec::new("name", DataType::Text),
        ],
    );

    // Arity mismatch.
    let result = engine.execute(&PlanNode::insert(
        "strict",
        vec![],
        vec![vec![Expr::integer(1)]],
    ));
    assert!(!result.success);

    // Type mismatch.
    let result = engine.execute(&PlanNode::insert(
        "strict",
        vec![],
        vec![vec![Expr::string("nope"), Expr::string("x")]],
    ));
    assert!(!result.success);
    assert!(result.error.unwrap().contains("type mismatch"));

    // NOT NULL violation.
    let result = engine.execute(&PlanNode::insert(
        "strict",
        vec![],
        vec![vec![Expr::null(), Expr::string("x")]],
    ));
    assert!(!result.success);

    // Named-column insert with reordering works.
    let result = engine.execute(&PlanNode::insert(
        "strict",
        vec!["name".to_string(), "id".to_string()],
        vec![vec![Expr::string("ok"), Expr::integer(1)]],
    ));
    assert!(result.success, "{:?}", result.error);
}

#[test]
fn drop_table_removes_data_and_catalog_entry() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    seed_numbers(&engine, 5);

    let result = engine.execute(&PlanNode::drop_table("t", false));
    assert!(result.success);

    let result = engine.execute(&PlanNode::table_scan("t"));
    assert!(!result.success);

    // IF EXISTS tolerates the missing table.
    let result = engine.execute(&PlanNode::drop_table("t", true));
    assert!(result.success);
}

#[test]
fn large_dataset_spans_many_pages() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    create_table(
        &engine,
        "big",
        vec![
            ColumnSpec::new("id", DataType::Integer),
            ColumnSpec::new("pad", DataType::Text),
        ],
    );

    // ~500 bytes per row forces multiple 8KB pages.
    let pad = "x".repeat(500);
    let rows: Vec<Vec<Expr>> = (0..200)
        .map(|i| vec![Expr::integer(i), Expr::string(pad.clone())])
        .collect();
    insert_rows(&engine, "big", rows);

    let result = engine.execute(&PlanNode::table_scan("big"));
    assert!(result.success);
    assert_eq!(result.rows.len(), 200);
    for (i, row) in result.rows.iter().enumerate() {
        assert_eq!(row.values[0], int(i as i64));
    }
}
