//! End-to-end physical-operator pipelines (spec §4.4, §8's scenarios 2, 5,
//! 6), built by hand-wiring table/index scans into filter/project/aggregate/
//! join operators the way an (absent, by design) planner would.

use std::sync::Arc;

use quarry::catalog::InMemoryCatalog;
use quarry::index::BTree;
use quarry::query::{
    Aggregate, BlockNestedLoopJoin, Condition, Filter, IndexScan, Operand, Project, TableScan,
    TupleIterator,
};
use quarry::record::{RecordFile, Schema};
use quarry::types::{AggOp, AttrType, Attribute, CompOp, CompositeKey, Tuple, Value};
use tempfile::NamedTempFile;

fn temp_path() -> std::path::PathBuf {
    let tmp = NamedTempFile::new().unwrap();
    let p = tmp.path().to_path_buf();
    drop(tmp);
    p
}

/// Spec §8 scenario 2: build an index on `a`, range-scan `[1, 3]` inclusive,
/// expect rids in value-ascending order.
#[test]
fn index_range_scan_returns_values_in_ascending_order() {
    let schema = Schema {
        version: 1,
        attributes: vec![Attribute::new("a", AttrType::Int, 4)],
    };
    let catalog = InMemoryCatalog::new();
    catalog.register("t", schema.attributes.clone());
    let mut file = RecordFile::create(&temp_path(), "t", Arc::new(catalog)).unwrap();
    let mut tree = BTree::create(&temp_path(), AttrType::Int).unwrap();

    for v in [3, 1, 2] {
        let rid = file.insert(&schema, &Tuple::new(vec![Value::Int(v)])).unwrap();
        tree.insert(CompositeKey::new(Value::Int(v), rid)).unwrap();
    }

    let lower = CompositeKey::new(Value::Int(1), quarry::types::Rid::inclusive_bound());
    let upper = CompositeKey::new(Value::Int(3), quarry::types::Rid::inclusive_bound());
    let mut scan = IndexScan::new(&mut tree, &mut file, &schema, Some(lower), Some(upper), None).unwrap();
    let mut seen = Vec::new();
    while let Some(t) = scan.next_tuple().unwrap() {
        seen.push(t.values[0].clone());
    }
    assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

/// Spec §8 scenario 5: grouped SUM over `(dept, salary)` with a NULL salary
/// that must count toward COUNT semantics elsewhere but not toward SUM.
#[test]
fn grouped_aggregate_matches_the_spec_worked_example() {
    let schema = Schema {
        version: 1,
        attributes: vec![
            Attribute::new("dept", AttrType::Varchar, 4),
            Attribute::new("salary", AttrType::Int, 4),
        ],
    };
    let catalog = InMemoryCatalog::new();
    catalog.register("t", schema.attributes.clone());
    let mut file = RecordFile::create(&temp_path(), "t", Arc::new(catalog)).unwrap();

    for (dept, salary) in [
        ("A", Some(10)),
        ("B", Some(20)),
        ("A", Some(30)),
        ("A", None),
        ("C", Some(5)),
    ] {
        let salary_val = salary.map(Value::Int).unwrap_or(Value::Null);
        file.insert(&schema, &Tuple::new(vec![Value::Varchar(dept.as_bytes().to_vec()), salary_val]))
            .unwrap();
    }

    let scan = TableScan::new(&mut file, &schema, None).unwrap();
    let mut agg = Aggregate::new_grouped(Box::new(scan), "salary", "dept", AggOp::Sum).unwrap();
    let mut rows = Vec::new();
    while let Some(t) = agg.next_tuple().unwrap() {
        let dept = match &t.values[0] {
            Value::Varchar(b) => String::from_utf8(b.clone()).unwrap(),
            _ => unreachable!(),
        };
        rows.push((dept, t.values[1].clone()));
    }
    assert_eq!(
        rows,
        vec![
            ("A".to_string(), Value::Int(40)),
            ("B".to_string(), Value::Int(20)),
            ("C".to_string(), Value::Int(5)),
        ]
    );
}

/// Spec §8 scenario 6: BNL join of two three-row tables on equality, every
/// left match for each right tuple in encounter order.
#[test]
fn block_nested_loop_join_matches_the_spec_worked_example() {
    let left_schema = Schema {
        version: 1,
        attributes: vec![
            Attribute::new("k", AttrType::Int, 4),
            Attribute::new("tag", AttrType::Varchar, 4),
        ],
    };
    let right_schema = Schema {
        version: 1,
        attributes: vec![
            Attribute::new("k", AttrType::Int, 4),
            Attribute::new("tag", AttrType::Varchar, 4),
        ],
    };
    let lcat = InMemoryCatalog::new();
    lcat.register("l", left_schema.attributes.clone());
    let mut lfile = RecordFile::create(&temp_path(), "l", Arc::new(lcat)).unwrap();
    let rcat = InMemoryCatalog::new();
    rcat.register("r", right_schema.attributes.clone());
    let mut rfile = RecordFile::create(&temp_path(), "r", Arc::new(rcat)).unwrap();

    for (k, tag) in [(1, "x"), (2, "y"), (1, "z")] {
        lfile
            .insert(&left_schema, &Tuple::new(vec![Value::Int(k), Value::Varchar(tag.as_bytes().to_vec())]))
            .unwrap();
    }
    for (k, tag) in [(1, "p"), (3, "q"), (1, "r")] {
        rfile
            .insert(&right_schema, &Tuple::new(vec![Value::Int(k), Value::Varchar(tag.as_bytes().to_vec())]))
            .unwrap();
    }

    let left_scan = TableScan::new(&mut lfile, &left_schema, None).unwrap();
    let right_scan = TableScan::new(&mut rfile, &right_schema, None).unwrap();
    let mut join = BlockNestedLoopJoin::new(Box::new(left_scan), Box::new(right_scan), "k", "k", 4);

    let mut out = Vec::new();
    while let Some(t) = join.next_tuple().unwrap() {
        let lt = match &t.values[1] {
            Value::Varchar(b) => String::from_utf8(b.clone()).unwrap(),
            _ => unreachable!(),
        };
        let rt = match &t.values[3] {
            Value::Varchar(b) => String::from_utf8(b.clone()).unwrap(),
            _ => unreachable!(),
        };
        out.push((lt, rt));
    }
    assert_eq!(
        out,
        vec![
            ("x".to_string(), "p".to_string()),
            ("z".to_string(), "p".to_string()),
            ("x".to_string(), "r".to_string()),
            ("z".to_string(), "r".to_string()),
        ]
    );
}

#[test]
fn filter_then_project_composes_over_a_table_scan() {
    let schema = Schema {
        version: 1,
        attributes: vec![
            Attribute::new("id", AttrType::Int, 4),
            Attribute::new("name", AttrType::Varchar, 16),
        ],
    };
    let catalog = InMemoryCatalog::new();
    catalog.register("t", schema.attributes.clone());
    let mut file = RecordFile::create(&temp_path(), "t", Arc::new(catalog)).unwrap();
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        file.insert(&schema, &Tuple::new(vec![Value::Int(id), Value::Varchar(name.as_bytes().to_vec())]))
            .unwrap();
    }

    let scan = TableScan::new(&mut file, &schema, None).unwrap();
    let filtered = Filter::new(Box::new(scan), Condition::new("id", CompOp::Gt, Operand::Const(Value::Int(1))));
    let mut projected = Project::new(Box::new(filtered), vec!["name".to_string()]).unwrap();

    let mut names = Vec::new();
    while let Some(t) = projected.next_tuple().unwrap() {
        names.push(t.values[0].clone());
    }
    assert_eq!(names, vec![Value::Varchar(b"b".to_vec()), Value::Varchar(b"c".to_vec())]);
}
