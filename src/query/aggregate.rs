//! The aggregate operator (spec §4.4): scalar (one result row over the
//! entire child) and grouped (one result row per distinct group-attribute
//! value, emitted in ascending key order). A `NULL` in the aggregated
//! attribute is skipped by every op except `COUNT`, which counts every row
//! regardless — matching the spec's "COUNT counts rows, not non-null values"
//! carve-out.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{AggOp, AttrType, Attribute, Descriptor, Tuple, Value};

use super::{attr_type_of, TupleIterator};

#[derive(Debug, Default, Clone)]
struct ScalarStats {
    count: i64,
    non_null: i64,
    sum_i: i64,
    sum_f: f64,
    is_float: bool,
    min: Option<Value>,
    max: Option<Value>,
}

impl ScalarStats {
    fn accumulate(&mut self, v: &Value) {
        self.count += 1;
        if v.is_null() {
            return;
        }
        self.non_null += 1;
        match v {
            Value::Int(i) => {
                self.sum_i += *i as i64;
                self.sum_f += *i as f64;
            }
            Value::Real(f) => {
                self.is_float = true;
                self.sum_f += *f as f64;
            }
            _ => {}
        }
        if self.min.is_none() || v.compare(self.min.as_ref().unwrap()) == Some(Ordering::Less) {
            self.min = Some(v.clone());
        }
        if self.max.is_none() || v.compare(self.max.as_ref().unwrap()) == Some(Ordering::Greater) {
            self.max = Some(v.clone());
        }
    }

    fn finish(&self, op: AggOp) -> Value {
        match op {
            AggOp::Count => Value::Int(self.count as i32),
            AggOp::Min => self.min.clone().unwrap_or(Value::Null),
            AggOp::Max => self.max.clone().unwrap_or(Value::Null),
            AggOp::Sum => {
                if self.non_null == 0 {
                    Value::Null
                } else if self.is_float {
                    Value::Real(self.sum_f as f32)
                } else {
                    Value::Int(self.sum_i as i32)
                }
            }
            AggOp::Avg => {
                if self.non_null == 0 {
                    Value::Null
                } else {
                    Value::Real((self.sum_f / self.non_null as f64) as f32)
                }
            }
        }
    }
}

/// Group-by key: aggregate group attributes are always INT/REAL/VARCHAR,
/// none of which derive `Ord`, so this wraps [`Value::compare`] into a total
/// order suitable for a `BTreeMap` (ascending emission order, spec §4.4).
#[derive(Debug, Clone, PartialEq)]
struct GroupKey(Value);

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0).unwrap_or(Ordering::Equal)
    }
}

fn op_name(op: AggOp) -> &'static str {
    match op {
        AggOp::Min => "min",
        AggOp::Max => "max",
        AggOp::Count => "count",
        AggOp::Sum => "sum",
        AggOp::Avg => "avg",
    }
}

fn result_type(op: AggOp, agg_type: AttrType) -> AttrType {
    match op {
        AggOp::Count => AttrType::Int,
        AggOp::Avg => AttrType::Real,
        AggOp::Sum => {
            if agg_type == AttrType::Real {
                AttrType::Real
            } else {
                AttrType::Int
            }
        }
        AggOp::Min | AggOp::Max => agg_type,
    }
}

enum Mode {
    Scalar { stats: Option<ScalarStats>, emitted: bool },
    Grouped {
        group_attr: String,
        groups: Option<std::collections::btree_map::IntoIter<GroupKey, ScalarStats>>,
    },
}

/// Streams its child fully on the first `next_tuple` call, then replays one
/// or more result rows computed from what it saw (spec §4.4: aggregation is
/// inherently blocking, unlike the rest of the pull-based operators).
pub struct Aggregate<'a> {
    child: Box<dyn TupleIterator + 'a>,
    agg_attr: String,
    op: AggOp,
    mode: Mode,
    out_descriptor: Descriptor,
}

impl<'a> Aggregate<'a> {
    pub fn new_scalar(child: Box<dyn TupleIterator + 'a>, agg_attr: impl Into<String>, op: AggOp) -> Result<Self> {
        let agg_attr = agg_attr.into();
        let agg_type = attr_type_of(child.attributes(), &agg_attr)?;
        let out_descriptor = vec![Attribute::new(format!("{}_{}", op_name(op), agg_attr), result_type(op, agg_type), 4)];
        Ok(Self {
            child,
            agg_attr,
            op,
            mode: Mode::Scalar { stats: None, emitted: false },
            out_descriptor,
        })
    }

    pub fn new_grouped(
        child: Box<dyn TupleIterator + 'a>,
        agg_attr: impl Into<String>,
        group_attr: impl Into<String>,
        op: AggOp,
    ) -> Result<Self> {
        let agg_attr = agg_attr.into();
        let group_attr = group_attr.into();
        let agg_type = attr_type_of(child.attributes(), &agg_attr)?;
        let group_type = attr_type_of(child.attributes(), &group_attr)?;
        let out_descriptor = vec![
            Attribute::new(group_attr.clone(), group_type, 64),
            Attribute::new(format!("{}_{}", op_name(op), agg_attr), result_type(op, agg_type), 4),
        ];
        Ok(Self {
            child,
            agg_attr,
            op,
            mode: Mode::Grouped { group_attr, groups: None },
            out_descriptor,
        })
    }
}

impl<'a> TupleIterator for Aggregate<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        match &mut self.mode {
            Mode::Scalar { stats, emitted } => {
                if stats.is_none() {
                    let descriptor = self.child.attributes().clone();
                    let mut acc = ScalarStats::default();
                    while let Some(t) = self.child.next_tuple()? {
                        acc.accumulate(t.get(&descriptor, &self.agg_attr)?);
                    }
                    *stats = Some(acc);
                }
                if *emitted {
                    return Ok(None);
                }
                *emitted = true;
                let result = stats.as_ref().unwrap().finish(self.op);
                Ok(Some(Tuple::new(vec![result])))
            }
            Mode::Grouped { group_attr, groups } => {
                if groups.is_none() {
                    let descriptor = self.child.attributes().clone();
                    let mut map: BTreeMap<GroupKey, ScalarStats> = BTreeMap::new();
                    while let Some(t) = self.child.next_tuple()? {
                        let gv = t.get(&descriptor, group_attr)?.clone();
                        let av = t.get(&descriptor, &self.agg_attr)?;
                        map.entry(GroupKey(gv)).or_default().accumulate(av);
                    }
                    *groups = Some(map.into_iter());
                }
                match groups.as_mut().unwrap().next() {
                    Some((key, stats)) => Ok(Some(Tuple::new(vec![key.0, stats.finish(self.op)]))),
                    None => Ok(None),
                }
            }
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrType, Attribute};

    struct Vecs {
        rows: std::vec::IntoIter<Tuple>,
        descriptor: Descriptor,
    }

    impl TupleIterator for Vecs {
        fn next_tuple(&mut self) -> Result<Option<Tuple>> {
            Ok(self.rows.next())
        }
        fn attributes(&self) -> &Descriptor {
            &self.descriptor
        }
    }

    fn source(rows: Vec<(i32, Value)>) -> Box<dyn TupleIterator> {
        let descriptor = vec![Attribute::new("dept", AttrType::Int, 4), Attribute::new("salary", AttrType::Int, 4)];
        let rows = rows.into_iter().map(|(d, s)| Tuple::new(vec![Value::Int(d), s])).collect::<Vec<_>>();
        Box::new(Vecs { rows: rows.into_iter(), descriptor })
    }

    #[test]
    fn scalar_sum_skips_null_but_count_does_not() {
        let child = source(vec![(1, Value::Int(10)), (1, Value::Null), (1, Value::Int(30))]);
        let mut sum = Aggregate::new_scalar(child, "salary", AggOp::Sum).unwrap();
        assert_eq!(sum.next_tuple().unwrap().unwrap().values[0], Value::Int(40));
        assert!(sum.next_tuple().unwrap().is_none());

        let child = source(vec![(1, Value::Int(10)), (1, Value::Null), (1, Value::Int(30))]);
        let mut count = Aggregate::new_scalar(child, "salary", AggOp::Count).unwrap();
        assert_eq!(count.next_tuple().unwrap().unwrap().values[0], Value::Int(3));
    }

    #[test]
    fn grouped_sum_emits_ascending_by_group_key() {
        let child = source(vec![
            (2, Value::Int(20)),
            (1, Value::Int(10)),
            (1, Value::Int(30)),
            (3, Value::Int(5)),
        ]);
        let mut agg = Aggregate::new_grouped(child, "salary", "dept", AggOp::Sum).unwrap();
        let mut rows = Vec::new();
        while let Some(t) = agg.next_tuple().unwrap() {
            rows.push((t.values[0].clone(), t.values[1].clone()));
        }
        assert_eq!(
            rows,
            vec![
                (Value::Int(1), Value::Int(40)),
                (Value::Int(2), Value::Int(20)),
                (Value::Int(3), Value::Int(5)),
            ]
        );
    }

    #[test]
    fn scalar_min_max_over_empty_input_is_null() {
        let child = source(vec![]);
        let mut agg = Aggregate::new_scalar(child, "salary", AggOp::Min).unwrap();
        assert_eq!(agg.next_tuple().unwrap().unwrap().values[0], Value::Null);
    }
}
