//! Leaf operators: full table scan and secondary-index scan (spec §4.4).

use crate::error::Result;
use crate::index::BTree;
use crate::record::{RecordFile, Schema, ScanIter};
use crate::types::{CompositeKey, Descriptor, Tuple};

use super::filter::Condition;
use super::{project_descriptor, project_tuple, TupleIterator};

/// Walks every live tuple of a record file in storage order, optionally
/// projecting down to a subset of columns (spec §4.2's `scan`, driven
/// through the query layer rather than taken as a record-file method so it
/// composes with the rest of the operator tree).
pub struct TableScan<'a> {
    iter: ScanIter<'a>,
    projection: Option<Vec<String>>,
    source: Descriptor,
    out_descriptor: Descriptor,
}

impl<'a> TableScan<'a> {
    pub fn new(file: &'a mut RecordFile, schema: &'a Schema, projection: Option<Vec<String>>) -> Result<Self> {
        let out_descriptor = match &projection {
            Some(names) => project_descriptor(&schema.attributes, names)?,
            None => schema.attributes.clone(),
        };
        Ok(Self {
            iter: file.scan(schema),
            projection,
            source: schema.attributes.clone(),
            out_descriptor,
        })
    }
}

impl<'a> TupleIterator for TableScan<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        match self.iter.next() {
            Some(res) => {
                let (_, tuple) = res?;
                let out = match &self.projection {
                    Some(names) => project_tuple(&self.source, names, &tuple)?,
                    None => tuple,
                };
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn rewind(&mut self) -> Result<()> {
        self.iter.rewind();
        Ok(())
    }
}

/// Walks a secondary index's `[lower, upper]` range in key order, fetching
/// each matching tuple from the record file behind its rid (spec §4.3,
/// §4.4's IndexScan operator). `recheck`, when set, re-evaluates an exact
/// condition against the fetched tuple before yielding it — used by index
/// nested-loop join, whose index range is only a superset of the rows that
/// actually satisfy a non-equality comparator (spec §4.4: "the index
/// provides candidates, the filter rechecks").
pub struct IndexScan<'a> {
    btree: &'a mut BTree,
    cursor: crate::index::RangeCursor,
    record_file: &'a mut RecordFile,
    schema: &'a Schema,
    projection: Option<Vec<String>>,
    recheck: Option<Condition>,
    out_descriptor: Descriptor,
}

impl<'a> IndexScan<'a> {
    pub fn new(
        btree: &'a mut BTree,
        record_file: &'a mut RecordFile,
        schema: &'a Schema,
        lower: Option<CompositeKey>,
        upper: Option<CompositeKey>,
        projection: Option<Vec<String>>,
    ) -> Result<Self> {
        let cursor = btree.range_scan(lower, upper);
        let out_descriptor = match &projection {
            Some(names) => project_descriptor(&schema.attributes, names)?,
            None => schema.attributes.clone(),
        };
        Ok(Self {
            btree,
            cursor,
            record_file,
            schema,
            projection,
            recheck: None,
            out_descriptor,
        })
    }

    /// Restart the scan with a new range and an optional recheck condition
    /// (index nested-loop join, once per left tuple).
    pub fn reseek(&mut self, lower: Option<CompositeKey>, upper: Option<CompositeKey>, recheck: Option<Condition>) {
        self.cursor.reseek(lower, upper);
        self.recheck = recheck;
    }
}

impl<'a> TupleIterator for IndexScan<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        while let Some(key) = self.cursor.next(self.btree)? {
            let tuple = self.record_file.read(self.schema, key.rid)?;
            if let Some(cond) = &self.recheck {
                if !cond.eval(&self.schema.attributes, &tuple)? {
                    continue;
                }
            }
            let out = match &self.projection {
                Some(names) => project_tuple(&self.schema.attributes, names, &tuple)?,
                None => tuple,
            };
            return Ok(Some(out));
        }
        Ok(None)
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor.rewind();
        Ok(())
    }
}
