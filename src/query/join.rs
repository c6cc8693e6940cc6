//! The three physical join operators (spec §4.4): block nested-loop, index
//! nested-loop, and grace hash. All three probe with an in-memory hash table
//! keyed by the join value's encoded payload bytes (`rustc_hash::FxHashMap`,
//! matching the teacher's choice of hasher for its own in-memory lookup
//! tables) rather than requiring `Value` to implement `Hash` directly, since
//! `Value::Real` can't derive it.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::pager::PAGE_SIZE;
use crate::record::{RecordFile, Schema};
use crate::types::{CompOp, CompositeKey, Descriptor, Rid, Tuple, Value};

use super::filter::{Condition, Operand};
use super::scan::IndexScan;
use super::{concat_descriptors, concat_tuples, TupleIterator};

fn payload_bytes(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    v.encode_payload(&mut out);
    out
}

fn tuple_size_estimate(t: &Tuple) -> usize {
    t.encode_wire().len()
}

/// Block nested-loop join (spec §4.4): the left side is consumed in blocks
/// of at most `num_pages * PAGE_SIZE` bytes and indexed in memory; the right
/// side (`right`, which must support [`TupleIterator::rewind`]) is streamed
/// once per block.
pub struct BlockNestedLoopJoin<'a> {
    left: Box<dyn TupleIterator + 'a>,
    right: Box<dyn TupleIterator + 'a>,
    left_attr: String,
    right_attr: String,
    block_capacity_bytes: usize,
    block: Vec<Tuple>,
    index: FxHashMap<Vec<u8>, Vec<usize>>,
    carry: Option<Tuple>,
    left_exhausted: bool,
    block_loaded: bool,
    current_right: Option<Tuple>,
    match_queue: VecDeque<usize>,
    out_descriptor: Descriptor,
}

impl<'a> BlockNestedLoopJoin<'a> {
    pub fn new(
        left: Box<dyn TupleIterator + 'a>,
        right: Box<dyn TupleIterator + 'a>,
        left_attr: impl Into<String>,
        right_attr: impl Into<String>,
        num_pages: usize,
    ) -> Self {
        let out_descriptor = concat_descriptors(left.attributes(), right.attributes());
        Self {
            left,
            right,
            left_attr: left_attr.into(),
            right_attr: right_attr.into(),
            block_capacity_bytes: num_pages.max(1) * PAGE_SIZE,
            block: Vec::new(),
            index: FxHashMap::default(),
            carry: None,
            left_exhausted: false,
            block_loaded: false,
            current_right: None,
            match_queue: VecDeque::new(),
            out_descriptor,
        }
    }

    fn add_to_block(&mut self, t: Tuple) -> Result<()> {
        let lv = t.get(self.left.attributes(), &self.left_attr)?;
        if !lv.is_null() {
            let idx = self.block.len();
            self.index.entry(payload_bytes(lv)).or_default().push(idx);
        }
        self.block.push(t);
        Ok(())
    }

    /// Load the next block: the carried-over tuple from the previous block
    /// (if any) first, then as many fresh left tuples as fit.
    fn load_next_block(&mut self) -> Result<()> {
        self.block.clear();
        self.index.clear();
        let mut bytes_used = 0usize;
        if let Some(t) = self.carry.take() {
            bytes_used += tuple_size_estimate(&t);
            self.add_to_block(t)?;
        }
        loop {
            match self.left.next_tuple()? {
                Some(t) => {
                    let approx = tuple_size_estimate(&t);
                    if bytes_used > 0 && bytes_used + approx > self.block_capacity_bytes {
                        self.carry = Some(t);
                        break;
                    }
                    bytes_used += approx;
                    self.add_to_block(t)?;
                }
                None => {
                    self.left_exhausted = true;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<'a> TupleIterator for BlockNestedLoopJoin<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if !self.block_loaded {
            self.load_next_block()?;
            self.block_loaded = true;
            if self.block.is_empty() {
                return Ok(None);
            }
        }
        loop {
            if let Some(idx) = self.match_queue.pop_front() {
                let lt = self.block[idx].clone();
                let rt = self.current_right.clone().expect("match queue implies a probed right tuple");
                return Ok(Some(concat_tuples(lt, rt)));
            }
            match self.right.next_tuple()? {
                Some(rt) => {
                    let rv = rt.get(self.right.attributes(), &self.right_attr)?;
                    if !rv.is_null() {
                        if let Some(idxs) = self.index.get(&payload_bytes(rv)) {
                            self.match_queue.extend(idxs.iter().copied());
                        }
                    }
                    self.current_right = Some(rt);
                    continue;
                }
                None => {
                    // Right side exhausted for this block: reload and rewind
                    // if the left side has more, otherwise we are done.
                    if self.left_exhausted && self.carry.is_none() {
                        return Ok(None);
                    }
                    self.load_next_block()?;
                    if self.block.is_empty() {
                        return Ok(None);
                    }
                    self.right.rewind()?;
                    self.current_right = None;
                }
            }
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()?;
        self.right.close()
    }
}

/// Translate a comparator into an index range that *contains* every tuple
/// satisfying it (spec §4.4: "the index provides candidates, the filter
/// rechecks" — so this range only needs to be a superset, not exact).
fn candidate_bounds(op: CompOp, value: &Value) -> (Option<CompositeKey>, Option<CompositeKey>) {
    let incl = || CompositeKey::new(value.clone(), Rid::inclusive_bound());
    let excl = || CompositeKey::new(value.clone(), Rid::exclusive_bound());
    match op {
        CompOp::Eq => (Some(incl()), Some(excl())),
        CompOp::Lt | CompOp::Le => (None, Some(excl())),
        CompOp::Gt | CompOp::Ge => (Some(incl()), None),
        CompOp::Ne | CompOp::NoOp => (None, None),
    }
}

/// Index nested-loop join (spec §4.4): for each left tuple, re-seek the
/// right-side index scan to a range containing every match for the join
/// value, with an exact recheck filter to pin down the comparator precisely.
pub struct IndexNestedLoopJoin<'a> {
    left: Box<dyn TupleIterator + 'a>,
    right: IndexScan<'a>,
    left_attr: String,
    right_attr: String,
    op: CompOp,
    current_left: Option<Tuple>,
    out_descriptor: Descriptor,
}

impl<'a> IndexNestedLoopJoin<'a> {
    pub fn new(
        left: Box<dyn TupleIterator + 'a>,
        right: IndexScan<'a>,
        left_attr: impl Into<String>,
        right_attr: impl Into<String>,
        op: CompOp,
    ) -> Self {
        let out_descriptor = concat_descriptors(left.attributes(), right.attributes());
        Self {
            left,
            right,
            left_attr: left_attr.into(),
            right_attr: right_attr.into(),
            op,
            current_left: None,
            out_descriptor,
        }
    }
}

impl<'a> TupleIterator for IndexNestedLoopJoin<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.current_left.is_none() {
                match self.left.next_tuple()? {
                    Some(t) => {
                        let lv = t.get(self.left.attributes(), &self.left_attr)?.clone();
                        if lv.is_null() {
                            continue;
                        }
                        let (lower, upper) = candidate_bounds(self.op, &lv);
                        let recheck = Condition::new(self.right_attr.clone(), self.op, Operand::Const(lv));
                        self.right.reseek(lower, upper, Some(recheck));
                        self.current_left = Some(t);
                    }
                    None => return Ok(None),
                }
            }
            match self.right.next_tuple()? {
                Some(rt) => {
                    let lt = self.current_left.clone().expect("just set above");
                    return Ok(Some(concat_tuples(lt, rt)));
                }
                None => {
                    self.current_left = None;
                }
            }
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()?;
        self.right.close()
    }
}

static GHJ_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path(tag: &str) -> PathBuf {
    let id = GHJ_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    std::env::temp_dir().join(format!("quarry-ghj-{tag}-{}-{id}.tmp", std::process::id()))
}

fn hash_bucket(v: &Value, num_partitions: usize) -> usize {
    let bytes = payload_bytes(v);
    let mut hasher = FxHasher::default();
    bytes.hash(&mut hasher);
    (hasher.finish() as usize) % num_partitions.max(1)
}

/// A catalog for the join's own scratch partition files. These are never
/// read back through schema evolution, so a fixed version-1 schema with no
/// history is all [`RecordFile`] ever needs from it.
struct ScratchCatalog;

impl Catalog for ScratchCatalog {
    fn current_version(&self, _table: &str) -> Result<u16> {
        Ok(1)
    }
    fn attributes_for(&self, _table: &str, _version: u16) -> Result<Descriptor> {
        Err(Error::logical("scratch join partitions have no schema history"))
    }
    fn is_system(&self, _table: &str) -> bool {
        true
    }
}

fn partition_side(
    iter: &mut dyn TupleIterator,
    attr: &str,
    num_partitions: usize,
    tag: &str,
) -> Result<(Vec<PathBuf>, Descriptor)> {
    let descriptor = iter.attributes().clone();
    let schema = Schema { version: 1, attributes: descriptor.clone() };
    let mut paths = Vec::with_capacity(num_partitions);
    let mut files = Vec::with_capacity(num_partitions);
    for _ in 0..num_partitions {
        let path = temp_path(tag);
        let file = RecordFile::create(&path, "ghj_partition", Arc::new(ScratchCatalog))?;
        paths.push(path);
        files.push(file);
    }
    while let Some(t) = iter.next_tuple()? {
        let v = t.get(&descriptor, attr)?;
        if v.is_null() {
            continue;
        }
        let bucket = hash_bucket(v, num_partitions);
        files[bucket].insert(&schema, &t)?;
    }
    for f in files {
        f.close()?;
    }
    Ok((paths, descriptor))
}

/// Grace hash join (spec §4.4): both sides are first partitioned to disk by
/// `hash(join value) mod num_partitions` (NULL join values are dropped, since
/// they can never match anything), then each partition pair is joined the
/// same way block nested-loop joins a single block. Partition files are
/// unique per invocation (a process-wide monotonic counter) and removed when
/// the operator is dropped.
///
/// The right side of each partition is materialized into memory rather than
/// streamed tuple-by-tuple: a [`crate::record::ScanIter`] borrows its
/// `RecordFile` for its own lifetime, and this struct already owns that
/// `RecordFile`, so holding a persistent scan over it as a field would be
/// self-referential. Partitions are expected to be small enough that this is
/// a non-issue in practice.
pub struct GraceHashJoin {
    left_attr: String,
    right_attr: String,
    num_partitions: usize,
    left_descriptor: Descriptor,
    right_descriptor: Descriptor,
    left_paths: Vec<PathBuf>,
    right_paths: Vec<PathBuf>,
    current_partition: usize,
    block: Vec<Tuple>,
    index: FxHashMap<Vec<u8>, Vec<usize>>,
    right_tuples: Vec<Tuple>,
    right_pos: usize,
    current_right: Option<Tuple>,
    match_queue: VecDeque<usize>,
    out_descriptor: Descriptor,
}

impl GraceHashJoin {
    pub fn new<'a>(
        mut left: Box<dyn TupleIterator + 'a>,
        mut right: Box<dyn TupleIterator + 'a>,
        left_attr: impl Into<String>,
        right_attr: impl Into<String>,
        num_partitions: usize,
    ) -> Result<Self> {
        let num_partitions = num_partitions.max(1);
        let left_attr = left_attr.into();
        let right_attr = right_attr.into();
        let out_descriptor = concat_descriptors(left.attributes(), right.attributes());
        let (left_paths, left_descriptor) = partition_side(&mut *left, &left_attr, num_partitions, "l")?;
        let (right_paths, right_descriptor) = partition_side(&mut *right, &right_attr, num_partitions, "r")?;
        left.close()?;
        right.close()?;
        let mut join = Self {
            left_attr,
            right_attr,
            num_partitions,
            left_descriptor,
            right_descriptor,
            left_paths,
            right_paths,
            current_partition: 0,
            block: Vec::new(),
            index: FxHashMap::default(),
            right_tuples: Vec::new(),
            right_pos: 0,
            current_right: None,
            match_queue: VecDeque::new(),
            out_descriptor,
        };
        join.load_partition(0)?;
        Ok(join)
    }

    fn load_partition(&mut self, i: usize) -> Result<()> {
        self.block.clear();
        self.index.clear();
        let left_schema = Schema { version: 1, attributes: self.left_descriptor.clone() };
        let mut lf = RecordFile::open(&self.left_paths[i], "ghj_partition", Arc::new(ScratchCatalog))?;
        for res in lf.scan(&left_schema) {
            let (_, t) = res?;
            let v = t.get(&self.left_descriptor, &self.left_attr)?;
            if !v.is_null() {
                let idx = self.block.len();
                self.index.entry(payload_bytes(v)).or_default().push(idx);
            }
            self.block.push(t);
        }
        lf.close()?;

        self.right_tuples.clear();
        let right_schema = Schema { version: 1, attributes: self.right_descriptor.clone() };
        let mut rf = RecordFile::open(&self.right_paths[i], "ghj_partition", Arc::new(ScratchCatalog))?;
        for res in rf.scan(&right_schema) {
            let (_, t) = res?;
            self.right_tuples.push(t);
        }
        rf.close()?;
        self.right_pos = 0;
        self.current_right = None;
        Ok(())
    }
}

impl TupleIterator for GraceHashJoin {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(idx) = self.match_queue.pop_front() {
                let lt = self.block[idx].clone();
                let rt = self.current_right.clone().expect("match queue implies a probed right tuple");
                return Ok(Some(concat_tuples(lt, rt)));
            }
            if self.right_pos < self.right_tuples.len() {
                let rt = self.right_tuples[self.right_pos].clone();
                self.right_pos += 1;
                let rv = rt.get(&self.right_descriptor, &self.right_attr)?;
                if !rv.is_null() {
                    if let Some(idxs) = self.index.get(&payload_bytes(rv)) {
                        self.match_queue.extend(idxs.iter().copied());
                    }
                }
                self.current_right = Some(rt);
                continue;
            }
            if self.current_partition + 1 >= self.num_partitions {
                return Ok(None);
            }
            self.current_partition += 1;
            self.load_partition(self.current_partition)?;
        }
    }

    fn attributes(&self) -> &Descriptor {
        &self.out_descriptor
    }
}

impl Drop for GraceHashJoin {
    fn drop(&mut self) {
        for path in self.left_paths.iter().chain(self.right_paths.iter()) {
            let _ = std::fs::remove_file(path);
        }
    }
}
