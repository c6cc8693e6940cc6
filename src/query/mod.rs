//! Pull-based physical query operators (spec §4.4): table/index scan,
//! filter, project, aggregate (scalar and grouped), and the three physical
//! join operators. Every operator implements [`TupleIterator`], a small
//! `next_tuple`/`attributes` contract modeled on the teacher's
//! `BindingStream` (`src/query/executor.rs`): a boxed trait object so
//! operator trees compose without each concrete type needing to know its
//! children's types.
//!
//! Operators are single-threaded and pull-based (spec §5): calling
//! `next_tuple` may perform synchronous disk I/O through the [`crate::record`]
//! and [`crate::index`] layers beneath them.

mod aggregate;
mod filter;
mod join;
mod project;
mod scan;

pub use aggregate::Aggregate;
pub use filter::{Condition, Filter, Operand};
pub use join::{BlockNestedLoopJoin, GraceHashJoin, IndexNestedLoopJoin};
pub use project::Project;
pub use scan::{IndexScan, TableScan};

use crate::error::{Error, Result};
use crate::types::{AttrType, Descriptor, Tuple};

/// Contract shared by every physical operator (spec §4.4): pull one tuple at
/// a time, describe the shape of the tuples it yields, and release any
/// scratch resources (temp files, open handles) on `close` (spec §5).
/// `rewind` is only meaningful for operators that can restart themselves —
/// table/index scans and the physical joins that reuse them — so it has a
/// failing default rather than being a separate, harder-to-compose trait.
pub trait TupleIterator {
    /// Pull the next tuple, or `Ok(None)` at normal exhaustion (`EOF`).
    fn next_tuple(&mut self) -> Result<Option<Tuple>>;

    /// The descriptor of tuples this operator yields.
    fn attributes(&self) -> &Descriptor;

    /// Release scratch buffers and file handles (spec §5). The default is a
    /// no-op; operators holding their own resources (scratch partition
    /// files, mainly) override it.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Restart this operator from its beginning. Only rewindable sources
    /// (table/index scans) and pass-throughs that simply forward to one
    /// support this; everything else fails, since spec §4.4's join
    /// operators are the only other thing that ever calls it.
    fn rewind(&mut self) -> Result<()> {
        Err(Error::logical("this operator does not support rewind"))
    }
}

pub(crate) fn attr_type_of(descriptor: &Descriptor, name: &str) -> Result<AttrType> {
    descriptor
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.attr_type)
        .ok_or(Error::NotFound("attribute"))
}

/// Build the descriptor `Project` would produce for `names` out of `source`
/// (spec §4.4: "decompose each tuple into per-column slots, then re-assemble
/// tuples containing only the requested columns").
pub(crate) fn project_descriptor(source: &Descriptor, names: &[String]) -> Result<Descriptor> {
    names
        .iter()
        .map(|name| {
            source
                .iter()
                .find(|a| &a.name == name)
                .cloned()
                .ok_or(Error::NotFound("attribute"))
        })
        .collect()
}

/// Project a single tuple down to `names`, recomputing positions against
/// `source` (the child's full descriptor).
pub(crate) fn project_tuple(source: &Descriptor, names: &[String], tuple: &Tuple) -> Result<Tuple> {
    let values = names
        .iter()
        .map(|name| tuple.get(source, name).cloned())
        .collect::<Result<Vec<_>>>()?;
    Ok(Tuple::new(values))
}

/// Concatenate two descriptors (a join's output shape: left columns then
/// right columns, spec §4.4's join operators).
pub(crate) fn concat_descriptors(left: &Descriptor, right: &Descriptor) -> Descriptor {
    let mut out = left.clone();
    out.extend(right.iter().cloned());
    out
}

/// Concatenate two tuples in the same order as [`concat_descriptors`].
pub(crate) fn concat_tuples(left: Tuple, right: Tuple) -> Tuple {
    let mut values = left.values;
    values.extend(right.values);
    Tuple::new(values)
}
