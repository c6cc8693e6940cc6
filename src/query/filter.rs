//! The filter operator (spec §4.4): `lhs_attr <op> rhs`, where `rhs` is
//! either a constant or another attribute of the same tuple. Unlike the
//! original design, a missing attribute name is a hard error here, not a
//! signal to mask the row or end the stream early — the base spec's REDESIGN
//! FLAGS call out silently treating "attribute not found" as EOF as a latent
//! correctness bug, since a genuinely malformed query would then look like
//! it matched nothing instead of failing.

use crate::error::Result;
use crate::types::{CompOp, Descriptor, Tuple, Value};

use super::TupleIterator;

/// The right-hand side of a [`Condition`]: a literal value, or another
/// attribute of the same (post-child) tuple.
#[derive(Debug, Clone)]
pub enum Operand {
    Const(Value),
    Attr(String),
}

/// `lhs <op> rhs`, evaluated against a child descriptor (spec §4.4).
#[derive(Debug, Clone)]
pub struct Condition {
    pub lhs: String,
    pub op: CompOp,
    pub rhs: Operand,
}

impl Condition {
    pub fn new(lhs: impl Into<String>, op: CompOp, rhs: Operand) -> Self {
        Self { lhs: lhs.into(), op, rhs }
    }

    /// `NoOp` is the identity filter and never looks at `descriptor` or
    /// `tuple` at all, so a condition built purely for its `NoOp` case never
    /// fails even against a descriptor missing `lhs`.
    pub fn eval(&self, descriptor: &Descriptor, tuple: &Tuple) -> Result<bool> {
        if matches!(self.op, CompOp::NoOp) {
            return Ok(true);
        }
        let lhs = tuple.get(descriptor, &self.lhs)?;
        let rhs = match &self.rhs {
            Operand::Const(v) => v,
            Operand::Attr(name) => tuple.get(descriptor, name)?,
        };
        if lhs.is_null() || rhs.is_null() {
            return Ok(false);
        }
        Ok(lhs.compare(rhs).map(|ord| self.op.apply(ord)).unwrap_or(false))
    }
}

/// Keeps only the child tuples for which `cond` evaluates true (spec §4.4).
pub struct Filter<'a> {
    child: Box<dyn TupleIterator + 'a>,
    cond: Condition,
}

impl<'a> Filter<'a> {
    pub fn new(child: Box<dyn TupleIterator + 'a>, cond: Condition) -> Self {
        Self { child, cond }
    }
}

impl<'a> TupleIterator for Filter<'a> {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        while let Some(t) = self.child.next_tuple()? {
            if self.cond.eval(self.child.attributes(), &t)? {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn attributes(&self) -> &Descriptor {
        self.child.attributes()
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
    }
}
