//! Shared scalar types: attribute descriptors, runtime values, record ids,
//! and the composite B+tree key. Grounded on the teacher's `src/model.rs`
//! pattern of small `Copy` identifier newtypes plus a tagged value sum type
//! (design note in base spec §9: "Dynamic dispatch / runtime type").

use std::cmp::Ordering;
use std::convert::TryInto;

use crate::error::{Error, Result};

/// Zero-based page number within a file. Kept as `i32` (not `u32`) because the
/// spec's own wire format stores it that way (RID's `page_num:i32`, B+tree
/// internal `child_ptr:4B`, forwarder payload `new_page:4B`) and because
/// `i32::MAX` is the reserved sentinel for "no sibling" / "no root".
pub type PageNum = i32;

/// Slot index within a record page, `u16` per spec (RID's `slot_num:u16`).
pub type SlotNum = u16;

/// Sentinel meaning "no page" / "empty tree root" / "inclusive RID bound".
pub const INT_MAX: i32 = i32::MAX;
/// Sentinel meaning "exclusive RID bound" as the slot component.
pub const USHRT_MAX: u16 = u16::MAX;

/// Record id: stable identity of a tuple across in-place updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_num: PageNum,
    pub slot_num: SlotNum,
}

impl Rid {
    pub fn new(page_num: PageNum, slot_num: SlotNum) -> Self {
        Self { page_num, slot_num }
    }

    /// `(INT_MAX, 0)` — matches any record id when comparing values that are
    /// equal; used as the rid component of an *inclusive* scan bound.
    pub const fn inclusive_bound() -> Self {
        Rid {
            page_num: INT_MAX,
            slot_num: 0,
        }
    }

    /// `(INT_MAX, USHRT_MAX)` — strictly greater than any rid with an equal
    /// value; used as the rid component of an *exclusive* scan bound.
    pub const fn exclusive_bound() -> Self {
        Rid {
            page_num: INT_MAX,
            slot_num: USHRT_MAX,
        }
    }
}

impl Ord for Rid {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.page_num, self.slot_num).cmp(&(other.page_num, other.slot_num))
    }
}

impl PartialOrd for Rid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Attribute type tag (spec §3: INT/REAL are 4 bytes, VARCHAR is length-prefixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Real,
    Varchar,
}

/// One column of a table descriptor (spec §6's catalog `attributes_for`).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    /// Declared maximum length in bytes; for VARCHAR this bounds the payload,
    /// for INT/REAL it is always 4 and carried for uniformity with the
    /// catalog's column-metadata shape.
    pub length: u32,
    /// `false` means the attribute is logically dropped (catalog's `valid`
    /// flag, spec §6) — still occupies an offset-table slot in stored form
    /// but is elided from any descriptor-driven presentation.
    pub valid: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.into(),
            attr_type,
            length,
            valid: true,
        }
    }
}

/// Ordered list of attributes describing a tuple's shape, i.e. a schema
/// version (spec §3: "schema version lives in the slot, not the record").
pub type Descriptor = Vec<Attribute>;

/// A runtime attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Real(f32),
    Varchar(Vec<u8>),
}

impl Value {
    pub fn attr_type(&self) -> Option<AttrType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(AttrType::Int),
            Value::Real(_) => Some(AttrType::Real),
            Value::Varchar(_) => Some(AttrType::Varchar),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode the value's *payload* bytes (no type tag, no null marker) —
    /// this is the representation stored inline in a physical record or a
    /// B+tree key per spec §3.
    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => {}
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Real(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Varchar(bytes) => {
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    /// Byte length of [`Value::encode_payload`]'s output for a non-null value
    /// of the given type.
    pub fn payload_len(attr_type: AttrType, bytes: &[u8]) -> usize {
        match attr_type {
            AttrType::Int | AttrType::Real => 4,
            AttrType::Varchar => 4 + bytes.len(),
        }
    }

    /// Decode a non-null value of `attr_type` from `buf`, which must be
    /// exactly sized to the value's payload.
    pub fn decode_payload(attr_type: AttrType, buf: &[u8]) -> Result<Self> {
        match attr_type {
            AttrType::Int => {
                if buf.len() != 4 {
                    return Err(Error::corruption("int payload must be 4 bytes"));
                }
                Ok(Value::Int(i32::from_le_bytes(buf.try_into().unwrap())))
            }
            AttrType::Real => {
                if buf.len() != 4 {
                    return Err(Error::corruption("real payload must be 4 bytes"));
                }
                Ok(Value::Real(f32::from_le_bytes(buf.try_into().unwrap())))
            }
            AttrType::Varchar => {
                if buf.len() < 4 {
                    return Err(Error::corruption("varchar payload missing length prefix"));
                }
                let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
                if buf.len() != 4 + len {
                    return Err(Error::corruption("varchar payload length mismatch"));
                }
                Ok(Value::Varchar(buf[4..4 + len].to_vec()))
            }
        }
    }

    /// Ordering used by the B+tree's composite key and by comparison
    /// operators. `Null` never equals, and is never ordered against, anything
    /// — callers must treat null comparisons as "predicate is false" (spec
    /// §4.4: "NULLs make the predicate false").
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A tuple's contents, positional per its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Encode in the caller-facing wire form (spec §6): a `ceil(A/8)`-byte
    /// null bitmap (bit `i`, MSB-first within each byte, set means attribute
    /// `i` is null) followed by concatenated non-null values in attribute
    /// order.
    pub fn encode_wire(&self) -> Vec<u8> {
        let bitmap_len = (self.values.len() + 7) / 8;
        let mut out = vec![0u8; bitmap_len];
        for (i, v) in self.values.iter().enumerate() {
            if v.is_null() {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        for v in &self.values {
            v.encode_payload(&mut out);
        }
        out
    }

    /// Decode a wire-form tuple given the descriptor that produced it.
    pub fn decode_wire(descriptor: &Descriptor, buf: &[u8]) -> Result<Self> {
        let bitmap_len = (descriptor.len() + 7) / 8;
        if buf.len() < bitmap_len {
            return Err(Error::corruption("tuple missing null bitmap"));
        }
        let bitmap = &buf[..bitmap_len];
        let mut cursor = bitmap_len;
        let mut values = Vec::with_capacity(descriptor.len());
        for (i, attr) in descriptor.iter().enumerate() {
            let is_null = bitmap[i / 8] & (0x80 >> (i % 8)) != 0;
            if is_null {
                values.push(Value::Null);
                continue;
            }
            let remaining = &buf[cursor..];
            let consumed = match attr.attr_type {
                AttrType::Int | AttrType::Real => 4,
                AttrType::Varchar => {
                    if remaining.len() < 4 {
                        return Err(Error::corruption("varchar value truncated"));
                    }
                    4 + u32::from_le_bytes(remaining[0..4].try_into().unwrap()) as usize
                }
            };
            if remaining.len() < consumed {
                return Err(Error::corruption("tuple value truncated"));
            }
            values.push(Value::decode_payload(attr.attr_type, &remaining[..consumed])?);
            cursor += consumed;
        }
        Ok(Tuple { values })
    }

    pub fn get(&self, descriptor: &Descriptor, name: &str) -> Result<&Value> {
        let idx = descriptor
            .iter()
            .position(|a| a.name == name)
            .ok_or(Error::NotFound("attribute"))?;
        self.values
            .get(idx)
            .ok_or_else(|| Error::corruption("tuple shorter than descriptor"))
    }
}

/// Composite B+tree key: `(typed value, rid)`, ordered primarily by value and
/// tie-broken by rid (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeKey {
    pub value: Value,
    pub rid: Rid,
}

/// What role, if any, a rid with `page_num == INT_MAX` plays as a scan
/// bound (spec §3): a real stored key never carries one of these, they only
/// ever appear in a `CompositeKey` built to describe a range-scan endpoint.
enum BoundKind {
    /// `(INT_MAX, 0)` — "matches any record-id when values are equal".
    Inclusive,
    /// `(INT_MAX, USHRT_MAX)` — "strictly greater than any record-id with
    /// the same value".
    Exclusive,
}

fn bound_kind(rid: Rid) -> Option<BoundKind> {
    if rid.page_num != INT_MAX {
        return None;
    }
    match rid.slot_num {
        0 => Some(BoundKind::Inclusive),
        USHRT_MAX => Some(BoundKind::Exclusive),
        _ => None,
    }
}

impl CompositeKey {
    pub fn new(value: Value, rid: Rid) -> Self {
        Self { value, rid }
    }

    /// Order two composite keys, honoring the rid-sentinel trick a
    /// range-scan bound uses in place of ordinary rid comparison: an
    /// inclusive-bound rid compares equal to any concrete rid sharing its
    /// value, an exclusive-bound rid compares greater than any of them (spec
    /// §3, §4.3). Two concrete rids, or two bounds, fall back to plain
    /// lexicographic `(page_num, slot_num)` order.
    pub fn cmp_same_type(&self, other: &CompositeKey) -> Ordering {
        match self.value.compare(&other.value) {
            Some(Ordering::Equal) | None => {
                match (bound_kind(self.rid), bound_kind(other.rid)) {
                    (Some(BoundKind::Inclusive), None) | (None, Some(BoundKind::Inclusive)) => {
                        Ordering::Equal
                    }
                    (Some(BoundKind::Exclusive), None) => Ordering::Greater,
                    (None, Some(BoundKind::Exclusive)) => Ordering::Less,
                    _ => self.rid.cmp(&other.rid),
                }
            }
            Some(ord) => ord,
        }
    }
}

/// Comparison operator used by filters, scan predicates, and index range
/// bounds (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    /// Identity filter: always true.
    NoOp,
}

impl CompOp {
    /// Evaluate the operator given an `Ordering` between lhs and rhs.
    pub fn apply(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::NoOp => true,
        }
    }
}

/// Aggregate operator (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Count,
    Sum,
    Avg,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> Descriptor {
        vec![
            Attribute::new("a", AttrType::Int, 4),
            Attribute::new("b", AttrType::Varchar, 20),
            Attribute::new("c", AttrType::Real, 4),
        ]
    }

    #[test]
    fn wire_round_trip_with_nulls() {
        let d = desc();
        let t = Tuple::new(vec![
            Value::Int(7),
            Value::Null,
            Value::Real(1.5),
        ]);
        let bytes = t.encode_wire();
        let back = Tuple::decode_wire(&d, &bytes).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn rid_sentinels_order_above_concrete_rids() {
        let concrete = Rid::new(3, 9);
        assert!(concrete < Rid::inclusive_bound());
        assert!(Rid::inclusive_bound() < Rid::exclusive_bound());
    }

    #[test]
    fn composite_key_orders_by_value_then_rid() {
        let a = CompositeKey::new(Value::Int(1), Rid::new(0, 2));
        let b = CompositeKey::new(Value::Int(1), Rid::new(0, 3));
        let c = CompositeKey::new(Value::Int(2), Rid::new(0, 0));
        assert_eq!(a.cmp_same_type(&b), Ordering::Less);
        assert_eq!(b.cmp_same_type(&c), Ordering::Less);
    }

    #[test]
    fn inclusive_bound_ties_with_any_concrete_rid_of_equal_value() {
        let real = CompositeKey::new(Value::Int(5), Rid::new(0, 42));
        let bound = CompositeKey::new(Value::Int(5), Rid::inclusive_bound());
        assert_eq!(real.cmp_same_type(&bound), Ordering::Equal);
        assert_eq!(bound.cmp_same_type(&real), Ordering::Equal);
    }

    #[test]
    fn exclusive_bound_outranks_any_concrete_rid_of_equal_value() {
        let real = CompositeKey::new(Value::Int(5), Rid::new(0, 42));
        let bound = CompositeKey::new(Value::Int(5), Rid::exclusive_bound());
        assert_eq!(real.cmp_same_type(&bound), Ordering::Less);
        assert_eq!(bound.cmp_same_type(&real), Ordering::Greater);
    }
}
