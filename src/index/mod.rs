//! On-disk B+tree secondary index (spec §3/§4.3): composite `(value, rid)`
//! keys, split-on-overflow insert, merge-or-lazy-delete-on-underflow delete,
//! and a linked-leaf range cursor that tolerates structural changes made
//! between calls by re-descending from the root instead of trusting a stale
//! sibling pointer.
//!
//! Grounded on the teacher's `src/storage/btree/cursor.rs` for the general
//! shape of a cursor that walks leaves via a sibling chain and re-seeks on
//! invalidation; the split/merge thresholds and the page layout are the
//! base spec's own (no prefix compression, no checksums, no page-level
//! latching beyond single-threaded use).

pub mod cursor;
pub mod node;

use std::cmp::Ordering;

use tracing::debug;

use crate::error::{Error, Result};
use crate::pager::{PagedFile, PAGE_SIZE, INDEX_FILE_HEADER_PAGES};
use crate::types::{AttrType, CompositeKey, PageNum, INT_MAX};

use node::{Node, INTERNAL, LEAF};

pub use cursor::RangeCursor;

const HEADER_ROOT_OFF: usize = 0;
const HEADER_ATTR_TYPE_OFF: usize = 4;

fn attr_type_tag(t: AttrType) -> u8 {
    match t {
        AttrType::Int => 0,
        AttrType::Real => 1,
        AttrType::Varchar => 2,
    }
}
fn attr_type_from_tag(tag: u8) -> Result<AttrType> {
    match tag {
        0 => Ok(AttrType::Int),
        1 => Ok(AttrType::Real),
        2 => Ok(AttrType::Varchar),
        _ => Err(Error::corruption("unknown index attribute type tag")),
    }
}

/// A whole-file B+tree over values of a single attribute type.
pub struct BTree {
    pager: PagedFile,
    attr_type: AttrType,
    /// Bumped on every split/merge so an in-flight range cursor
    /// can tell its cached leaf position might be stale.
    changed: u64,
}

impl BTree {
    pub fn create(path: &std::path::Path, attr_type: AttrType) -> Result<Self> {
        let mut pager = PagedFile::create(path, INDEX_FILE_HEADER_PAGES)?;
        {
            let extra = pager.header_extra_mut();
            extra[HEADER_ROOT_OFF..HEADER_ROOT_OFF + 4].copy_from_slice(&INT_MAX.to_le_bytes());
            extra[HEADER_ATTR_TYPE_OFF] = attr_type_tag(attr_type);
        }
        Ok(Self {
            pager,
            attr_type,
            changed: 0,
        })
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        let pager = PagedFile::open(path, INDEX_FILE_HEADER_PAGES)?;
        let tag = pager.header_extra()[HEADER_ATTR_TYPE_OFF];
        let attr_type = attr_type_from_tag(tag)?;
        Ok(Self {
            pager,
            attr_type,
            changed: 0,
        })
    }

    fn root(&self) -> PageNum {
        let extra = self.pager.header_extra();
        PageNum::from_le_bytes(extra[HEADER_ROOT_OFF..HEADER_ROOT_OFF + 4].try_into().unwrap())
    }

    fn set_root(&mut self, p: PageNum) {
        let extra = self.pager.header_extra_mut();
        extra[HEADER_ROOT_OFF..HEADER_ROOT_OFF + 4].copy_from_slice(&p.to_le_bytes());
    }

    fn read_buf(&mut self, p: PageNum) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(p, &mut buf)?;
        Ok(buf)
    }

    fn write_buf(&mut self, p: PageNum, buf: &[u8]) -> Result<()> {
        self.pager.write_page(p, buf)
    }

    fn alloc_leaf(&mut self) -> Result<PageNum> {
        let mut buf = vec![0u8; PAGE_SIZE];
        Node::init(&mut buf, LEAF, 0);
        let p = self.pager.append_page(&buf)?;
        {
            let mut n = Node::new(&mut buf, self.attr_type)?;
            n.set_page_num(p);
        }
        self.pager.write_page(p, &buf)?;
        Ok(p)
    }

    fn alloc_internal(&mut self) -> Result<PageNum> {
        let mut buf = vec![0u8; PAGE_SIZE];
        Node::init(&mut buf, INTERNAL, 0);
        let p = self.pager.append_page(&buf)?;
        {
            let mut n = Node::new(&mut buf, self.attr_type)?;
            n.set_page_num(p);
        }
        self.pager.write_page(p, &buf)?;
        Ok(p)
    }

    pub fn is_empty(&self) -> bool {
        self.root() == INT_MAX
    }

    // ---- insert ------------------------------------------------------

    pub fn insert(&mut self, key: CompositeKey) -> Result<()> {
        if self.is_empty() {
            let leaf = self.alloc_leaf()?;
            let mut buf = self.read_buf(leaf)?;
            {
                let mut n = Node::new(&mut buf, self.attr_type)?;
                n.insert_leaf(0, &key);
            }
            self.write_buf(leaf, &buf)?;
            self.set_root(leaf);
            return Ok(());
        }
        if let Some((sep, new_right)) = self.insert_rec(self.root(), key)? {
            let new_root = self.alloc_internal()?;
            let mut buf = self.read_buf(new_root)?;
            {
                let mut n = Node::new(&mut buf, self.attr_type)?;
                n.insert_internal(0, self.root(), &sep);
                n.set_rightmost_child(new_right);
            }
            self.write_buf(new_root, &buf)?;
            self.set_root(new_root);
        }
        Ok(())
    }

    fn insert_rec(&mut self, page: PageNum, key: CompositeKey) -> Result<Option<(CompositeKey, PageNum)>> {
        let mut buf = self.read_buf(page)?;
        let is_leaf = Node::new(&mut buf, self.attr_type)?.is_leaf();

        if is_leaf {
            let fits = Node::new(&mut buf, self.attr_type)?.can_fit_leaf(&key);
            if fits {
                let pos = Node::new(&mut buf, self.attr_type)?.lower_bound(&key);
                {
                    let mut n = Node::new(&mut buf, self.attr_type)?;
                    n.insert_leaf(pos, &key);
                }
                self.write_buf(page, &buf)?;
                return Ok(None);
            }
            return self.split_leaf(page, key).map(Some);
        }

        let child = Node::new(&mut buf, self.attr_type)?.child_for(&key);
        let split = self.insert_rec(child, key)?;
        let Some((sep, new_child)) = split else {
            return Ok(None);
        };
        let mut buf = self.read_buf(page)?;
        let fits = Node::new(&mut buf, self.attr_type)?.can_fit_internal(&sep);
        if fits {
            let (pos, was_rightmost) = {
                let n = Node::new(&mut buf, self.attr_type)?;
                let pos = n.lower_bound(&sep);
                (pos, pos == n.entries())
            };
            {
                let mut n = Node::new(&mut buf, self.attr_type)?;
                n.insert_internal(pos, child, &sep);
                if was_rightmost {
                    n.set_rightmost_child(new_child);
                } else {
                    n.set_left_child_at(pos + 1, new_child);
                }
            }
            self.write_buf(page, &buf)?;
            return Ok(None);
        }
        self.split_internal(page, sep, new_child).map(Some)
    }

    fn split_leaf(&mut self, page: PageNum, pending: CompositeKey) -> Result<(CompositeKey, PageNum)> {
        let mut old_buf = self.read_buf(page)?;
        let old_next = {
            let n = Node::new(&mut old_buf, self.attr_type)?;
            n.next_leaf()
        };
        let mut all: Vec<CompositeKey> = {
            let n = Node::new(&mut old_buf, self.attr_type)?;
            (0..n.entries()).map(|i| n.key_at(i)).collect()
        };
        let pos = all.partition_point(|k| k.cmp_same_type(&pending) == Ordering::Less);
        all.insert(pos, pending);
        let mid = all.len() / 2;
        let right_keys = all.split_off(mid);
        let separator = right_keys[0].clone();

        let new_page = self.alloc_leaf()?;
        let mut new_buf = self.read_buf(new_page)?;
        {
            let mut left = Node::new(&mut old_buf, self.attr_type)?;
            left.clear_entries();
            for (i, k) in all.iter().enumerate() {
                left.insert_leaf(i, k);
            }
            left.set_next_leaf(new_page);
        }
        {
            let mut right = Node::new(&mut new_buf, self.attr_type)?;
            right.clear_entries();
            for (i, k) in right_keys.iter().enumerate() {
                right.insert_leaf(i, k);
            }
            right.set_next_leaf(old_next);
        }
        self.write_buf(page, &old_buf)?;
        self.write_buf(new_page, &new_buf)?;
        self.changed += 1;
        debug!(left = page, right = new_page, "btree.split_leaf");
        Ok((separator, new_page))
    }

    fn split_internal(
        &mut self,
        page: PageNum,
        pending_key: CompositeKey,
        pending_right_child: PageNum,
    ) -> Result<(CompositeKey, PageNum)> {
        let mut old_buf = self.read_buf(page)?;
        let (mut keys, mut children) = {
            let n = Node::new(&mut old_buf, self.attr_type)?;
            let keys: Vec<CompositeKey> = (0..n.entries()).map(|i| n.key_at(i)).collect();
            let mut children: Vec<PageNum> = (0..n.entries()).map(|i| n.left_child_at(i)).collect();
            children.push(n.rightmost_child());
            (keys, children)
        };
        let pos = keys.partition_point(|k| k.cmp_same_type(&pending_key) == Ordering::Less);
        keys.insert(pos, pending_key);
        children.insert(pos + 1, pending_right_child);

        let mid = keys.len() / 2;
        let promoted = keys[mid].clone();
        let left_keys = &keys[..mid];
        let left_children = &children[..=mid];
        let right_keys = &keys[mid + 1..];
        let right_children = &children[mid + 1..];

        let new_page = self.alloc_internal()?;
        let mut new_buf = self.read_buf(new_page)?;
        {
            let mut left = Node::new(&mut old_buf, self.attr_type)?;
            left.clear_entries();
            for (i, k) in left_keys.iter().enumerate() {
                left.insert_internal(i, left_children[i], k);
            }
            left.set_rightmost_child(*left_children.last().unwrap());
        }
        {
            let mut right = Node::new(&mut new_buf, self.attr_type)?;
            right.clear_entries();
            for (i, k) in right_keys.iter().enumerate() {
                right.insert_internal(i, right_children[i], k);
            }
            right.set_rightmost_child(*right_children.last().unwrap());
        }
        self.write_buf(page, &old_buf)?;
        self.write_buf(new_page, &new_buf)?;
        self.changed += 1;
        debug!(left = page, right = new_page, "btree.split_internal");
        Ok((promoted, new_page))
    }

    // ---- delete --------------------------------------------------------

    /// Remove the exact `(value, rid)` entry. Not found is not an error at
    /// this layer's callers' discretion; here it surfaces as `NotFound`.
    pub fn delete(&mut self, key: &CompositeKey) -> Result<()> {
        let mut path: Vec<(PageNum, usize)> = Vec::new();
        let mut page = self.root();
        if page == INT_MAX {
            return Err(Error::NotFound("index key"));
        }
        loop {
            let mut buf = self.read_buf(page)?;
            let n = Node::new(&mut buf, self.attr_type)?;
            if n.is_leaf() {
                break;
            }
            let idx = (0..n.entries())
                .find(|&i| key.cmp_same_type(&n.key_at(i)) == Ordering::Less)
                .unwrap_or(n.entries());
            let child = if idx < n.entries() {
                n.left_child_at(idx)
            } else {
                n.rightmost_child()
            };
            path.push((page, idx));
            page = child;
        }

        let mut buf = self.read_buf(page)?;
        let found = {
            let n = Node::new(&mut buf, self.attr_type)?;
            (0..n.entries()).find(|&i| n.key_at(i) == *key)
        };
        let Some(idx) = found else {
            return Err(Error::NotFound("index key"));
        };
        {
            let mut n = Node::new(&mut buf, self.attr_type)?;
            n.remove_entry(idx);
        }
        self.write_buf(page, &buf)?;
        self.changed += 1;

        self.rebalance(page, &mut path)
    }

    fn data_capacity() -> usize {
        // Mirrors node::TRAILER_LEN's effect on the usable data region;
        // kept as a conservative constant here since node.rs doesn't expose
        // its private trailer length.
        PAGE_SIZE - 32
    }

    fn is_underfull(buf: &mut [u8], attr_type: AttrType) -> Result<bool> {
        let n = Node::new(buf, attr_type)?;
        let occupied = Self::data_capacity() - n.free_space();
        Ok(occupied * 2 < Self::data_capacity())
    }

    /// After a delete potentially left `page` below 50% occupancy, try to
    /// merge it into a sibling and propagate the structural change up
    /// `path` as needed, shrinking the tree's height if the root empties.
    /// If no neighbor can absorb it, the node is left under-full (lazy
    /// delete, spec §4.3 step 5).
    fn rebalance(&mut self, page: PageNum, path: &mut Vec<(PageNum, usize)>) -> Result<()> {
        let mut buf = self.read_buf(page)?;
        if !Self::is_underfull(&mut buf, self.attr_type)? {
            return Ok(());
        }
        let Some((parent_page, child_idx)) = path.pop() else {
            // Root: an internal node with no entries left collapses to its
            // remaining rightmost child; a leaf drained to zero entries
            // empties the tree entirely (spec §4.3 step 6: root pointer
            // resets to the sentinel INT_MAX).
            let n = Node::new(&mut buf, self.attr_type)?;
            if n.entries() == 0 {
                if n.is_leaf() {
                    self.set_root(INT_MAX);
                } else {
                    let only_child = n.rightmost_child();
                    self.set_root(only_child);
                }
            }
            return Ok(());
        };

        let mut parent_buf = self.read_buf(parent_page)?;
        let parent_entries = Node::new(&mut parent_buf, self.attr_type)?.entries();
        let has_left = child_idx > 0;
        let has_right = child_idx < parent_entries;

        if has_left {
            let left_page = {
                let n = Node::new(&mut parent_buf, self.attr_type)?;
                if child_idx - 1 < parent_entries {
                    n.left_child_at(child_idx - 1)
                } else {
                    n.rightmost_child()
                }
            };
            if self.try_merge_pair(parent_page, &mut parent_buf, left_page, page, child_idx - 1)? {
                return self.rebalance(parent_page, path);
            }
        }
        if has_right {
            let right_page = {
                let n = Node::new(&mut parent_buf, self.attr_type)?;
                if child_idx < parent_entries {
                    if child_idx + 1 <= parent_entries - 1 {
                        n.left_child_at(child_idx + 1)
                    } else {
                        n.rightmost_child()
                    }
                } else {
                    n.rightmost_child()
                }
            };
            if self.try_merge_pair(parent_page, &mut parent_buf, page, right_page, child_idx)? {
                return self.rebalance(parent_page, path);
            }
        }
        Ok(())
    }

    /// Try to merge the `(left, right)` sibling pair at separator index
    /// `sep_idx` in `parent` into a single page. Per spec §4.3 step 5, a
    /// pair that doesn't fit combined is left alone (*lazy delete*): the
    /// tree stays correct but the drained node remains under-full rather
    /// than being rebalanced by redistributing entries across the pair.
    /// Returns whether the merge happened (and thus the parent lost a
    /// separator and must itself be checked for underflow).
    fn try_merge_pair(
        &mut self,
        parent_page: PageNum,
        parent_buf: &mut Vec<u8>,
        left_page: PageNum,
        right_page: PageNum,
        sep_idx: usize,
    ) -> Result<bool> {
        let mut left_buf = self.read_buf(left_page)?;
        let mut right_buf = self.read_buf(right_page)?;
        let is_leaf = Node::new(&mut left_buf, self.attr_type)?.is_leaf();
        let right_next_leaf = Node::new(&mut right_buf, self.attr_type)?.next_leaf();

        let (left_keys, left_children) = drain(&mut left_buf, self.attr_type)?;
        let (right_keys, right_children) = drain(&mut right_buf, self.attr_type)?;

        // Combine into one logical entry list. For internal nodes the
        // parent's separator key is threaded back in between the two
        // sides; leaves have no such key (the right leaf's first key
        // already serves as its own lower bound).
        let mut keys = left_keys;
        let mut children = left_children;
        if !is_leaf {
            let sep = Node::new(parent_buf, self.attr_type)?.key_at(sep_idx);
            keys.push(sep);
        }
        keys.extend(right_keys);
        children.extend(right_children);

        let combined_len = encoded_len(&keys, is_leaf);
        if combined_len > Self::data_capacity() {
            // Lazy delete: neither neighbor can absorb this node. Leave it
            // under-full; the tree remains correct, only space-suboptimal.
            debug!(left = left_page, right = right_page, "btree.lazy_delete");
            return Ok(false);
        }

        write_node(&mut left_buf, self.attr_type, is_leaf, &keys, &children, right_next_leaf)?;
        self.write_buf(left_page, &left_buf)?;

        let mut n = Node::new(parent_buf, self.attr_type)?;
        n.remove_entry(sep_idx);
        let parent_entries = n.entries();
        if sep_idx >= parent_entries {
            n.set_rightmost_child(left_page);
        } else {
            n.set_left_child_at(sep_idx, left_page);
        }
        self.write_buf(parent_page, parent_buf)?;
        self.changed += 1;
        debug!(left = left_page, right = right_page, "btree.merge");
        Ok(true)
    }

    // ---- scan ------------------------------------------------------

    /// Build a range cursor over `[lower, upper]`. The cursor holds no
    /// borrow of `self` — every call it makes takes the tree as an explicit
    /// argument — so the tree remains free to be mutated between `next()`
    /// calls, which is exactly the condition spec §4.3's re-descend path
    /// exists to handle.
    pub fn range_scan(&self, lower: Option<CompositeKey>, upper: Option<CompositeKey>) -> RangeCursor {
        RangeCursor::new(lower, upper)
    }

    fn leftmost_leaf_for(&mut self, lower: &Option<CompositeKey>) -> Result<(PageNum, usize)> {
        if self.is_empty() {
            return Ok((INT_MAX, 0));
        }
        let mut page = self.root();
        loop {
            let mut buf = self.read_buf(page)?;
            let n = Node::new(&mut buf, self.attr_type)?;
            if n.is_leaf() {
                let idx = match lower {
                    Some(k) => n.lower_bound(k),
                    None => 0,
                };
                return Ok((page, idx));
            }
            page = match lower {
                Some(k) => n.child_for(k),
                None => {
                    if n.entries() == 0 {
                        n.rightmost_child()
                    } else {
                        n.left_child_at(0)
                    }
                }
            };
        }
    }

    /// Test/debug helper: render the whole tree as indented text.
    pub fn debug_dump(&mut self) -> Result<String> {
        let mut out = String::new();
        if self.is_empty() {
            return Ok("<empty>".to_string());
        }
        self.debug_dump_rec(self.root(), 0, &mut out)?;
        Ok(out)
    }

    fn debug_dump_rec(&mut self, page: PageNum, depth: usize, out: &mut String) -> Result<()> {
        let mut buf = self.read_buf(page)?;
        let n = Node::new(&mut buf, self.attr_type)?;
        let indent = "  ".repeat(depth);
        if n.is_leaf() {
            out.push_str(&format!("{indent}leaf#{page}: "));
            for i in 0..n.entries() {
                out.push_str(&format!("{:?} ", n.key_at(i)));
            }
            out.push('\n');
        } else {
            out.push_str(&format!("{indent}internal#{page}:\n"));
            let children: Vec<PageNum> = (0..n.entries()).map(|i| n.left_child_at(i)).collect();
            let keys: Vec<CompositeKey> = (0..n.entries()).map(|i| n.key_at(i)).collect();
            let rightmost = n.rightmost_child();
            drop(n);
            for (c, k) in children.iter().zip(keys.iter()) {
                self.debug_dump_rec(*c, depth + 1, out)?;
                out.push_str(&format!("{}sep: {:?}\n", "  ".repeat(depth + 1), k));
            }
            self.debug_dump_rec(rightmost, depth + 1, out)?;
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }
}

fn drain(buf: &mut [u8], attr_type: AttrType) -> Result<(Vec<CompositeKey>, Vec<PageNum>)> {
    let n = Node::new(buf, attr_type)?;
    let keys: Vec<CompositeKey> = (0..n.entries()).map(|i| n.key_at(i)).collect();
    let children: Vec<PageNum> = if n.is_leaf() {
        Vec::new()
    } else {
        let mut c: Vec<PageNum> = (0..n.entries()).map(|i| n.left_child_at(i)).collect();
        c.push(n.rightmost_child());
        c
    };
    Ok((keys, children))
}

fn encoded_len(keys: &[CompositeKey], is_leaf: bool) -> usize {
    keys.iter()
        .map(|k| {
            let mut payload = Vec::new();
            k.value.encode_payload(&mut payload);
            2 + (if is_leaf { 0 } else { 4 }) + payload.len() + 6
        })
        .sum()
}

fn write_node(
    buf: &mut [u8],
    attr_type: AttrType,
    is_leaf: bool,
    keys: &[CompositeKey],
    children: &[PageNum],
    trailing: PageNum,
) -> Result<()> {
    let page_num = Node::new(buf, attr_type)?.page_num();
    Node::init(buf, if is_leaf { LEAF } else { INTERNAL }, page_num);
    let mut n = Node::new(buf, attr_type)?;
    if is_leaf {
        for (i, k) in keys.iter().enumerate() {
            n.insert_leaf(i, k);
        }
        n.set_next_leaf(trailing);
    } else {
        for (i, k) in keys.iter().enumerate() {
            n.insert_internal(i, children[i], k);
        }
        n.set_rightmost_child(*children.last().unwrap_or(&trailing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rid, Value};
    use tempfile::NamedTempFile;

    fn fresh() -> BTree {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);
        BTree::create(&path, AttrType::Int).unwrap()
    }

    fn k(v: i32, slot: u16) -> CompositeKey {
        CompositeKey::new(Value::Int(v), Rid::new(0, slot))
    }

    #[test]
    fn insert_and_scan_all_in_order() {
        let mut tree = fresh();
        for v in [5, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            tree.insert(k(v, v as u16)).unwrap();
        }
        let mut cursor = tree.range_scan(None, None);
        let mut seen = Vec::new();
        while let Some(key) = cursor.next(&mut tree).unwrap() {
            match key.value {
                Value::Int(v) => seen.push(v),
                _ => unreachable!(),
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn many_inserts_then_deletes_keep_tree_consistent() {
        let mut tree = fresh();
        for v in 0..500 {
            tree.insert(k(v, (v % 1000) as u16)).unwrap();
        }
        for v in (0..500).step_by(2) {
            tree.delete(&k(v, (v % 1000) as u16)).unwrap();
        }
        let mut cursor = tree.range_scan(None, None);
        let mut seen = Vec::new();
        while let Some(key) = cursor.next(&mut tree).unwrap() {
            match key.value {
                Value::Int(v) => seen.push(v),
                _ => unreachable!(),
            }
        }
        let expected: Vec<i32> = (0..500).filter(|v| v % 2 == 1).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn range_scan_respects_bounds() {
        let mut tree = fresh();
        for v in 0..50 {
            tree.insert(k(v, v as u16)).unwrap();
        }
        let lower = CompositeKey::new(Value::Int(10), Rid::inclusive_bound());
        let upper = CompositeKey::new(Value::Int(20), Rid::exclusive_bound());
        let mut cursor = tree.range_scan(Some(lower), Some(upper));
        let mut seen = Vec::new();
        while let Some(key) = cursor.next(&mut tree).unwrap() {
            match key.value {
                Value::Int(v) => seen.push(v),
                _ => unreachable!(),
            }
        }
        assert_eq!(seen, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn deleting_every_entry_empties_the_root() {
        let mut tree = fresh();
        for v in 0..20 {
            tree.insert(k(v, v as u16)).unwrap();
        }
        for v in 0..20 {
            tree.delete(&k(v, v as u16)).unwrap();
        }
        assert!(tree.is_empty());
        let mut cursor = tree.range_scan(None, None);
        assert!(cursor.next(&mut tree).unwrap().is_none());
    }
}
