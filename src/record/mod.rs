//! Slotted-page record files (spec §3/§4.2): variable-length tuple storage
//! with stable record ids, in-place updates that degrade to single-hop
//! forwarders, and schema-version translation on read.
//!
//! Grounded on the teacher's `src/storage/heap.rs` for the general shape of
//! "insert tries the last page, falls back to a free-space search, falls
//! back to appending a fresh page" and for keeping the on-disk mutation
//! logic (`try_insert_into_page`/`update_in_place`/`mark_free` equivalents)
//! as small methods on the store rather than inlined at call sites.

pub mod page;

use std::convert::TryInto;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::pager::{PagedFile, PAGE_SIZE, RECORD_FILE_HEADER_PAGES};
use crate::types::{Descriptor, PageNum, Rid, SlotNum, Tuple, Value};

use page::{RecordPage, MIN_RECORD_LEN, UPDATED};

const NULL_POINT: u16 = 8_000;
const FS_ENTRY_LEN: usize = 4;

/// A schema version: the attribute list a tuple was (or should be) encoded
/// against, paired with its catalog version number (spec §6).
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: u16,
    pub attributes: Descriptor,
}

/// Encode a tuple's values into the physical, on-page record format: an
/// `A`-entry offset table (one `u16` end-offset per attribute, `NULL_POINT`
/// for a null) followed by the concatenated non-null payloads. Offsets are
/// measured from the start of the record, including the offset table itself.
fn encode_physical(attrs: &Descriptor, tuple: &Tuple) -> Result<Vec<u8>> {
    if tuple.values.len() != attrs.len() {
        return Err(Error::logical("tuple arity does not match descriptor"));
    }
    let table_len = attrs.len() * 2;
    let mut payload = Vec::new();
    let mut offsets = Vec::with_capacity(attrs.len());
    for v in &tuple.values {
        if v.is_null() {
            offsets.push(NULL_POINT);
        } else {
            v.encode_payload(&mut payload);
            offsets.push((table_len + payload.len()) as u16);
        }
    }
    let mut out = Vec::with_capacity(table_len + payload.len());
    for off in offsets {
        out.extend_from_slice(&off.to_le_bytes());
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

fn attr_span(attrs: &Descriptor, bytes: &[u8], idx: usize) -> Result<Option<(usize, usize)>> {
    let table_len = attrs.len() * 2;
    if bytes.len() < table_len {
        return Err(Error::corruption("record shorter than its offset table"));
    }
    let end = u16::from_le_bytes(bytes[idx * 2..idx * 2 + 2].try_into().unwrap());
    if end == NULL_POINT {
        return Ok(None);
    }
    let start = if idx == 0 {
        table_len
    } else {
        let prev = u16::from_le_bytes(bytes[(idx - 1) * 2..idx * 2].try_into().unwrap());
        if prev == NULL_POINT {
            // Find the closest preceding non-null end offset.
            let mut j = idx;
            loop {
                if j == 0 {
                    break table_len;
                }
                j -= 1;
                let e = u16::from_le_bytes(bytes[j * 2..j * 2 + 2].try_into().unwrap());
                if e != NULL_POINT {
                    break e as usize;
                }
            }
        } else {
            prev as usize
        }
    };
    Ok(Some((start, end as usize)))
}

fn decode_attr(attrs: &Descriptor, bytes: &[u8], idx: usize) -> Result<Value> {
    match attr_span(attrs, bytes, idx)? {
        None => Ok(Value::Null),
        Some((start, end)) => {
            if end > bytes.len() {
                return Err(Error::corruption("record value truncated"));
            }
            Value::decode_payload(attrs[idx].attr_type, &bytes[start..end])
        }
    }
}

fn decode_physical(attrs: &Descriptor, bytes: &[u8]) -> Result<Tuple> {
    let mut values = Vec::with_capacity(attrs.len());
    for idx in 0..attrs.len() {
        values.push(decode_attr(attrs, bytes, idx)?);
    }
    Ok(Tuple::new(values))
}

/// Translate a tuple decoded against `written` into the shape `current`
/// expects: attributes present in both keep their value (matched by name),
/// attributes only in `written` are dropped, attributes only in `current`
/// read as null.
fn translate(written: &Descriptor, current: &Descriptor, tuple: Tuple) -> Tuple {
    let values = current
        .iter()
        .map(|attr| {
            written
                .iter()
                .position(|a| a.name == attr.name)
                .and_then(|i| tuple.values.get(i).cloned())
                .unwrap_or(Value::Null)
        })
        .collect();
    Tuple::new(values)
}

pub struct RecordFile {
    pager: PagedFile,
    catalog: Arc<dyn Catalog>,
    table: String,
    system: bool,
}

impl RecordFile {
    pub fn create(path: &Path, table: impl Into<String>, catalog: Arc<dyn Catalog>) -> Result<Self> {
        let table = table.into();
        let system = catalog.is_system(&table);
        let pager = PagedFile::create(path, RECORD_FILE_HEADER_PAGES)?;
        Ok(Self {
            pager,
            catalog,
            table,
            system,
        })
    }

    pub fn open(path: &Path, table: impl Into<String>, catalog: Arc<dyn Catalog>) -> Result<Self> {
        let table = table.into();
        let system = catalog.is_system(&table);
        let pager = PagedFile::open(path, RECORD_FILE_HEADER_PAGES)?;
        Ok(Self {
            pager,
            catalog,
            table,
            system,
        })
    }

    fn fs_capacity(&self) -> usize {
        self.pager.header_extra().len() / FS_ENTRY_LEN
    }

    fn fs_get(&self, page: PageNum) -> Option<(u16, u16)> {
        let idx = page as usize;
        if idx >= self.fs_capacity() {
            return None;
        }
        let extra = self.pager.header_extra();
        let off = idx * FS_ENTRY_LEN;
        let free_bytes = u16::from_le_bytes(extra[off..off + 2].try_into().unwrap());
        let free_slots = u16::from_le_bytes(extra[off + 2..off + 4].try_into().unwrap());
        Some((free_bytes, free_slots))
    }

    fn fs_set(&mut self, page: PageNum, free_bytes: u16, free_slots: u16) {
        let idx = page as usize;
        if idx >= self.fs_capacity() {
            return;
        }
        let off = idx * FS_ENTRY_LEN;
        let extra = self.pager.header_extra_mut();
        extra[off..off + 2].copy_from_slice(&free_bytes.to_le_bytes());
        extra[off + 2..off + 4].copy_from_slice(&free_slots.to_le_bytes());
    }

    fn refresh_fs_entry(&mut self, page: PageNum, buf: &[u8]) -> Result<()> {
        let mut tmp = buf.to_vec();
        let rp = RecordPage::new(&mut tmp)?;
        let free_bytes = rp.free_bytes().min(u16::MAX as usize) as u16;
        let free_slots = rp.free_slots().min(u16::MAX as usize) as u16;
        self.fs_set(page, free_bytes, free_slots);
        Ok(())
    }

    fn entry_fits(free_bytes: u16, free_slots: u16, len: usize) -> bool {
        if free_slots > 0 {
            free_bytes as usize >= len
        } else {
            free_bytes as usize >= len + 8
        }
    }

    /// Locate a page with room for `len` bytes, consulting the header's
    /// free-space table first and falling back to a linear scan of pages the
    /// table has no room to describe.
    fn find_free_page(&mut self, len: usize) -> Result<Option<PageNum>> {
        let capacity = self.fs_capacity().min(self.pager.num_pages());
        for p in 0..capacity {
            if let Some((fb, fs)) = self.fs_get(p as PageNum) {
                if Self::entry_fits(fb, fs, len) {
                    return Ok(Some(p as PageNum));
                }
            }
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        for p in capacity..self.pager.num_pages() {
            self.pager.read_page(p as PageNum, &mut buf)?;
            let rp = RecordPage::new(&mut buf)?;
            if rp.can_fit(len) {
                return Ok(Some(p as PageNum));
            }
        }
        Ok(None)
    }

    fn new_page_buf() -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        RecordPage::init(&mut buf);
        buf
    }

    fn insert_into(&mut self, page: PageNum, bytes: &[u8], version: u16) -> Result<Rid> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(page, &mut buf)?;
        let slot = {
            let mut rp = RecordPage::new(&mut buf)?;
            rp.insert_record(bytes, version)?
        };
        self.pager.write_page(page, &buf)?;
        self.refresh_fs_entry(page, &buf)?;
        Ok(Rid::new(page, slot))
    }

    fn insert_physical(&mut self, bytes: &[u8], version: u16) -> Result<Rid> {
        let len = bytes.len().max(MIN_RECORD_LEN);
        if self.pager.num_pages() > 0 {
            let last = (self.pager.num_pages() - 1) as PageNum;
            let mut buf = vec![0u8; PAGE_SIZE];
            self.pager.read_page(last, &mut buf)?;
            if RecordPage::new(&mut buf)?.can_fit(len) {
                return self.insert_into(last, bytes, version);
            }
        }
        if let Some(p) = self.find_free_page(len)? {
            return self.insert_into(p, bytes, version);
        }
        let buf = Self::new_page_buf();
        let page = self.pager.append_page(&buf)?;
        self.insert_into(page, bytes, version)
    }

    pub fn insert(&mut self, schema: &Schema, tuple: &Tuple) -> Result<Rid> {
        let mut tuple = tuple.clone();
        if !self.system {
            self.catalog
                .stamp_on_insert(&self.table, &mut tuple, &schema.attributes);
        }
        let bytes = encode_physical(&schema.attributes, &tuple)?;
        let rid = self.insert_physical(&bytes, schema.version)?;
        debug!(table = %self.table, page = rid.page_num, slot = rid.slot_num, "record.insert");
        Ok(rid)
    }

    fn attrs_for_version(&self, version: u16, current: &Schema) -> Result<Descriptor> {
        if version == current.version {
            return Ok(current.attributes.clone());
        }
        if self.system {
            return Ok(current.attributes.clone());
        }
        self.catalog.attributes_for(&self.table, version)
    }

    /// Read the raw physical bytes and write-time version for `rid`,
    /// following at most one forwarder hop.
    fn locate(&mut self, rid: Rid) -> Result<(PageNum, SlotNum, Vec<u8>, u16)> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(rid.page_num, &mut buf)?;
        let slot = RecordPage::new(&mut buf)?.slot(rid.slot_num as usize)?;
        if slot.is_deleted() {
            return Err(Error::NotFound("record"));
        }
        if slot.is_forwarder() {
            let (fp, fs) = {
                let rp = RecordPage::new(&mut buf)?;
                let fwd = rp.record_bytes(rid.slot_num as usize)?;
                decode_forwarder(fwd)
            };
            let mut fbuf = vec![0u8; PAGE_SIZE];
            self.pager.read_page(fp, &mut fbuf)?;
            let fslot = RecordPage::new(&mut fbuf)?.slot(fs as usize)?;
            if fslot.is_deleted() || fslot.is_forwarder() {
                return Err(Error::corruption("forwarder chain longer than one hop"));
            }
            let bytes = RecordPage::new(&mut fbuf)?.record_bytes(fs as usize)?.to_vec();
            return Ok((fp, fs, bytes, fslot.version));
        }
        let bytes = RecordPage::new(&mut buf)?.record_bytes(rid.slot_num as usize)?.to_vec();
        Ok((rid.page_num, rid.slot_num, bytes, slot.version))
    }

    pub fn read(&mut self, schema: &Schema, rid: Rid) -> Result<Tuple> {
        let (_, _, bytes, version) = self.locate(rid)?;
        let written_attrs = self.attrs_for_version(version, schema)?;
        let tuple = decode_physical(&written_attrs, &bytes)?;
        if version == schema.version {
            Ok(tuple)
        } else {
            Ok(translate(&written_attrs, &schema.attributes, tuple))
        }
    }

    pub fn read_attribute(&mut self, schema: &Schema, rid: Rid, name: &str) -> Result<Value> {
        let tuple = self.read(schema, rid)?;
        tuple.get(&schema.attributes, name).cloned()
    }

    pub fn read_attributes(&mut self, schema: &Schema, rid: Rid, names: &[String]) -> Result<Vec<Value>> {
        let tuple = self.read(schema, rid)?;
        names
            .iter()
            .map(|n| tuple.get(&schema.attributes, n).cloned())
            .collect()
    }

    /// Update the tuple at `rid`. Resizes in place when it fits; otherwise
    /// relocates and leaves (or rewrites) a single-hop forwarder, so a chain
    /// never grows past length one.
    pub fn update(&mut self, schema: &Schema, rid: Rid, tuple: &Tuple) -> Result<()> {
        let new_bytes = encode_physical(&schema.attributes, tuple)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(rid.page_num, &mut buf)?;
        let origin_slot = RecordPage::new(&mut buf)?.slot(rid.slot_num as usize)?;
        if origin_slot.is_deleted() {
            return Err(Error::NotFound("record"));
        }

        if !origin_slot.is_forwarder() {
            let fits = RecordPage::new(&mut buf)?.can_fit_replace(rid.slot_num as usize, new_bytes.len())?;
            if fits {
                {
                    let mut rp = RecordPage::new(&mut buf)?;
                    rp.replace_record(rid.slot_num as usize, &new_bytes, schema.version)?;
                }
                self.pager.write_page(rid.page_num, &buf)?;
                self.refresh_fs_entry(rid.page_num, &buf)?;
                return Ok(());
            }
            // Relocate; leave a forwarder behind at the origin.
            let target = self.insert_physical(&new_bytes, schema.version)?;
            let forwarder = encode_forwarder(target.page_num, target.slot_num);
            self.pager.read_page(rid.page_num, &mut buf)?;
            {
                let mut rp = RecordPage::new(&mut buf)?;
                rp.replace_record(rid.slot_num as usize, &forwarder, origin_slot.version)?;
                rp.set_slot_flag(rid.slot_num as usize, UPDATED)?;
            }
            self.pager.write_page(rid.page_num, &buf)?;
            self.refresh_fs_entry(rid.page_num, &buf)?;
            return Ok(());
        }

        // `rid` is already a forwarder: operate on the live copy, and only
        // touch the forwarder itself if the live copy must move again.
        let (fp, fs) = {
            let rp = RecordPage::new(&mut buf)?;
            let fwd = rp.record_bytes(rid.slot_num as usize)?;
            decode_forwarder(fwd)
        };
        let mut fbuf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(fp, &mut fbuf)?;
        let fits = RecordPage::new(&mut fbuf)?.can_fit_replace(fs as usize, new_bytes.len())?;
        if fits {
            {
                let mut rp = RecordPage::new(&mut fbuf)?;
                rp.replace_record(fs as usize, &new_bytes, schema.version)?;
            }
            self.pager.write_page(fp, &fbuf)?;
            self.refresh_fs_entry(fp, &fbuf)?;
            return Ok(());
        }

        let target = self.insert_physical(&new_bytes, schema.version)?;
        self.pager.read_page(fp, &mut fbuf)?;
        {
            let mut rp = RecordPage::new(&mut fbuf)?;
            rp.delete_record(fs as usize)?;
        }
        self.pager.write_page(fp, &fbuf)?;
        self.refresh_fs_entry(fp, &fbuf)?;

        let forwarder = encode_forwarder(target.page_num, target.slot_num);
        self.pager.read_page(rid.page_num, &mut buf)?;
        {
            let mut rp = RecordPage::new(&mut buf)?;
            rp.replace_record(rid.slot_num as usize, &forwarder, origin_slot.version)?;
            rp.set_slot_flag(rid.slot_num as usize, UPDATED)?;
        }
        self.pager.write_page(rid.page_num, &buf)?;
        self.refresh_fs_entry(rid.page_num, &buf)?;
        Ok(())
    }

    pub fn delete(&mut self, rid: Rid) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.pager.read_page(rid.page_num, &mut buf)?;
        let slot = RecordPage::new(&mut buf)?.slot(rid.slot_num as usize)?;
        if slot.is_deleted() {
            return Err(Error::NotFound("record"));
        }
        if slot.is_forwarder() {
            let (fp, fs) = {
                let rp = RecordPage::new(&mut buf)?;
                let fwd = rp.record_bytes(rid.slot_num as usize)?;
                decode_forwarder(fwd)
            };
            let mut fbuf = vec![0u8; PAGE_SIZE];
            self.pager.read_page(fp, &mut fbuf)?;
            {
                let mut rp = RecordPage::new(&mut fbuf)?;
                rp.delete_record(fs as usize)?;
            }
            self.pager.write_page(fp, &fbuf)?;
            self.refresh_fs_entry(fp, &fbuf)?;
        }
        {
            let mut rp = RecordPage::new(&mut buf)?;
            rp.delete_record(rid.slot_num as usize)?;
        }
        self.pager.write_page(rid.page_num, &buf)?;
        self.refresh_fs_entry(rid.page_num, &buf)?;
        Ok(())
    }

    pub fn num_pages(&self) -> usize {
        self.pager.num_pages()
    }

    /// Iterate live (non-forwarder, non-deleted) tuples in `(page, slot)`
    /// order, translating each against `schema` as needed.
    pub fn scan<'a>(&'a mut self, schema: &'a Schema) -> ScanIter<'a> {
        ScanIter {
            file: self,
            schema,
            page: 0,
            slot: 0,
            buf: vec![0u8; PAGE_SIZE],
            loaded_page: -1,
        }
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }
}

fn encode_forwarder(page: PageNum, slot: SlotNum) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&page.to_le_bytes());
    out.extend_from_slice(&slot.to_le_bytes());
    out
}

fn decode_forwarder(bytes: &[u8]) -> (PageNum, SlotNum) {
    let page = PageNum::from_le_bytes(bytes[0..4].try_into().unwrap());
    let slot = SlotNum::from_le_bytes(bytes[4..6].try_into().unwrap());
    (page, slot)
}

/// Streaming iterator over a record file's live tuples.
pub struct ScanIter<'a> {
    file: &'a mut RecordFile,
    schema: &'a Schema,
    page: PageNum,
    slot: SlotNum,
    buf: Vec<u8>,
    loaded_page: PageNum,
}

impl<'a> ScanIter<'a> {
    /// Restart this scan from the first page without giving up the borrow
    /// on the underlying file (used by the block nested-loop join operator
    /// to rewind the smaller side once per left-hand block).
    pub fn rewind(&mut self) {
        self.page = 0;
        self.slot = 0;
        self.loaded_page = -1;
    }
}

impl<'a> Iterator for ScanIter<'a> {
    type Item = Result<(Rid, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page as usize >= self.file.pager.num_pages() {
                return None;
            }
            if self.loaded_page != self.page {
                if let Err(e) = self.file.pager.read_page(self.page, &mut self.buf) {
                    return Some(Err(e));
                }
                self.loaded_page = self.page;
            }
            let rp = match RecordPage::new(&mut self.buf) {
                Ok(rp) => rp,
                Err(e) => return Some(Err(e)),
            };
            if self.slot as usize >= rp.slot_count() {
                self.page += 1;
                self.slot = 0;
                self.loaded_page = -1;
                continue;
            }
            let idx = self.slot as usize;
            self.slot += 1;
            let slot = match rp.slot(idx) {
                Ok(s) => s,
                Err(e) => return Some(Err(e)),
            };
            if slot.is_deleted() || slot.is_forwarder() {
                continue;
            }
            let bytes = match rp.record_bytes(idx) {
                Ok(b) => b.to_vec(),
                Err(e) => return Some(Err(e)),
            };
            let written_attrs = match self.file.attrs_for_version(slot.version, self.schema) {
                Ok(a) => a,
                Err(e) => return Some(Err(e)),
            };
            let tuple = match decode_physical(&written_attrs, &bytes) {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            let tuple = if slot.version == self.schema.version {
                tuple
            } else {
                translate(&written_attrs, &self.schema.attributes, tuple)
            };
            return Some(Ok((Rid::new(self.page, idx as SlotNum), tuple)));
        }
    }
}
