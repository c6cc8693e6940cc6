//! Slotted record page layout (spec §3/§4.2).
//!
//! Trailer, addressed from the page end: `rec_end:u16`, `dir_end:u16`,
//! `free_slots:u16`, followed by `N` 8-byte slots `(offset, length, flag,
//! version)`. Records grow from offset 0 upward; slots grow from the tail
//! downward. Grounded on the teacher's `src/storage/btree/page.rs` for the
//! general shape of "parse a fixed trailer, expose a slot directory, hand
//! back byte slices for individual entries" — the byte layout itself is the
//! base spec's own (no prefix compression, no checksums).

use crate::error::{Error, Result};
use crate::pager::PAGE_SIZE;
use crate::types::{PageNum, SlotNum};

/// Sentinel slot offset marking a free (reusable) slot.
pub const DELETED: u16 = 30_000;
/// Sentinel slot flag marking a forwarding tombstone.
pub const UPDATED: u16 = 30_001;
/// Normal, non-forwarding slot flag.
pub const OK: u16 = 0;
/// Minimum stored record length, to always leave room for a 6-byte forwarder.
pub const MIN_RECORD_LEN: usize = 6;

const TRAILER_FIXED_LEN: usize = 6;
const SLOT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
    pub flag: u16,
    pub version: u16,
}

impl Slot {
    pub fn is_deleted(&self) -> bool {
        self.offset == DELETED
    }
    pub fn is_forwarder(&self) -> bool {
        self.flag == UPDATED
    }
}

/// A view over one page's bytes, interpreted as a slotted record page.
pub struct RecordPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> RecordPage<'a> {
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::corruption("record page buffer must be PAGE_SIZE"));
        }
        Ok(Self { buf })
    }

    /// Initialize an empty page's trailer.
    pub fn init(buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let rec_end = 0u16;
        let dir_end = (PAGE_SIZE - TRAILER_FIXED_LEN) as u16;
        let free_slots = 0u16;
        buf[PAGE_SIZE - 6..PAGE_SIZE - 4].copy_from_slice(&free_slots.to_le_bytes());
        buf[PAGE_SIZE - 4..PAGE_SIZE - 2].copy_from_slice(&dir_end.to_le_bytes());
        buf[PAGE_SIZE - 2..PAGE_SIZE].copy_from_slice(&rec_end.to_le_bytes());
    }

    fn read_u16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.buf[off], self.buf[off + 1]])
    }
    fn write_u16(&mut self, off: usize, v: u16) {
        self.buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn rec_end(&self) -> usize {
        self.read_u16(PAGE_SIZE - 2) as usize
    }
    fn set_rec_end(&mut self, v: usize) {
        self.write_u16(PAGE_SIZE - 2, v as u16);
    }
    pub fn dir_end(&self) -> usize {
        self.read_u16(PAGE_SIZE - 4) as usize
    }
    fn set_dir_end(&mut self, v: usize) {
        self.write_u16(PAGE_SIZE - 4, v as u16);
    }
    pub fn free_slots(&self) -> usize {
        self.read_u16(PAGE_SIZE - 6) as usize
    }
    fn set_free_slots(&mut self, v: usize) {
        self.write_u16(PAGE_SIZE - 6, v as u16);
    }

    pub fn slot_count(&self) -> usize {
        (PAGE_SIZE - TRAILER_FIXED_LEN - self.dir_end()) / SLOT_LEN
    }

    fn slot_start(&self, i: usize) -> usize {
        (PAGE_SIZE - TRAILER_FIXED_LEN) - (i + 1) * SLOT_LEN
    }

    pub fn slot(&self, i: usize) -> Result<Slot> {
        if i >= self.slot_count() {
            return Err(Error::logical("slot index out of range"));
        }
        let s = self.slot_start(i);
        Ok(Slot {
            offset: self.read_u16(s),
            length: self.read_u16(s + 2),
            flag: self.read_u16(s + 4),
            version: self.read_u16(s + 6),
        })
    }

    fn set_slot(&mut self, i: usize, slot: Slot) {
        let s = self.slot_start(i);
        self.write_u16(s, slot.offset);
        self.write_u16(s + 2, slot.length);
        self.write_u16(s + 4, slot.flag);
        self.write_u16(s + 6, slot.version);
    }

    /// Raw gap between the record area and the slot array, ignoring whether
    /// a new slot entry would need to be grown.
    fn gap(&self) -> usize {
        self.dir_end().saturating_sub(self.rec_end())
    }

    fn find_reusable_slot(&self) -> Option<usize> {
        if self.free_slots() == 0 {
            return None;
        }
        (0..self.slot_count()).find(|&i| self.slot(i).map(|s| s.is_deleted()).unwrap_or(false))
    }

    /// Whether a record of `len` bytes can be placed on this page.
    pub fn can_fit(&self, len: usize) -> bool {
        if self.find_reusable_slot().is_some() {
            self.gap() >= len
        } else {
            self.gap() >= len + SLOT_LEN
        }
    }

    /// Append (or reuse a deleted slot for) a new record. Returns its slot
    /// index. Caller must have checked [`RecordPage::can_fit`] first.
    pub fn insert_record(&mut self, bytes: &[u8], version: u16) -> Result<SlotNum> {
        let len = bytes.len().max(MIN_RECORD_LEN);
        if !self.can_fit(len) {
            return Err(Error::logical("record does not fit on page"));
        }
        let off = self.rec_end();
        self.buf[off..off + bytes.len()].copy_from_slice(bytes);
        for b in &mut self.buf[off + bytes.len()..off + len] {
            *b = 0;
        }
        self.set_rec_end(off + len);

        if let Some(idx) = self.find_reusable_slot() {
            self.set_slot(
                idx,
                Slot {
                    offset: off as u16,
                    length: len as u16,
                    flag: OK,
                    version,
                },
            );
            self.set_free_slots(self.free_slots() - 1);
            Ok(idx as SlotNum)
        } else {
            let idx = self.slot_count();
            let new_dir_end = self.dir_end() - SLOT_LEN;
            self.set_dir_end(new_dir_end);
            self.set_slot(
                idx,
                Slot {
                    offset: off as u16,
                    length: len as u16,
                    flag: OK,
                    version,
                },
            );
            Ok(idx as SlotNum)
        }
    }

    /// Bytes of the record stored at `slot_idx`, excluding any zero padding
    /// beyond the true encoded length is NOT stripped here — callers that
    /// need the true content length track it themselves (the physical
    /// record format is self-describing via its offset table).
    pub fn record_bytes(&self, slot_idx: usize) -> Result<&[u8]> {
        let slot = self.slot(slot_idx)?;
        if slot.is_deleted() {
            return Err(Error::NotFound("record"));
        }
        let off = slot.offset as usize;
        let len = slot.length as usize;
        if off + len > PAGE_SIZE {
            return Err(Error::corruption("record extends past page"));
        }
        Ok(&self.buf[off..off + len])
    }

    /// Whether the page has at least one live (non-deleted) slot.
    pub fn has_live_records(&self) -> bool {
        (0..self.slot_count()).any(|i| {
            self.slot(i)
                .map(|s| !s.is_deleted())
                .unwrap_or(false)
        })
    }

    /// Whether [`RecordPage::replace_record`] with a payload of `new_data_len`
    /// bytes would succeed, without performing the replacement.
    pub fn can_fit_replace(&self, slot_idx: usize, new_data_len: usize) -> Result<bool> {
        let slot = self.slot(slot_idx)?;
        let new_len = new_data_len.max(MIN_RECORD_LEN);
        let old_len = slot.length as usize;
        Ok(new_len <= old_len || self.gap() >= new_len - old_len)
    }

    /// Replace the record at `slot_idx` with `new_bytes`, shrinking or
    /// growing the record region and shifting every later record's bytes (and
    /// offsets) to close or open the gap. Fails if growing would not fit.
    pub fn replace_record(&mut self, slot_idx: usize, new_bytes: &[u8], new_version: u16) -> Result<()> {
        let slot = self.slot(slot_idx)?;
        let old_off = slot.offset as usize;
        let old_len = slot.length as usize;
        let new_len = new_bytes.len().max(MIN_RECORD_LEN);

        if new_len > old_len && self.gap() < new_len - old_len {
            return Err(Error::logical("replacement does not fit on page"));
        }

        let rec_end = self.rec_end();
        if new_len <= old_len {
            let delta = old_len - new_len;
            self.buf.copy_within(old_off + old_len..rec_end, old_off + new_len);
            self.set_rec_end(rec_end - delta);
            self.shift_offsets_from(old_off + old_len, -(delta as i64));
        } else {
            let delta = new_len - old_len;
            self.buf
                .copy_within(old_off + old_len..rec_end, old_off + new_len);
            self.set_rec_end(rec_end + delta);
            self.shift_offsets_from(old_off + old_len, delta as i64);
        }
        self.buf[old_off..old_off + new_bytes.len()].copy_from_slice(new_bytes);
        for b in &mut self.buf[old_off + new_bytes.len()..old_off + new_len] {
            *b = 0;
        }
        let mut slot = self.slot(slot_idx)?;
        slot.length = new_len as u16;
        slot.version = new_version;
        self.set_slot(slot_idx, slot);
        Ok(())
    }

    /// Mark `slot_idx` deleted, reclaiming its bytes from the record area.
    pub fn delete_record(&mut self, slot_idx: usize) -> Result<()> {
        let slot = self.slot(slot_idx)?;
        if slot.is_deleted() {
            return Err(Error::NotFound("record"));
        }
        let old_off = slot.offset as usize;
        let old_len = slot.length as usize;
        let rec_end = self.rec_end();
        self.buf.copy_within(old_off + old_len..rec_end, old_off);
        self.set_rec_end(rec_end - old_len);
        self.shift_offsets_from(old_off + old_len, -(old_len as i64));
        self.set_slot(
            slot_idx,
            Slot {
                offset: DELETED,
                length: 0,
                flag: OK,
                version: 0,
            },
        );
        self.set_free_slots(self.free_slots() + 1);
        Ok(())
    }

    fn shift_offsets_from(&mut self, threshold: usize, delta: i64) {
        for i in 0..self.slot_count() {
            if let Ok(mut slot) = self.slot(i) {
                if slot.is_deleted() {
                    continue;
                }
                if slot.offset as usize >= threshold {
                    slot.offset = ((slot.offset as i64) + delta) as u16;
                    self.set_slot(i, slot);
                }
            }
        }
    }

    /// Free data-area bytes, for free-space-table accounting.
    pub fn free_bytes(&self) -> usize {
        self.gap()
    }

    /// Directly set a slot's flag/offset/length (used to install or clear a
    /// forwarding tombstone in place without shifting, when the forwarder is
    /// written via [`RecordPage::replace_record`] first).
    pub fn set_slot_flag(&mut self, slot_idx: usize, flag: u16) -> Result<()> {
        let mut slot = self.slot(slot_idx)?;
        slot.flag = flag;
        self.set_slot(slot_idx, slot);
        Ok(())
    }
}
