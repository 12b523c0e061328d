//! # Slotted Page Layout
//!
//! Every 8KB page begins with a 24-byte header followed by a slot directory
//! growing upward and a record region growing downward:
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     magic        0x45444247 ("EDBG"), little-endian
//! 4       4     page_id      Page identifier within its table
//! 8       8     lsn          LSN of the last WAL record applied
//! 16      2     slot_count   Slot directory entries (incl. deleted)
//! 18      2     free_space   Accounted free bytes (see invariant)
//! 20      2     data_start   Low-water mark of the record region
//! 22      2     flags        LEAF / INTERNAL / OVERFLOW / DIRTY
//! ```
//!
//! ```text
//! +------------------------+
//! | PageHeader (24 bytes)  |
//! +------------------------+
//! | SlotEntry[0..n]        |  <- grows upward, 4 bytes each
//! +------------------------+
//! | Free Space             |
//! +------------------------+
//! | Record n .. Record 0   |  <- grows downward from page end
//! +------------------------+
//! ```
//!
//! A slot is *deleted* iff its offset is `0xFFFF` (tombstone). Deletion
//! never moves record bytes; reclamation would require page compaction,
//! which this layer does not perform.
//!
//! ## Free-Space Invariant
//!
//! After any successful operation:
//!
//! `free_space + Σ live_record_lengths + slot_count * 4 + 24 == PAGE_SIZE`
//!
//! `free_space` is the accounting value used for admission; the insert path
//! additionally checks that the new record offset cannot collide with the
//! extended slot directory, since tombstoned bytes are not reusable.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` and `SlotEntry` use `zerocopy` little-endian field types so
//! the structures are read and written in place in the page buffer without
//! serialization code.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_HEADER_SIZE, PAGE_MAGIC, PAGE_SIZE, SLOT_ENTRY_SIZE};

pub const FLAG_NONE: u16 = 0x0000;
pub const FLAG_LEAF: u16 = 0x0001;
pub const FLAG_INTERNAL: u16 = 0x0002;
pub const FLAG_OVERFLOW: u16 = 0x0004;
pub const FLAG_DIRTY: u16 = 0x0008;

const TOMBSTONE_OFFSET: u16 = 0xFFFF;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    magic: U32,
    page_id: U32,
    lsn: U64,
    slot_count: U16,
    free_space: U16,
    data_start: U16,
    flags: U16,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn is_valid(&self) -> bool {
        self.magic.get() == PAGE_MAGIC
    }

    pub fn page_id(&self) -> u32 {
        self.page_id.get()
    }

    pub fn lsn(&self) -> u64 {
        self.lsn.get()
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.lsn = U64::new(lsn);
    }

    pub fn slot_count(&self) -> u16 {
        self.slot_count.get()
    }

    pub fn free_space(&self) -> u16 {
        self.free_space.get()
    }

    pub fn data_start(&self) -> u16 {
        self.data_start.get()
    }

    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.get() & FLAG_LEAF != 0
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.get() & FLAG_DIRTY != 0
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        let flags = self.flags.get();
        self.flags = U16::new(if dirty {
            flags | FLAG_DIRTY
        } else {
            flags & !FLAG_DIRTY
        });
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotEntry {
    offset: U16,
    length: U16,
}

const _: () = assert!(std::mem::size_of::<SlotEntry>() == SLOT_ENTRY_SIZE);

impl SlotEntry {
    pub fn offset(&self) -> u16 {
        self.offset.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    pub fn is_empty(&self) -> bool {
        self.offset.get() == 0 && self.length.get() == 0
    }

    pub fn is_deleted(&self) -> bool {
        self.offset.get() == TOMBSTONE_OFFSET
    }

    fn mark_deleted(&mut self) {
        self.offset = U16::new(TOMBSTONE_OFFSET);
        self.length = U16::new(0);
    }
}

/// One 8KB slotted page. The buffer is boxed so page frames can move
/// through the buffer pool without copying 8KB on the stack.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A zeroed page; call [`Page::init`] before use.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE]
                .into_boxed_slice()
                .try_into()
                .expect("PAGE_SIZE boxed slice conversion"), // INVARIANT: vec length == PAGE_SIZE
        }
    }

    /// Builds a page from raw bytes read off disk. The header is not
    /// validated here; callers check [`Page::validate`] after loading.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            bytes.len(),
            PAGE_SIZE
        );
        let mut page = Page::new();
        page.data.copy_from_slice(bytes);
        Ok(page)
    }

    /// Zeroes the page and writes a fresh header.
    pub fn init(&mut self, page_id: u32, flags: u16) {
        self.data.fill(0);
        let header = self.header_mut();
        header.magic = U32::new(PAGE_MAGIC);
        header.page_id = U32::new(page_id);
        header.lsn = U64::new(0);
        header.slot_count = U16::new(0);
        header.free_space = U16::new((PAGE_SIZE - PAGE_HEADER_SIZE) as u16);
        header.data_start = U16::new(PAGE_SIZE as u16);
        header.flags = U16::new(flags);
    }

    pub fn header(&self) -> &PageHeader {
        PageHeader::ref_from_bytes(&self.data[..PAGE_HEADER_SIZE])
            .expect("page header layout") // INVARIANT: buffer is always >= PAGE_HEADER_SIZE and PageHeader is Unaligned
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        PageHeader::mut_from_bytes(&mut self.data[..PAGE_HEADER_SIZE])
            .expect("page header layout") // INVARIANT: buffer is always >= PAGE_HEADER_SIZE and PageHeader is Unaligned
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub fn slot_count(&self) -> u16 {
        self.header().slot_count()
    }

    pub fn free_space(&self) -> u16 {
        self.header().free_space()
    }

    pub fn lsn(&self) -> u64 {
        self.header().lsn()
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.header_mut().set_lsn(lsn);
    }

    fn slot_dir_end(&self) -> usize {
        PAGE_HEADER_SIZE + self.slot_count() as usize * SLOT_ENTRY_SIZE
    }

    fn slot_range(slot: u16) -> std::ops::Range<usize> {
        let start = PAGE_HEADER_SIZE + slot as usize * SLOT_ENTRY_SIZE;
        start..start + SLOT_ENTRY_SIZE
    }

    /// Returns the slot entry, or an error when the index is out of range.
    pub fn slot(&self, slot: u16) -> Result<&SlotEntry> {
        ensure!(
            slot < self.slot_count(),
            "slot {} out of range (page has {} slots)",
            slot,
            self.slot_count()
        );
        SlotEntry::ref_from_bytes(&self.data[Self::slot_range(slot)])
            .map_err(|e| eyre::eyre!("failed to read slot entry {}: {:?}", slot, e))
    }

    fn slot_mut(&mut self, slot: u16) -> Result<&mut SlotEntry> {
        ensure!(
            slot < self.slot_count(),
            "slot {} out of range (page has {} slots)",
            slot,
            self.slot_count()
        );
        SlotEntry::mut_from_bytes(&mut self.data[Self::slot_range(slot)])
            .map_err(|e| eyre::eyre!("failed to read slot entry {}: {:?}", slot, e))
    }

    /// True when `slot` is in range and holds a live record.
    pub fn is_live(&self, slot: u16) -> bool {
        match self.slot(slot) {
            Ok(entry) => !entry.is_empty() && !entry.is_deleted(),
            Err(_) => false,
        }
    }

    /// Returns the record bytes at `slot`; errors for out-of-range, empty
    /// and tombstoned slots.
    pub fn get_record(&self, slot: u16) -> Result<&[u8]> {
        let entry = self.slot(slot)?;
        ensure!(!entry.is_deleted(), "slot {} is deleted", slot);
        ensure!(!entry.is_empty(), "slot {} is empty", slot);

        let start = entry.offset() as usize;
        let end = start + entry.length() as usize;
        ensure!(
            start >= PAGE_HEADER_SIZE && end <= PAGE_SIZE,
            "slot {} record range {}..{} out of page bounds",
            slot,
            start,
            end
        );
        Ok(&self.data[start..end])
    }

    /// True when a record of `length` bytes fits without colliding with the
    /// extended slot directory.
    pub fn can_fit(&self, length: usize) -> bool {
        let header = self.header();
        let needed = length + SLOT_ENTRY_SIZE;
        if (header.free_space() as usize) < needed {
            return false;
        }
        let new_dir_end = self.slot_dir_end() + SLOT_ENTRY_SIZE;
        (header.data_start() as usize)
            .checked_sub(length)
            .is_some_and(|new_start| new_start >= new_dir_end)
    }

    /// Copies `record` into the page and appends a slot entry for it.
    /// Returns the new slot index.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<u16> {
        ensure!(!record.is_empty(), "cannot insert an empty record");
        ensure!(
            record.len() <= u16::MAX as usize,
            "record of {} bytes exceeds the page format limit",
            record.len()
        );
        if !self.can_fit(record.len()) {
            bail!(
                "page {} full: {} bytes free, record needs {} plus a slot entry",
                self.header().page_id(),
                self.free_space(),
                record.len()
            );
        }

        let slot = self.slot_count();
        let new_start = self.header().data_start() as usize - record.len();
        self.data[new_start..new_start + record.len()].copy_from_slice(record);

        let entry_range = Self::slot_range(slot);
        let entry = SlotEntry {
            offset: U16::new(new_start as u16),
            length: U16::new(record.len() as u16),
        };
        self.data[entry_range].copy_from_slice(entry.as_bytes());

        let free = self.free_space() - (record.len() + SLOT_ENTRY_SIZE) as u16;
        let header = self.header_mut();
        header.slot_count = U16::new(slot + 1);
        header.data_start = U16::new(new_start as u16);
        header.free_space = U16::new(free);
        header.set_dirty(true);

        Ok(slot)
    }

    /// Tombstones `slot`. Record bytes stay in place; their length returns
    /// to the free-space account.
    pub fn delete_record(&mut self, slot: u16) -> Result<()> {
        let entry = self.slot(slot)?;
        ensure!(!entry.is_deleted(), "slot {} is already deleted", slot);
        ensure!(!entry.is_empty(), "slot {} is empty", slot);
        let reclaimed = entry.length();

        self.slot_mut(slot)?.mark_deleted();

        let free = self.free_space() + reclaimed;
        let header = self.header_mut();
        header.free_space = U16::new(free);
        header.set_dirty(true);
        Ok(())
    }

    /// Overwrites the record at `slot` in place. The new record must not be
    /// longer than the existing one; shrinking wastes the leftover bytes.
    pub fn update_record(&mut self, slot: u16, record: &[u8]) -> Result<()> {
        let entry = self.slot(slot)?;
        ensure!(!entry.is_deleted(), "slot {} is deleted", slot);
        ensure!(!entry.is_empty(), "slot {} is empty", slot);
        ensure!(!record.is_empty(), "cannot update to an empty record");
        ensure!(
            record.len() <= entry.length() as usize,
            "in-place update of slot {} needs {} bytes but only {} are reserved",
            slot,
            record.len(),
            entry.length()
        );

        let offset = entry.offset() as usize;
        let shrunk = entry.length() - record.len() as u16;
        self.data[offset..offset + record.len()].copy_from_slice(record);

        {
            let entry = self.slot_mut(slot)?;
            entry.length = U16::new(record.len() as u16);
        }

        let free = self.free_space() + shrunk;
        let header = self.header_mut();
        header.free_space = U16::new(free);
        header.set_dirty(true);
        Ok(())
    }

    /// Structural validation. The magic is checked before any other field
    /// is trusted.
    pub fn validate(&self) -> Result<()> {
        let header = self.header();
        ensure!(
            header.is_valid(),
            "bad page magic: {:#010x}",
            header.magic.get()
        );
        ensure!(
            header.data_start() as usize >= self.slot_dir_end(),
            "page {}: record region (data_start {}) overlaps slot directory (end {})",
            header.page_id(),
            header.data_start(),
            self.slot_dir_end()
        );
        ensure!(
            header.data_start() as usize <= PAGE_SIZE,
            "page {}: data_start {} beyond page end",
            header.page_id(),
            header.data_start()
        );
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_bytes(page: &Page) -> usize {
        (0..page.slot_count())
            .filter_map(|s| page.get_record(s).ok())
            .map(|r| r.len())
            .sum()
    }

    fn check_free_space_identity(page: &Page) {
        let accounted = page.free_space() as usize
            + live_bytes(page)
            + page.slot_count() as usize * SLOT_ENTRY_SIZE
            + PAGE_HEADER_SIZE;
        assert_eq!(accounted, PAGE_SIZE, "free-space identity violated");
    }

    #[test]
    fn init_writes_valid_header() {
        let mut page = Page::new();
        page.init(7, FLAG_LEAF);

        let header = page.header();
        assert!(header.is_valid());
        assert_eq!(header.page_id(), 7);
        assert_eq!(header.lsn(), 0);
        assert_eq!(header.slot_count(), 0);
        assert_eq!(header.free_space() as usize, PAGE_SIZE - PAGE_HEADER_SIZE);
        assert_eq!(header.data_start() as usize, PAGE_SIZE);
        assert!(header.is_leaf());
        check_free_space_identity(&page);
    }

    #[test]
    fn insert_and_read_back() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);

        let slot = page.insert_record(b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.get_record(0).unwrap(), b"hello");
        assert!(page.header().is_dirty());
        check_free_space_identity(&page);

        let slot = page.insert_record(b"world!").unwrap();
        assert_eq!(slot, 1);
        assert_eq!(page.get_record(1).unwrap(), b"world!");
        check_free_space_identity(&page);
    }

    #[test]
    fn records_grow_down_directory_grows_up() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);

        page.insert_record(&[1u8; 100]).unwrap();
        page.insert_record(&[2u8; 100]).unwrap();

        let s0 = page.slot(0).unwrap();
        let s1 = page.slot(1).unwrap();
        assert_eq!(s0.offset() as usize, PAGE_SIZE - 100);
        assert_eq!(s1.offset() as usize, PAGE_SIZE - 200);
    }

    #[test]
    fn delete_tombstones_without_moving_bytes() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);

        page.insert_record(b"first").unwrap();
        page.insert_record(b"second").unwrap();
        let free_before = page.free_space();

        page.delete_record(0).unwrap();

        assert!(page.get_record(0).is_err());
        assert!(page.slot(0).unwrap().is_deleted());
        assert_eq!(page.get_record(1).unwrap(), b"second");
        assert_eq!(page.slot_count(), 2);
        assert_eq!(page.free_space(), free_before + 5);
        check_free_space_identity(&page);
    }

    #[test]
    fn double_delete_is_an_error() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);
        page.insert_record(b"x").unwrap();

        page.delete_record(0).unwrap();
        assert!(page.delete_record(0).is_err());
    }

    #[test]
    fn update_in_place_shrinks_but_never_grows() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);
        page.insert_record(b"0123456789").unwrap();

        page.update_record(0, b"abcde").unwrap();
        assert_eq!(page.get_record(0).unwrap(), b"abcde");
        check_free_space_identity(&page);

        assert!(page.update_record(0, b"too long to fit now").is_err());
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);

        let big = vec![0xABu8; 2000];
        let mut inserted = 0;
        while page.can_fit(big.len()) {
            page.insert_record(&big).unwrap();
            inserted += 1;
        }
        assert!(inserted >= 3);
        assert!(page.insert_record(&big).is_err());
        // Small records may still fit.
        check_free_space_identity(&page);
    }

    #[test]
    fn free_space_accounting_is_exact_under_mixed_ops() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);

        for i in 0..20u16 {
            let record = vec![i as u8; 50 + i as usize];
            page.insert_record(&record).unwrap();
        }
        for slot in (0..20).step_by(3) {
            page.delete_record(slot).unwrap();
        }
        page.update_record(1, &[9u8; 10]).unwrap();

        check_free_space_identity(&page);
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);
        page.data_mut()[0] = 0x00;

        let err = page.validate().unwrap_err();
        assert!(err.to_string().contains("bad page magic"));
    }

    #[test]
    fn validate_rejects_directory_overlap() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);
        page.insert_record(b"rec").unwrap();

        // Force data_start below the directory end.
        let header = page.header_mut();
        header.data_start = U16::new(10);

        assert!(page.validate().is_err());
    }

    #[test]
    fn get_record_out_of_range_is_error() {
        let mut page = Page::new();
        page.init(0, FLAG_LEAF);
        assert!(page.get_record(0).is_err());
        assert!(!page.is_live(0));
    }

    #[test]
    fn page_round_trips_through_bytes() {
        let mut page = Page::new();
        page.init(3, FLAG_LEAF);
        page.insert_record(b"persist me").unwrap();
        page.set_lsn(42);

        let restored = Page::from_bytes(page.data().as_slice()).unwrap();
        restored.validate().unwrap();
        assert_eq!(restored.header().page_id(), 3);
        assert_eq!(restored.lsn(), 42);
        assert_eq!(restored.get_record(0).unwrap(), b"persist me");
    }
}
