//! # Buffer Pool / Page Manager
//!
//! A fixed-capacity cache of pages keyed by `(table_id, page_id)`, with
//! LRU eviction and dirty write-back. Each table is stored in its own file
//! `table_<id>.dat`; pages are read and written positionally at
//! `page_id * PAGE_SIZE`.
//!
//! ## Concurrency
//!
//! One mutex serializes all pool operations. This is acceptable because the
//! transaction coordinator already serializes writers against readers and
//! the hit path is short. Access goes through [`PageGuard`], which holds
//! the pool mutex for its lifetime: a page cannot be evicted while any
//! guard exists, and guards are scoped to a single operator `next` call,
//! so eviction of an in-use page is unreachable by construction.
//!
//! ## Eviction
//!
//! The least-recently-used frame is evicted when the pool is at capacity;
//! a dirty victim is written back first. If the write-back fails the frame
//! is reinstated and the error propagates — the WAL still holds the change,
//! so recovery can reproduce it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};

use crate::config::PAGE_SIZE;

use super::page::{Page, FLAG_LEAF};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table_id: u32,
    pub page_id: u32,
}

impl PageKey {
    pub fn new(table_id: u32, page_id: u32) -> Self {
        Self { table_id, page_id }
    }
}

struct Frame {
    page: Page,
    dirty: bool,
}

struct PagerInner {
    frames: LruCache<PageKey, Frame>,
    files: HashMap<u32, File>,
    next_page_id: HashMap<u32, u32>,
}

pub struct PageManager {
    data_dir: PathBuf,
    max_pages: usize,
    inner: Mutex<PagerInner>,
}

impl PageManager {
    pub fn open(data_dir: impl Into<PathBuf>, max_pages: usize) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .wrap_err_with(|| format!("failed to create data directory {:?}", data_dir))?;

        Ok(Self {
            data_dir,
            max_pages: max_pages.max(1),
            inner: Mutex::new(PagerInner {
                frames: LruCache::unbounded(),
                files: HashMap::new(),
                next_page_id: HashMap::new(),
            }),
        })
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    fn table_path(&self, table_id: u32) -> PathBuf {
        self.data_dir.join(format!("table_{}.dat", table_id))
    }

    /// Returns the table's file handle, opening (and seeding the next page
    /// id from the file length) on first touch.
    fn file_handle<'i>(&self, inner: &'i mut PagerInner, table_id: u32) -> Result<&'i mut File> {
        if !inner.files.contains_key(&table_id) {
            let path = self.table_path(table_id);
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .wrap_err_with(|| format!("failed to open table file {:?}", path))?;

            let pages = (file
                .metadata()
                .wrap_err("failed to stat table file")?
                .len()
                / PAGE_SIZE as u64) as u32;
            inner.next_page_id.entry(table_id).or_insert(pages);
            inner.files.insert(table_id, file);
        }
        Ok(inner
            .files
            .get_mut(&table_id)
            .expect("file handle just inserted")) // INVARIANT: inserted above when absent
    }

    fn read_page_from_disk(
        &self,
        inner: &mut PagerInner,
        key: PageKey,
    ) -> Result<Option<Page>> {
        let file = self.file_handle(inner, key.table_id)?;
        let len = file.metadata().wrap_err("failed to stat table file")?.len();
        let offset = key.page_id as u64 * PAGE_SIZE as u64;
        if offset + PAGE_SIZE as u64 > len {
            return Ok(None);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek to page")?;
        file.read_exact(&mut buf).wrap_err_with(|| {
            format!("failed to read page {} of table {}", key.page_id, key.table_id)
        })?;

        let page = Page::from_bytes(&buf)?;
        page.validate().wrap_err_with(|| {
            format!(
                "corrupt page {} in table {} file",
                key.page_id, key.table_id
            )
        })?;
        Ok(Some(page))
    }

    fn write_page_to_disk(file: &mut File, page_id: u32, page: &Page) -> Result<()> {
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .wrap_err("failed to seek to page")?;
        file.write_all(page.data().as_slice())
            .wrap_err_with(|| format!("failed to write page {}", page_id))
    }

    /// Evicts LRU frames until there is room for one more, writing dirty
    /// victims back first.
    fn evict_for_insert(&self, inner: &mut PagerInner) -> Result<()> {
        while inner.frames.len() >= self.max_pages {
            let Some((key, frame)) = inner.frames.pop_lru() else {
                break;
            };
            if frame.dirty {
                let file = self.file_handle(inner, key.table_id)?;
                if let Err(e) = Self::write_page_to_disk(file, key.page_id, &frame.page) {
                    inner.frames.put(key, frame);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Looks up a page, loading it from the table file on a miss. Returns
    /// `Ok(None)` when the page does not exist on disk — the scan
    /// termination condition.
    pub fn try_page(&self, table_id: u32, page_id: u32) -> Result<Option<PageGuard<'_>>> {
        let mut inner = self.inner.lock();
        let key = PageKey::new(table_id, page_id);

        if inner.frames.get(&key).is_some() {
            return Ok(Some(PageGuard { inner, key }));
        }

        let Some(page) = self.read_page_from_disk(&mut inner, key)? else {
            return Ok(None);
        };
        self.evict_for_insert(&mut inner)?;
        inner.frames.put(key, Frame { page, dirty: false });
        Ok(Some(PageGuard { inner, key }))
    }

    /// Like [`PageManager::try_page`] but missing pages are an error.
    pub fn page(&self, table_id: u32, page_id: u32) -> Result<PageGuard<'_>> {
        self.try_page(table_id, page_id)?.ok_or_else(|| {
            eyre::eyre!("page {} of table {} does not exist", page_id, table_id)
        })
    }

    /// Creates the next page of a table in memory, dirty, at MRU.
    pub fn allocate_page(&self, table_id: u32) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock();
        self.file_handle(&mut inner, table_id)?;

        let next = inner
            .next_page_id
            .get_mut(&table_id)
            .expect("next_page_id seeded by file_handle"); // INVARIANT: file_handle seeds the entry
        let page_id = *next;
        *next += 1;

        self.evict_for_insert(&mut inner)?;

        let mut page = Page::new();
        page.init(page_id, FLAG_LEAF);
        let key = PageKey::new(table_id, page_id);
        inner.frames.put(key, Frame { page, dirty: true });
        Ok(PageGuard { inner, key })
    }

    /// Number of pages the table holds (existing or allocated).
    pub fn table_page_count(&self, table_id: u32) -> Result<u32> {
        let mut inner = self.inner.lock();
        self.file_handle(&mut inner, table_id)?;
        Ok(*inner
            .next_page_id
            .get(&table_id)
            .expect("next_page_id seeded by file_handle")) // INVARIANT: file_handle seeds the entry
    }

    pub fn mark_dirty(&self, table_id: u32, page_id: u32) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.peek_mut(&PageKey::new(table_id, page_id)) {
            frame.dirty = true;
        }
    }

    /// Writes one page back if resident and dirty.
    pub fn flush_page(&self, table_id: u32, page_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let key = PageKey::new(table_id, page_id);

        let Some(frame) = inner.frames.peek_mut(&key) else {
            return Ok(());
        };
        if !frame.dirty {
            return Ok(());
        }
        frame.dirty = false;

        // Re-borrow: the page bytes are copied out so the file handle can
        // be fetched without aliasing the frame.
        let data = frame.page.data().to_vec();
        let file = self.file_handle(&mut inner, table_id)?;
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .wrap_err("failed to seek to page")?;
        file.write_all(&data)
            .wrap_err_with(|| format!("failed to write page {}", page_id))?;
        file.sync_data().wrap_err("failed to sync table file")?;
        Ok(())
    }

    /// Writes every dirty page back and syncs the touched files. Idempotent:
    /// a second call with no intervening mutation writes nothing.
    pub fn flush_all(&self) -> Result<usize> {
        let mut inner = self.inner.lock();

        let mut dirty_keys: Vec<PageKey> = Vec::new();
        for (key, frame) in inner.frames.iter() {
            if frame.dirty {
                dirty_keys.push(*key);
            }
        }

        let mut touched: Vec<u32> = Vec::new();
        for key in &dirty_keys {
            let data = {
                let frame = inner
                    .frames
                    .peek_mut(key)
                    .expect("dirty frame still resident"); // INVARIANT: pool is locked, nothing evicts between the scan and here
                frame.dirty = false;
                frame.page.data().to_vec()
            };
            let file = self.file_handle(&mut inner, key.table_id)?;
            file.seek(SeekFrom::Start(key.page_id as u64 * PAGE_SIZE as u64))
                .wrap_err("failed to seek to page")?;
            file.write_all(&data)
                .wrap_err_with(|| format!("failed to write page {}", key.page_id))?;
            if !touched.contains(&key.table_id) {
                touched.push(key.table_id);
            }
        }

        for table_id in touched {
            let file = self.file_handle(&mut inner, table_id)?;
            file.sync_data().wrap_err("failed to sync table file")?;
        }

        Ok(dirty_keys.len())
    }

    /// Flushes everything and drops all cached state.
    pub fn close(&self) -> Result<()> {
        self.flush_all()?;
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.files.clear();
        inner.next_page_id.clear();
        Ok(())
    }

    /// Pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .count()
    }

    /// Creates an empty table file (no-op if it already exists).
    pub fn create_table_file(&self, table_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        self.file_handle(&mut inner, table_id)?;
        Ok(())
    }

    /// Drops the table's cached pages and removes its file.
    pub fn remove_table_file(&self, table_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();

        let stale: Vec<PageKey> = inner
            .frames
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| k.table_id == table_id)
            .collect();
        for key in stale {
            inner.frames.pop(&key);
        }
        inner.files.remove(&table_id);
        inner.next_page_id.remove(&table_id);

        let path = self.table_path(table_id);
        if path.exists() {
            std::fs::remove_file(&path)
                .wrap_err_with(|| format!("failed to remove table file {:?}", path))?;
        }
        Ok(())
    }
}

/// Pinned access to one resident page. Holds the pool mutex, so the page
/// stays resident (and the pool unchanged) for the guard's lifetime.
pub struct PageGuard<'a> {
    inner: MutexGuard<'a, PagerInner>,
    key: PageKey,
}

impl PageGuard<'_> {
    pub fn key(&self) -> PageKey {
        self.key
    }

    pub fn page_id(&self) -> u32 {
        self.key.page_id
    }

    pub fn page(&self) -> &Page {
        self.inner
            .frames
            .peek(&self.key)
            .map(|f| &f.page)
            .expect("guarded page resident") // INVARIANT: the guard holds the pool lock; nothing can evict the frame
    }

    /// Mutable access; marks the frame dirty.
    pub fn page_mut(&mut self) -> &mut Page {
        let frame = self
            .inner
            .frames
            .peek_mut(&self.key)
            .expect("guarded page resident"); // INVARIANT: the guard holds the pool lock; nothing can evict the frame
        frame.dirty = true;
        &mut frame.page
    }

    pub fn mark_dirty(&mut self) {
        if let Some(frame) = self.inner.frames.peek_mut(&self.key) {
            frame.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_assigns_sequential_page_ids() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 16).unwrap();

        for expected in 0..4u32 {
            let guard = pager.allocate_page(1).unwrap();
            assert_eq!(guard.page_id(), expected);
        }
        assert_eq!(pager.table_page_count(1).unwrap(), 4);
    }

    #[test]
    fn missing_page_reads_as_none() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 16).unwrap();

        assert!(pager.try_page(1, 0).unwrap().is_none());
        pager.allocate_page(1).unwrap();
        assert!(pager.try_page(1, 0).unwrap().is_some());
        assert!(pager.try_page(1, 1).unwrap().is_none());
    }

    #[test]
    fn dirty_pages_survive_flush_and_reload() {
        let dir = tempdir().unwrap();
        {
            let pager = PageManager::open(dir.path(), 16).unwrap();
            let mut guard = pager.allocate_page(1).unwrap();
            guard.page_mut().insert_record(b"durable").unwrap();
            drop(guard);
            pager.flush_all().unwrap();
        }

        let pager = PageManager::open(dir.path(), 16).unwrap();
        let guard = pager.page(1, 0).unwrap();
        assert_eq!(guard.page().get_record(0).unwrap(), b"durable");
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 4).unwrap();

        for _ in 0..10 {
            pager.allocate_page(1).unwrap();
            assert!(pager.page_count() <= 4);
        }
        assert_eq!(pager.table_page_count(1).unwrap(), 10);
    }

    #[test]
    fn eviction_writes_dirty_pages_back() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 2).unwrap();

        for i in 0..5u32 {
            let mut guard = pager.allocate_page(1).unwrap();
            let record = vec![i as u8; 8];
            guard.page_mut().insert_record(&record).unwrap();
        }

        // Pages 0..3 were evicted; they must read back from disk intact.
        for i in 0..5u32 {
            let guard = pager.page(1, i).unwrap();
            assert_eq!(guard.page().get_record(0).unwrap(), vec![i as u8; 8]);
        }
    }

    #[test]
    fn flush_all_is_idempotent() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 16).unwrap();

        let mut guard = pager.allocate_page(1).unwrap();
        guard.page_mut().insert_record(b"x").unwrap();
        drop(guard);

        assert_eq!(pager.flush_all().unwrap(), 1);
        assert_eq!(pager.flush_all().unwrap(), 0);
        assert_eq!(pager.dirty_count(), 0);
    }

    #[test]
    fn corrupt_page_on_disk_is_detected() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 16).unwrap();
        pager.allocate_page(1).unwrap();
        pager.close().unwrap();

        // Smash the magic of page 0.
        let path = dir.path().join("table_1.dat");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = 0;
        std::fs::write(&path, &bytes).unwrap();

        let pager = PageManager::open(dir.path(), 16).unwrap();
        assert!(pager.try_page(1, 0).is_err());
    }

    #[test]
    fn remove_table_file_purges_cache_and_disk() {
        let dir = tempdir().unwrap();
        let pager = PageManager::open(dir.path(), 16).unwrap();
        pager.allocate_page(1).unwrap();
        pager.flush_all().unwrap();

        pager.remove_table_file(1).unwrap();
        assert_eq!(pager.page_count(), 0);
        assert!(!dir.path().join("table_1.dat").exists());
        assert!(pager.try_page(1, 0).unwrap().is_none());
    }

    #[test]
    fn next_page_id_is_seeded_from_file_length() {
        let dir = tempdir().unwrap();
        {
            let pager = PageManager::open(dir.path(), 16).unwrap();
            pager.allocate_page(1).unwrap();
            pager.allocate_page(1).unwrap();
            pager.close().unwrap();
        }

        let pager = PageManager::open(dir.path(), 16).unwrap();
        let guard = pager.allocate_page(1).unwrap();
        assert_eq!(guard.page_id(), 2);
    }
}
