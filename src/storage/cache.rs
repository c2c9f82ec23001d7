use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::storage::page::{Page, PageId};

/// Number of pages held across every open file at once.
pub const CACHE_CAPACITY: usize = 10;

/// Identity of an open `PagedFile` inside the shared cache.
pub type FileId = u64;

pub type SharedCache = Arc<Mutex<PageCache>>;

/// Read cache shared by every paged file of one engine, evicting the least
/// recently used page once full. Writes never live here: the pager writes
/// through to disk and drops the cached copy.
///
/// The disk read/write counters sit behind the same lock as the slots.
pub struct PageCache {
    entries: LruCache<(FileId, PageId), Page>,
    next_file_id: FileId,
    page_reads: u64,
    page_writes: u64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PageCache {
            entries: LruCache::new(capacity),
            next_file_id: 1,
            page_reads: 0,
            page_writes: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedCache {
        Arc::new(Mutex::new(PageCache::new(capacity)))
    }

    /// Hand out a fresh identity for a newly opened file.
    pub fn register_file(&mut self) -> FileId {
        let id = self.next_file_id;
        self.next_file_id += 1;
        id
    }

    /// Look up a page, marking it most recently used on a hit.
    pub fn get(&mut self, file: FileId, pid: PageId) -> Option<&Page> {
        self.entries.get(&(file, pid))
    }

    pub fn insert(&mut self, file: FileId, pid: PageId, page: Page) {
        if let Some(((old_file, old_pid), _)) = self.entries.push((file, pid), page) {
            if (old_file, old_pid) != (file, pid) {
                debug!("cache: evicted page {} of file {}", old_pid, old_file);
            }
        }
    }

    pub fn invalidate(&mut self, file: FileId, pid: PageId) {
        self.entries.pop(&(file, pid));
    }

    /// Drop every cached page that belongs to `file`.
    pub fn invalidate_file(&mut self, file: FileId) {
        let stale: Vec<(FileId, PageId)> = self
            .entries
            .iter()
            .filter(|((owner, _), _)| *owner == file)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            self.entries.pop(&key);
        }
    }

    pub fn record_read(&mut self) {
        self.page_reads += 1;
    }

    pub fn record_write(&mut self) {
        self.page_writes += 1;
    }

    /// Pages read from disk (cache misses) since this cache was created.
    pub fn page_reads(&self) -> u64 {
        self.page_reads
    }

    pub fn page_writes(&self) -> u64 {
        self.page_writes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn contains(&self, file: FileId, pid: PageId) -> bool {
        self.entries.contains(&(file, pid))
    }
}
