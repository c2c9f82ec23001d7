use std::fmt;
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::cache::SharedCache;
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::pager::PagedFile;

/// Bytes reserved for a record value, terminating NUL included.
pub const MAX_VALUE_LENGTH: usize = 100;

const COUNT_SIZE: usize = 4;
const KEY_SIZE: usize = 8;
const SLOT_SIZE: usize = KEY_SIZE + MAX_VALUE_LENGTH;

pub const RECORDS_PER_PAGE: u32 = ((PAGE_SIZE - COUNT_SIZE) / SLOT_SIZE) as u32;

/// Location of a record in a table file. Ordered by page, then slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub pid: PageId,
    pub sid: u32,
}

impl RecordId {
    pub fn new(pid: PageId, sid: u32) -> Self {
        RecordId { pid, sid }
    }

    /// The slot after this one, moving to the next page at the end of a page.
    pub fn next(self) -> Self {
        if self.sid + 1 >= RECORDS_PER_PAGE {
            RecordId { pid: self.pid + 1, sid: 0 }
        } else {
            RecordId { pid: self.pid, sid: self.sid + 1 }
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pid, self.sid)
    }
}

/// Append-only file of `(key, value)` records.
///
/// Every page starts with its record count, followed by fixed-size slots of a
/// u64 key and a NUL-terminated value of at most `MAX_VALUE_LENGTH - 1` bytes.
pub struct TableFile {
    file: PagedFile,
    end_rid: RecordId,
}

impl TableFile {
    pub fn open(path: impl AsRef<Path>, mode: char, cache: SharedCache) -> DbResult<Self> {
        let file = PagedFile::open(path, mode, cache)?;

        let mut end_rid = RecordId::default();
        if file.end_pid() > 0 {
            let last = file.end_pid() - 1;
            let mut page = Page::new();
            file.read(last, &mut page)?;
            let count = page.read_u32(0)?;
            end_rid = if count >= RECORDS_PER_PAGE {
                RecordId::new(last + 1, 0)
            } else {
                RecordId::new(last, count)
            };
        }
        debug!("table opened, end rid {}", end_rid);

        Ok(TableFile { file, end_rid })
    }

    pub fn close(&mut self) -> DbResult<()> {
        self.end_rid = RecordId::default();
        self.file.close()
    }

    /// Read the record stored at `rid`.
    pub fn read(&self, rid: RecordId) -> DbResult<(u64, String)> {
        if rid.sid >= RECORDS_PER_PAGE || rid >= self.end_rid {
            return Err(DbError::InvalidRecordId(rid));
        }
        let mut page = Page::new();
        self.file.read(rid.pid, &mut page)?;
        read_slot(&page, rid.sid)
    }

    /// Append a record after the last one and return where it landed.
    pub fn append(&mut self, key: u64, value: &str) -> DbResult<RecordId> {
        let rid = self.end_rid;
        let mut page = Page::new();
        // a fresh page needs no read
        if rid.sid > 0 {
            self.file.read(rid.pid, &mut page)?;
        }

        write_slot(&mut page, rid.sid, key, value)?;
        page.write_u32(0, rid.sid + 1)?;
        self.file.write(rid.pid, &page)?;

        self.end_rid = rid.next();
        Ok(rid)
    }

    /// One past the last record; the last record is at `end_rid() - 1`.
    pub fn end_rid(&self) -> RecordId {
        self.end_rid
    }

    pub fn record_count(&self) -> u64 {
        self.end_rid.pid as u64 * RECORDS_PER_PAGE as u64 + self.end_rid.sid as u64
    }
}

fn slot_offset(sid: u32) -> usize {
    COUNT_SIZE + SLOT_SIZE * sid as usize
}

fn read_slot(page: &Page, sid: u32) -> DbResult<(u64, String)> {
    let offset = slot_offset(sid);
    let key = page.read_u64(offset)?;
    let raw = page.slice(offset + KEY_SIZE, MAX_VALUE_LENGTH)?;
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok((key, String::from_utf8_lossy(&raw[..len]).into_owned()))
}

fn write_slot(page: &mut Page, sid: u32, key: u64, value: &str) -> DbResult<()> {
    let offset = slot_offset(sid);
    page.write_u64(offset, key)?;

    let value = truncate_value(value);
    let dst = page.slice_mut(offset + KEY_SIZE, MAX_VALUE_LENGTH)?;
    dst.fill(0);
    dst[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

/// Cut `value` to fit a slot, never splitting a UTF-8 sequence.
fn truncate_value(value: &str) -> &str {
    let limit = MAX_VALUE_LENGTH - 1;
    if value.len() <= limit {
        return value;
    }
    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cache::{PageCache, CACHE_CAPACITY};
    use tempfile::tempdir;

    #[test]
    fn records_per_page_matches_layout() {
        assert_eq!(RECORDS_PER_PAGE, 151);
    }

    #[test]
    fn record_id_rolls_over_to_next_page() {
        let last = RecordId::new(2, RECORDS_PER_PAGE - 1);
        assert_eq!(last.next(), RecordId::new(3, 0));
        assert_eq!(RecordId::new(0, 4).next(), RecordId::new(0, 5));
        assert!(RecordId::new(1, 0) > RecordId::new(0, 150));
    }

    #[test]
    fn append_then_read() {
        let dir = tempdir().unwrap();
        let cache = PageCache::shared(CACHE_CAPACITY);
        let mut table = TableFile::open(dir.path().join("t.tbl"), 'w', cache).unwrap();

        let a = table.append(7, "alpha").unwrap();
        let b = table.append(9, "").unwrap();
        assert_eq!(a, RecordId::new(0, 0));
        assert_eq!(b, RecordId::new(0, 1));
        assert_eq!(table.read(a).unwrap(), (7, "alpha".to_string()));
        assert_eq!(table.read(b).unwrap(), (9, String::new()));

        assert!(matches!(
            table.read(RecordId::new(0, 2)),
            Err(DbError::InvalidRecordId(_))
        ));
        assert!(matches!(
            table.read(RecordId::new(0, RECORDS_PER_PAGE)),
            Err(DbError::InvalidRecordId(_))
        ));
    }

    #[test]
    fn long_values_are_truncated() {
        let dir = tempdir().unwrap();
        let cache = PageCache::shared(CACHE_CAPACITY);
        let mut table = TableFile::open(dir.path().join("t.tbl"), 'w', cache).unwrap();

        let long = "x".repeat(250);
        let rid = table.append(1, &long).unwrap();
        let (_, value) = table.read(rid).unwrap();
        assert_eq!(value.len(), MAX_VALUE_LENGTH - 1);

        // 'é' is two bytes; 50 of them cannot be cut at byte 99
        let accented = "é".repeat(50);
        let rid = table.append(2, &accented).unwrap();
        let (_, value) = table.read(rid).unwrap();
        assert_eq!(value, "é".repeat(49));
    }

    #[test]
    fn end_rid_survives_reopen_and_full_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let cache = PageCache::shared(CACHE_CAPACITY);
        {
            let mut table = TableFile::open(&path, 'w', cache.clone()).unwrap();
            for i in 0..RECORDS_PER_PAGE {
                table.append(i as u64, "v").unwrap();
            }
            assert_eq!(table.end_rid(), RecordId::new(1, 0));
        }
        let mut table = TableFile::open(&path, 'w', cache).unwrap();
        assert_eq!(table.end_rid(), RecordId::new(1, 0));
        assert_eq!(table.record_count(), RECORDS_PER_PAGE as u64);

        let rid = table.append(500, "next page").unwrap();
        assert_eq!(rid, RecordId::new(1, 0));
        assert_eq!(table.read(RecordId::new(0, 150)).unwrap().0, 150);
    }
}
