use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::cache::{FileId, SharedCache};
use crate::storage::page::{Page, PageId, PAGE_SIZE};

/// How a paged file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    /// Read/write, creating the file when it does not exist.
    Write,
}

impl FileMode {
    /// Accepts `r`/`R` and `w`/`W`.
    pub fn from_char(mode: char) -> DbResult<Self> {
        match mode {
            'r' | 'R' => Ok(FileMode::Read),
            'w' | 'W' => Ok(FileMode::Write),
            other => Err(DbError::InvalidFileMode(other)),
        }
    }
}

/// PagedFile: reads and writes PAGE_SIZE pages of one file. Reads are served
/// through the engine-wide `PageCache`; writes go straight to disk and drop
/// any cached copy of the page.
pub struct PagedFile {
    file: Option<File>,
    id: FileId,

    /// One past the last page id in the file.
    end_pid: PageId,

    cache: SharedCache,
}

impl PagedFile {
    /// Open the file at `path` with mode `'r'` or `'w'`.
    /// `end_pid` is set to floor(file_size / PAGE_SIZE).
    pub fn open(path: impl AsRef<Path>, mode: char, cache: SharedCache) -> DbResult<Self> {
        let mode = FileMode::from_char(mode)?;
        Self::open_with(path, mode, cache)
    }

    pub fn open_with(path: impl AsRef<Path>, mode: FileMode, cache: SharedCache) -> DbResult<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true);
        if mode == FileMode::Write {
            options.write(true).create(true).truncate(false);
        }
        let file = options.open(path).map_err(DbError::FileOpen)?;
        let file_len = file.metadata().map_err(DbError::FileOpen)?.len();
        let end_pid = (file_len / PAGE_SIZE as u64) as PageId;
        let id = cache.lock().register_file();

        debug!(
            "open {} ({:?}): file id {}, {} pages",
            path.display(),
            mode,
            id,
            end_pid
        );

        Ok(PagedFile { file: Some(file), id, end_pid, cache })
    }

    /// Close the file and evict its pages from the shared cache.
    pub fn close(&mut self) -> DbResult<()> {
        if self.file.take().is_none() {
            return Err(DbError::FileClose);
        }
        self.cache.lock().invalidate_file(self.id);
        self.end_pid = 0;
        Ok(())
    }

    /// Copy page `pid` into `page`, from the cache when possible.
    pub fn read(&self, pid: PageId, page: &mut Page) -> DbResult<()> {
        if pid >= self.end_pid {
            return Err(DbError::InvalidPageId(pid));
        }
        let mut file = self.handle().map_err(DbError::FileRead)?;

        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(self.id, pid) {
                page.as_bytes_mut().copy_from_slice(cached.as_bytes());
                return Ok(());
            }
        }

        // the lock is not held across disk I/O
        file.seek(SeekFrom::Start(Self::offset(pid)))
            .map_err(DbError::FileSeek)?;
        file.read_exact(page.as_bytes_mut())
            .map_err(DbError::FileRead)?;

        let mut cache = self.cache.lock();
        cache.insert(self.id, pid, page.clone());
        cache.record_read();
        Ok(())
    }

    /// Write `page` to `pid`. Writing at or past `end_pid` grows the file so
    /// that `end_pid` becomes `pid + 1`.
    pub fn write(&mut self, pid: PageId, page: &Page) -> DbResult<()> {
        let mut file = self.handle().map_err(DbError::FileWrite)?;

        file.seek(SeekFrom::Start(Self::offset(pid)))
            .map_err(DbError::FileSeek)?;
        file.write_all(page.as_bytes()).map_err(DbError::FileWrite)?;
        file.flush().map_err(DbError::FileWrite)?;

        {
            let mut cache = self.cache.lock();
            cache.invalidate(self.id, pid);
            cache.record_write();
        }

        if pid >= self.end_pid {
            self.end_pid = pid + 1;
        }
        Ok(())
    }

    /// One past the last page id; the last page is `end_pid() - 1`.
    pub fn end_pid(&self) -> PageId {
        self.end_pid
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_id(&self) -> FileId {
        self.id
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    fn handle(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file is closed"))
    }

    fn offset(pid: PageId) -> u64 {
        pid as u64 * PAGE_SIZE as u64
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            self.cache.lock().invalidate_file(self.id);
        }
    }
}
