use thiserror::Error;
use std::io;

use crate::geo::geohash::GeohashError;
use crate::storage::page::PageId;
use crate::storage::table::RecordId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to open file: {0}")]
    FileOpen(#[source] io::Error),
    #[error("failed to close file")]
    FileClose,
    #[error("failed to seek: {0}")]
    FileSeek(#[source] io::Error),
    #[error("failed to read page: {0}")]
    FileRead(#[source] io::Error),
    #[error("failed to write page: {0}")]
    FileWrite(#[source] io::Error),
    #[error("invalid file mode '{0}'")]
    InvalidFileMode(char),
    #[error("invalid page id {0}")]
    InvalidPageId(PageId),
    #[error("invalid record id {0}")]
    InvalidRecordId(RecordId),
    #[error("node is full")]
    NodeFull,
    #[error("invalid node: {0}")]
    InvalidNode(String),
    #[error("end of tree")]
    EndOfTree,
    #[error("no such record")]
    NoSuchRecord,
    #[error("point not found")]
    NotFound,
    #[error("invalid range: lower-left corner must be below and left of upper-right corner")]
    InvalidRange,
    #[error("node is completely filled with duplicate key {0:#018x}")]
    DuplicatesExhausted(u64),
    #[error("invalid distance bounds")]
    InvalidDistance,
    #[error(transparent)]
    Geohash(#[from] GeohashError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
