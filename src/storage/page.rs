// ┌─────────────────────────────────────────────────────────────────────────┐
// │ Every file is a dense array of PAGE_SIZE pages, page N at N*PAGE_SIZE.  │
// │ All integers are little-endian. Layouts per file kind:                  │
// │                                                                         │
// │ index page 0     [root_pid i32][height i32][zero padding]               │
// │ leaf node        [count u32][key u64|pid u32|sid u32]*  ... [next u32]  │
// │ non-leaf node    [count u32][first child u32][key u64|child u32]*       │
// │ record page      [count u32][key u64|value 100 bytes, NUL terminated]*  │
// └─────────────────────────────────────────────────────────────────────────┘

use crate::error::{DbError, DbResult};

pub const PAGE_SIZE: usize = 16384;

pub type PageId = u32;

/// One page worth of bytes. Field access goes through the bounds-checked
/// readers and writers below rather than raw offsets into the array.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new() -> Self {
        Page { data: Box::new([0; PAGE_SIZE]) }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn read_u32(&self, offset: usize) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.array_at::<4>(offset)?))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> DbResult<()> {
        self.slice_mut(offset, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_i32(&self, offset: usize) -> DbResult<i32> {
        Ok(i32::from_le_bytes(self.array_at::<4>(offset)?))
    }

    pub fn write_i32(&mut self, offset: usize, value: i32) -> DbResult<()> {
        self.slice_mut(offset, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_u64(&self, offset: usize) -> DbResult<u64> {
        Ok(u64::from_le_bytes(self.array_at::<8>(offset)?))
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) -> DbResult<()> {
        self.slice_mut(offset, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn slice(&self, offset: usize, len: usize) -> DbResult<&[u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or_else(|| out_of_bounds(offset, len))
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> DbResult<&mut [u8]> {
        self.data
            .get_mut(offset..offset + len)
            .ok_or_else(|| out_of_bounds(offset, len))
    }

    fn array_at<const N: usize>(&self, offset: usize) -> DbResult<[u8; N]> {
        let bytes = self.slice(offset, N)?;
        bytes.try_into().map_err(|_| out_of_bounds(offset, N))
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}

fn out_of_bounds(offset: usize, len: usize) -> DbError {
    DbError::InvalidNode(format!(
        "access of {} bytes at offset {} runs past the page end",
        len, offset
    ))
}
