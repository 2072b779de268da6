//! Reusable write-coalescing buffer

use crate::Result;
use std::io::IoSlice;

/// Growable byte buffer that merges a scatter list into one contiguous write.
///
/// Capacity only grows. Growth frees the old storage before reserving the new
/// size; if the reservation fails the capacity is left at 0.
#[derive(Debug, Default)]
pub struct CoalesceBuffer {
    storage: Vec<u8>,
}

impl CoalesceBuffer {
    /// Empty buffer with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Make room for at least `len` bytes
    pub fn ensure_capacity(&mut self, len: usize) -> Result<()> {
        if self.storage.capacity() >= len {
            return Ok(());
        }
        self.storage = Vec::new();
        self.storage.try_reserve_exact(len)?;
        Ok(())
    }

    /// Copy `bufs` in order into the buffer and return the contiguous bytes
    pub fn coalesce(&mut self, bufs: &[IoSlice<'_>]) -> Result<&[u8]> {
        let total = bufs.iter().map(|b| b.len()).sum();
        self.ensure_capacity(total)?;
        self.storage.clear();
        for buf in bufs {
            self.storage.extend_from_slice(buf);
        }
        Ok(&self.storage)
    }

    /// Bytes from the last [`CoalesceBuffer::coalesce`]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage
    }
}
