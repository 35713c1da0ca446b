//! In-memory source

use std::sync::Arc;

use crate::error::SquashfsError;
use crate::mapper::MapView;

/// Source backed by an owned byte buffer
pub struct MemoryMapper {
    data: Arc<Vec<u8>>,
    size: u64,
}

impl MemoryMapper {
    /// `size` bounds the addressable space and may be smaller than the buffer
    pub fn new(data: Vec<u8>, size: u64) -> Self {
        let size = size.min(data.len() as u64);
        Self { data: Arc::new(data), size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn map(&self, offset: u64, len: usize) -> Result<MapView, SquashfsError> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(SquashfsError::IntegerOverflow)?;
        if end > self.size {
            return Err(SquashfsError::SeekOutOfRange);
        }
        Ok(MapView::new(self.data.clone(), offset as usize, len))
    }
}
