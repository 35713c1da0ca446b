//! Cursor over a mapper

use crate::error::SquashfsError;
use crate::mapper::{MapView, Mapper};

/// Stateful cursor over a [`Mapper`], bounded by an upper limit.
///
/// The reader holds at most one live view; crossing a mapper block boundary
/// is transparent and may trigger a new `map` call.
pub struct MapReader<'a> {
    mapper: &'a Mapper,
    address: u64,
    upper_limit: u64,
    view: Option<MapView>,
}

impl<'a> MapReader<'a> {
    pub fn new(mapper: &'a Mapper, start: u64, upper_limit: u64) -> Self {
        Self {
            mapper,
            address: start,
            upper_limit: upper_limit.min(mapper.size()),
            view: None,
        }
    }

    /// Move the window start forward by `skip` bytes, then make the next
    /// `want` bytes addressable through [`data`](Self::data).
    pub fn advance(&mut self, skip: u64, want: usize) -> Result<(), SquashfsError> {
        let address = self
            .address
            .checked_add(skip)
            .ok_or(SquashfsError::IntegerOverflow)?;
        let end = address
            .checked_add(want as u64)
            .ok_or(SquashfsError::IntegerOverflow)?;
        if end > self.upper_limit {
            return Err(SquashfsError::SeekOutOfRange);
        }
        self.view = Some(self.mapper.map(address, want)?);
        self.address = address;
        Ok(())
    }

    /// Absolute address of the current window start
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> usize {
        self.view.as_ref().map_or(0, MapView::size)
    }

    pub fn data(&self) -> &[u8] {
        self.view.as_ref().map_or(&[], MapView::data)
    }
}
