//! Indirect lookup tables
//!
//! The id, export, fragment, and xattr-id tables share one layout: an array
//! of 64-bit metablock pointers mapped directly from the image, followed by
//! fixed-stride entries packed into the pointed-at metablocks.

use std::io::Cursor;
use std::marker::PhantomData;

use deku::prelude::*;
use deku::reader::Reader;
use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::mapper::MapView;
use crate::metablock::{self, METADATA_MAXSIZE};

pub(crate) struct Table<T> {
    element_size: usize,
    element_count: usize,
    lookup: MapView,
    _marker: PhantomData<T>,
}

impl<T> Table<T>
where
    T: for<'a> DekuReader<'a, deku::ctx::Endian>,
{
    /// Map the pointer array at `start` for `element_count` entries of
    /// `element_size` bytes each
    pub(crate) fn new(
        archive: &Archive,
        start: u64,
        element_size: usize,
        element_count: usize,
    ) -> Result<Self, SquashfsError> {
        let table_size = element_size
            .checked_mul(element_count)
            .ok_or(SquashfsError::IntegerOverflow)?;
        let lookup_count = table_size.div_ceil(METADATA_MAXSIZE);
        let lookup_size = lookup_count
            .checked_mul(std::mem::size_of::<u64>())
            .ok_or(SquashfsError::IntegerOverflow)?;
        trace!(start, element_size, element_count, "table init");

        let lookup = archive.mapper().map(start, lookup_size)?;
        Ok(Self { element_size, element_count, lookup, _marker: PhantomData })
    }

    pub(crate) fn element_count(&self) -> usize {
        self.element_count
    }

    pub(crate) fn get(&self, archive: &Archive, index: usize) -> Result<T, SquashfsError> {
        if index >= self.element_count {
            return Err(SquashfsError::SeekOutOfRange);
        }
        let byte_index = index * self.element_size;
        let lookup_index = byte_index / METADATA_MAXSIZE;
        let element_offset = byte_index % METADATA_MAXSIZE;

        let pointer_bytes = &self.lookup.data()[lookup_index * 8..lookup_index * 8 + 8];
        let address = u64::from_le_bytes(pointer_bytes.try_into().unwrap());

        let (block, _) = metablock::read_block(archive, address, u64::MAX)?;
        let element = block
            .get(element_offset..element_offset + self.element_size)
            .ok_or(SquashfsError::Internal)?;

        let mut cursor = Cursor::new(element);
        let mut reader = Reader::new(&mut cursor);
        Ok(T::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?)
    }
}
