//! Chained 8 KiB metadata units
//!
//! Inode, directory, fragment, id, export, and xattr tables are all stored as
//! chains of metablocks: a 2-byte header (top bit = stored uncompressed,
//! low 15 bits = stored length) followed by the block body. Decoded bodies are
//! always at most 8 KiB and abut with no padding.

use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::mapper::{MapReader, Mapper};

/// Maximum decoded size of a metablock
pub(crate) const METADATA_MAXSIZE: usize = 0x2000;

pub(crate) const SIZEOF_METADATA_HEADER: usize = 2;

const METADATA_UNCOMPRESSED: u16 = 1 << 15;

/// Check is_compressed bit within raw `len`
pub(crate) fn is_compressed(len: u16) -> bool {
    len & METADATA_UNCOMPRESSED == 0
}

/// Get actual length of the block body following `len` from unedited `len`
pub(crate) fn len(len: u16) -> u16 {
    len & !METADATA_UNCOMPRESSED
}

/// Position of a record inside a metablock chain: 48 bits of byte offset to
/// the start of the holding metablock, 16 bits of offset into its decoded
/// body. Distinct from the 32-bit inode number used by the export table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InodeRef(pub u64);

impl InodeRef {
    pub fn new(block: u64, offset: u16) -> Self {
        Self(block << 16 | u64::from(offset))
    }

    /// Byte offset of the metablock, relative to the table start
    pub fn block(self) -> u64 {
        self.0 >> 16
    }

    /// Offset into the decoded metablock body
    pub fn offset(self) -> u16 {
        self.0 as u16
    }
}

/// Walk a metablock chain without decoding the bodies
pub(crate) struct MetablockIterator<'a> {
    reader: MapReader<'a>,
    size: usize,
    compressed: bool,
}

impl<'a> MetablockIterator<'a> {
    pub(crate) fn new(mapper: &'a Mapper, start_address: u64, upper_limit: u64) -> Self {
        Self { reader: MapReader::new(mapper, start_address, upper_limit), size: 0, compressed: false }
    }

    /// Step to the next metablock, leaving its body mapped
    pub(crate) fn advance(&mut self) -> Result<(), SquashfsError> {
        self.reader.advance(self.size as u64, SIZEOF_METADATA_HEADER)?;
        let data = self.reader.data();
        let header = u16::from_le_bytes([data[0], data[1]]);

        let size = usize::from(len(header));
        if size == 0 || size > METADATA_MAXSIZE {
            return Err(SquashfsError::Internal);
        }
        self.size = size;
        self.compressed = is_compressed(header);

        self.reader.advance(SIZEOF_METADATA_HEADER as u64, size)
    }

    /// Stored length of the current body
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Compressed body bytes, not decoded
    pub(crate) fn data(&self) -> &[u8] {
        self.reader.data()
    }

    /// Absolute address of the current body
    pub(crate) fn data_address(&self) -> u64 {
        self.reader.address()
    }

    /// The cursor over the current body, for handing to the extract manager
    pub(crate) fn cursor(&self) -> &MapReader<'a> {
        &self.reader
    }
}

/// Contiguous logical byte stream over a metablock chain.
///
/// `seek` positions to a (metablock, byte) pair; `more` materialises further
/// bytes by decoding metablocks through the archive's extract manager.
/// Consumption is monotonic, there is no rewind.
pub(crate) struct MetablockStream<'a> {
    archive: &'a Archive,
    base_address: u64,
    current_address: u64,
    upper_limit: u64,
    buffer: Vec<u8>,
    buffer_offset: usize,
}

impl<'a> MetablockStream<'a> {
    pub(crate) fn new(archive: &'a Archive, base_address: u64, upper_limit: u64) -> Self {
        Self {
            archive,
            base_address,
            current_address: base_address,
            upper_limit,
            buffer: Vec::new(),
            buffer_offset: 0,
        }
    }

    /// Position to `byte_offset` within the metablock starting `block_offset`
    /// bytes past the base address, discarding anything materialised
    pub(crate) fn seek(&mut self, block_offset: u64, byte_offset: usize) {
        self.current_address = self.base_address + block_offset;
        self.buffer.clear();
        self.buffer_offset = byte_offset;
    }

    pub(crate) fn seek_ref(&mut self, inode_ref: InodeRef) {
        self.seek(inode_ref.block(), usize::from(inode_ref.offset()));
    }

    /// Guarantee `size` decoded bytes are addressable through
    /// [`data`](Self::data), pulling further metablocks as needed
    pub(crate) fn more(&mut self, size: usize) -> Result<(), SquashfsError> {
        let want = self
            .buffer_offset
            .checked_add(size)
            .ok_or(SquashfsError::IntegerOverflow)?;
        while self.buffer.len() < want {
            self.pull()?;
        }
        Ok(())
    }

    /// Decode one metablock onto the end of the buffer
    fn pull(&mut self) -> Result<(), SquashfsError> {
        let (decoded, consumed) = read_block(self.archive, self.current_address, self.upper_limit)?;
        self.buffer.try_reserve(decoded.len())?;
        self.buffer.extend_from_slice(&decoded);
        self.current_address += consumed as u64;
        Ok(())
    }

    /// The materialised bytes from the seek position onward
    pub(crate) fn data(&self) -> &[u8] {
        &self.buffer[self.buffer_offset.min(self.buffer.len())..]
    }

    pub(crate) fn size(&self) -> usize {
        self.data().len()
    }
}

/// Decode the single metablock at `address` through the archive's extract
/// manager. Returns the decoded body and the number of source bytes the block
/// occupies (header included).
pub(crate) fn read_block(
    archive: &Archive,
    address: u64,
    upper_limit: u64,
) -> Result<(crate::extract::ExtractBuffer, usize), SquashfsError> {
    let mut iter = MetablockIterator::new(archive.mapper(), address, upper_limit);
    iter.advance()?;

    let decoded =
        archive
            .extract()
            .uncompress(iter.cursor(), iter.is_compressed(), METADATA_MAXSIZE)?;
    trace!(address, stored = iter.size(), decoded = decoded.len(), "metablock");
    Ok((decoded, SIZEOF_METADATA_HEADER + iter.size()))
}
