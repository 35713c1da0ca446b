//! Storage of directories with references to inodes
//!
//! A directory listing is a run of headers, each introducing up to 256
//! entries that share the same inode-table metablock. Entries within a header
//! are sorted by name.

use std::io::Cursor;

use deku::prelude::*;
use deku::reader::Reader;
use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::inode::{InodeId, InodeView};
use crate::metablock::{InodeRef, MetablockStream};

/// Bytes the on-disk listing size overcounts ("." and ".." are not stored)
const DIR_SIZE_BIAS: u32 = 3;

const SIZEOF_DIR_HEADER: usize = 12;
const SIZEOF_DIR_ENTRY: usize = 8;

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DirHeader {
    /// One less than the number of entries following the header. A header
    /// introduces at most 256 entries.
    pub count: u32,
    /// Offset of the metablock holding the entries' inodes, relative to the
    /// inode table start
    pub start: u32,
    /// Base inode number; entries store a signed difference to this
    pub inode_num: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DirEntry {
    /// Offset of the entry's inode inside the decoded metablock named by the
    /// header
    pub offset: u16,
    /// Difference of this inode's number to the header base
    pub inode_offset: i16,
    /// Basic inode type, even when the target inode is extended
    pub t: InodeId,
    /// One less than the size of the entry name
    pub name_size: u16,
    /// Entry name, not null-terminated
    #[deku(count = "*name_size + 1")]
    pub name: Vec<u8>,
}

/// Acceleration index of an extended directory inode
#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DirectoryIndex {
    pub index: u32,
    pub start: u32,
    pub name_size: u32,
    #[deku(count = "*name_size + 1")]
    pub name: Vec<u8>,
}

/// Walk the entries of one directory inode.
///
/// [`advance`](Self::advance) steps to the next entry; the accessors read the
/// current one.
pub struct DirectoryIterator<'a> {
    archive: &'a Archive,
    stream: MetablockStream<'a>,
    /// Listing bytes not yet consumed
    remaining_bytes: u32,
    /// Bytes consumed from the seek position
    consumed: usize,
    header: Option<DirHeader>,
    /// Entries left under the current header
    header_remaining: u32,
    entry: Option<DirEntry>,
}

impl<'a> DirectoryIterator<'a> {
    pub(crate) fn new(archive: &'a Archive, inode: &InodeView<'_>) -> Result<Self, SquashfsError> {
        let (block_index, block_offset, size) = inode.directory_start()?;
        let superblock = archive.superblock();

        let mut stream = MetablockStream::new(archive, superblock.dir_table, superblock.bytes_used);
        stream.seek(u64::from(block_index), usize::from(block_offset));
        trace!(block_index, block_offset, size, "directory listing");

        Ok(Self {
            archive,
            stream,
            remaining_bytes: size.saturating_sub(DIR_SIZE_BIAS),
            consumed: 0,
            header: None,
            header_remaining: 0,
            entry: None,
        })
    }

    /// Parse `size` bytes at the consumed prefix
    fn parse<T>(&mut self, size: usize) -> Result<T, SquashfsError>
    where
        T: for<'b> DekuReader<'b, deku::ctx::Endian>,
    {
        if u32::try_from(size).map_or(true, |size| size > self.remaining_bytes) {
            // listing ends inside a record
            return Err(SquashfsError::Internal);
        }
        self.stream.more(self.consumed + size)?;
        let mut cursor = Cursor::new(&self.stream.data()[self.consumed..]);
        let mut reader = Reader::new(&mut cursor);
        let parsed = T::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)?;
        self.consumed += size;
        self.remaining_bytes -= size as u32;
        Ok(parsed)
    }

    /// Step to the next entry. `Ok(false)` at the end of the listing.
    pub fn advance(&mut self) -> Result<bool, SquashfsError> {
        self.entry = None;
        if self.header_remaining == 0 {
            if self.remaining_bytes == 0 {
                return Ok(false);
            }
            let header: DirHeader = self.parse(SIZEOF_DIR_HEADER)?;
            if header.count >= 256 {
                return Err(SquashfsError::Internal);
            }
            self.header_remaining = header.count + 1;
            self.header = Some(header);
        }

        // fixed part first, the name length lives inside it
        self.stream.more(self.consumed + SIZEOF_DIR_ENTRY)?;
        let name_size = {
            let data = &self.stream.data()[self.consumed..];
            usize::from(u16::from_le_bytes([data[6], data[7]]))
        };
        let entry: DirEntry = self.parse(SIZEOF_DIR_ENTRY + name_size + 1)?;

        self.header_remaining -= 1;
        self.entry = Some(entry);
        Ok(true)
    }

    /// Scan forward for `name`. Within a header the entries are name-sorted,
    /// so a miss can skip the header's remainder; scanning resumes at the
    /// next header, which restarts the comparison baseline.
    pub fn lookup(&mut self, name: &[u8]) -> Result<(), SquashfsError> {
        loop {
            if !self.advance()? {
                return Err(SquashfsError::NoSuchFile);
            }
            let entry_name = self.name();
            if entry_name == name {
                return Ok(());
            }
            if entry_name > name {
                while self.header_remaining > 0 {
                    if !self.advance()? {
                        return Err(SquashfsError::NoSuchFile);
                    }
                }
            }
        }
    }

    fn current(&self) -> &DirEntry {
        self.entry.as_ref().expect("advance() returned true before access")
    }

    /// Name of the current entry, borrowed, not null-terminated
    pub fn name(&self) -> &[u8] {
        &self.current().name
    }

    pub fn name_size(&self) -> usize {
        self.current().name.len()
    }

    /// Basic inode type of the current entry
    pub fn inode_type(&self) -> InodeId {
        self.current().t
    }

    /// Reference to the current entry's inode
    pub fn inode_ref(&self) -> InodeRef {
        let header = self.header.expect("advance() returned true before access");
        InodeRef::new(u64::from(header.start), self.current().offset)
    }

    /// Inode number of the current entry
    pub fn inode_number(&self) -> u32 {
        let header = self.header.expect("advance() returned true before access");
        (i64::from(header.inode_num) + i64::from(self.current().inode_offset)) as u32
    }

    /// Load the current entry's inode
    pub fn load_inode(&self) -> Result<InodeView<'a>, SquashfsError> {
        InodeView::load(self.archive, self.inode_ref())
    }
}
