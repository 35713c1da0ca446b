//! The 96-byte header at the start of every image

use deku::prelude::*;
use deku::reader::Reader;
use std::io::Cursor;
use tracing::trace;

use crate::compressor::Compressor;
use crate::error::SquashfsError;
use crate::mapper::Mapper;

/// `0xFFFF_FFFF_FFFF_FFFF` marks an absent table in the superblock
pub(crate) const NOT_SET: u64 = 0xffff_ffff_ffff_ffff;

const MAGIC: u32 = 0x7371_7368;

/// 4 KiB
pub const MIN_BLOCK_SIZE: u32 = 0x1000;

/// 1 MiB
pub const MAX_BLOCK_SIZE: u32 = 0x10_0000;

pub(crate) const SIZEOF_SUPERBLOCK: usize = 96;

#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct SuperBlock {
    /// Must be set to 0x73717368 ("hsqs" on disk).
    pub magic: u32,
    /// The number of inodes stored in the archive.
    pub inode_count: u32,
    /// Last modification time of the archive. Count seconds since 00:00, Jan 1st 1970 UTC (not counting leap seconds).
    /// This is unsigned, so it expires in the year 2106 (as opposed to 2038).
    pub mod_time: u32,
    /// The size of a data block in bytes. Must be a power of two between 4096 (4k) and 1048576 (1 MiB).
    pub block_size: u32,
    /// The number of entries in the fragment table.
    pub frag_count: u32,
    /// Compressor used for both metadata and data blocks
    pub compressor: Compressor,
    /// The log2 of the block size. If the two fields do not agree, the archive is considered corrupted.
    pub block_log: u16,
    /// Bit wise OR of the flag bits
    pub flags: u16,
    /// The number of entries in the ID lookup table.
    pub id_count: u16,
    /// Major version of the format. Must be set to 4.
    pub version_major: u16,
    /// Minor version of the format. Must be set to 0.
    pub version_minor: u16,
    /// A reference to the inode of the root directory.
    pub root_inode: u64,
    /// The number of bytes used by the archive.
    /// Because SquashFS archives must be padded to a multiple of the underlying device block size, this can be less than the actual file size.
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

impl SuperBlock {
    /// Read and validate the superblock at offset 0 of `mapper`
    pub(crate) fn read(mapper: &Mapper) -> Result<Self, SquashfsError> {
        let view = mapper
            .map(0, SIZEOF_SUPERBLOCK)
            .map_err(|_| SquashfsError::SuperblockTooSmall)?;

        // check the magic before the typed parse so a foreign image reports
        // WrongMagic instead of a field-level parse error
        if view.data()[0..4] != MAGIC.to_le_bytes() {
            return Err(SquashfsError::WrongMagic);
        }

        let mut cursor = Cursor::new(view.data());
        let mut reader = Reader::new(&mut cursor);
        let superblock = SuperBlock::from_reader_with_ctx(&mut reader, ())?;
        trace!("{superblock:#08x?}");

        if superblock.magic != MAGIC
            || superblock.version_major != 4
            || superblock.version_minor != 0
        {
            return Err(SquashfsError::WrongMagic);
        }
        if !superblock.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&superblock.block_size)
            || u32::from(superblock.block_log) != superblock.block_size.ilog2()
        {
            return Err(SquashfsError::BlocksizeMismatch);
        }
        if superblock.bytes_used > mapper.size() {
            return Err(SquashfsError::SizeMismatch);
        }

        Ok(superblock)
    }

    pub fn inodes_uncompressed(&self) -> bool {
        self.flags & Flags::InodesStoredUncompressed as u16 != 0
    }

    pub fn data_block_stored_uncompressed(&self) -> bool {
        self.flags & Flags::DataBlockStoredUncompressed as u16 != 0
    }

    pub fn fragments_stored_uncompressed(&self) -> bool {
        self.flags & Flags::FragmentsStoredUncompressed as u16 != 0
    }

    pub fn fragments_are_not_used(&self) -> bool {
        self.flags & Flags::FragmentsAreNotUsed as u16 != 0
    }

    pub fn fragments_are_always_generated(&self) -> bool {
        self.flags & Flags::FragmentsAreAlwaysGenerated as u16 != 0
    }

    pub fn data_has_been_duplicated(&self) -> bool {
        self.flags & Flags::DataHasBeenDeduplicated as u16 != 0
    }

    pub fn nfs_export_table_exists(&self) -> bool {
        self.flags & Flags::NFSExportTableExists as u16 != 0
    }

    pub fn xattrs_are_stored_uncompressed(&self) -> bool {
        self.flags & Flags::XattrsAreStoredUncompressed as u16 != 0
    }

    pub fn no_xattrs_in_archive(&self) -> bool {
        self.flags & Flags::NoXattrsInArchive as u16 != 0
    }

    pub fn compressor_options_are_present(&self) -> bool {
        self.flags & Flags::CompressorOptionsArePresent as u16 != 0
    }
}

#[rustfmt::skip]
#[derive(Debug, Copy, Clone)]
pub enum Flags {
    InodesStoredUncompressed    = 0b0000_0000_0000_0001,
    DataBlockStoredUncompressed = 0b0000_0000_0000_0010,
    Unused                      = 0b0000_0000_0000_0100,
    FragmentsStoredUncompressed = 0b0000_0000_0000_1000,
    FragmentsAreNotUsed         = 0b0000_0000_0001_0000,
    FragmentsAreAlwaysGenerated = 0b0000_0000_0010_0000,
    DataHasBeenDeduplicated     = 0b0000_0000_0100_0000,
    NFSExportTableExists        = 0b0000_0000_1000_0000,
    XattrsAreStoredUncompressed = 0b0000_0001_0000_0000,
    NoXattrsInArchive           = 0b0000_0010_0000_0000,
    CompressorOptionsArePresent = 0b0000_0100_0000_0000,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MemoryMapper;

    /// Minimal valid header: gzip, 128 KiB blocks, v4.0
    pub(crate) fn raw_superblock() -> Vec<u8> {
        let mut raw = vec![0u8; SIZEOF_SUPERBLOCK];
        raw[0x00..0x04].copy_from_slice(&MAGIC.to_le_bytes());
        raw[0x0c..0x10].copy_from_slice(&0x20000u32.to_le_bytes()); // block_size
        raw[0x14..0x16].copy_from_slice(&1u16.to_le_bytes()); // gzip
        raw[0x16..0x18].copy_from_slice(&17u16.to_le_bytes()); // block_log
        raw[0x1c..0x1e].copy_from_slice(&4u16.to_le_bytes()); // major
        raw[0x1e..0x20].copy_from_slice(&0u16.to_le_bytes()); // minor
        raw[0x28..0x30].copy_from_slice(&96u64.to_le_bytes()); // bytes_used
        raw
    }

    fn read_raw(raw: Vec<u8>) -> Result<SuperBlock, SquashfsError> {
        let size = raw.len() as u64;
        SuperBlock::read(&Mapper::Memory(MemoryMapper::new(raw, size)))
    }

    #[test]
    fn accepts_valid_header() {
        let superblock = read_raw(raw_superblock()).unwrap();
        assert_eq!(superblock.block_size, 0x20000);
        assert_eq!(superblock.compressor, Compressor::Gzip);
        assert!(!superblock.compressor_options_are_present());
    }

    #[test]
    fn rejects_short_source() {
        let err = read_raw(vec![0u8; 64]);
        assert!(matches!(err, Err(SquashfsError::SuperblockTooSmall)));
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut raw = raw_superblock();
        raw[0] = b'X';
        assert!(matches!(read_raw(raw), Err(SquashfsError::WrongMagic)));
    }

    #[test]
    fn rejects_block_log_disagreement() {
        let mut raw = raw_superblock();
        raw[0x16] = 16;
        assert!(matches!(read_raw(raw), Err(SquashfsError::BlocksizeMismatch)));
    }

    #[test]
    fn rejects_bytes_used_past_source() {
        let mut raw = raw_superblock();
        raw[0x28..0x30].copy_from_slice(&4096u64.to_le_bytes());
        assert!(matches!(read_raw(raw), Err(SquashfsError::SizeMismatch)));
    }
}
