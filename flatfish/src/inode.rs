//! Index Node for file or directory

use std::io::Cursor;

use deku::prelude::*;
use deku::reader::Reader;
use tracing::trace;

use crate::archive::Archive;
use crate::data::DataSize;
use crate::dir::{DirectoryIndex, DirectoryIterator};
use crate::error::SquashfsError;
use crate::file::FileReader;
use crate::metablock::{InodeRef, MetablockStream};
use crate::xattr::XattrIterator;

pub(crate) const SIZEOF_INODE_HEADER: usize = 16;

/// `frag_index` value marking a file without a fragment tail
pub(crate) const NO_FRAGMENT: u32 = 0xffff_ffff;

/// `xattr_index` value marking an inode without extended attributes
pub(crate) const NO_XATTR: u32 = 0xffff_ffff;

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(ctx = "block_size: u32, block_log: u16")]
#[deku(endian = "little")]
pub struct Inode {
    pub id: InodeId,
    pub header: InodeHeader,
    #[deku(ctx = "*id, block_size, block_log")]
    pub inner: InodeInner,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq, Hash)]
#[deku(id_type = "u16")]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[repr(u16)]
#[rustfmt::skip]
pub enum InodeId {
    BasicDirectory       = 1,
    BasicFile            = 2,
    BasicSymlink         = 3,
    BasicBlockDevice     = 4,
    BasicCharacterDevice = 5,
    BasicNamedPipe       = 6,
    BasicSocket          = 7,
    ExtendedDirectory    = 8,
    ExtendedFile         = 9,
    ExtendedSymlink      = 10,
    ExtendedBlockDevice  = 11,
    ExtendedCharacterDevice = 12,
    ExtendedNamedPipe    = 13,
    ExtendedSocket       = 14,
}

impl InodeId {
    /// For extended inodes, the matching basic type. Directory entries store
    /// this form.
    pub fn into_base_type(self) -> Self {
        match self {
            Self::ExtendedDirectory => Self::BasicDirectory,
            Self::ExtendedFile => Self::BasicFile,
            Self::ExtendedSymlink => Self::BasicSymlink,
            Self::ExtendedBlockDevice => Self::BasicBlockDevice,
            Self::ExtendedCharacterDevice => Self::BasicCharacterDevice,
            Self::ExtendedNamedPipe => Self::BasicNamedPipe,
            Self::ExtendedSocket => Self::BasicSocket,
            id => id,
        }
    }

    pub fn is_extended(self) -> bool {
        self != self.into_base_type()
    }
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct InodeHeader {
    pub permissions: u16,
    /// Index into the id table, not a raw uid
    pub uid: u16,
    /// Index into the id table, not a raw gid
    pub gid: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(ctx = "endian: deku::ctx::Endian, id: InodeId, block_size: u32, block_log: u16")]
#[deku(endian = "endian")]
#[deku(id = "id")]
pub enum InodeInner {
    #[deku(id = "InodeId::BasicDirectory")]
    BasicDirectory(BasicDirectory),

    #[deku(id = "InodeId::BasicFile")]
    BasicFile(#[deku(ctx = "block_size, block_log")] BasicFile),

    #[deku(id = "InodeId::BasicSymlink")]
    BasicSymlink(BasicSymlink),

    #[deku(id = "InodeId::BasicBlockDevice")]
    BasicBlockDevice(BasicDeviceSpecialFile),

    #[deku(id = "InodeId::BasicCharacterDevice")]
    BasicCharacterDevice(BasicDeviceSpecialFile),

    #[deku(id = "InodeId::BasicNamedPipe")]
    BasicNamedPipe(BasicIpc),

    #[deku(id = "InodeId::BasicSocket")]
    BasicSocket(BasicIpc),

    #[deku(id = "InodeId::ExtendedDirectory")]
    ExtendedDirectory(ExtendedDirectory),

    #[deku(id = "InodeId::ExtendedFile")]
    ExtendedFile(#[deku(ctx = "block_size, block_log")] ExtendedFile),

    #[deku(id = "InodeId::ExtendedSymlink")]
    ExtendedSymlink(ExtendedSymlink),

    #[deku(id = "InodeId::ExtendedBlockDevice")]
    ExtendedBlockDevice(ExtendedDeviceSpecialFile),

    #[deku(id = "InodeId::ExtendedCharacterDevice")]
    ExtendedCharacterDevice(ExtendedDeviceSpecialFile),

    #[deku(id = "InodeId::ExtendedNamedPipe")]
    ExtendedNamedPipe(ExtendedIpc),

    #[deku(id = "InodeId::ExtendedSocket")]
    ExtendedSocket(ExtendedIpc),
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicDirectory {
    /// Offset of the metablock holding the listing, relative to the directory
    /// table start
    pub block_index: u32,
    pub link_count: u32,
    /// Listing size in bytes plus 3 (an artifact of the on-disk format
    /// counting "." and "..")
    pub file_size: u16,
    /// Offset of the listing inside the decoded metablock
    pub block_offset: u16,
    pub parent_inode: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedDirectory {
    pub link_count: u32,
    pub file_size: u32,
    pub block_index: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub block_offset: u16,
    pub xattr_index: u32,
    #[deku(count = "*index_count")]
    pub dir_index: Vec<DirectoryIndex>,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, block_size: u32, block_log: u16")]
pub struct BasicFile {
    /// Absolute byte offset of the first data block
    pub blocks_start: u32,
    pub frag_index: u32,
    /// Byte offset into the fragment block, when `frag_index` is set
    pub block_offset: u32,
    pub file_size: u32,
    #[deku(count = "block_count(block_size, block_log, *frag_index, u64::from(*file_size))")]
    pub block_sizes: Vec<DataSize>,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, block_size: u32, block_log: u16")]
pub struct ExtendedFile {
    pub blocks_start: u64,
    pub file_size: u64,
    /// Bytes saved by sparse holes
    pub sparse: u64,
    pub link_count: u32,
    pub frag_index: u32,
    pub block_offset: u32,
    pub xattr_index: u32,
    #[deku(count = "block_count(block_size, block_log, *frag_index, *file_size)")]
    pub block_sizes: Vec<DataSize>,
}

fn block_count(block_size: u32, block_log: u16, fragment: u32, file_size: u64) -> u64 {
    if fragment == NO_FRAGMENT {
        (file_size + u64::from(block_size) - 1) >> block_log
    } else {
        file_size >> block_log
    }
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicSymlink {
    pub link_count: u32,
    pub target_size: u32,
    #[deku(count = "target_size")]
    pub target_path: Vec<u8>,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedSymlink {
    pub link_count: u32,
    pub target_size: u32,
    #[deku(count = "target_size")]
    pub target_path: Vec<u8>,
    pub xattr_index: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicDeviceSpecialFile {
    pub link_count: u32,
    pub device_number: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedDeviceSpecialFile {
    pub link_count: u32,
    pub device_number: u32,
    pub xattr_index: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct BasicIpc {
    pub link_count: u32,
}

#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ExtendedIpc {
    pub link_count: u32,
    pub xattr_index: u32,
}

/// A loaded inode with typed accessors.
///
/// Borrowed from the [`Archive`] it was loaded from; accessors that cross
/// into other tables (uid/gid) resolve through it.
pub struct InodeView<'a> {
    archive: &'a Archive,
    inode: Inode,
    inode_ref: InodeRef,
}

impl<'a> InodeView<'a> {
    /// Materialise the inode at `inode_ref` from the inode-table metablock
    /// stream. The window grows until the type-specific record is complete.
    pub(crate) fn load(archive: &'a Archive, inode_ref: InodeRef) -> Result<Self, SquashfsError> {
        let superblock = archive.superblock();
        let mut stream = MetablockStream::new(archive, superblock.inode_table, superblock.dir_table);
        stream.seek_ref(inode_ref);

        // enough to identify the type
        stream.more(SIZEOF_INODE_HEADER)?;
        {
            let mut cursor = Cursor::new(stream.data());
            let mut reader = Reader::new(&mut cursor);
            InodeId::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little)
                .map_err(|_| SquashfsError::UnknownInodeType)?;
        }

        loop {
            let mut cursor = Cursor::new(stream.data());
            let mut reader = Reader::new(&mut cursor);
            match Inode::from_reader_with_ctx(
                &mut reader,
                (superblock.block_size, superblock.block_log),
            ) {
                Ok(inode) => {
                    trace!(?inode_ref, id = ?inode.id, "loaded inode");
                    return Ok(Self { archive, inode, inode_ref });
                }
                // the record continues in the next metablock
                Err(DekuError::Incomplete(_)) => stream.more(stream.size() + 1)?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn archive(&self) -> &'a Archive {
        self.archive
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.inode_ref
    }

    pub fn id(&self) -> InodeId {
        self.inode.id
    }

    pub fn is_extended(&self) -> bool {
        self.inode.id.is_extended()
    }

    pub fn is_directory(&self) -> bool {
        self.inode.id.into_base_type() == InodeId::BasicDirectory
    }

    pub fn is_file(&self) -> bool {
        self.inode.id.into_base_type() == InodeId::BasicFile
    }

    pub fn is_symlink(&self) -> bool {
        self.inode.id.into_base_type() == InodeId::BasicSymlink
    }

    pub fn permissions(&self) -> u16 {
        self.inode.header.permissions
    }

    pub fn inode_number(&self) -> u32 {
        self.inode.header.inode_number
    }

    pub fn modified_time(&self) -> u32 {
        self.inode.header.mtime
    }

    /// Owner uid, resolved through the id table
    pub fn uid(&self) -> Result<u32, SquashfsError> {
        Ok(self.archive.id(self.inode.header.uid)?.num)
    }

    /// Owner gid, resolved through the id table
    pub fn gid(&self) -> Result<u32, SquashfsError> {
        Ok(self.archive.id(self.inode.header.gid)?.num)
    }

    pub fn hard_link_count(&self) -> u32 {
        match &self.inode.inner {
            InodeInner::BasicDirectory(dir) => dir.link_count,
            InodeInner::ExtendedDirectory(dir) => dir.link_count,
            InodeInner::BasicFile(_) => 1,
            InodeInner::ExtendedFile(file) => file.link_count,
            InodeInner::BasicSymlink(link) => link.link_count,
            InodeInner::ExtendedSymlink(link) => link.link_count,
            InodeInner::BasicBlockDevice(dev) | InodeInner::BasicCharacterDevice(dev) => {
                dev.link_count
            }
            InodeInner::ExtendedBlockDevice(dev) | InodeInner::ExtendedCharacterDevice(dev) => {
                dev.link_count
            }
            InodeInner::BasicNamedPipe(ipc) | InodeInner::BasicSocket(ipc) => ipc.link_count,
            InodeInner::ExtendedNamedPipe(ipc) | InodeInner::ExtendedSocket(ipc) => ipc.link_count,
        }
    }

    /// File content size for files, listing size for directories, 0 otherwise
    pub fn file_size(&self) -> u64 {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => u64::from(file.file_size),
            InodeInner::ExtendedFile(file) => file.file_size,
            InodeInner::BasicDirectory(dir) => u64::from(dir.file_size),
            InodeInner::ExtendedDirectory(dir) => u64::from(dir.file_size),
            _ => 0,
        }
    }

    /// Number of full data blocks of a file
    pub fn block_count(&self) -> u32 {
        let superblock = self.archive.superblock();
        let file_size = self.file_size();
        if file_size == u64::MAX {
            u32::MAX
        } else if self.has_fragment() {
            (file_size / u64::from(superblock.block_size)) as u32
        } else {
            file_size.div_ceil(u64::from(superblock.block_size)) as u32
        }
    }

    /// Stored size word of data block `index`, `None` for non-files
    pub fn block_size(&self, index: usize) -> Option<DataSize> {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => file.block_sizes.get(index).copied(),
            InodeInner::ExtendedFile(file) => file.block_sizes.get(index).copied(),
            _ => None,
        }
    }

    pub fn block_is_compressed(&self, index: usize) -> bool {
        self.block_size(index).is_some_and(|size| !size.uncompressed())
    }

    pub(crate) fn block_sizes(&self) -> &[DataSize] {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => &file.block_sizes,
            InodeInner::ExtendedFile(file) => &file.block_sizes,
            _ => &[],
        }
    }

    /// Absolute byte offset of the file's first data block, `u64::MAX` for
    /// variants without data blocks
    pub fn blocks_start(&self) -> u64 {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => u64::from(file.blocks_start),
            InodeInner::ExtendedFile(file) => file.blocks_start,
            _ => u64::MAX,
        }
    }

    pub fn fragment_block_index(&self) -> u32 {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => file.frag_index,
            InodeInner::ExtendedFile(file) => file.frag_index,
            _ => NO_FRAGMENT,
        }
    }

    pub fn fragment_block_offset(&self) -> u32 {
        match &self.inode.inner {
            InodeInner::BasicFile(file) => file.block_offset,
            InodeInner::ExtendedFile(file) => file.block_offset,
            _ => 0,
        }
    }

    pub fn has_fragment(&self) -> bool {
        self.fragment_block_index() != NO_FRAGMENT
    }

    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.inode.inner {
            InodeInner::BasicSymlink(link) => Some(&link.target_path),
            InodeInner::ExtendedSymlink(link) => Some(&link.target_path),
            _ => None,
        }
    }

    pub fn device_id(&self) -> Option<u32> {
        match &self.inode.inner {
            InodeInner::BasicBlockDevice(dev) | InodeInner::BasicCharacterDevice(dev) => {
                Some(dev.device_number)
            }
            InodeInner::ExtendedBlockDevice(dev) | InodeInner::ExtendedCharacterDevice(dev) => {
                Some(dev.device_number)
            }
            _ => None,
        }
    }

    /// Index into the xattr id table, `None` when the inode carries no xattrs
    pub fn xattr_index(&self) -> Option<u32> {
        let index = match &self.inode.inner {
            InodeInner::ExtendedDirectory(dir) => dir.xattr_index,
            InodeInner::ExtendedFile(file) => file.xattr_index,
            InodeInner::ExtendedSymlink(link) => link.xattr_index,
            InodeInner::ExtendedBlockDevice(dev) | InodeInner::ExtendedCharacterDevice(dev) => {
                dev.xattr_index
            }
            InodeInner::ExtendedNamedPipe(ipc) | InodeInner::ExtendedSocket(ipc) => {
                ipc.xattr_index
            }
            _ => NO_XATTR,
        };
        (index != NO_XATTR).then_some(index)
    }

    /// Start of the directory listing: (block_index, block_offset, listing
    /// size). Fails with `NotADirectory` for other variants.
    pub(crate) fn directory_start(&self) -> Result<(u32, u16, u32), SquashfsError> {
        match &self.inode.inner {
            InodeInner::BasicDirectory(dir) => {
                Ok((dir.block_index, dir.block_offset, u32::from(dir.file_size)))
            }
            InodeInner::ExtendedDirectory(dir) => {
                Ok((dir.block_index, dir.block_offset, dir.file_size))
            }
            _ => Err(SquashfsError::NotADirectory),
        }
    }

    /// Iterate the entries of this directory
    pub fn directory(&self) -> Result<DirectoryIterator<'a>, SquashfsError> {
        DirectoryIterator::new(self.archive, self)
    }

    /// Iterate the extended attributes of this inode
    pub fn xattrs(&self) -> Result<XattrIterator<'a>, SquashfsError> {
        XattrIterator::new(self.archive, self.xattr_index())
    }

    /// Read this file's content
    pub fn reader(&self) -> Result<FileReader<'_>, SquashfsError> {
        FileReader::new(self)
    }
}
