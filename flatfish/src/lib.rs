//! Library for read-only access to
//! [SquashFS](https://en.wikipedia.org/wiki/SquashFS) images.
//!
//! An image is opened from a file path, a memory buffer, or an HTTP(S) url
//! and exposed as a directory tree: inode metadata, directory listings,
//! extended attributes, and file contents, as if mounted read-only. Nothing
//! is ever written.
//!
//! ## Reading
//! ```rust,no_run
//! # use flatfish::Archive;
//! let archive = Archive::open("image.squashfs")?;
//!
//! // walk a directory
//! let etc = archive.inode_by_path("/etc")?;
//! let mut dir = etc.directory()?;
//! while dir.advance()? {
//!     println!("{}", String::from_utf8_lossy(dir.name()));
//! }
//!
//! // read a file
//! let motd = archive.read_file("/etc/motd")?;
//! # Ok::<(), flatfish::SquashfsError>(())
//! ```
//!
//! ## Remote images
//! Sources whose string starts with a `scheme://` prefix are fetched with
//! HTTP range requests at `mapper_block_size` granularity, so listing a
//! directory of a multi-gigabyte remote image transfers only the blocks it
//! touches:
//! ```rust,no_run
//! # use flatfish::Archive;
//! let archive = Archive::open_url("https://example.com/rootfs.squashfs")?;
//! # Ok::<(), flatfish::SquashfsError>(())
//! ```

mod archive;
mod compressor;
mod config;
mod data;
mod dir;
mod error;
mod export;
mod extract;
mod file;
mod fragment;
mod id;
mod inode;
mod mapper;
mod metablock;
mod path;
mod superblock;
mod table;
mod xattr;

pub use crate::archive::Archive;
pub use crate::config::{Config, SourceMapper};
pub use crate::data::DataSize;
pub use crate::dir::{DirEntry, DirHeader, DirectoryIndex, DirectoryIterator};
pub use crate::error::SquashfsError;
pub use crate::export::Export;
pub use crate::extract::{ExtractBuffer, ExtractManager};
pub use crate::file::FileReader;
pub use crate::fragment::Fragment;
pub use crate::id::Id;
pub use crate::inode::{
    BasicDirectory, BasicDeviceSpecialFile, BasicFile, BasicIpc, BasicSymlink, ExtendedDirectory,
    ExtendedDeviceSpecialFile, ExtendedFile, ExtendedIpc, ExtendedSymlink, Inode, InodeHeader,
    InodeId, InodeInner, InodeView,
};
pub use crate::mapper::{FileMapper, HttpMapper, MapReader, MapView, Mapper, MemoryMapper};
pub use crate::metablock::InodeRef;
pub use crate::superblock::{Flags, SuperBlock, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use crate::xattr::{XattrId, XattrIterator};

/// Compression Choice and Options
pub mod compression {
    pub use crate::compressor::{CompressionOptions, Compressor, Gzip, Lz4, Lzo, Xz, Zstd};
}
