//! Module containing [`Archive`], the entry point of the library
//!
//! An `Archive` owns the mapped source, the validated superblock, and the
//! shared decode cache. Iterators, readers, and resolvers all borrow from it
//! and may be used from multiple threads.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use deku::prelude::*;
use deku::reader::Reader;
use tracing::{debug, trace};

use crate::compressor::{CompressionOptions, Compressor};
use crate::config::{Config, SourceMapper};
use crate::error::SquashfsError;
use crate::export::Export;
use crate::extract::ExtractManager;
use crate::file::FileReader;
use crate::fragment::{self, Fragment};
use crate::id::Id;
use crate::inode::InodeView;
use crate::mapper::{self, FileMapper, HttpMapper, Mapper, MemoryMapper};
use crate::metablock::{InodeRef, MetablockIterator};
use crate::path::PathResolver;
use crate::superblock::{SuperBlock, NOT_SET, SIZEOF_SUPERBLOCK};
use crate::table::Table;
use crate::xattr::{XattrId, XattrIdTable, SIZEOF_XATTR_ID, SIZEOF_XATTR_ID_TABLE};

/// A read-only SquashFS image.
///
/// ```rust,no_run
/// # use flatfish::Archive;
/// let archive = Archive::open("image.squashfs")?;
/// let content = archive.read_file("/etc/hostname")?;
/// println!("{}", String::from_utf8_lossy(&content));
/// # Ok::<(), flatfish::SquashfsError>(())
/// ```
pub struct Archive {
    config: Config,
    mapper: Mapper,
    superblock: SuperBlock,
    compression_options: Option<CompressionOptions>,
    extract: ExtractManager,
    /// Serialises first-time table initialisation. Never held while the
    /// extract-manager lock is taken.
    table_init: Mutex<()>,
    id_table: OnceLock<Table<Id>>,
    export_table: OnceLock<Table<Export>>,
    fragment_table: OnceLock<Table<Fragment>>,
    xattr_table: OnceLock<(u64, Table<XattrId>)>,
}

impl Archive {
    /// Open an image from a local file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SquashfsError> {
        let config = Config::default();
        let mapper =
            Mapper::File(FileMapper::open(path, config.mapper_block_size)?);
        Self::with_mapper(mapper, config)
    }

    /// Open an image from an HTTP(S) url
    pub fn open_url(url: &str) -> Result<Self, SquashfsError> {
        let config = Config::default();
        let mapper = Mapper::Url(HttpMapper::open(url, config.mapper_block_size)?);
        Self::with_mapper(mapper, config)
    }

    /// Open an image held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SquashfsError> {
        Self::from_bytes_with_config(bytes, Config::default())
    }

    /// Same as [`Self::from_bytes`] with explicit options. `source_size`
    /// bounds the addressable space when non-zero.
    pub fn from_bytes_with_config(bytes: Vec<u8>, config: Config) -> Result<Self, SquashfsError> {
        let size = match config.source_size {
            0 => bytes.len() as u64,
            size => size,
        };
        Self::with_mapper(Mapper::Memory(MemoryMapper::new(bytes, size)), config)
    }

    /// Open an image from a source string: urls are recognised by their
    /// `scheme://` prefix, anything else is a file path.
    /// [`Config::source_mapper`] overrides the autoselection.
    pub fn open_with_config(source: &str, config: Config) -> Result<Self, SquashfsError> {
        let kind = match config.source_mapper {
            Some(kind) => kind,
            None if mapper::is_url(source) => SourceMapper::Url,
            None => SourceMapper::File,
        };
        let mapper = match kind {
            SourceMapper::File => {
                Mapper::File(FileMapper::open(source, config.mapper_block_size)?)
            }
            SourceMapper::Url => Mapper::Url(HttpMapper::open(source, config.mapper_block_size)?),
            // an in-memory source has no source string to open
            SourceMapper::Memory => return Err(SquashfsError::Internal),
        };
        Self::with_mapper(mapper, config)
    }

    fn with_mapper(mapper: Mapper, config: Config) -> Result<Self, SquashfsError> {
        let superblock = SuperBlock::read(&mapper)?;
        if superblock.compressor == Compressor::None {
            return Err(SquashfsError::UnsupportedCompression(superblock.compressor));
        }

        let compression_options = if superblock.compressor_options_are_present() {
            Some(read_compression_options(&mapper, superblock.compressor)?)
        } else {
            None
        };

        let extract = ExtractManager::new(
            superblock.compressor,
            config.compression_lru_size,
            config.compression_lru_size,
        );

        debug!(
            compressor = ?superblock.compressor,
            block_size = superblock.block_size,
            inode_count = superblock.inode_count,
            "opened archive"
        );
        Ok(Self {
            config,
            mapper,
            superblock,
            compression_options,
            extract,
            table_init: Mutex::new(()),
            id_table: OnceLock::new(),
            export_table: OnceLock::new(),
            fragment_table: OnceLock::new(),
            xattr_table: OnceLock::new(),
        })
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub(crate) fn extract(&self) -> &ExtractManager {
        &self.extract
    }

    /// Decoder-tuning parameters, when the image stores them
    pub fn compression_options(&self) -> Result<&CompressionOptions, SquashfsError> {
        self.compression_options
            .as_ref()
            .ok_or(SquashfsError::NoCompressionOptions)
    }

    /// The root directory inode
    pub fn root(&self) -> Result<InodeView<'_>, SquashfsError> {
        self.inode_by_ref(InodeRef(self.superblock.root_inode))
    }

    /// Load the inode at `inode_ref`
    pub fn inode_by_ref(&self, inode_ref: InodeRef) -> Result<InodeView<'_>, SquashfsError> {
        InodeView::load(self, inode_ref)
    }

    /// Look an inode up by its 32-bit inode number, through the export table
    pub fn inode_by_number(&self, inode_number: u32) -> Result<InodeView<'_>, SquashfsError> {
        let table = self.export_table()?;
        let index = inode_number
            .checked_sub(1)
            .ok_or(SquashfsError::SeekOutOfRange)?;
        let export = table.get(self, index as usize)?;
        self.inode_by_ref(InodeRef(export.num))
    }

    /// Resolve `path` to its inode, following symlinks
    pub fn inode_by_path(&self, path: &str) -> Result<InodeView<'_>, SquashfsError> {
        let inode_ref = PathResolver::new(self).resolve(path)?;
        self.inode_by_ref(inode_ref)
    }

    /// Read the whole content of the file at `path`
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, SquashfsError> {
        let inode = self.inode_by_path(path)?;
        let mut reader = FileReader::new(&inode)?;
        reader.read(inode.file_size())?;
        Ok(reader.into_buffer())
    }

    /// uid/gid table entry `index`
    pub(crate) fn id(&self, index: u16) -> Result<Id, SquashfsError> {
        self.id_table()?.get(self, usize::from(index))
    }

    /// Fragment table entry `index`
    pub(crate) fn fragment(&self, index: u32) -> Result<Fragment, SquashfsError> {
        self.fragment_table()?.get(self, index as usize)
    }

    fn id_table(&self) -> Result<&Table<Id>, SquashfsError> {
        self.lazy_table(&self.id_table, || {
            Table::new(
                self,
                self.superblock.id_table,
                Id::SIZE,
                usize::from(self.superblock.id_count),
            )
        })
    }

    fn export_table(&self) -> Result<&Table<Export>, SquashfsError> {
        if self.superblock.export_table == NOT_SET {
            return Err(SquashfsError::NoExportTable);
        }
        self.lazy_table(&self.export_table, || {
            Table::new(
                self,
                self.superblock.export_table,
                Export::SIZE,
                self.superblock.inode_count as usize,
            )
        })
    }

    fn fragment_table(&self) -> Result<&Table<Fragment>, SquashfsError> {
        if self.superblock.frag_table == NOT_SET {
            return Err(SquashfsError::NoFragmentTable);
        }
        self.lazy_table(&self.fragment_table, || {
            Table::new(
                self,
                self.superblock.frag_table,
                fragment::SIZE,
                self.superblock.frag_count as usize,
            )
        })
    }

    /// The xattr id table and the absolute start of the key/value region
    pub(crate) fn xattr_table(&self) -> Result<(u64, &Table<XattrId>), SquashfsError> {
        if self.superblock.xattr_table == NOT_SET {
            return Err(SquashfsError::NoXattrTable);
        }
        let entry = self.lazy_table(&self.xattr_table, || {
            let view = self.mapper.map(self.superblock.xattr_table, SIZEOF_XATTR_ID_TABLE)?;
            let mut cursor = Cursor::new(view.data());
            let mut reader = Reader::new(&mut cursor);
            let header = XattrIdTable::from_reader_with_ctx(&mut reader, ())?;
            trace!(?header, "xattr id table");

            let table = Table::new(
                self,
                self.superblock.xattr_table + SIZEOF_XATTR_ID_TABLE as u64,
                SIZEOF_XATTR_ID,
                header.xattr_ids as usize,
            )?;
            Ok((header.kv_start, table))
        })?;
        Ok((entry.0, &entry.1))
    }

    /// One-shot lazy initialisation: concurrent first-use converges to a
    /// single init under `table_init`.
    fn lazy_table<'a, T>(
        &'a self,
        slot: &'a OnceLock<T>,
        init: impl FnOnce() -> Result<T, SquashfsError>,
    ) -> Result<&'a T, SquashfsError> {
        if let Some(table) = slot.get() {
            return Ok(table);
        }
        let _guard = self.table_init.lock().map_err(|_| SquashfsError::Internal)?;
        if let Some(table) = slot.get() {
            return Ok(table);
        }
        let table = init()?;
        Ok(slot.get_or_init(|| table))
    }
}

/// Parse the compressor-options metablock that follows the superblock. It is
/// always stored uncompressed.
fn read_compression_options(
    mapper: &Mapper,
    compressor: Compressor,
) -> Result<CompressionOptions, SquashfsError> {
    let mut iter = MetablockIterator::new(mapper, SIZEOF_SUPERBLOCK as u64, u64::MAX);
    iter.advance()?;
    if iter.is_compressed() {
        return Err(SquashfsError::Internal);
    }

    let mut cursor = Cursor::new(iter.data());
    let mut deku_reader = Reader::new(&mut cursor);
    let options = CompressionOptions::from_reader_with_ctx(
        &mut deku_reader,
        (deku::ctx::Endian::Little, compressor),
    )?;
    trace!(?options, "compression options");
    Ok(options)
}
