//! Archive open options

/// Force a specific source backend instead of autoselection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceMapper {
    /// Local file, read positionally by block
    File,
    /// In-memory byte slice, requires [`Config::source_size`]
    Memory,
    /// HTTP(S) range requests
    Url,
}

/// Options recognised by [`Archive::open_with_config`](crate::Archive::open_with_config).
///
/// All fields are optional; `Config::default()` matches the behavior of
/// [`Archive::open`](crate::Archive::open).
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Override source-type autoselection
    pub source_mapper: Option<SourceMapper>,
    /// Size of the source in bytes. Mandatory for in-memory sources.
    pub source_size: u64,
    /// Read granularity of the file and url mappers
    pub mapper_block_size: usize,
    /// Number of entries in the decoded-block LRU
    pub compression_lru_size: usize,
    /// How many symlinks are followed before giving up on a path
    pub max_symlink_depth: usize,
}

impl Config {
    pub(crate) const DEFAULT_MAPPER_BLOCK_SIZE: usize = 256 * 1024;
    pub(crate) const DEFAULT_COMPRESSION_LRU_SIZE: usize = 128;
    pub(crate) const DEFAULT_MAX_SYMLINK_DEPTH: usize = 100;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_mapper: None,
            source_size: 0,
            mapper_block_size: Self::DEFAULT_MAPPER_BLOCK_SIZE,
            compression_lru_size: Self::DEFAULT_COMPRESSION_LRU_SIZE,
            max_symlink_depth: Self::DEFAULT_MAX_SYMLINK_DEPTH,
        }
    }
}
