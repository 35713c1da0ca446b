//! Byte sources for the image
//!
//! A [`Mapper`] presents one of the supported source kinds as a single
//! byte-addressable space. `map` hands out cheap ref-counted views; the file
//! and url backends materialise the source in `mapper_block_size` chunks and
//! keep recently used chunks cached.

mod file;
mod http;
mod memory;
mod reader;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

pub use file::FileMapper;
pub use http::HttpMapper;
pub use memory::MemoryMapper;
pub use reader::MapReader;

use crate::error::SquashfsError;

/// Byte-addressable view over a source
pub enum Mapper {
    File(FileMapper),
    Memory(MemoryMapper),
    Url(HttpMapper),
}

impl Mapper {
    /// Total size of the source in bytes, known up front
    pub fn size(&self) -> u64 {
        match self {
            Self::File(file) => file.size(),
            Self::Memory(memory) => memory.size(),
            Self::Url(http) => http.size(),
        }
    }

    /// Map `len` bytes at `offset` into a ref-counted view
    pub fn map(&self, offset: u64, len: usize) -> Result<MapView, SquashfsError> {
        match self {
            Self::File(file) => file.map(offset, len),
            Self::Memory(memory) => memory.map(offset, len),
            Self::Url(http) => http.map(offset, len),
        }
    }
}

/// Ref-counted read-only window into a mapped source. Cloning is cheap and
/// never copies the backing buffer.
#[derive(Clone)]
pub struct MapView {
    data: Arc<Vec<u8>>,
    start: usize,
    len: usize,
}

impl MapView {
    pub(crate) fn new(data: Arc<Vec<u8>>, start: usize, len: usize) -> Self {
        Self { data, start, len }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    pub fn size(&self) -> usize {
        self.len
    }
}

/// `true` when the source string carries a `scheme://` prefix
pub(crate) fn is_url(source: &str) -> bool {
    match source.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Backend that can produce whole blocks of `block_size` bytes
pub(crate) trait BlockSource {
    fn source_size(&self) -> u64;
    fn read_block(&self, index: u64) -> Result<Vec<u8>, SquashfsError>;
}

/// Keep a bounded number of fetched blocks around. Sized in blocks, evicting
/// in fetch order.
pub(crate) struct BlockCache {
    block_size: usize,
    inner: Mutex<BlockCacheInner>,
}

struct BlockCacheInner {
    blocks: FxHashMap<u64, Arc<Vec<u8>>>,
    order: VecDeque<u64>,
}

impl BlockCache {
    const CACHED_BLOCKS: usize = 64;

    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            block_size,
            inner: Mutex::new(BlockCacheInner {
                blocks: FxHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    fn block(&self, source: &dyn BlockSource, index: u64) -> Result<Arc<Vec<u8>>, SquashfsError> {
        if let Some(block) = self.lookup(index) {
            return Ok(block);
        }
        let block = Arc::new(source.read_block(index)?);
        let mut inner = self.inner.lock().map_err(|_| SquashfsError::Internal)?;
        // A concurrent fetch of the same block may have won, keep the first
        let block = inner.blocks.entry(index).or_insert_with(|| block.clone()).clone();
        inner.order.push_back(index);
        while inner.order.len() > Self::CACHED_BLOCKS {
            if let Some(evict) = inner.order.pop_front() {
                inner.blocks.remove(&evict);
            }
        }
        Ok(block)
    }

    fn lookup(&self, index: u64) -> Option<Arc<Vec<u8>>> {
        let inner = self.inner.lock().ok()?;
        inner.blocks.get(&index).cloned()
    }

    /// Assemble a view of `len` bytes at `offset`, fetching blocks as needed
    pub(crate) fn map(
        &self,
        source: &dyn BlockSource,
        offset: u64,
        len: usize,
    ) -> Result<MapView, SquashfsError> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(SquashfsError::IntegerOverflow)?;
        if end > source.source_size() {
            return Err(SquashfsError::SeekOutOfRange);
        }
        if len == 0 {
            return Ok(MapView::new(Arc::new(Vec::new()), 0, 0));
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (end - 1) / block_size;
        let start_in_block = (offset % block_size) as usize;

        if first == last {
            let block = self.block(source, first)?;
            return Ok(MapView::new(block, start_in_block, len));
        }

        // The window straddles blocks, gather into a fresh buffer
        let mut data = Vec::new();
        data.try_reserve(len)?;
        for index in first..=last {
            let block = self.block(source, index)?;
            let skip = if index == first { start_in_block } else { 0 };
            let take = (len - data.len()).min(block.len() - skip);
            data.extend_from_slice(&block[skip..skip + take]);
        }
        Ok(MapView::new(Arc::new(data), 0, len))
    }
}
