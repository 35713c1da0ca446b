//! Local file source

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use tracing::trace;

use crate::error::SquashfsError;
use crate::mapper::{BlockCache, BlockSource, MapView};

/// Source backed by a local file, read positionally in `block_size` chunks
pub struct FileMapper {
    file: Mutex<File>,
    size: u64,
    cache: BlockCache,
}

impl FileMapper {
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self, SquashfsError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        trace!(size, "opened file source");
        Ok(Self { file: Mutex::new(file), size, cache: BlockCache::new(block_size) })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn map(&self, offset: u64, len: usize) -> Result<MapView, SquashfsError> {
        self.cache.map(self, offset, len)
    }

    fn block_size(&self) -> usize {
        // block granularity lives in the cache, mirror it for read sizing
        self.cache.block_size
    }
}

impl BlockSource for FileMapper {
    fn source_size(&self) -> u64 {
        self.size
    }

    fn read_block(&self, index: u64) -> Result<Vec<u8>, SquashfsError> {
        let start = index * self.block_size() as u64;
        let want = (self.size - start).min(self.block_size() as u64) as usize;
        let mut buf = Vec::new();
        buf.try_reserve(want)?;
        buf.resize(want, 0);

        let mut file = self.file.lock().map_err(|_| SquashfsError::Internal)?;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
