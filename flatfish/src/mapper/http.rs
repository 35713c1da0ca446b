//! HTTP(S) range-request source

use std::io::{self, Read};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::SquashfsError;
use crate::mapper::{BlockCache, BlockSource, MapView};

/// Source backed by an HTTP(S) url. Blocks are fetched with `Range` requests
/// at `block_size` granularity; the server must support byte ranges.
pub struct HttpMapper {
    agent: ureq::Agent,
    url: String,
    size: u64,
    cache: BlockCache,
}

impl HttpMapper {
    pub fn open(url: &str, block_size: usize) -> Result<Self, SquashfsError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .build();
        let size = probe_size(&agent, url)?;
        debug!(url, size, "opened url source");
        Ok(Self {
            agent,
            url: url.to_string(),
            size,
            cache: BlockCache::new(block_size),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn map(&self, offset: u64, len: usize) -> Result<MapView, SquashfsError> {
        self.cache.map(self, offset, len)
    }
}

impl BlockSource for HttpMapper {
    fn source_size(&self) -> u64 {
        self.size
    }

    fn read_block(&self, index: u64) -> Result<Vec<u8>, SquashfsError> {
        let block_size = self.cache.block_size as u64;
        let start = index * block_size;
        let end = (start + block_size).min(self.size) - 1;
        trace!(start, end, "range request");

        let response = self
            .agent
            .get(&self.url)
            .set("Range", &format!("bytes={start}-{end}"))
            .call()
            .map_err(http_error)?;

        let want = (end - start + 1) as usize;
        let mut buf = Vec::new();
        buf.try_reserve(want)?;
        response
            .into_reader()
            .take(want as u64)
            .read_to_end(&mut buf)?;
        if buf.len() != want {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(buf)
    }
}

/// Learn the source size up front, preferring HEAD and falling back to a
/// one-byte range request for servers that omit Content-Length on HEAD
fn probe_size(agent: &ureq::Agent, url: &str) -> Result<u64, SquashfsError> {
    let response = agent.head(url).call().map_err(http_error)?;
    if let Some(len) = response
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
    {
        return Ok(len);
    }

    let response = agent
        .get(url)
        .set("Range", "bytes=0-0")
        .call()
        .map_err(http_error)?;
    response
        .header("Content-Range")
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.parse::<u64>().ok())
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData).into())
}

fn http_error(error: ureq::Error) -> SquashfsError {
    SquashfsError::StdIo(io::Error::new(io::ErrorKind::Other, error))
}
