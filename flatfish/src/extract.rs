//! Shared decompression with cached results
//!
//! Decoded metadata and data blocks are cached by their source offset so that
//! hot blocks are decompressed once, no matter how many readers walk them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::compressor::{self, Compressor};
use crate::error::SquashfsError;
use crate::mapper::MapReader;

/// Shared handle to a decoded block. Dropping the handle releases the borrow;
/// the manager keeps the block alive while it stays in the LRU window.
pub type ExtractBuffer = Arc<Vec<u8>>;

/// Calculates pow(x,y) % mod
fn mod_power(mut x: u128, mut y: u128, modulus: u128) -> u128 {
    let mut res = 1;
    while y != 0 {
        if y & 1 != 0 {
            res = (res * x) % modulus;
        }
        y >>= 1;
        x = (x * x) % modulus;
    }
    res
}

/// Single-base Fermat probe, good enough to spread hash buckets
fn maybe_prime(n: u64) -> bool {
    const A: u128 = 2;
    mod_power(A, n as u128 - 1, n as u128) == 1
}

fn find_next_maybe_prime(mut n: u64) -> u64 {
    while !maybe_prime(n) {
        n += 1;
    }
    n
}

/// Thread-safe `source offset -> decoded block` cache, bounded by an LRU of
/// `lru_size` entries. Concurrent decodes of the same offset collapse to one:
/// the manager's lock covers lookup, decompression, and LRU bookkeeping.
pub struct ExtractManager {
    compressor: Compressor,
    inner: Mutex<ExtractManagerInner>,
    lru_size: usize,
}

struct ExtractManagerInner {
    buffers: FxHashMap<u64, ExtractBuffer>,
    lru: VecDeque<u64>,
    /// Evicted from the LRU while still borrowed; reaped once the last borrow
    /// is gone
    pending: Vec<u64>,
}

impl ExtractManager {
    /// `hint` sizes the initial bucket count, `lru_size` bounds the number of
    /// recently used entries kept alive without a borrow.
    pub fn new(compressor: Compressor, hint: usize, lru_size: usize) -> Self {
        // Give a bit of room to avoid too many key hash collisions
        let buckets = find_next_maybe_prime(2 * hint.max(1) as u64) as usize;
        Self {
            compressor,
            inner: Mutex::new(ExtractManagerInner {
                buffers: FxHashMap::with_capacity_and_hasher(buckets, Default::default()),
                lru: VecDeque::with_capacity(lru_size),
                pending: Vec::new(),
            }),
            lru_size,
        }
    }

    /// Number of live plus cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.buffers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the block under `reader`'s window, or return the cached result.
    ///
    /// `compressed` selects between the archive compressor and the identity,
    /// `out_max` caps the decoded size (8 KiB for metablocks, the archive
    /// block size for data blocks).
    pub fn uncompress(
        &self,
        reader: &MapReader<'_>,
        compressed: bool,
        out_max: usize,
    ) -> Result<ExtractBuffer, SquashfsError> {
        let address = reader.address();
        let mut inner = self.inner.lock().map_err(|_| SquashfsError::Internal)?;
        inner.reap();

        if let Some(buffer) = inner.buffers.get(&address) {
            trace!(address, "cache hit");
            let buffer = buffer.clone();
            inner.touch(address, self.lru_size);
            return Ok(buffer);
        }

        let compressor = if compressed { self.compressor } else { Compressor::None };
        let mut out = Vec::new();
        compressor::decompress(reader.data(), &mut out, out_max, compressor)?;
        let buffer = Arc::new(out);
        inner.buffers.insert(address, buffer.clone());
        inner.touch(address, self.lru_size);
        Ok(buffer)
    }
}

impl ExtractManagerInner {
    /// Promote `address` to most recently used, evicting over capacity
    fn touch(&mut self, address: u64, lru_size: usize) {
        self.pending.retain(|&a| a != address);
        if let Some(at) = self.lru.iter().position(|&a| a == address) {
            self.lru.remove(at);
        }
        self.lru.push_back(address);
        while self.lru.len() > lru_size {
            if let Some(evict) = self.lru.pop_front() {
                self.evict(evict);
            }
        }
    }

    fn evict(&mut self, address: u64) {
        match self.buffers.get(&address) {
            // A reader still borrows this buffer, defer to reap()
            Some(buffer) if Arc::strong_count(buffer) > 1 => self.pending.push(address),
            Some(_) => {
                self.buffers.remove(&address);
            }
            None => {}
        }
    }

    /// Drop deferred evictions whose borrows have been released
    fn reap(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let buffers = &mut self.buffers;
        self.pending.retain(|address| match buffers.get(address) {
            Some(buffer) if Arc::strong_count(buffer) == 1 => {
                buffers.remove(address);
                false
            }
            Some(_) => true,
            None => false,
        });
    }
}
