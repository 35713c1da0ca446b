//! File content assembly

use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::data::DataSize;
use crate::inode::InodeView;
use crate::mapper::MapReader;

/// Forward-only reader over one file's content.
///
/// Content is assembled from the file's full data blocks plus an optional
/// fragment tail shared with other files. Decoded blocks come out of the
/// archive's extract manager, so hot blocks decompress once across readers.
pub struct FileReader<'a> {
    archive: &'a Archive,
    blocks: &'a [DataSize],
    blocks_start: u64,
    file_size: u64,
    frag_index: u32,
    frag_offset: u32,
    has_fragment: bool,
    /// Assembled content, starting at `start_pos` in the file
    buffer: Vec<u8>,
    start_pos: u64,
    /// Block index and stored address matching the current read position
    next_block: usize,
    next_block_address: u64,
}

impl<'a> FileReader<'a> {
    pub(crate) fn new(inode: &'a InodeView<'a>) -> Result<Self, SquashfsError> {
        if !inode.is_file() {
            return Err(SquashfsError::NotAFile);
        }
        Ok(Self {
            archive: inode.archive(),
            blocks: inode.block_sizes(),
            blocks_start: inode.blocks_start(),
            file_size: inode.file_size(),
            frag_index: inode.fragment_block_index(),
            frag_offset: inode.fragment_block_offset(),
            has_fragment: inode.has_fragment(),
            buffer: Vec::new(),
            start_pos: 0,
            next_block: 0,
            next_block_address: inode.blocks_start(),
        })
    }

    /// Bytes materialised so far, starting at the seek position
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Consume the reader, returning the assembled content
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Size of the data-block region; the fragment tail covers the rest
    fn block_region(&self) -> u64 {
        self.blocks.len() as u64 * u64::from(self.archive.superblock().block_size)
    }

    /// Position the reader before the first `read`. The position must fall in
    /// the data-block region: seeking into the fragment tail fails with
    /// `SeekInFragment`, past the end of the file with `SeekOutOfRange`.
    pub fn seek(&mut self, position: u64) -> Result<(), SquashfsError> {
        if !self.buffer.is_empty() {
            // forward-only, no repositioning after a read
            return Err(SquashfsError::Internal);
        }
        if position > self.file_size {
            return Err(SquashfsError::SeekOutOfRange);
        }
        if self.has_fragment && position >= self.block_region() && position > 0 {
            return Err(SquashfsError::SeekInFragment);
        }

        let block_size = u64::from(self.archive.superblock().block_size);
        let block = (position / block_size) as usize;
        self.next_block_address = self.blocks_start
            + self.blocks[..block].iter().map(|b| u64::from(b.size())).sum::<u64>();
        self.next_block = block;
        self.start_pos = position;
        Ok(())
    }

    /// Extend the buffer by up to `size` bytes of content.
    ///
    /// Reading past the end of the file is not fatal: the buffer fills up to
    /// the file's true size, then `SeekOutOfRange` is returned.
    pub fn read(&mut self, size: u64) -> Result<(), SquashfsError> {
        let wanted_end = self.position().checked_add(size).ok_or(SquashfsError::IntegerOverflow)?;
        let end = wanted_end.min(self.file_size);

        while self.position() < end {
            if self.position() < self.block_region() {
                self.read_block(end)?;
            } else {
                self.read_fragment(end)?;
            }
        }

        if wanted_end > self.file_size {
            return Err(SquashfsError::SeekOutOfRange);
        }
        Ok(())
    }

    /// Absolute file position of the next unread byte
    fn position(&self) -> u64 {
        self.start_pos + self.buffer.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), SquashfsError> {
        self.buffer.try_reserve(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Materialise content from the data block under the current position
    fn read_block(&mut self, end: u64) -> Result<(), SquashfsError> {
        let block_size = u64::from(self.archive.superblock().block_size);
        let position = self.position();
        let index = (position / block_size) as usize;
        let offset = (position % block_size) as usize;
        debug_assert_eq!(index, self.next_block);

        let stored = self.blocks[index];
        // a block never extends past the end of the file
        let block_len = block_size.min(self.file_size - position / block_size * block_size);
        let take = (end.min(position - offset as u64 + block_len) - position) as usize;

        if stored.is_sparse() {
            trace!(index, "sparse block");
            let zeros = vec![0u8; take];
            self.append(&zeros)?;
        } else {
            let mut reader = MapReader::new(
                self.archive.mapper(),
                self.next_block_address,
                self.archive.superblock().bytes_used,
            );
            reader.advance(0, stored.size() as usize)?;
            let decoded = self.archive.extract().uncompress(
                &reader,
                !stored.uncompressed(),
                block_size as usize,
            )?;
            let slice = decoded
                .get(offset..offset + take)
                .ok_or(SquashfsError::Decompress)?;
            self.append(slice)?;
        }

        if self.position() % block_size == 0 || self.position() == self.file_size {
            self.next_block = index + 1;
            self.next_block_address += u64::from(stored.size());
        }
        Ok(())
    }

    /// Materialise content from the fragment tail
    fn read_fragment(&mut self, end: u64) -> Result<(), SquashfsError> {
        if !self.has_fragment {
            // zero-length tail with no fragment only happens on corrupt sizes
            return Err(SquashfsError::Internal);
        }
        let fragment = self.archive.fragment(self.frag_index)?;
        trace!(start = fragment.start, "fragment block");

        let block_size = self.archive.superblock().block_size as usize;
        let mut reader = MapReader::new(
            self.archive.mapper(),
            fragment.start,
            self.archive.superblock().bytes_used,
        );
        reader.advance(0, fragment.size.size() as usize)?;
        let decoded =
            self.archive
                .extract()
                .uncompress(&reader, !fragment.size.uncompressed(), block_size)?;

        let into_tail = (self.position() - self.block_region()) as usize;
        let take = (end - self.position()) as usize;
        let from = self.frag_offset as usize + into_tail;
        let slice = decoded.get(from..from + take).ok_or(SquashfsError::Decompress)?;
        self.append(slice)
    }
}
