//! Extended attribute tables
//!
//! Xattrs live in two parallel structures: an id table mapping an inode's
//! xattr index to `(ref, count, size)`, and a key/value region of metablocks
//! the refs point into. Values may be stored out of line, behind one 64-bit
//! reference.

use std::io::Cursor;

use deku::prelude::*;
use deku::reader::Reader;
use tracing::trace;

use crate::archive::Archive;
use crate::error::SquashfsError;
use crate::metablock::{InodeRef, MetablockStream};

/// Value is stored behind a reference instead of inline
const XATTR_INDIRECT: u16 = 0x0100;

const SIZEOF_XATTR_KEY: usize = 4;
const SIZEOF_XATTR_VALUE: usize = 4;

pub(crate) const SIZEOF_XATTR_ID: usize = 16;

/// On-disk size of [`XattrIdTable`]
pub(crate) const SIZEOF_XATTR_ID_TABLE: usize = 16;

/// Header in front of the xattr id lookup table
#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "little")]
pub(crate) struct XattrIdTable {
    /// Absolute start of the key/value metablock region
    pub kv_start: u64,
    /// Number of entries in the id table
    pub xattr_ids: u32,
    pub unused: u32,
}

/// Entry of the xattr id table
#[derive(Debug, DekuRead, Clone, Copy, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct XattrId {
    /// Reference into the key/value region
    pub xattr: u64,
    /// Number of key/value pairs
    pub count: u32,
    /// Uncompressed byte size of the pair list
    pub size: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct XattrKey {
    t: u16,
    name_size: u16,
    #[deku(count = "*name_size")]
    name: Vec<u8>,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct XattrValue {
    size: u32,
    #[deku(count = "*size")]
    value: Vec<u8>,
}

/// Walk the `(name, value)` pairs of one inode.
pub struct XattrIterator<'a> {
    archive: &'a Archive,
    stream: MetablockStream<'a>,
    kv_start: u64,
    remaining: u32,
    consumed: usize,
    current: Option<(XattrKey, XattrValue)>,
}

impl<'a> XattrIterator<'a> {
    /// `xattr_index` is the inode's index into the id table; `None` yields an
    /// empty iterator. Fails with `NoXattrTable` when the image has none.
    pub(crate) fn new(
        archive: &'a Archive,
        xattr_index: Option<u32>,
    ) -> Result<Self, SquashfsError> {
        let (kv_start, table) = archive.xattr_table()?;
        let superblock = archive.superblock();

        let mut stream = MetablockStream::new(archive, kv_start, superblock.bytes_used);
        let remaining = match xattr_index {
            Some(index) => {
                let id = table.get(archive, index as usize)?;
                trace!(index, count = id.count, "xattr listing");
                stream.seek_ref(InodeRef(id.xattr));
                id.count
            }
            None => 0,
        };

        Ok(Self { archive, stream, kv_start, remaining, consumed: 0, current: None })
    }

    fn parse<T>(&mut self, fixed: usize, grow: impl Fn(&T) -> usize) -> Result<T, SquashfsError>
    where
        T: for<'b> DekuReader<'b, deku::ctx::Endian>,
    {
        self.stream.more(self.consumed + fixed)?;
        loop {
            let mut cursor = Cursor::new(&self.stream.data()[self.consumed..]);
            let mut reader = Reader::new(&mut cursor);
            match T::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little) {
                Ok(parsed) => {
                    self.consumed += fixed + grow(&parsed);
                    return Ok(parsed);
                }
                Err(DekuError::Incomplete(_)) => self.stream.more(self.stream.size() + 1)?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Step to the next pair. `Ok(false)` at the end of the listing.
    pub fn advance(&mut self) -> Result<bool, SquashfsError> {
        self.current = None;
        if self.remaining == 0 {
            return Ok(false);
        }
        let key: XattrKey = self.parse(SIZEOF_XATTR_KEY, |key: &XattrKey| key.name.len())?;
        let value: XattrValue =
            self.parse(SIZEOF_XATTR_VALUE, |value: &XattrValue| value.value.len())?;

        self.remaining -= 1;
        self.current = Some((key, value));
        Ok(true)
    }

    fn key(&self) -> &XattrKey {
        &self.current.as_ref().expect("advance() returned true before access").0
    }

    /// Name suffix without the namespace prefix
    pub fn name(&self) -> &[u8] {
        &self.key().name
    }

    /// Namespace prefix string for the current entry
    pub fn prefix(&self) -> Result<&'static str, SquashfsError> {
        match self.key().t & !XATTR_INDIRECT {
            0 => Ok("user."),
            1 => Ok("trusted."),
            2 => Ok("security."),
            _ => Err(SquashfsError::Internal),
        }
    }

    /// `prefix + suffix`, e.g. `user.foo`
    pub fn full_name(&self) -> Result<Vec<u8>, SquashfsError> {
        let prefix = self.prefix()?;
        let mut name = Vec::new();
        name.try_reserve(prefix.len() + self.name().len())?;
        name.extend_from_slice(prefix.as_bytes());
        name.extend_from_slice(self.name());
        Ok(name)
    }

    /// Whether the current value is stored out of line
    pub fn is_indirect(&self) -> bool {
        self.key().t & XATTR_INDIRECT != 0
    }

    /// The current value, following one level of indirection when needed
    pub fn value(&self) -> Result<Vec<u8>, SquashfsError> {
        let (_, value) = self.current.as_ref().expect("advance() returned true before access");
        if !self.is_indirect() {
            return Ok(value.value.clone());
        }

        // the inline payload is a reference to the real value record
        let raw: [u8; 8] =
            value.value.as_slice().try_into().map_err(|_| SquashfsError::Internal)?;
        let value_ref = InodeRef(u64::from_le_bytes(raw));

        let superblock = self.archive.superblock();
        let mut stream = MetablockStream::new(self.archive, self.kv_start, superblock.bytes_used);
        stream.seek_ref(value_ref);
        stream.more(SIZEOF_XATTR_VALUE)?;
        loop {
            let mut cursor = Cursor::new(stream.data());
            let mut reader = Reader::new(&mut cursor);
            match XattrValue::from_reader_with_ctx(&mut reader, deku::ctx::Endian::Little) {
                Ok(value) => return Ok(value.value),
                Err(DekuError::Incomplete(_)) => stream.more(stream.size() + 1)?,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
