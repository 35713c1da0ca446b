//! Data Fragment support

use deku::prelude::*;

use crate::data::DataSize;

/// On-disk size of a fragment table entry
pub(crate) const SIZE: usize =
    std::mem::size_of::<u64>() + std::mem::size_of::<u32>() + std::mem::size_of::<u32>();

/// One entry of the fragment table. Multiple files may share the block it
/// points at, each with its own byte offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Fragment {
    /// Absolute byte offset of the fragment block in the image
    pub start: u64,
    pub size: DataSize,
    pub unused: u32,
}
