//! 32 bit user and group IDs

use deku::prelude::*;

/// Entry of the id lookup table. Inodes store 16-bit indexes into this table
/// instead of raw uid/gid values.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Id {
    pub num: u32,
}

impl Id {
    pub(crate) const SIZE: usize = (u32::BITS / 8) as usize;
}
