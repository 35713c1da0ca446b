//! NFS export lookup support

use deku::prelude::*;

/// Entry of the export table: the inode reference for inode number
/// `index + 1`.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Export {
    pub num: u64,
}

impl Export {
    pub(crate) const SIZE: usize = (u64::BITS / 8) as usize;
}
