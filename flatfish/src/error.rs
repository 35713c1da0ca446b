//! Errors

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

use crate::compressor::Compressor;

/// Errors generated from library
#[derive(Error, Debug)]
pub enum SquashfsError {
    /// Passthrough for errors raised by the mapping layer. `raw_os_error` is
    /// the POSIX errno when one exists.
    #[error("std io error: {0}")]
    StdIo(#[from] io::Error),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("superblock too small")]
    SuperblockTooSmall,

    #[error("wrong magic")]
    WrongMagic,

    #[error("blocksize mismatch")]
    BlocksizeMismatch,

    #[error("size mismatch")]
    SizeMismatch,

    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(Compressor),

    #[error("compression decompress")]
    Decompress,

    #[error("unknown inode type")]
    UnknownInodeType,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a file")]
    NotAFile,

    #[error("no such file or directory")]
    NoSuchFile,

    #[error("no xattr table")]
    NoXattrTable,

    #[error("no export table")]
    NoExportTable,

    #[error("no fragment table")]
    NoFragmentTable,

    #[error("no compression options")]
    NoCompressionOptions,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("seek out of range")]
    SeekOutOfRange,

    #[error("seek in fragment")]
    SeekInFragment,

    #[error("symlink loop")]
    SymlinkLoop,

    #[error("allocation failed")]
    AllocFailed(#[from] TryReserveError),

    #[error("internal error")]
    Internal,
}

impl SquashfsError {
    /// Human readable description of the error kind, without any payload.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    /// Stable non-zero process exit code, one per kind. Used by the CLIs.
    pub fn report_code(&self) -> u8 {
        use SquashfsError::*;
        match self {
            StdIo(_) => 1,
            SuperblockTooSmall => 2,
            WrongMagic => 3,
            BlocksizeMismatch => 4,
            SizeMismatch => 5,
            UnsupportedCompression(_) => 6,
            Decompress => 7,
            UnknownInodeType => 8,
            NotADirectory => 9,
            NotAFile => 10,
            NoSuchFile => 11,
            NoXattrTable => 12,
            NoExportTable => 13,
            NoFragmentTable => 14,
            NoCompressionOptions => 15,
            IntegerOverflow => 16,
            SeekOutOfRange => 17,
            SeekInFragment => 18,
            SymlinkLoop => 19,
            AllocFailed(_) => 20,
            Deku(_) | Internal => 21,
        }
    }
}

impl From<SquashfsError> for io::Error {
    fn from(value: SquashfsError) -> Self {
        use SquashfsError::*;
        match value {
            StdIo(io) => io,
            e @ NoSuchFile => Self::new(io::ErrorKind::NotFound, e),
            e @ UnsupportedCompression(_) => Self::new(io::ErrorKind::Unsupported, e),
            e @ (NotADirectory | NotAFile) => Self::new(io::ErrorKind::InvalidInput, e),
            e => Self::new(io::ErrorKind::InvalidData, e),
        }
    }
}
