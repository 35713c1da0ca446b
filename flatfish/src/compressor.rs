//! Types of supported compression algorithms

use deku::prelude::*;
use tracing::trace;
#[cfg(feature = "xz")]
use xz2::stream::{Action, Status, Stream};

use crate::error::SquashfsError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, Default)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[deku(id_type = "u16")]
#[repr(u16)]
#[rustfmt::skip]
pub enum Compressor {
    /// Not part of the on-disk id space, used as the identity extractor for
    /// blocks stored uncompressed
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo =  3,
    #[default]
    Xz =   4,
    Lz4 =  5,
    Zstd = 6,
}

/// Decoder-tuning parameters stored in the first metablock of the payload
/// region when the superblock `COMPRESSOR_OPTIONS` flag is set. Opaque to the
/// decoders in this library, exposed for callers that want them.
#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian, compressor: Compressor")]
#[deku(id = "compressor")]
pub enum CompressionOptions {
    #[deku(id = "Compressor::Gzip")]
    Gzip(Gzip),

    #[deku(id = "Compressor::Lzo")]
    Lzo(Lzo),

    #[deku(id = "Compressor::Xz")]
    Xz(Xz),

    #[deku(id = "Compressor::Lz4")]
    Lz4(Lz4),

    #[deku(id = "Compressor::Zstd")]
    Zstd(Zstd),

    #[deku(id = "Compressor::Lzma")]
    Lzma,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Gzip {
    pub compression_level: u32,
    pub window_size: u16,
    pub strategies: u16,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lzo {
    pub algorithm: u32,
    pub compression_level: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Xz {
    pub dictionary_size: u32,
    pub filters: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lz4 {
    pub version: u32,
    pub flags: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Zstd {
    pub compression_level: u32,
}

/// Decompress `bytes` into `out`, writing at most `out_max` bytes.
///
/// [`Compressor::None`] is the identity. Every decoder failure, including
/// truncated input and output past `out_max`, reports
/// [`SquashfsError::Decompress`].
pub(crate) fn decompress(
    bytes: &[u8],
    out: &mut Vec<u8>,
    out_max: usize,
    compressor: Compressor,
) -> Result<(), SquashfsError> {
    trace!(len = bytes.len(), out_max, ?compressor, "decompress");
    match compressor {
        Compressor::None => {
            if bytes.len() > out_max {
                return Err(SquashfsError::Decompress);
            }
            out.try_reserve(bytes.len())?;
            out.extend_from_slice(bytes);
        }
        #[cfg(feature = "gzip")]
        Compressor::Gzip => {
            use std::io::Read;
            let mut decoder =
                flate2::read::ZlibDecoder::new(bytes).take(out_max as u64 + 1);
            decoder
                .read_to_end(out)
                .map_err(|_| SquashfsError::Decompress)?;
            if out.len() > out_max {
                return Err(SquashfsError::Decompress);
            }
        }
        #[cfg(feature = "xz")]
        Compressor::Xz => {
            let stream =
                Stream::new_stream_decoder(u64::MAX, 0).map_err(|_| SquashfsError::Decompress)?;
            xz_decode(stream, bytes, out, out_max)?;
        }
        #[cfg(feature = "xz")]
        Compressor::Lzma => {
            let stream =
                Stream::new_lzma_decoder(u64::MAX).map_err(|_| SquashfsError::Decompress)?;
            xz_decode(stream, bytes, out, out_max)?;
        }
        #[cfg(feature = "lz4")]
        Compressor::Lz4 => {
            out.try_reserve(out_max)?;
            out.resize(out_max, 0);
            let size = lz4_flex::block::decompress_into(bytes, out)
                .map_err(|_| SquashfsError::Decompress)?;
            out.truncate(size);
        }
        #[cfg(feature = "lzo")]
        Compressor::Lzo => {
            out.try_reserve(out_max)?;
            out.resize(out_max, 0);
            let (written, error) = rust_lzo::LZOContext::decompress_to_slice(bytes, out);
            let size = written.len();
            if error != rust_lzo::LZOError::OK {
                return Err(SquashfsError::Decompress);
            }
            out.truncate(size);
        }
        #[cfg(feature = "zstd")]
        Compressor::Zstd => {
            out.try_reserve(out_max)?;
            let mut decoder =
                zstd::bulk::Decompressor::new().map_err(|_| SquashfsError::Decompress)?;
            decoder
                .decompress_to_buffer(bytes, out)
                .map_err(|_| SquashfsError::Decompress)?;
        }
        _ => return Err(SquashfsError::UnsupportedCompression(compressor)),
    }
    Ok(())
}

#[cfg(feature = "xz")]
fn xz_decode(
    mut stream: Stream,
    bytes: &[u8],
    out: &mut Vec<u8>,
    out_max: usize,
) -> Result<(), SquashfsError> {
    out.try_reserve(out_max)?;
    out.resize(out_max, 0);
    let status = stream
        .process(bytes, out, Action::Finish)
        .map_err(|_| SquashfsError::Decompress)?;
    if !matches!(status, Status::Ok | Status::StreamEnd) {
        return Err(SquashfsError::Decompress);
    }
    out.truncate(stream.total_out() as usize);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_respects_out_max() {
        let mut out = vec![];
        decompress(&[1, 2, 3], &mut out, 3, Compressor::None).unwrap();
        assert_eq!(out, &[1, 2, 3]);

        let mut out = vec![];
        let err = decompress(&[1, 2, 3], &mut out, 2, Compressor::None);
        assert!(matches!(err, Err(SquashfsError::Decompress)));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_round_trip_and_cap() {
        use std::io::Read;

        let plain = vec![0xabu8; 4096];
        let mut deflated = vec![];
        flate2::read::ZlibEncoder::new(&plain[..], flate2::Compression::default())
            .read_to_end(&mut deflated)
            .unwrap();

        let mut out = vec![];
        decompress(&deflated, &mut out, 8192, Compressor::Gzip).unwrap();
        assert_eq!(out, plain);

        // decoded size exceeding out_max must be refused
        let mut out = vec![];
        let err = decompress(&deflated, &mut out, 4095, Compressor::Gzip);
        assert!(matches!(err, Err(SquashfsError::Decompress)));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_garbage_is_decompress_error() {
        let mut out = vec![];
        let err = decompress(&[0xde, 0xad, 0xbe, 0xef], &mut out, 8192, Compressor::Gzip);
        assert!(matches!(err, Err(SquashfsError::Decompress)));
    }
}
