//! Batch compression codecs
//!
//! The codec id lives in bits 0-2 of the batch attributes and applies to
//! the whole records section of a batch.
//!
//! - **None** (0)
//! - **GZIP** (1): deflate in a gzip container
//! - **Snappy** (2): xerial-framed on write; raw or xerial-framed on read
//! - **LZ4** (3): LZ4 frame format
//! - **ZSTD** (4)

use std::io::{Read, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::CodecError;

/// Compression codec of a record batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
    Snappy = 2,
    Lz4 = 3,
    Zstd = 4,
}

/// Mask of the codec bits in the batch attributes
pub const CODEC_MASK: i16 = 0x07;

const XERIAL_MAGIC: [u8; 8] = [0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0];
const XERIAL_HEADER_LEN: usize = 16;
const XERIAL_BLOCK_SIZE: usize = 32 * 1024;

impl TryFrom<u8> for Compression {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Snappy),
            3 => Ok(Compression::Lz4),
            4 => Ok(Compression::Zstd),
            _ => Err(CodecError::UnsupportedCompression(value)),
        }
    }
}

impl Compression {
    /// Codec named by the low bits of batch attributes
    pub fn from_attributes(attributes: i16) -> Result<Self, CodecError> {
        Self::try_from((attributes & CODEC_MASK) as u8)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn compress(self, data: &[u8]) -> Result<Bytes, CodecError> {
        match self {
            Compression::None => Ok(Bytes::copy_from_slice(data)),
            Compression::Gzip => compress_gzip(data),
            Compression::Snappy => compress_snappy(data),
            Compression::Lz4 => compress_lz4(data),
            Compression::Zstd => compress_zstd(data),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Bytes, CodecError> {
        match self {
            Compression::None => Ok(Bytes::copy_from_slice(data)),
            Compression::Gzip => decompress_gzip(data),
            Compression::Snappy => decompress_snappy(data),
            Compression::Lz4 => decompress_lz4(data),
            Compression::Zstd => decompress_zstd(data),
        }
    }
}

fn failed(e: impl std::fmt::Display) -> CodecError {
    CodecError::Compression(e.to_string())
}

fn compress_gzip(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = flate2::write::GzEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::fast(),
    );
    encoder.write_all(data).map_err(failed)?;
    Ok(Bytes::from(encoder.finish().map_err(failed)?))
}

fn decompress_gzip(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut buffer = Vec::with_capacity(data.len() * 2);
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut buffer)
        .map_err(failed)?;
    Ok(Bytes::from(buffer))
}

/// Xerial framing: 16-byte header, then `len:int32 block` chunks
fn compress_snappy(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = snap::raw::Encoder::new();
    let mut out = Vec::with_capacity(XERIAL_HEADER_LEN + data.len() / 2);
    out.extend_from_slice(&XERIAL_MAGIC);
    out.extend_from_slice(&1i32.to_be_bytes());
    out.extend_from_slice(&1i32.to_be_bytes());

    for chunk in data.chunks(XERIAL_BLOCK_SIZE) {
        let block = encoder.compress_vec(chunk).map_err(failed)?;
        out.extend_from_slice(&(block.len() as i32).to_be_bytes());
        out.extend_from_slice(&block);
    }
    Ok(Bytes::from(out))
}

fn decompress_snappy(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut decoder = snap::raw::Decoder::new();
    if data.len() < XERIAL_HEADER_LEN || data[..XERIAL_MAGIC.len()] != XERIAL_MAGIC {
        return decoder.decompress_vec(data).map(Bytes::from).map_err(failed);
    }

    let mut out = Vec::new();
    let mut rest = &data[XERIAL_HEADER_LEN..];
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(CodecError::Truncated("snappy block length"));
        }
        let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if len < 0 || len as usize > rest.len() - 4 {
            return Err(CodecError::Truncated("snappy block"));
        }
        let (block, tail) = rest[4..].split_at(len as usize);
        out.extend_from_slice(&decoder.decompress_vec(block).map_err(failed)?);
        rest = tail;
    }
    Ok(Bytes::from(out))
}

fn compress_lz4(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(data.len() / 2));
    encoder.write_all(data).map_err(failed)?;
    Ok(Bytes::from(encoder.finish().map_err(failed)?))
}

fn decompress_lz4(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut buffer = Vec::with_capacity(data.len() * 2);
    lz4_flex::frame::FrameDecoder::new(data)
        .read_to_end(&mut buffer)
        .map_err(failed)?;
    Ok(Bytes::from(buffer))
}

fn compress_zstd(data: &[u8]) -> Result<Bytes, CodecError> {
    zstd::encode_all(data, 3).map(Bytes::from).map_err(failed)
}

fn decompress_zstd(data: &[u8]) -> Result<Bytes, CodecError> {
    zstd::decode_all(data).map(Bytes::from).map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Compression; 5] = [
        Compression::None,
        Compression::Gzip,
        Compression::Snappy,
        Compression::Lz4,
        Compression::Zstd,
    ];

    #[test]
    fn test_codecs_restore_input() {
        let data = b"fluxwire ".repeat(10_000);
        for codec in ALL {
            let compressed = codec.compress(&data).unwrap();
            if codec != Compression::None {
                assert!(compressed.len() < data.len(), "{:?} did not shrink", codec);
            }
            assert_eq!(codec.decompress(&compressed).unwrap(), &data[..], "{:?}", codec);
        }
    }

    #[test]
    fn test_empty_input() {
        for codec in ALL {
            let compressed = codec.compress(&[]).unwrap();
            assert!(codec.decompress(&compressed).unwrap().is_empty(), "{:?}", codec);
        }
    }

    #[test]
    fn test_snappy_writes_xerial_frames() {
        let data = vec![7u8; XERIAL_BLOCK_SIZE * 2 + 10];
        let compressed = Compression::Snappy.compress(&data).unwrap();
        assert_eq!(&compressed[..8], &XERIAL_MAGIC);
        assert_eq!(Compression::Snappy.decompress(&compressed).unwrap(), &data[..]);
    }

    #[test]
    fn test_snappy_reads_raw_blocks() {
        let raw = snap::raw::Encoder::new()
            .compress_vec(b"raw snappy block")
            .unwrap();
        assert_eq!(
            Compression::Snappy.decompress(&raw).unwrap(),
            &b"raw snappy block"[..]
        );
    }

    #[test]
    fn test_codec_from_attributes() {
        assert_eq!(Compression::from_attributes(0x0022).unwrap(), Compression::Snappy);
        assert_eq!(Compression::from_attributes(0x0004).unwrap(), Compression::Zstd);
        assert_eq!(
            Compression::from_attributes(0x0006),
            Err(CodecError::UnsupportedCompression(6))
        );
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        for codec in [Compression::Gzip, Compression::Lz4, Compression::Zstd] {
            assert!(codec.decompress(b"definitely not compressed").is_err());
        }
    }
}
