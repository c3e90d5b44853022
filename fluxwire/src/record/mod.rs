//! Record batch codec (message format v2)
//!
//! A fetch payload is a sequence of batches; each batch carries a fixed
//! header followed by varint-framed records, optionally compressed as one
//! block. [`encode_batch`] builds a single batch, [`RecordReader`] walks a
//! payload lazily, one batch in memory at a time.

mod batch;
pub mod compression;

pub use batch::{encode_batch, BatchHeader, RecordReader, BATCH_HEADER_LEN, MAGIC_V2};
pub use compression::Compression;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A single record of a partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Absolute offset; meaningful only once a leader accepted the record
    pub offset: i64,
    /// Milliseconds since the epoch, `None` for "no timestamp"
    pub time: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl Record {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_time(mut self, time_ms: i64) -> Self {
        self.time = Some(time_ms);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }
}

/// Record header; keys are strings, values nullable bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Bytes>,
}

/// Errors raised while encoding or decoding record batches
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("batch CRC mismatch: header says {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("batch declares {declared} records but {decoded} were decoded")]
    RecordCountMismatch { declared: i32, decoded: i32 },

    #[error("{0} bytes left after the last declared record")]
    TrailingBytes(usize),

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("varint longer than 10 bytes")]
    InvalidVarint,

    #[error("invalid UTF-8 in header key")]
    InvalidHeaderKey,

    #[error("unsupported compression codec {0}")]
    UnsupportedCompression(u8),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("batch mixes records with and without timestamps")]
    MixedTimestamps,
}

/// Append a zigzag varint
pub(crate) fn put_varint(buf: &mut BytesMut, value: i64) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    while zigzag >= 0x80 {
        buf.put_u8((zigzag as u8 & 0x7f) | 0x80);
        zigzag >>= 7;
    }
    buf.put_u8(zigzag as u8);
}

/// Read a zigzag varint
pub(crate) fn get_varint(buf: &mut Bytes) -> Result<i64, CodecError> {
    let mut raw = 0u64;
    for shift in (0..70).step_by(7) {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated("varint"));
        }
        let byte = buf.get_u8();
        raw |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((raw >> 1) as i64 ^ -((raw & 1) as i64));
        }
    }
    Err(CodecError::InvalidVarint)
}

/// Length in bytes of the varint encoding of `value`
pub(crate) fn varint_len(value: i64) -> usize {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    let mut len = 1;
    while zigzag >= 0x80 {
        zigzag >>= 7;
        len += 1;
    }
    len
}

/// Varint-length-prefixed nullable bytes (-1 for null)
pub(crate) fn put_varint_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            put_varint(buf, bytes.len() as i64);
            buf.put_slice(bytes);
        }
        None => put_varint(buf, -1),
    }
}

pub(crate) fn get_varint_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, CodecError> {
    match get_varint(buf)? {
        -1 => Ok(None),
        len if len < 0 => Err(CodecError::InvalidLength(len)),
        len if len as usize > buf.remaining() => Err(CodecError::Truncated("record field")),
        len => Ok(Some(buf.split_to(len as usize))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_encoding_matches_protocol() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x00]),
            (-1, &[0x01]),
            (1, &[0x02]),
            (-64, &[0x7f]),
            (64, &[0x80, 0x01]),
            (300, &[0xd8, 0x04]),
        ];
        for (value, expected) in cases {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, *value);
            assert_eq!(&buf[..], *expected, "encoding {}", value);
            assert_eq!(varint_len(*value), expected.len());
            assert_eq!(get_varint(&mut buf.freeze()).unwrap(), *value);
        }
    }

    #[test]
    fn test_varint_extremes() {
        for value in [i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(get_varint(&mut buf.freeze()).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_errors() {
        assert_eq!(
            get_varint(&mut Bytes::from_static(&[0x80])),
            Err(CodecError::Truncated("varint"))
        );
        assert_eq!(
            get_varint(&mut Bytes::from_static(&[0xff; 11])),
            Err(CodecError::InvalidVarint)
        );
    }

    #[test]
    fn test_nullable_varint_bytes() {
        let mut buf = BytesMut::new();
        put_varint_bytes(&mut buf, None);
        put_varint_bytes(&mut buf, Some(b"hi"));
        let mut bytes = buf.freeze();
        assert_eq!(get_varint_bytes(&mut bytes).unwrap(), None);
        assert_eq!(
            get_varint_bytes(&mut bytes).unwrap(),
            Some(Bytes::from_static(b"hi"))
        );
    }
}
