use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use super::{
    get_varint, get_varint_bytes, put_varint, put_varint_bytes, CodecError, Compression, Header,
    Record,
};

/// Message format version written and understood by this codec
pub const MAGIC_V2: i8 = 2;

/// Fixed size of a v2 batch header
pub const BATCH_HEADER_LEN: usize = 61;

/// `baseOffset` plus `batchLength`; the part not counted by `batchLength`
const LOG_OVERHEAD: usize = 12;
const MAGIC_POS: usize = 16;
const CRC_POS: usize = 17;
const ATTRIBUTES_POS: usize = 21;

const TIMESTAMP_TYPE_FLAG: i16 = 0x08;
const TRANSACTIONAL_FLAG: i16 = 0x10;
const CONTROL_FLAG: i16 = 0x20;

/// Timestamp value meaning "no timestamp"
const NO_TIMESTAMP: i64 = -1;

/// Decoded fixed header of a v2 record batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub base_offset: i64,
    pub batch_length: i32,
    pub leader_epoch: i32,
    pub magic: i8,
    pub crc: u32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub record_count: i32,
}

impl BatchHeader {
    /// Parse the header at the start of `batch`
    pub fn parse(mut batch: &[u8]) -> Result<Self, CodecError> {
        if batch.len() < BATCH_HEADER_LEN {
            return Err(CodecError::Truncated("batch header"));
        }
        Ok(Self {
            base_offset: batch.get_i64(),
            batch_length: batch.get_i32(),
            leader_epoch: batch.get_i32(),
            magic: batch.get_i8(),
            crc: batch.get_u32(),
            attributes: batch.get_i16(),
            last_offset_delta: batch.get_i32(),
            first_timestamp: batch.get_i64(),
            max_timestamp: batch.get_i64(),
            producer_id: batch.get_i64(),
            producer_epoch: batch.get_i16(),
            base_sequence: batch.get_i32(),
            record_count: batch.get_i32(),
        })
    }

    pub fn compression(&self) -> Result<Compression, CodecError> {
        Compression::from_attributes(self.attributes)
    }

    pub fn is_control(&self) -> bool {
        self.attributes & CONTROL_FLAG != 0
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & TRANSACTIONAL_FLAG != 0
    }

    /// Broker-assigned timestamps: every record takes `max_timestamp`
    pub fn is_log_append_time(&self) -> bool {
        self.attributes & TIMESTAMP_TYPE_FLAG != 0
    }

    pub fn last_offset(&self) -> i64 {
        self.base_offset + i64::from(self.last_offset_delta)
    }
}

/// Encode `records` as one v2 batch starting at `base_offset`.
///
/// Offset deltas follow the slice order. Timestamps are stored relative
/// to the first record; when no record has a timestamp the batch is
/// written with "no timestamp" and decodes back to `None`. The format has
/// no per-record marker, so a batch where only some records carry a time
/// is rejected with [`CodecError::MixedTimestamps`].
pub fn encode_batch(
    records: &[Record],
    base_offset: i64,
    compression: Compression,
) -> Result<Bytes, CodecError> {
    let timed = records.iter().filter(|r| r.time.is_some()).count();
    if timed != 0 && timed != records.len() {
        return Err(CodecError::MixedTimestamps);
    }
    let first_timestamp = records
        .iter()
        .find_map(|r| r.time)
        .unwrap_or(NO_TIMESTAMP);
    let max_timestamp = records
        .iter()
        .filter_map(|r| r.time)
        .max()
        .unwrap_or(NO_TIMESTAMP);

    let mut body = BytesMut::new();
    let mut scratch = BytesMut::new();
    for (delta, record) in records.iter().enumerate() {
        scratch.clear();
        scratch.put_i8(0);
        put_varint(
            &mut scratch,
            record.time.map_or(0, |t| t.wrapping_sub(first_timestamp)),
        );
        put_varint(&mut scratch, delta as i64);
        put_varint_bytes(&mut scratch, record.key.as_deref());
        put_varint_bytes(&mut scratch, record.value.as_deref());
        put_varint(&mut scratch, record.headers.len() as i64);
        for header in &record.headers {
            put_varint_bytes(&mut scratch, Some(header.key.as_bytes()));
            put_varint_bytes(&mut scratch, header.value.as_deref());
        }

        put_varint(&mut body, scratch.len() as i64);
        body.put_slice(&scratch);
    }
    let body = compression.compress(&body)?;

    let mut buf = BytesMut::with_capacity(BATCH_HEADER_LEN + body.len());
    buf.put_i64(base_offset);
    buf.put_i32(0); // length, patched below
    buf.put_i32(0); // partition leader epoch
    buf.put_i8(MAGIC_V2);
    buf.put_u32(0); // crc, patched below
    buf.put_i16(i16::from(compression.code()));
    buf.put_i32(records.len() as i32 - 1);
    buf.put_i64(first_timestamp);
    buf.put_i64(max_timestamp);
    buf.put_i64(-1); // producer id
    buf.put_i16(-1); // producer epoch
    buf.put_i32(-1); // base sequence
    buf.put_i32(records.len() as i32);
    buf.put_slice(&body);

    let batch_length = (buf.len() - LOG_OVERHEAD) as i32;
    buf[8..LOG_OVERHEAD].copy_from_slice(&batch_length.to_be_bytes());
    let crc = crc32c::crc32c(&buf[ATTRIBUTES_POS..]);
    buf[CRC_POS..ATTRIBUTES_POS].copy_from_slice(&crc.to_be_bytes());

    Ok(buf.freeze())
}

/// Lazy iterator over the records of a fetch payload.
///
/// Only the batch being iterated is decompressed. Control batches and
/// batches of other magic versions are skipped by their length field; a
/// partial batch at the end of the payload (the broker cuts responses at
/// `max_bytes`) ends iteration cleanly. After the first error the reader
/// yields nothing more.
#[derive(Debug, Default)]
pub struct RecordReader {
    data: Bytes,
    batch: Option<BatchCursor>,
    done: bool,
    next_offset: i64,
}

#[derive(Debug)]
struct BatchCursor {
    header: BatchHeader,
    records: Bytes,
    decoded: i32,
}

impl RecordReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            batch: None,
            done: false,
            next_offset: 0,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Bytes of the payload not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Offset following the last complete batch walked so far, skipped
    /// batches included; 0 before any batch
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    fn advance_past(&mut self, last_offset: i64) {
        self.next_offset = self.next_offset.max(last_offset + 1);
    }

    fn next_batch(&mut self) -> Result<Option<BatchCursor>, CodecError> {
        loop {
            if self.data.len() < LOG_OVERHEAD {
                return Ok(None);
            }
            let batch_length = (&self.data[8..LOG_OVERHEAD]).get_i32();
            if batch_length < (MAGIC_POS + 1 - LOG_OVERHEAD) as i32 {
                return Err(CodecError::InvalidLength(i64::from(batch_length)));
            }
            let total = LOG_OVERHEAD + batch_length as usize;
            if self.data.len() < total {
                trace!(
                    available = self.data.len(),
                    needed = total,
                    "partial batch at end of payload"
                );
                self.data.clear();
                return Ok(None);
            }

            let batch = self.data.split_to(total);
            let magic = batch[MAGIC_POS] as i8;
            if magic != MAGIC_V2 {
                // Legacy message sets carry the offset of their last message
                self.advance_past((&batch[..8]).get_i64());
                trace!(magic, "skipping batch with unsupported magic");
                continue;
            }

            let header = BatchHeader::parse(&batch)?;
            let computed = crc32c::crc32c(&batch[ATTRIBUTES_POS..]);
            if computed != header.crc {
                return Err(CodecError::CrcMismatch {
                    expected: header.crc,
                    computed,
                });
            }
            self.advance_past(header.last_offset());
            if header.is_control() {
                trace!(base_offset = header.base_offset, "skipping control batch");
                continue;
            }

            let records = batch.slice(BATCH_HEADER_LEN..);
            let records = match header.compression()? {
                Compression::None => records,
                codec => codec.decompress(&records)?,
            };
            return Ok(Some(BatchCursor {
                header,
                records,
                decoded: 0,
            }));
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Record, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(cursor) = &mut self.batch {
                match cursor.next_record() {
                    Ok(Some(record)) => return Some(Ok(record)),
                    Ok(None) => self.batch = None,
                    Err(e) => {
                        self.done = true;
                        self.batch = None;
                        return Some(Err(e));
                    }
                }
            }

            match self.next_batch() {
                Ok(Some(cursor)) => self.batch = Some(cursor),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl BatchCursor {
    fn next_record(&mut self) -> Result<Option<Record>, CodecError> {
        let declared = self.header.record_count;
        if self.decoded >= declared {
            if !self.records.is_empty() {
                return Err(CodecError::TrailingBytes(self.records.len()));
            }
            return Ok(None);
        }
        if self.records.is_empty() {
            return Err(CodecError::RecordCountMismatch {
                declared,
                decoded: self.decoded,
            });
        }

        let length = get_varint(&mut self.records)?;
        if length < 0 || length as usize > self.records.len() {
            return Err(CodecError::Truncated("record"));
        }
        let mut rec = self.records.split_to(length as usize);
        if !rec.has_remaining() {
            return Err(CodecError::Truncated("record attributes"));
        }
        let _attributes = rec.get_i8();
        let timestamp_delta = get_varint(&mut rec)?;
        let offset_delta = get_varint(&mut rec)?;
        let key = get_varint_bytes(&mut rec)?;
        let value = get_varint_bytes(&mut rec)?;

        let header_count = get_varint(&mut rec)?;
        if header_count < 0 {
            return Err(CodecError::InvalidLength(header_count));
        }
        let mut headers = Vec::with_capacity((header_count as usize).min(rec.remaining()));
        for _ in 0..header_count {
            let key = get_varint_bytes(&mut rec)?.ok_or(CodecError::InvalidHeaderKey)?;
            let key = String::from_utf8(key.to_vec()).map_err(|_| CodecError::InvalidHeaderKey)?;
            let value = get_varint_bytes(&mut rec)?;
            headers.push(Header { key, value });
        }
        if rec.has_remaining() {
            trace!(extra = rec.remaining(), "ignoring trailing record fields");
        }

        let time = if self.header.is_log_append_time() {
            Some(self.header.max_timestamp)
        } else if self.header.first_timestamp == NO_TIMESTAMP {
            None
        } else {
            Some(self.header.first_timestamp.wrapping_add(timestamp_delta))
        };

        self.decoded += 1;
        Ok(Some(Record {
            offset: self.header.base_offset + offset_delta,
            time,
            key,
            value,
            headers,
        }))
    }
}
