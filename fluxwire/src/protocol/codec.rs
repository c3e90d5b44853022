//! Length-prefixed frame codecs for `tokio_util::codec::Framed`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::wire::Wire;
use super::{ApiKey, Request, RequestHeader, Response};
use crate::error::FluxwireError;

/// Largest frame accepted unless configured otherwise
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

const SIZE_PREFIX: usize = 4;

/// A request on its way to a broker
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub header: RequestHeader,
    pub request: Request,
}

/// A response whose body is decoded by the waiter that knows its API
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub correlation_id: i32,
    pub body: Bytes,
}

impl ResponseFrame {
    pub fn decode(mut self, api_key: ApiKey) -> crate::Result<Response> {
        let response = Response::decode_body(api_key, &mut self.body)?;
        if !self.body.is_empty() {
            tracing::trace!(
                api = ?api_key,
                trailing = self.body.len(),
                "ignoring trailing bytes in response body"
            );
        }
        Ok(response)
    }
}

/// Splits one size-prefixed frame off `src`, if complete
fn split_frame(src: &mut BytesMut, max_frame_bytes: usize) -> Result<Option<Bytes>, FluxwireError> {
    if src.len() < SIZE_PREFIX {
        return Ok(None);
    }

    let size = (&src[..SIZE_PREFIX]).get_i32();
    if size < 0 || size as usize > max_frame_bytes {
        return Err(FluxwireError::protocol(format!(
            "invalid frame size {} (max {})",
            size, max_frame_bytes
        )));
    }

    let size = size as usize;
    if src.len() < SIZE_PREFIX + size {
        src.reserve(SIZE_PREFIX + size - src.len());
        return Ok(None);
    }

    src.advance(SIZE_PREFIX);
    Ok(Some(src.split_to(size).freeze()))
}

/// Writes `body` behind a size prefix patched in after encoding
fn put_frame(dst: &mut BytesMut, body: impl FnOnce(&mut BytesMut)) {
    let start = dst.len();
    dst.put_i32(0);
    body(dst);
    let size = (dst.len() - start - SIZE_PREFIX) as i32;
    dst[start..start + SIZE_PREFIX].copy_from_slice(&size.to_be_bytes());
}

/// Client side: encodes requests, decodes response frames
#[derive(Debug, Clone)]
pub struct ClientCodec {
    max_frame_bytes: usize,
}

impl ClientCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Encoder<RequestFrame> for ClientCodec {
    type Error = FluxwireError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        put_frame(dst, |buf| {
            item.header.encode(buf);
            item.request.encode_body(buf);
        });
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = FluxwireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut frame) = split_frame(src, self.max_frame_bytes)? else {
            return Ok(None);
        };
        let correlation_id = i32::decode(&mut frame)?;
        Ok(Some(ResponseFrame {
            correlation_id,
            body: frame,
        }))
    }
}

/// Broker side: decodes requests, encodes responses
#[derive(Debug, Clone)]
pub struct ServerCodec {
    max_frame_bytes: usize,
}

impl ServerCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for ServerCodec {
    type Item = RequestFrame;
    type Error = FluxwireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut frame) = split_frame(src, self.max_frame_bytes)? else {
            return Ok(None);
        };
        let header = RequestHeader::decode(&mut frame)?;
        let api_key = ApiKey::from_i16(header.api_key).ok_or_else(|| {
            FluxwireError::protocol(format!("unsupported api key {}", header.api_key))
        })?;
        if header.api_version != api_key.version() {
            return Err(FluxwireError::protocol(format!(
                "unsupported version {} of {:?}",
                header.api_version, api_key
            )));
        }
        let request = Request::decode_body(api_key, &mut frame)?;
        Ok(Some(RequestFrame { header, request }))
    }
}

impl Encoder<(i32, Response)> for ServerCodec {
    type Error = FluxwireError;

    fn encode(&mut self, item: (i32, Response), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (correlation_id, response) = item;
        put_frame(dst, |buf| {
            buf.put_i32(correlation_id);
            response.encode_body(buf);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HeartbeatRequest, HeartbeatResponse, MetadataRequest};

    #[test]
    fn test_request_frame_layout() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                RequestFrame {
                    header: RequestHeader {
                        api_key: ApiKey::Metadata.as_i16(),
                        api_version: 1,
                        correlation_id: 42,
                        client_id: Some("fw".into()),
                    },
                    request: MetadataRequest { topics: None }.into(),
                },
                &mut buf,
            )
            .unwrap();

        // size + key + version + correlation + client id + null topics
        assert_eq!(buf.len(), 4 + 2 + 2 + 4 + 4 + 4);
        assert_eq!(&buf[..4], &((buf.len() - 4) as i32).to_be_bytes());
        assert_eq!(&buf[4..6], &3i16.to_be_bytes());
        assert_eq!(&buf[8..12], &42i32.to_be_bytes());
    }

    #[test]
    fn test_server_and_client_codecs_pair_up() {
        let mut client = ClientCodec::default();
        let mut server = ServerCodec::default();
        let mut wire = BytesMut::new();

        let request: Request = HeartbeatRequest {
            group_id: "g".into(),
            generation_id: 1,
            member_id: "m".into(),
        }
        .into();
        client
            .encode(
                RequestFrame {
                    header: RequestHeader {
                        api_key: ApiKey::Heartbeat.as_i16(),
                        api_version: ApiKey::Heartbeat.version(),
                        correlation_id: 9,
                        client_id: None,
                    },
                    request: request.clone(),
                },
                &mut wire,
            )
            .unwrap();

        let frame = server.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.header.correlation_id, 9);
        assert_eq!(frame.request, request);
        assert!(wire.is_empty());

        server
            .encode((9, HeartbeatResponse::default().into()), &mut wire)
            .unwrap();
        let response = client.decode(&mut wire).unwrap().unwrap();
        assert_eq!(response.correlation_id, 9);
        let decoded = response.decode(ApiKey::Heartbeat).unwrap();
        assert_eq!(decoded, Response::Heartbeat(HeartbeatResponse::default()));
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 8, 0, 0, 0, 1][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 1);
        assert_eq!(frame.body.len(), 4);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = ClientCodec::new(16);
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
