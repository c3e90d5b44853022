//! Primitive encodings of the Kafka wire protocol
//!
//! ```text
//! int8/int16/int32/int64  big-endian
//! string                  int16 length + UTF-8 bytes
//! nullable string         int16 length, -1 for null
//! bytes                   int32 length + raw bytes
//! nullable bytes          int32 length, -1 for null
//! array                   int32 count + elements, -1 for null
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, FluxwireError};
use crate::Result;

/// A value with a fixed wire encoding
pub trait Wire: Sized {
    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(FluxwireError::protocol(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

macro_rules! wire_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Wire for $ty {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut Bytes) -> Result<Self> {
                ensure(buf, std::mem::size_of::<$ty>(), stringify!($ty))?;
                Ok(buf.$get())
            }
        }
    };
}

wire_int!(i8, put_i8, get_i8);
wire_int!(i16, put_i16, get_i16);
wire_int!(i32, put_i32, get_i32);
wire_int!(i64, put_i64, get_i64);

impl Wire for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i8(*self as i8);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(i8::decode(buf)? != 0)
    }
}

impl Wire for ErrorCode {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.as_i16());
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ErrorCode::from(i16::decode(buf)?))
    }
}

fn decode_str(buf: &mut Bytes, len: usize) -> Result<String> {
    ensure(buf, len, "string")?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FluxwireError::protocol("invalid UTF-8 string"))
}

impl Wire for String {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.len() as i16);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = i16::decode(buf)?;
        if len < 0 {
            return Err(FluxwireError::protocol("null value for non-nullable string"));
        }
        decode_str(buf, len as usize)
    }
}

impl Wire for Option<String> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(s) => s.encode(buf),
            None => buf.put_i16(-1),
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        match i16::decode(buf)? {
            -1 => Ok(None),
            len if len < 0 => Err(FluxwireError::protocol(format!(
                "invalid string length {}",
                len
            ))),
            len => decode_str(buf, len as usize).map(Some),
        }
    }
}

impl Wire for Bytes {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.len() as i32);
        buf.put_slice(self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Option::<Bytes>::decode(buf)?.unwrap_or_default())
    }
}

impl Wire for Option<Bytes> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(b) => b.encode(buf),
            None => buf.put_i32(-1),
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        match i32::decode(buf)? {
            -1 => Ok(None),
            len if len < 0 => Err(FluxwireError::protocol(format!(
                "invalid bytes length {}",
                len
            ))),
            len => {
                ensure(buf, len as usize, "bytes")?;
                Ok(Some(buf.split_to(len as usize)))
            }
        }
    }
}

fn decode_elements<T: Wire>(buf: &mut Bytes, count: i32) -> Result<Vec<T>> {
    // Every element takes at least one byte; refuse counts the buffer cannot hold.
    if count as usize > buf.remaining() {
        return Err(FluxwireError::protocol(format!(
            "array of {} elements exceeds remaining {} bytes",
            count,
            buf.remaining()
        )));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(T::decode(buf)?);
    }
    Ok(items)
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.len() as i32);
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        match i32::decode(buf)? {
            count if count <= 0 => Ok(Vec::new()),
            count => decode_elements(buf, count),
        }
    }
}

impl<T: Wire> Wire for Option<Vec<T>> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(items) => items.encode(buf),
            None => buf.put_i32(-1),
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        match i32::decode(buf)? {
            -1 => Ok(None),
            count if count < 0 => Err(FluxwireError::protocol(format!(
                "invalid array length {}",
                count
            ))),
            count => decode_elements(buf, count).map(Some),
        }
    }
}

/// Declares a protocol struct whose fields are encoded in declaration order.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::protocol::wire::Wire for $name {
            #[allow(unused_variables)]
            fn encode(&self, buf: &mut ::bytes::BytesMut) {
                $( $crate::protocol::wire::Wire::encode(&self.$field, buf); )*
            }

            #[allow(unused_variables)]
            fn decode(buf: &mut ::bytes::Bytes) -> $crate::Result<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::protocol::wire::Wire>::decode(buf)?, )*
                })
            }
        }
    };
}

pub(crate) use wire_struct;

/// Encode a value into a standalone buffer
pub fn to_bytes<T: Wire>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_string() {
        let mut buf = BytesMut::new();
        Option::<String>::None.encode(&mut buf);
        Some("client".to_string()).encode(&mut buf);
        assert_eq!(&buf[..2], &[0xff, 0xff]);

        let mut bytes = buf.freeze();
        assert_eq!(Option::<String>::decode(&mut bytes).unwrap(), None);
        assert_eq!(
            Option::<String>::decode(&mut bytes).unwrap().as_deref(),
            Some("client")
        );
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let encoded = to_bytes(&String::new());
        assert_eq!(&encoded[..], &[0, 0]);
    }

    #[test]
    fn test_nullable_bytes() {
        let mut buf = BytesMut::new();
        Option::<Bytes>::None.encode(&mut buf);
        assert_eq!(&buf[..], &(-1i32).to_be_bytes());

        let mut bytes = to_bytes(&Some(Bytes::from_static(b"abc")));
        assert_eq!(
            Option::<Bytes>::decode(&mut bytes).unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn test_truncated_input() {
        let mut bytes = Bytes::from_static(&[0, 5, b'a', b'b']);
        assert!(String::decode(&mut bytes).is_err());

        let mut bytes = Bytes::from_static(&[0, 0, 0]);
        assert!(i32::decode(&mut bytes).is_err());
    }

    #[test]
    fn test_array_count_guard() {
        // claims a billion elements with four bytes of payload
        let mut bytes = Bytes::from_static(&[0x40, 0, 0, 0, 1, 2, 3, 4]);
        assert!(Vec::<i32>::decode(&mut bytes).is_err());
    }

    wire_struct! {
        pub struct Sample {
            pub id: i32,
            pub name: Option<String>,
            pub values: Vec<i64>,
        }
    }

    #[test]
    fn test_wire_struct_field_order() {
        let sample = Sample {
            id: 7,
            name: Some("x".into()),
            values: vec![1, 2],
        };
        let encoded = to_bytes(&sample);
        assert_eq!(&encoded[..4], &7i32.to_be_bytes());
        assert_eq!(&encoded[4..7], &[0, 1, b'x']);
        let decoded = Sample::decode(&mut encoded.clone()).unwrap();
        assert_eq!(decoded, sample);
    }
}
