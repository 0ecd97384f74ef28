//! Low-level payload primitives.
//!
//! Every message payload is a positional sequence of these primitives:
//! LEB128 varints, zig-zag signed varints, varint-length-prefixed byte
//! strings, single presence bytes for optional fields and count-prefixed
//! sequences.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Types that can be written into a payload buffer.
pub trait Encode {
    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Types that can be read back from a payload buffer.
pub trait Decode: Sized {
    /// Decode one value, advancing `src`.
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError>;

    /// Decode a value that must consume the whole payload.
    fn decode_exact(mut src: Bytes) -> Result<Self, ProtocolError> {
        let value = Self::decode(&mut src)?;
        if src.has_remaining() {
            return Err(ProtocolError::TrailingBytes(src.remaining()));
        }
        Ok(value)
    }
}

fn ensure(src: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::IncompletePayload {
            expected: needed,
            actual: src.remaining(),
        });
    }
    Ok(())
}

/// Write an unsigned LEB128 varint.
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint.
pub fn get_varint(src: &mut Bytes) -> Result<u64, ProtocolError> {
    let mut result: u64 = 0;
    for i in 0..10 {
        ensure(src, 1)?;
        let byte = src.get_u8();
        if i == 9 && byte > 0x01 {
            return Err(ProtocolError::MalformedVarint);
        }
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(ProtocolError::MalformedVarint)
}

/// Write a zig-zag encoded signed varint.
pub fn put_signed_varint(buf: &mut BytesMut, value: i64) {
    put_varint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

/// Read a zig-zag encoded signed varint.
pub fn get_signed_varint(src: &mut Bytes) -> Result<i64, ProtocolError> {
    let raw = get_varint(src)?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

/// Read a varint that must fit in 32 bits.
pub fn get_u32(src: &mut Bytes, field: &'static str) -> Result<u32, ProtocolError> {
    let raw = get_varint(src)?;
    u32::try_from(raw).map_err(|_| ProtocolError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Write a single byte.
pub fn put_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

/// Read a single byte.
pub fn get_u8(src: &mut Bytes) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Write a boolean as one byte.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Read a boolean; any value other than 0 or 1 is rejected.
pub fn get_bool(src: &mut Bytes) -> Result<bool, ProtocolError> {
    match get_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::InvalidField {
            field: "bool",
            value: other.to_string(),
        }),
    }
}

/// Write a little-endian f64.
pub fn put_f64(buf: &mut BytesMut, value: f64) {
    buf.put_f64_le(value);
}

/// Read a little-endian f64.
pub fn get_f64(src: &mut Bytes) -> Result<f64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_f64_le())
}

/// Write a little-endian f32.
pub fn put_f32(buf: &mut BytesMut, value: f32) {
    buf.put_f32_le(value);
}

/// Read a little-endian f32.
pub fn get_f32(src: &mut Bytes) -> Result<f32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_f32_le())
}

/// Write a length-prefixed byte string.
pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Read a length-prefixed byte string without copying.
pub fn get_bytes(src: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = get_varint(src)?;
    let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidField {
        field: "length",
        value: len.to_string(),
    })?;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Write a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Read a length-prefixed UTF-8 string.
pub fn get_string(src: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = get_bytes(src)?;
    String::from_utf8(raw.to_vec()).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Write an optional value behind a presence byte.
pub fn put_opt<T>(buf: &mut BytesMut, value: Option<&T>, mut write: impl FnMut(&mut BytesMut, &T))
where
    T: ?Sized,
{
    match value {
        Some(v) => {
            buf.put_u8(1);
            write(buf, v);
        }
        None => buf.put_u8(0),
    }
}

/// Read an optional value written by [`put_opt`].
pub fn get_opt<T>(
    src: &mut Bytes,
    read: impl FnOnce(&mut Bytes) -> Result<T, ProtocolError>,
) -> Result<Option<T>, ProtocolError> {
    if get_bool(src)? {
        read(src).map(Some)
    } else {
        Ok(None)
    }
}

/// Write a count-prefixed sequence of encodable values.
pub fn put_seq<T: Encode>(buf: &mut BytesMut, items: &[T]) {
    put_varint(buf, items.len() as u64);
    for item in items {
        item.encode(buf);
    }
}

/// Read a count-prefixed sequence of decodable values.
pub fn get_seq<T: Decode>(src: &mut Bytes) -> Result<Vec<T>, ProtocolError> {
    get_seq_with(src, T::decode)
}

/// Read a count-prefixed sequence with a custom element reader.
pub fn get_seq_with<T>(
    src: &mut Bytes,
    mut read: impl FnMut(&mut Bytes) -> Result<T, ProtocolError>,
) -> Result<Vec<T>, ProtocolError> {
    let count = get_varint(src)?;
    // Every element occupies at least one byte, which bounds the allocation.
    let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(src.remaining());
    let mut items = Vec::with_capacity(capacity);
    for _ in 0..count {
        items.push(read(src)?);
    }
    Ok(items)
}

/// Write a count-prefixed sequence of strings.
pub fn put_strings(buf: &mut BytesMut, items: &[String]) {
    put_varint(buf, items.len() as u64);
    for item in items {
        put_string(buf, item);
    }
}

/// Read a count-prefixed sequence of strings.
pub fn get_strings(src: &mut Bytes) -> Result<Vec<String>, ProtocolError> {
    get_seq_with(src, get_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_single_byte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 127);
        assert_eq!(&buf[..], &[0x7F]);
    }

    #[test]
    fn test_varint_multi_byte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0xAC, 0x02]);
        assert_eq!(get_varint(&mut buf.freeze()).unwrap(), 300);
    }

    #[test]
    fn test_varint_truncated() {
        let mut src = Bytes::from_static(&[0x80, 0x80]);
        assert!(matches!(
            get_varint(&mut src),
            Err(ProtocolError::IncompletePayload { .. })
        ));
    }

    #[test]
    fn test_varint_overlong_rejected() {
        let mut src = Bytes::from_static(&[0xFF; 11]);
        assert!(matches!(
            get_varint(&mut src),
            Err(ProtocolError::MalformedVarint)
        ));
    }

    #[test]
    fn test_bool_rejects_garbage() {
        let mut src = Bytes::from_static(&[2]);
        assert!(get_bool(&mut src).is_err());
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut src = Bytes::from_static(&[2, 0xC3, 0x28]);
        assert!(matches!(
            get_string(&mut src),
            Err(ProtocolError::StringEncoding(_))
        ));
    }

    #[test]
    fn test_seq_count_larger_than_payload() {
        // Claims a million strings with no data behind them.
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 1_000_000);
        assert!(get_strings(&mut buf.freeze()).is_err());
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in any::<u64>()) {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            let mut src = buf.freeze();
            prop_assert_eq!(get_varint(&mut src).unwrap(), value);
            prop_assert!(!src.has_remaining());
        }

        #[test]
        fn prop_signed_varint_roundtrip(value in any::<i64>()) {
            let mut buf = BytesMut::new();
            put_signed_varint(&mut buf, value);
            prop_assert_eq!(get_signed_varint(&mut buf.freeze()).unwrap(), value);
        }

        #[test]
        fn prop_get_bytes_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut src = Bytes::from(data);
            let _ = get_bytes(&mut src);
        }
    }
}
