//! Scalar and structured values.
//!
//! Values are tagged with a leading varint. Scalars use tags 1 to 8,
//! composite values wrap a scalar, an object or an array.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bytes, get_f32, get_f64, get_seq, get_signed_varint, get_string,
    get_varint, put_bytes, put_f32, put_f64, put_seq, put_signed_varint, put_string, put_varint,
};
use crate::error::ProtocolError;

/// A single typed scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// SQL NULL.
    Null,
    /// Signed 64-bit integer.
    Signed(i64),
    /// Unsigned 64-bit integer.
    Unsigned(u64),
    /// Double precision float.
    Double(f64),
    /// Single precision float.
    Float(f32),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    String(String),
    /// Opaque bytes.
    Octets(Bytes),
}

mod scalar_tag {
    pub const SIGNED: u64 = 1;
    pub const UNSIGNED: u64 = 2;
    pub const NULL: u64 = 3;
    pub const DOUBLE: u64 = 4;
    pub const FLOAT: u64 = 5;
    pub const BOOL: u64 = 6;
    pub const STRING: u64 = 7;
    pub const OCTETS: u64 = 8;
}

impl Encode for Scalar {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Null => put_varint(buf, scalar_tag::NULL),
            Self::Signed(v) => {
                put_varint(buf, scalar_tag::SIGNED);
                put_signed_varint(buf, *v);
            }
            Self::Unsigned(v) => {
                put_varint(buf, scalar_tag::UNSIGNED);
                put_varint(buf, *v);
            }
            Self::Double(v) => {
                put_varint(buf, scalar_tag::DOUBLE);
                put_f64(buf, *v);
            }
            Self::Float(v) => {
                put_varint(buf, scalar_tag::FLOAT);
                put_f32(buf, *v);
            }
            Self::Bool(v) => {
                put_varint(buf, scalar_tag::BOOL);
                put_varint(buf, u64::from(*v));
            }
            Self::String(v) => {
                put_varint(buf, scalar_tag::STRING);
                put_string(buf, v);
            }
            Self::Octets(v) => {
                put_varint(buf, scalar_tag::OCTETS);
                put_bytes(buf, v);
            }
        }
    }
}

impl Decode for Scalar {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match get_varint(src)? {
            scalar_tag::NULL => Self::Null,
            scalar_tag::SIGNED => Self::Signed(get_signed_varint(src)?),
            scalar_tag::UNSIGNED => Self::Unsigned(get_varint(src)?),
            scalar_tag::DOUBLE => Self::Double(get_f64(src)?),
            scalar_tag::FLOAT => Self::Float(get_f32(src)?),
            scalar_tag::BOOL => Self::Bool(get_varint(src)? != 0),
            scalar_tag::STRING => Self::String(get_string(src)?),
            scalar_tag::OCTETS => Self::Octets(get_bytes(src)?),
            tag => return Err(ProtocolError::InvalidTag { kind: "scalar", tag }),
        })
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Signed(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Signed(i64::from(v))
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Self::Unsigned(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Self::Octets(Bytes::from(v))
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One key/value pair of an object value.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    /// Field name.
    pub key: String,
    /// Field value.
    pub value: Any,
}

impl Encode for ObjectField {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.key);
        self.value.encode(buf);
    }
}

impl Decode for ObjectField {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            key: get_string(src)?,
            value: Any::decode(src)?,
        })
    }
}

/// A scalar, an object or an array.
#[derive(Debug, Clone, PartialEq)]
pub enum Any {
    /// A scalar.
    Scalar(Scalar),
    /// Ordered key/value pairs.
    Object(Vec<ObjectField>),
    /// Ordered values.
    Array(Vec<Any>),
}

impl Any {
    /// Build an object from key/value pairs.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Any)>) -> Self {
        Self::Object(
            fields
                .into_iter()
                .map(|(key, value)| ObjectField {
                    key: key.into(),
                    value,
                })
                .collect(),
        )
    }

    /// Append the scalars of this value in depth-first order.
    pub fn flatten_into(&self, out: &mut Vec<Scalar>) {
        match self {
            Self::Scalar(s) => out.push(s.clone()),
            Self::Array(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            Self::Object(fields) => {
                for field in fields {
                    field.value.flatten_into(out);
                }
            }
        }
    }
}

impl From<Scalar> for Any {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

macro_rules! any_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Any {
                fn from(v: $ty) -> Self {
                    Self::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

any_from_scalar!(i64, i32, u64, f64, bool, &str, String, Vec<u8>);

mod any_tag {
    pub const SCALAR: u64 = 1;
    pub const OBJECT: u64 = 2;
    pub const ARRAY: u64 = 3;
}

impl Encode for Any {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Scalar(s) => {
                put_varint(buf, any_tag::SCALAR);
                s.encode(buf);
            }
            Self::Object(fields) => {
                put_varint(buf, any_tag::OBJECT);
                put_seq(buf, fields);
            }
            Self::Array(items) => {
                put_varint(buf, any_tag::ARRAY);
                put_seq(buf, items);
            }
        }
    }
}

impl Decode for Any {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match get_varint(src)? {
            any_tag::SCALAR => Self::Scalar(Scalar::decode(src)?),
            any_tag::OBJECT => Self::Object(get_seq(src)?),
            any_tag::ARRAY => Self::Array(get_seq(src)?),
            tag => return Err(ProtocolError::InvalidTag { kind: "any", tag }),
        })
    }
}
