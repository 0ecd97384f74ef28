//! Result set messages and row field decoding.
//!
//! Row fields travel as raw byte strings whose interpretation depends on the
//! column's [`FieldType`]. An empty field is SQL NULL; strings and byte
//! values carry one trailing `\0` so that an empty string stays distinct
//! from NULL.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bytes, get_seq, get_signed_varint, get_string, get_u32, get_varint,
    put_bytes, put_seq, put_string, put_varint,
};
use crate::error::ProtocolError;
use crate::message::{ServerMessage, ServerMessageType};

empty_message!(
    /// A result set ended.
    FetchDone
);
empty_message!(
    /// A result set ended and another one follows.
    FetchDoneMoreResultsets
);
empty_message!(
    /// A result set ended and output parameters follow.
    FetchDoneMoreOutParams
);
empty_message!(
    /// A cursor fetch was suspended.
    FetchSuspended
);
empty_message!(
    /// A statement finished executing.
    StmtExecuteOk
);

impl ServerMessage for FetchDone {
    const TYPE: ServerMessageType = ServerMessageType::FetchDone;
}

impl ServerMessage for FetchDoneMoreResultsets {
    const TYPE: ServerMessageType = ServerMessageType::FetchDoneMoreResultsets;
}

impl ServerMessage for FetchDoneMoreOutParams {
    const TYPE: ServerMessageType = ServerMessageType::FetchDoneMoreOutParams;
}

impl ServerMessage for FetchSuspended {
    const TYPE: ServerMessageType = ServerMessageType::FetchSuspended;
}

impl ServerMessage for StmtExecuteOk {
    const TYPE: ServerMessageType = ServerMessageType::StmtExecuteOk;
}

/// Column wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Zig-zag signed integer.
    Sint = 1,
    /// Unsigned integer.
    Uint = 2,
    /// 8-byte float.
    Double = 5,
    /// 4-byte float.
    Float = 6,
    /// Text or binary, `\0` terminated.
    Bytes = 7,
    /// Time of day.
    Time = 10,
    /// Date or date-time.
    Datetime = 12,
    /// SET value.
    Set = 15,
    /// ENUM value.
    Enum = 16,
    /// BIT value.
    Bit = 17,
    /// Packed decimal.
    Decimal = 18,
}

impl FieldType {
    /// Create from raw value.
    pub fn from_u64(value: u64) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::Sint,
            2 => Self::Uint,
            5 => Self::Double,
            6 => Self::Float,
            7 => Self::Bytes,
            10 => Self::Time,
            12 => Self::Datetime,
            15 => Self::Set,
            16 => Self::Enum,
            17 => Self::Bit,
            18 => Self::Decimal,
            tag => return Err(ProtocolError::InvalidTag { kind: "field type", tag }),
        })
    }
}

/// Column metadata, sent once per column before the rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetaData {
    /// Wire type.
    pub field_type: FieldType,
    /// Column alias.
    pub name: String,
    /// Underlying column name.
    pub original_name: String,
    /// Table alias.
    pub table: String,
    /// Underlying table name.
    pub original_table: String,
    /// Schema name.
    pub schema: String,
    /// Catalog name.
    pub catalog: String,
    /// Collation id for text columns.
    pub collation: u64,
    /// Digits after the decimal point.
    pub fractional_digits: u32,
    /// Display length.
    pub length: u32,
    /// Column flags.
    pub flags: u32,
}

impl ColumnMetaData {
    /// Minimal metadata with just a name and type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            field_type,
            original_name: name.clone(),
            name,
            table: String::new(),
            original_table: String::new(),
            schema: String::new(),
            catalog: "def".to_string(),
            collation: 0,
            fractional_digits: 0,
            length: 0,
            flags: 0,
        }
    }
}

impl Encode for ColumnMetaData {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.field_type as u64);
        put_string(buf, &self.name);
        put_string(buf, &self.original_name);
        put_string(buf, &self.table);
        put_string(buf, &self.original_table);
        put_string(buf, &self.schema);
        put_string(buf, &self.catalog);
        put_varint(buf, self.collation);
        put_varint(buf, u64::from(self.fractional_digits));
        put_varint(buf, u64::from(self.length));
        put_varint(buf, u64::from(self.flags));
    }
}

impl Decode for ColumnMetaData {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            field_type: FieldType::from_u64(get_varint(src)?)?,
            name: get_string(src)?,
            original_name: get_string(src)?,
            table: get_string(src)?,
            original_table: get_string(src)?,
            schema: get_string(src)?,
            catalog: get_string(src)?,
            collation: get_varint(src)?,
            fractional_digits: get_u32(src, "fractional digits")?,
            length: get_u32(src, "length")?,
            flags: get_u32(src, "flags")?,
        })
    }
}

impl ServerMessage for ColumnMetaData {
    const TYPE: ServerMessageType = ServerMessageType::ColumnMetaData;
}

/// One row: a raw byte string per column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    /// Raw field values.
    pub fields: Vec<Bytes>,
}

impl Encode for Row {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.fields.len() as u64);
        for field in &self.fields {
            put_bytes(buf, field);
        }
    }
}

impl Decode for Row {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            fields: crate::codec::get_seq_with(src, get_bytes)?,
        })
    }
}

impl ServerMessage for Row {
    const TYPE: ServerMessageType = ServerMessageType::Row;
}

/// Encoders for raw row fields, used when building rows.
pub mod field {
    use bytes::{BufMut, Bytes, BytesMut};

    use crate::codec::{put_signed_varint, put_varint};

    /// NULL.
    #[must_use]
    pub fn null() -> Bytes {
        Bytes::new()
    }

    /// Signed integer field.
    #[must_use]
    pub fn sint(value: i64) -> Bytes {
        let mut buf = BytesMut::new();
        put_signed_varint(&mut buf, value);
        buf.freeze()
    }

    /// Unsigned integer field.
    #[must_use]
    pub fn uint(value: u64) -> Bytes {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, value);
        buf.freeze()
    }

    /// Double field.
    #[must_use]
    pub fn double(value: f64) -> Bytes {
        Bytes::copy_from_slice(&value.to_le_bytes())
    }

    /// Text field.
    #[must_use]
    pub fn string(value: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}

/// Decode a signed integer field.
pub fn decode_sint(raw: &Bytes) -> Result<i64, ProtocolError> {
    get_signed_varint(&mut raw.clone())
}

/// Decode an unsigned integer field.
pub fn decode_uint(raw: &Bytes) -> Result<u64, ProtocolError> {
    get_varint(&mut raw.clone())
}

/// Decode a double field.
pub fn decode_double(raw: &Bytes) -> Result<f64, ProtocolError> {
    crate::codec::get_f64(&mut raw.clone())
}

/// Decode a float field.
pub fn decode_float(raw: &Bytes) -> Result<f32, ProtocolError> {
    crate::codec::get_f32(&mut raw.clone())
}

/// Strip the trailing `\0` of a byte field.
pub fn decode_octets(raw: &Bytes) -> Result<Bytes, ProtocolError> {
    match raw.last() {
        Some(0) => Ok(raw.slice(..raw.len() - 1)),
        _ => Err(ProtocolError::InvalidField {
            field: "bytes",
            value: "missing terminator".to_string(),
        }),
    }
}

/// Decode a text field.
pub fn decode_string(raw: &Bytes) -> Result<String, ProtocolError> {
    let octets = decode_octets(raw)?;
    String::from_utf8(octets.to_vec()).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Decode a SET field into its members.
pub fn decode_set(raw: &Bytes) -> Result<Vec<String>, ProtocolError> {
    let mut src = raw.clone();
    // 0x01 alone encodes the empty set.
    if src.remaining() == 1 && src[0] == 0x01 {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    while src.has_remaining() {
        items.push(get_string(&mut src)?);
    }
    Ok(items)
}

/// Read a count-prefixed list of column metadata.
pub fn decode_columns(src: &mut Bytes) -> Result<Vec<ColumnMetaData>, ProtocolError> {
    get_seq(src)
}

/// Write a count-prefixed list of column metadata.
pub fn encode_columns(buf: &mut BytesMut, columns: &[ColumnMetaData]) {
    put_seq(buf, columns);
}
