//! Row representation for query results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use mycat_protocol::resultset::{
    ColumnMetaData, FieldType, decode_double, decode_float, decode_octets, decode_set,
    decode_sint, decode_string, decode_uint,
};

use crate::error::{Error, Result};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name (alias).
    pub name: String,
    /// Column index.
    pub index: usize,
    /// Wire type.
    pub field_type: FieldType,
    /// Table alias.
    pub table: String,
    /// Schema name.
    pub schema: String,
    /// Declared length.
    pub length: u32,
    /// Digits after the decimal point.
    pub fractional_digits: u32,
    /// Column flags.
    pub flags: u32,
}

impl Column {
    pub(crate) fn from_metadata(index: usize, meta: ColumnMetaData) -> Self {
        Self {
            name: meta.name,
            index,
            field_type: meta.field_type,
            table: meta.table,
            schema: meta.schema,
            length: meta.length,
            fractional_digits: meta.fractional_digits,
            flags: meta.flags,
        }
    }

    /// SQL-ish type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.field_type {
            FieldType::Sint => "BIGINT",
            FieldType::Uint => "BIGINT UNSIGNED",
            FieldType::Double => "DOUBLE",
            FieldType::Float => "FLOAT",
            FieldType::Bytes => "VARCHAR",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
            FieldType::Set => "SET",
            FieldType::Enum => "ENUM",
            FieldType::Bit => "BIT",
            FieldType::Decimal => "DECIMAL",
        }
    }
}

/// Which columns of a result the caller has looked at.
#[derive(Debug, Default)]
pub(crate) struct ColumnUsage {
    read: Vec<AtomicBool>,
}

impl ColumnUsage {
    pub(crate) fn new(columns: usize) -> Self {
        Self {
            read: (0..columns).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    fn mark(&self, index: usize) {
        if let Some(flag) = self.read.get(index) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    pub(crate) fn unread(&self) -> Vec<usize> {
        self.read
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Conversion from a raw row field.
pub trait FromField: Sized {
    /// Convert `raw`, a non-NULL value of `column`.
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self>;

    /// Convert a value that may be NULL.
    fn from_nullable(column: &Column, raw: &Bytes) -> Result<Option<Self>> {
        if raw.is_empty() {
            Ok(None)
        } else {
            Self::from_field(column, raw).map(Some)
        }
    }
}

fn mismatch(column: &Column, target: &str) -> Error {
    Error::InvalidArgument(format!(
        "column '{}' of type {} cannot be read as {target}",
        column.name,
        column.type_name()
    ))
}

/// Unpack a packed BCD decimal: one scale byte, then digits and a sign nibble.
fn decode_decimal(raw: &Bytes) -> Result<String> {
    let (&scale, packed) = raw
        .split_first()
        .ok_or_else(|| Error::InvalidArgument("empty decimal".into()))?;
    let mut digits = String::new();
    let mut negative = false;
    'outer: for byte in packed {
        for nibble in [byte >> 4, byte & 0x0F] {
            match nibble {
                0..=9 => digits.push(char::from(b'0' + nibble)),
                0x0B | 0x0D => {
                    negative = true;
                    break 'outer;
                }
                _ => break 'outer,
            }
        }
    }
    let scale = usize::from(scale);
    while digits.len() <= scale {
        digits.insert(0, '0');
    }
    if scale > 0 {
        digits.insert(digits.len() - scale, '.');
    }
    if negative {
        digits.insert(0, '-');
    }
    Ok(digits)
}

impl FromField for i64 {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Sint => Ok(decode_sint(raw)?),
            FieldType::Uint | FieldType::Bit => i64::try_from(decode_uint(raw)?)
                .map_err(|_| mismatch(column, "i64")),
            FieldType::Bytes | FieldType::Decimal => String::from_field(column, raw)?
                .parse()
                .map_err(|_| mismatch(column, "i64")),
            _ => Err(mismatch(column, "i64")),
        }
    }
}

impl FromField for u64 {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Uint | FieldType::Bit => Ok(decode_uint(raw)?),
            FieldType::Sint => {
                u64::try_from(decode_sint(raw)?).map_err(|_| mismatch(column, "u64"))
            }
            FieldType::Bytes | FieldType::Decimal => String::from_field(column, raw)?
                .parse()
                .map_err(|_| mismatch(column, "u64")),
            _ => Err(mismatch(column, "u64")),
        }
    }
}

impl FromField for f64 {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Double => Ok(decode_double(raw)?),
            FieldType::Float => Ok(f64::from(decode_float(raw)?)),
            FieldType::Sint => Ok(decode_sint(raw)? as f64),
            FieldType::Uint => Ok(decode_uint(raw)? as f64),
            FieldType::Decimal | FieldType::Bytes => String::from_field(column, raw)?
                .parse()
                .map_err(|_| mismatch(column, "f64")),
            _ => Err(mismatch(column, "f64")),
        }
    }
}

impl FromField for bool {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Sint => Ok(decode_sint(raw)? != 0),
            FieldType::Uint | FieldType::Bit => Ok(decode_uint(raw)? != 0),
            _ => Err(mismatch(column, "bool")),
        }
    }
}

impl FromField for String {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Bytes | FieldType::Enum => Ok(decode_string(raw)?),
            FieldType::Set => Ok(decode_set(raw)?.join(",")),
            FieldType::Decimal => decode_decimal(raw),
            FieldType::Sint => Ok(decode_sint(raw)?.to_string()),
            FieldType::Uint => Ok(decode_uint(raw)?.to_string()),
            FieldType::Double => Ok(decode_double(raw)?.to_string()),
            FieldType::Float => Ok(decode_float(raw)?.to_string()),
            _ => Err(mismatch(column, "String")),
        }
    }
}

impl FromField for Bytes {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        match column.field_type {
            FieldType::Bytes | FieldType::Enum => Ok(decode_octets(raw)?),
            _ => Ok(raw.clone()),
        }
    }
}

impl<T: FromField> FromField for Option<T> {
    fn from_field(column: &Column, raw: &Bytes) -> Result<Self> {
        T::from_nullable(column, raw)
    }

    fn from_nullable(column: &Column, raw: &Bytes) -> Result<Option<Self>> {
        T::from_nullable(column, raw).map(Some)
    }
}

/// A row from a query result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Bytes>,
    usage: Arc<ColumnUsage>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Bytes>, usage: Arc<ColumnUsage>) -> Self {
        Self {
            columns,
            values,
            usage,
        }
    }

    fn column_at(&self, index: usize) -> Result<(&Column, &Bytes)> {
        let column = self.columns.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!("column index {index} out of bounds"))
        })?;
        let raw = self
            .values
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("row has no value at {index}")))?;
        self.usage.mark(index);
        Ok((column, raw))
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidArgument(format!("column '{name}' not found")))
    }

    /// Get a value by column index. NULL is an error unless `T` is an `Option`.
    pub fn get<T: FromField>(&self, index: usize) -> Result<T> {
        let (column, raw) = self.column_at(index)?;
        T::from_nullable(column, raw)?
            .ok_or_else(|| Error::InvalidArgument(format!("column '{}' is NULL", column.name)))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromField>(&self, name: &str) -> Result<T> {
        self.get(self.index_of(name)?)
    }

    /// Try to get a value by column index, returning None if NULL or not found.
    pub fn try_get<T: FromField>(&self, index: usize) -> Option<T> {
        let (column, raw) = self.column_at(index).ok()?;
        T::from_nullable(column, raw).ok().flatten()
    }

    /// Whether the value at `index` is NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_some_and(Bytes::is_empty)
    }

    /// Get the raw field bytes by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&Bytes> {
        self.usage.mark(index);
        self.values.get(index)
    }

    /// Get the number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}
