//! Pre-parsed expression trees used by CRUD messages.
//!
//! The driver does not parse expression strings. Callers hand over a tree
//! built with the constructors below and the driver only encodes it, shifts
//! placeholder positions and swaps literals for placeholders when it builds
//! prepared-statement templates.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bool, get_opt, get_seq, get_string, get_u32, get_varint, put_bool,
    put_opt, put_seq, put_string, put_varint,
};
use crate::datatypes::Scalar;
use crate::error::ProtocolError;

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPathItem {
    /// `.member`
    Member(String),
    /// `.*`
    MemberAsterisk,
    /// `[n]`
    ArrayIndex(u32),
    /// `[*]`
    ArrayIndexAsterisk,
    /// `**`
    DoubleAsterisk,
}

impl Encode for DocumentPathItem {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Member(name) => {
                put_varint(buf, 1);
                put_string(buf, name);
            }
            Self::MemberAsterisk => put_varint(buf, 2),
            Self::ArrayIndex(i) => {
                put_varint(buf, 3);
                put_varint(buf, u64::from(*i));
            }
            Self::ArrayIndexAsterisk => put_varint(buf, 4),
            Self::DoubleAsterisk => put_varint(buf, 5),
        }
    }
}

impl Decode for DocumentPathItem {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match get_varint(src)? {
            1 => Self::Member(get_string(src)?),
            2 => Self::MemberAsterisk,
            3 => Self::ArrayIndex(get_u32(src, "array index")?),
            4 => Self::ArrayIndexAsterisk,
            5 => Self::DoubleAsterisk,
            tag => {
                return Err(ProtocolError::InvalidTag {
                    kind: "document path",
                    tag,
                });
            }
        })
    }
}

/// A column or document field reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnIdentifier {
    /// Column name.
    pub name: Option<String>,
    /// Table qualifier.
    pub table_name: Option<String>,
    /// Schema qualifier.
    pub schema_name: Option<String>,
    /// Path into a document column.
    pub document_path: Vec<DocumentPathItem>,
}

impl ColumnIdentifier {
    /// A plain column name.
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A top-level document member.
    pub fn member(name: impl Into<String>) -> Self {
        Self {
            document_path: vec![DocumentPathItem::Member(name.into())],
            ..Self::default()
        }
    }
}

impl Encode for ColumnIdentifier {
    fn encode(&self, buf: &mut BytesMut) {
        put_opt(buf, self.name.as_deref(), put_string);
        put_opt(buf, self.table_name.as_deref(), put_string);
        put_opt(buf, self.schema_name.as_deref(), put_string);
        put_seq(buf, &self.document_path);
    }
}

impl Decode for ColumnIdentifier {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: get_opt(src, get_string)?,
            table_name: get_opt(src, get_string)?,
            schema_name: get_opt(src, get_string)?,
            document_path: get_seq(src)?,
        })
    }
}

/// A key/expression pair of an object expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExprField {
    /// Field name.
    pub key: String,
    /// Field value.
    pub value: Expr,
}

impl Encode for ObjectExprField {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.key);
        self.value.encode(buf);
    }
}

impl Decode for ObjectExprField {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            key: get_string(src)?,
            value: Expr::decode(src)?,
        })
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column or document field.
    Identifier(ColumnIdentifier),
    /// Session variable.
    Variable(String),
    /// Literal value.
    Literal(Scalar),
    /// Function call.
    FuncCall {
        /// Optional schema qualifier.
        schema: Option<String>,
        /// Function name.
        name: String,
        /// Arguments.
        params: Vec<Expr>,
    },
    /// Operator application, e.g. `==`, `&&`, `in`.
    Operator {
        /// Operator name.
        name: String,
        /// Operands.
        params: Vec<Expr>,
    },
    /// Positional placeholder bound at execution time.
    Placeholder(u32),
    /// Object constructor.
    Object(Vec<ObjectExprField>),
    /// Array constructor.
    Array(Vec<Expr>),
}

mod expr_tag {
    pub const IDENT: u64 = 1;
    pub const VARIABLE: u64 = 2;
    pub const LITERAL: u64 = 3;
    pub const FUNC_CALL: u64 = 4;
    pub const OPERATOR: u64 = 5;
    pub const PLACEHOLDER: u64 = 6;
    pub const OBJECT: u64 = 7;
    pub const ARRAY: u64 = 8;
}

impl Expr {
    /// Column reference.
    pub fn column(name: impl Into<String>) -> Self {
        Self::Identifier(ColumnIdentifier::column(name))
    }

    /// Document member reference.
    pub fn member(name: impl Into<String>) -> Self {
        Self::Identifier(ColumnIdentifier::member(name))
    }

    /// Literal value.
    pub fn literal(value: impl Into<Scalar>) -> Self {
        Self::Literal(value.into())
    }

    /// Binary operator.
    pub fn binary(op: impl Into<String>, lhs: Expr, rhs: Expr) -> Self {
        Self::Operator {
            name: op.into(),
            params: vec![lhs, rhs],
        }
    }

    /// `lhs == rhs`
    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::binary("==", lhs, rhs)
    }

    /// `lhs && rhs`
    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::binary("&&", lhs, rhs)
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Self::FuncCall { params, .. } | Self::Operator { params, .. } | Self::Array(params) => {
                params.iter_mut().collect()
            }
            Self::Object(fields) => fields.iter_mut().map(|f| &mut f.value).collect(),
            Self::Identifier(_) | Self::Variable(_) | Self::Literal(_) | Self::Placeholder(_) => {
                Vec::new()
            }
        }
    }

    /// Add `offset` to every placeholder position.
    pub fn shift_placeholders(&mut self, offset: u32) {
        if let Self::Placeholder(pos) = self {
            *pos += offset;
            return;
        }
        for child in self.children_mut() {
            child.shift_placeholders(offset);
        }
    }

    /// Replace every literal with the next placeholder position, collecting
    /// the literal values in traversal order.
    pub fn extract_literals(&mut self, next: &mut u32, out: &mut Vec<Scalar>) {
        if let Self::Literal(value) = self {
            out.push(std::mem::replace(value, Scalar::Null));
            *self = Self::Placeholder(*next);
            *next += 1;
            return;
        }
        for child in self.children_mut() {
            child.extract_literals(next, out);
        }
    }

    /// Replace every placeholder with the argument at its position.
    pub fn bind(&mut self, args: &[Scalar]) -> Result<(), ProtocolError> {
        if let Self::Placeholder(pos) = self {
            let value = args
                .get(*pos as usize)
                .ok_or(ProtocolError::MissingArgument {
                    position: *pos,
                    supplied: args.len(),
                })?;
            *self = Self::Literal(value.clone());
            return Ok(());
        }
        for child in self.children_mut() {
            child.bind(args)?;
        }
        Ok(())
    }

    /// Number of distinct placeholder slots referenced (highest position + 1).
    #[must_use]
    pub fn placeholder_slots(&self) -> u32 {
        match self {
            Self::Placeholder(pos) => pos + 1,
            Self::FuncCall { params, .. } | Self::Operator { params, .. } | Self::Array(params) => {
                params.iter().map(Self::placeholder_slots).max().unwrap_or(0)
            }
            Self::Object(fields) => fields
                .iter()
                .map(|f| f.value.placeholder_slots())
                .max()
                .unwrap_or(0),
            Self::Identifier(_) | Self::Variable(_) | Self::Literal(_) => 0,
        }
    }
}

impl Encode for Expr {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Identifier(id) => {
                put_varint(buf, expr_tag::IDENT);
                id.encode(buf);
            }
            Self::Variable(name) => {
                put_varint(buf, expr_tag::VARIABLE);
                put_string(buf, name);
            }
            Self::Literal(value) => {
                put_varint(buf, expr_tag::LITERAL);
                value.encode(buf);
            }
            Self::FuncCall {
                schema,
                name,
                params,
            } => {
                put_varint(buf, expr_tag::FUNC_CALL);
                put_opt(buf, schema.as_deref(), put_string);
                put_string(buf, name);
                put_seq(buf, params);
            }
            Self::Operator { name, params } => {
                put_varint(buf, expr_tag::OPERATOR);
                put_string(buf, name);
                put_seq(buf, params);
            }
            Self::Placeholder(pos) => {
                put_varint(buf, expr_tag::PLACEHOLDER);
                put_varint(buf, u64::from(*pos));
            }
            Self::Object(fields) => {
                put_varint(buf, expr_tag::OBJECT);
                put_seq(buf, fields);
            }
            Self::Array(items) => {
                put_varint(buf, expr_tag::ARRAY);
                put_seq(buf, items);
            }
        }
    }
}

impl Decode for Expr {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match get_varint(src)? {
            expr_tag::IDENT => Self::Identifier(ColumnIdentifier::decode(src)?),
            expr_tag::VARIABLE => Self::Variable(get_string(src)?),
            expr_tag::LITERAL => Self::Literal(Scalar::decode(src)?),
            expr_tag::FUNC_CALL => Self::FuncCall {
                schema: get_opt(src, get_string)?,
                name: get_string(src)?,
                params: get_seq(src)?,
            },
            expr_tag::OPERATOR => Self::Operator {
                name: get_string(src)?,
                params: get_seq(src)?,
            },
            expr_tag::PLACEHOLDER => Self::Placeholder(get_u32(src, "placeholder")?),
            expr_tag::OBJECT => Self::Object(get_seq(src)?),
            expr_tag::ARRAY => Self::Array(get_seq(src)?),
            tag => return Err(ProtocolError::InvalidTag { kind: "expr", tag }),
        })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Sort key.
    pub expr: Expr,
    /// Sort direction.
    pub direction: Direction,
}

impl Encode for Order {
    fn encode(&self, buf: &mut BytesMut) {
        self.expr.encode(buf);
        put_bool(buf, self.direction == Direction::Desc);
    }
}

impl Decode for Order {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let expr = Expr::decode(src)?;
        let direction = if get_bool(src)? {
            Direction::Desc
        } else {
            Direction::Asc
        };
        Ok(Self { expr, direction })
    }
}

/// Literal row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    /// Maximum rows.
    pub row_count: u64,
    /// Rows to skip.
    pub offset: Option<u64>,
}

impl Limit {
    /// Number of placeholder slots this limit takes in a template.
    #[must_use]
    pub fn slots(&self) -> u32 {
        if self.offset.is_some() { 2 } else { 1 }
    }
}

impl Encode for Limit {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, self.row_count);
        put_opt(buf, self.offset.as_ref(), |b, v| put_varint(b, *v));
    }
}

impl Decode for Limit {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            row_count: get_varint(src)?,
            offset: get_opt(src, get_varint)?,
        })
    }
}

/// Row limit expressed as expressions, used by templates.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitExpr {
    /// Maximum rows.
    pub row_count: Expr,
    /// Rows to skip.
    pub offset: Option<Expr>,
}

impl Encode for LimitExpr {
    fn encode(&self, buf: &mut BytesMut) {
        self.row_count.encode(buf);
        put_opt(buf, self.offset.as_ref(), |b, v| v.encode(b));
    }
}

impl Decode for LimitExpr {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            row_count: Expr::decode(src)?,
            offset: get_opt(src, Expr::decode)?,
        })
    }
}
