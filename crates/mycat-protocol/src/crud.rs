//! CRUD and statement execution messages.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bool, get_opt, get_seq, get_string, get_strings, get_varint, put_bool,
    put_opt, put_seq, put_string, put_strings, put_varint,
};
use crate::datatypes::{Any, Scalar};
use crate::error::ProtocolError;
use crate::expr::{ColumnIdentifier, Expr, Limit, LimitExpr, Order};
use crate::message::{ClientMessage, ClientMessageType};

/// Namespace for plain SQL statements.
pub const SQL_NAMESPACE: &str = "sql";

/// Namespace for administrative commands.
pub const ADMIN_NAMESPACE: &str = "mysqlx";

/// Target of a CRUD operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Collection {
    /// Collection or table name.
    pub name: String,
    /// Schema, when not the session default.
    pub schema: Option<String>,
}

impl Collection {
    /// Collection in the given schema.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Some(schema.into()),
        }
    }
}

impl Encode for Collection {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.name);
        put_opt(buf, self.schema.as_deref(), put_string);
    }
}

impl Decode for Collection {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: get_string(src)?,
            schema: get_opt(src, get_string)?,
        })
    }
}

/// Whether the target holds documents or relational rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataModel {
    /// JSON document collection.
    #[default]
    Document = 1,
    /// Relational table.
    Table = 2,
}

impl Encode for DataModel {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, *self as u64);
    }
}

impl Decode for DataModel {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        match get_varint(src)? {
            1 => Ok(Self::Document),
            2 => Ok(Self::Table),
            tag => Err(ProtocolError::InvalidTag {
                kind: "data model",
                tag,
            }),
        }
    }
}

/// One projected column.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Projected expression.
    pub source: Expr,
    /// Output alias.
    pub alias: Option<String>,
}

impl Encode for Projection {
    fn encode(&self, buf: &mut BytesMut) {
        self.source.encode(buf);
        put_opt(buf, self.alias.as_deref(), put_string);
    }
}

impl Decode for Projection {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            source: Expr::decode(src)?,
            alias: get_opt(src, get_string)?,
        })
    }
}

fn put_opt_expr(buf: &mut BytesMut, expr: Option<&Expr>) {
    put_opt(buf, expr, |b, e| e.encode(b));
}

fn put_limits(buf: &mut BytesMut, limit: Option<&Limit>, limit_expr: Option<&LimitExpr>) {
    put_opt(buf, limit, |b, l| l.encode(b));
    put_opt(buf, limit_expr, |b, l| l.encode(b));
}

/// Read rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Find {
    /// Target.
    pub collection: Collection,
    /// Data model.
    pub data_model: DataModel,
    /// Projection; empty selects everything.
    pub projection: Vec<Projection>,
    /// Filter.
    pub criteria: Option<Expr>,
    /// Values bound to the filter's placeholders.
    pub args: Vec<Scalar>,
    /// Sort order.
    pub order: Vec<Order>,
    /// GROUP BY expressions.
    pub grouping: Vec<Expr>,
    /// HAVING filter.
    pub grouping_criteria: Option<Expr>,
    /// Literal limit.
    pub limit: Option<Limit>,
    /// Placeholder limit, used by templates.
    pub limit_expr: Option<LimitExpr>,
}

impl Encode for Find {
    fn encode(&self, buf: &mut BytesMut) {
        self.collection.encode(buf);
        self.data_model.encode(buf);
        put_seq(buf, &self.projection);
        put_opt_expr(buf, self.criteria.as_ref());
        put_seq(buf, &self.args);
        put_seq(buf, &self.order);
        put_seq(buf, &self.grouping);
        put_opt_expr(buf, self.grouping_criteria.as_ref());
        put_limits(buf, self.limit.as_ref(), self.limit_expr.as_ref());
    }
}

impl Decode for Find {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            collection: Collection::decode(src)?,
            data_model: DataModel::decode(src)?,
            projection: get_seq(src)?,
            criteria: get_opt(src, Expr::decode)?,
            args: get_seq(src)?,
            order: get_seq(src)?,
            grouping: get_seq(src)?,
            grouping_criteria: get_opt(src, Expr::decode)?,
            limit: get_opt(src, Limit::decode)?,
            limit_expr: get_opt(src, LimitExpr::decode)?,
        })
    }
}

impl ClientMessage for Find {
    const TYPE: ClientMessageType = ClientMessageType::CrudFind;
}

/// One inserted row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedRow {
    /// Field values in projection order.
    pub fields: Vec<Expr>,
}

impl TypedRow {
    /// Row of literal values.
    pub fn literals<T: Into<Scalar>>(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            fields: values.into_iter().map(Expr::literal).collect(),
        }
    }
}

impl Encode for TypedRow {
    fn encode(&self, buf: &mut BytesMut) {
        put_seq(buf, &self.fields);
    }
}

impl Decode for TypedRow {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            fields: get_seq(src)?,
        })
    }
}

/// Insert rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Insert {
    /// Target.
    pub collection: Collection,
    /// Data model.
    pub data_model: DataModel,
    /// Column names for table inserts.
    pub projection: Vec<String>,
    /// Rows.
    pub rows: Vec<TypedRow>,
    /// Values bound to placeholders in the rows.
    pub args: Vec<Scalar>,
    /// Replace documents whose id already exists.
    pub upsert: bool,
}

impl Encode for Insert {
    fn encode(&self, buf: &mut BytesMut) {
        self.collection.encode(buf);
        self.data_model.encode(buf);
        put_strings(buf, &self.projection);
        put_seq(buf, &self.rows);
        put_seq(buf, &self.args);
        put_bool(buf, self.upsert);
    }
}

impl Decode for Insert {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            collection: Collection::decode(src)?,
            data_model: DataModel::decode(src)?,
            projection: get_strings(src)?,
            rows: get_seq(src)?,
            args: get_seq(src)?,
            upsert: get_bool(src)?,
        })
    }
}

impl ClientMessage for Insert {
    const TYPE: ClientMessageType = ClientMessageType::CrudInsert;
}

/// Kind of update applied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum UpdateType {
    Set = 1,
    ItemRemove = 2,
    ItemSet = 3,
    ItemReplace = 4,
    ItemMerge = 5,
    ArrayInsert = 6,
    ArrayAppend = 7,
    MergePatch = 8,
}

impl UpdateType {
    /// Create from raw value.
    pub fn from_u64(value: u64) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::Set,
            2 => Self::ItemRemove,
            3 => Self::ItemSet,
            4 => Self::ItemReplace,
            5 => Self::ItemMerge,
            6 => Self::ArrayInsert,
            7 => Self::ArrayAppend,
            8 => Self::MergePatch,
            tag => return Err(ProtocolError::InvalidTag { kind: "update", tag }),
        })
    }
}

/// One field update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    /// Field to change.
    pub source: ColumnIdentifier,
    /// Kind of change.
    pub operation: UpdateType,
    /// New value, absent for removals.
    pub value: Option<Expr>,
}

impl Encode for UpdateOperation {
    fn encode(&self, buf: &mut BytesMut) {
        self.source.encode(buf);
        put_varint(buf, self.operation as u64);
        put_opt_expr(buf, self.value.as_ref());
    }
}

impl Decode for UpdateOperation {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            source: ColumnIdentifier::decode(src)?,
            operation: UpdateType::from_u64(get_varint(src)?)?,
            value: get_opt(src, Expr::decode)?,
        })
    }
}

/// Update rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    /// Target.
    pub collection: Collection,
    /// Data model.
    pub data_model: DataModel,
    /// Filter.
    pub criteria: Option<Expr>,
    /// Values bound to the filter's placeholders.
    pub args: Vec<Scalar>,
    /// Sort order.
    pub order: Vec<Order>,
    /// Literal limit.
    pub limit: Option<Limit>,
    /// Placeholder limit, used by templates.
    pub limit_expr: Option<LimitExpr>,
    /// Changes to apply.
    pub operations: Vec<UpdateOperation>,
}

impl Encode for Update {
    fn encode(&self, buf: &mut BytesMut) {
        self.collection.encode(buf);
        self.data_model.encode(buf);
        put_opt_expr(buf, self.criteria.as_ref());
        put_seq(buf, &self.args);
        put_seq(buf, &self.order);
        put_limits(buf, self.limit.as_ref(), self.limit_expr.as_ref());
        put_seq(buf, &self.operations);
    }
}

impl Decode for Update {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            collection: Collection::decode(src)?,
            data_model: DataModel::decode(src)?,
            criteria: get_opt(src, Expr::decode)?,
            args: get_seq(src)?,
            order: get_seq(src)?,
            limit: get_opt(src, Limit::decode)?,
            limit_expr: get_opt(src, LimitExpr::decode)?,
            operations: get_seq(src)?,
        })
    }
}

impl ClientMessage for Update {
    const TYPE: ClientMessageType = ClientMessageType::CrudUpdate;
}

/// Delete rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delete {
    /// Target.
    pub collection: Collection,
    /// Data model.
    pub data_model: DataModel,
    /// Filter.
    pub criteria: Option<Expr>,
    /// Values bound to the filter's placeholders.
    pub args: Vec<Scalar>,
    /// Sort order.
    pub order: Vec<Order>,
    /// Literal limit.
    pub limit: Option<Limit>,
    /// Placeholder limit, used by templates.
    pub limit_expr: Option<LimitExpr>,
}

impl Encode for Delete {
    fn encode(&self, buf: &mut BytesMut) {
        self.collection.encode(buf);
        self.data_model.encode(buf);
        put_opt_expr(buf, self.criteria.as_ref());
        put_seq(buf, &self.args);
        put_seq(buf, &self.order);
        put_limits(buf, self.limit.as_ref(), self.limit_expr.as_ref());
    }
}

impl Decode for Delete {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            collection: Collection::decode(src)?,
            data_model: DataModel::decode(src)?,
            criteria: get_opt(src, Expr::decode)?,
            args: get_seq(src)?,
            order: get_seq(src)?,
            limit: get_opt(src, Limit::decode)?,
            limit_expr: get_opt(src, LimitExpr::decode)?,
        })
    }
}

impl ClientMessage for Delete {
    const TYPE: ClientMessageType = ClientMessageType::CrudDelete;
}

/// Execute a statement in a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct StmtExecute {
    /// Namespace, normally [`SQL_NAMESPACE`].
    pub namespace: String,
    /// Statement text, `?` marks positional arguments.
    pub stmt: String,
    /// Positional arguments.
    pub args: Vec<Any>,
    /// Ask for reduced column metadata.
    pub compact_metadata: bool,
}

impl StmtExecute {
    /// SQL statement with arguments.
    pub fn sql(stmt: impl Into<String>, args: Vec<Any>) -> Self {
        Self {
            namespace: SQL_NAMESPACE.to_string(),
            stmt: stmt.into(),
            args,
            compact_metadata: false,
        }
    }
}

impl Encode for StmtExecute {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.namespace);
        put_string(buf, &self.stmt);
        put_seq(buf, &self.args);
        put_bool(buf, self.compact_metadata);
    }
}

impl Decode for StmtExecute {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            namespace: get_string(src)?,
            stmt: get_string(src)?,
            args: get_seq(src)?,
            compact_metadata: get_bool(src)?,
        })
    }
}

impl ClientMessage for StmtExecute {
    const TYPE: ClientMessageType = ClientMessageType::StmtExecute;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_find_roundtrip() {
        let find = Find {
            collection: Collection::new("test", "books"),
            data_model: DataModel::Table,
            criteria: Some(Expr::eq(Expr::column("id"), Expr::Placeholder(0))),
            args: vec![Scalar::Signed(7)],
            limit: Some(Limit {
                row_count: 10,
                offset: Some(5),
            }),
            ..Find::default()
        };
        assert_eq!(Find::decode_exact(find.to_bytes()).unwrap(), find);
    }

    #[test]
    fn test_insert_rows() {
        let insert = Insert {
            collection: Collection::new("test", "t"),
            data_model: DataModel::Table,
            projection: vec!["a".into(), "b".into()],
            rows: vec![TypedRow::literals([1i64, 2]), TypedRow::literals([3i64, 4])],
            ..Insert::default()
        };
        let decoded = Insert::decode_exact(insert.to_bytes()).unwrap();
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded, insert);
    }

    #[test]
    fn test_update_operations() {
        let update = Update {
            collection: Collection::new("test", "docs"),
            operations: vec![UpdateOperation {
                source: ColumnIdentifier::member("name"),
                operation: UpdateType::ItemSet,
                value: Some(Expr::literal("x")),
            }],
            ..Update::default()
        };
        assert_eq!(Update::decode_exact(update.to_bytes()).unwrap(), update);
    }

    #[test]
    fn test_stmt_execute_namespace() {
        let stmt = StmtExecute::sql("SELECT ?", vec![Any::from(1i64)]);
        assert_eq!(stmt.namespace, "sql");
        assert_eq!(StmtExecute::decode_exact(stmt.to_bytes()).unwrap(), stmt);
    }
}
