//! Prepared statement messages.
//!
//! A prepared statement is a CRUD or SQL message whose literal arguments
//! have been replaced by positional placeholders. [`Execute`] supplies the
//! values for those placeholders; [`PreparableMessage::instantiate`] performs
//! the substitution the server performs so callers can check that a template
//! plus arguments means the same thing as the literal message.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    Decode, Encode, get_bool, get_seq, get_u32, get_varint, put_bool, put_seq, put_varint,
};
use crate::crud::{Delete, Find, Insert, StmtExecute, Update};
use crate::datatypes::{Any, Scalar};
use crate::error::ProtocolError;
use crate::expr::{Expr, Limit, LimitExpr};
use crate::message::{ClientMessage, ClientMessageType};

/// A message that can be prepared.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparableMessage {
    /// CRUD find.
    Find(Find),
    /// CRUD insert.
    Insert(Insert),
    /// CRUD update.
    Update(Update),
    /// CRUD delete.
    Delete(Delete),
    /// SQL statement.
    Stmt(StmtExecute),
}

mod prep_tag {
    pub const FIND: u64 = 0;
    pub const INSERT: u64 = 1;
    pub const UPDATE: u64 = 2;
    pub const DELETE: u64 = 4;
    pub const STMT: u64 = 5;
}

fn scalar_to_u64(value: &Scalar, position: u32) -> Result<u64, ProtocolError> {
    match value {
        Scalar::Unsigned(v) => Ok(*v),
        Scalar::Signed(v) if *v >= 0 => Ok(*v as u64),
        other => Err(ProtocolError::InvalidField {
            field: "limit",
            value: format!("placeholder {position} bound to {other:?}"),
        }),
    }
}

fn resolve_limit(limit_expr: &LimitExpr, args: &[Scalar]) -> Result<Limit, ProtocolError> {
    let value_of = |expr: &Expr| -> Result<u64, ProtocolError> {
        match expr {
            Expr::Placeholder(pos) => {
                let value = args
                    .get(*pos as usize)
                    .ok_or(ProtocolError::MissingArgument {
                        position: *pos,
                        supplied: args.len(),
                    })?;
                scalar_to_u64(value, *pos)
            }
            Expr::Literal(value) => scalar_to_u64(value, 0),
            other => Err(ProtocolError::InvalidField {
                field: "limit",
                value: format!("{other:?}"),
            }),
        }
    };
    Ok(Limit {
        row_count: value_of(&limit_expr.row_count)?,
        offset: limit_expr.offset.as_ref().map(value_of).transpose()?,
    })
}

fn resolve_filter(
    criteria: &mut Option<Expr>,
    args: &mut Vec<Scalar>,
    limit: &mut Option<Limit>,
    limit_expr: &mut Option<LimitExpr>,
) -> Result<(), ProtocolError> {
    if let Some(expr) = criteria {
        expr.bind(args)?;
    }
    if let Some(le) = limit_expr.take() {
        *limit = Some(resolve_limit(&le, args)?);
    }
    args.clear();
    Ok(())
}

impl PreparableMessage {
    /// Wire type of the wrapped message.
    #[must_use]
    pub fn message_type(&self) -> ClientMessageType {
        match self {
            Self::Find(_) => ClientMessageType::CrudFind,
            Self::Insert(_) => ClientMessageType::CrudInsert,
            Self::Update(_) => ClientMessageType::CrudUpdate,
            Self::Delete(_) => ClientMessageType::CrudDelete,
            Self::Stmt(_) => ClientMessageType::StmtExecute,
        }
    }

    /// Substitute every placeholder with its bound argument.
    ///
    /// The result carries only literals: filters are bound against the
    /// message's own `args`, placeholder limits become literal limits and
    /// the argument lists are cleared. SQL statements keep their arguments
    /// since the server binds `?` markers itself.
    pub fn resolve(mut self) -> Result<Self, ProtocolError> {
        match &mut self {
            Self::Find(find) => {
                if let Some(expr) = &mut find.grouping_criteria {
                    expr.bind(&find.args)?;
                }
                resolve_filter(
                    &mut find.criteria,
                    &mut find.args,
                    &mut find.limit,
                    &mut find.limit_expr,
                )?;
            }
            Self::Update(update) => resolve_filter(
                &mut update.criteria,
                &mut update.args,
                &mut update.limit,
                &mut update.limit_expr,
            )?,
            Self::Delete(delete) => resolve_filter(
                &mut delete.criteria,
                &mut delete.args,
                &mut delete.limit,
                &mut delete.limit_expr,
            )?,
            Self::Insert(insert) => {
                for row in &mut insert.rows {
                    for field in &mut row.fields {
                        field.bind(&insert.args)?;
                    }
                }
                insert.args.clear();
            }
            Self::Stmt(_) => {}
        }
        Ok(self)
    }

    /// Apply execution arguments to a template, as the server does.
    pub fn instantiate(&self, args: &[Scalar]) -> Result<Self, ProtocolError> {
        let mut message = self.clone();
        match &mut message {
            Self::Find(find) => find.args = args.to_vec(),
            Self::Update(update) => update.args = args.to_vec(),
            Self::Delete(delete) => delete.args = args.to_vec(),
            Self::Insert(insert) => insert.args = args.to_vec(),
            Self::Stmt(stmt) => stmt.args = args.iter().cloned().map(Any::Scalar).collect(),
        }
        message.resolve()
    }
}

impl Encode for PreparableMessage {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Find(m) => {
                put_varint(buf, prep_tag::FIND);
                m.encode(buf);
            }
            Self::Insert(m) => {
                put_varint(buf, prep_tag::INSERT);
                m.encode(buf);
            }
            Self::Update(m) => {
                put_varint(buf, prep_tag::UPDATE);
                m.encode(buf);
            }
            Self::Delete(m) => {
                put_varint(buf, prep_tag::DELETE);
                m.encode(buf);
            }
            Self::Stmt(m) => {
                put_varint(buf, prep_tag::STMT);
                m.encode(buf);
            }
        }
    }
}

impl Decode for PreparableMessage {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(match get_varint(src)? {
            prep_tag::FIND => Self::Find(Find::decode(src)?),
            prep_tag::INSERT => Self::Insert(Insert::decode(src)?),
            prep_tag::UPDATE => Self::Update(Update::decode(src)?),
            prep_tag::DELETE => Self::Delete(Delete::decode(src)?),
            prep_tag::STMT => Self::Stmt(StmtExecute::decode(src)?),
            tag => return Err(ProtocolError::InvalidTag { kind: "preparable", tag }),
        })
    }
}

/// Register a statement template under a client-chosen id.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepare {
    /// Statement id.
    pub stmt_id: u32,
    /// Template.
    pub stmt: PreparableMessage,
}

impl Encode for Prepare {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.stmt_id));
        self.stmt.encode(buf);
    }
}

impl Decode for Prepare {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            stmt_id: get_u32(src, "statement id")?,
            stmt: PreparableMessage::decode(src)?,
        })
    }
}

impl ClientMessage for Prepare {
    const TYPE: ClientMessageType = ClientMessageType::Prepare;
}

/// Execute a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Execute {
    /// Statement id.
    pub stmt_id: u32,
    /// Positional arguments, already flattened.
    pub args: Vec<Any>,
    /// Ask for reduced column metadata.
    pub compact_metadata: bool,
}

impl Execute {
    /// Build an execute message, flattening nested arrays depth-first.
    pub fn new(stmt_id: u32, args: &[Any]) -> Self {
        let mut flat = Vec::new();
        for arg in args {
            arg.flatten_into(&mut flat);
        }
        Self {
            stmt_id,
            args: flat.into_iter().map(Any::Scalar).collect(),
            compact_metadata: false,
        }
    }

    /// Scalar arguments, in order.
    #[must_use]
    pub fn scalars(&self) -> Vec<Scalar> {
        let mut flat = Vec::new();
        for arg in &self.args {
            arg.flatten_into(&mut flat);
        }
        flat
    }
}

impl Encode for Execute {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.stmt_id));
        put_seq(buf, &self.args);
        put_bool(buf, self.compact_metadata);
    }
}

impl Decode for Execute {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            stmt_id: get_u32(src, "statement id")?,
            args: get_seq(src)?,
            compact_metadata: get_bool(src)?,
        })
    }
}

impl ClientMessage for Execute {
    const TYPE: ClientMessageType = ClientMessageType::PrepareExecute;
}

/// Release a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deallocate {
    /// Statement id.
    pub stmt_id: u32,
}

impl Encode for Deallocate {
    fn encode(&self, buf: &mut BytesMut) {
        put_varint(buf, u64::from(self.stmt_id));
    }
}

impl Decode for Deallocate {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            stmt_id: get_u32(src, "statement id")?,
        })
    }
}

impl ClientMessage for Deallocate {
    const TYPE: ClientMessageType = ClientMessageType::Deallocate;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crud::Collection;

    #[test]
    fn test_execute_flattens_nested_arrays() {
        let exec = Execute::new(
            1,
            &[
                Any::from(1i64),
                Any::Array(vec![Any::from(2i64), Any::Array(vec![Any::from(3i64)])]),
            ],
        );
        assert_eq!(exec.args.len(), 3);
        assert_eq!(
            exec.scalars(),
            vec![Scalar::Signed(1), Scalar::Signed(2), Scalar::Signed(3)]
        );
    }

    #[test]
    fn test_instantiate_find_template() {
        let template = PreparableMessage::Find(Find {
            collection: Collection::new("db", "t"),
            criteria: Some(Expr::eq(Expr::column("a"), Expr::Placeholder(1))),
            limit_expr: Some(LimitExpr {
                row_count: Expr::Placeholder(0),
                offset: None,
            }),
            ..Find::default()
        });
        let resolved = template
            .instantiate(&[Scalar::Unsigned(5), Scalar::from("x")])
            .unwrap();
        let PreparableMessage::Find(find) = resolved else {
            panic!("expected find");
        };
        assert_eq!(
            find.criteria,
            Some(Expr::eq(Expr::column("a"), Expr::literal("x")))
        );
        assert_eq!(
            find.limit,
            Some(Limit {
                row_count: 5,
                offset: None
            })
        );
        assert!(find.limit_expr.is_none());
        assert!(find.args.is_empty());
    }

    #[test]
    fn test_instantiate_missing_argument() {
        let template = PreparableMessage::Delete(Delete {
            criteria: Some(Expr::Placeholder(2)),
            ..Delete::default()
        });
        assert!(matches!(
            template.instantiate(&[Scalar::Null]),
            Err(ProtocolError::MissingArgument { position: 2, .. })
        ));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let template = PreparableMessage::Find(Find {
            limit_expr: Some(LimitExpr {
                row_count: Expr::Placeholder(0),
                offset: None,
            }),
            ..Find::default()
        });
        assert!(template.instantiate(&[Scalar::Signed(-1)]).is_err());
    }

    #[test]
    fn test_prepare_roundtrip() {
        let prepare = Prepare {
            stmt_id: 9,
            stmt: PreparableMessage::Stmt(StmtExecute::sql("SELECT ?", Vec::new())),
        };
        let decoded = Prepare::decode_exact(prepare.to_bytes()).unwrap();
        assert_eq!(decoded, prepare);
        assert_eq!(decoded.stmt.message_type(), ClientMessageType::StmtExecute);
    }
}
