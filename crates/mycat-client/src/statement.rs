//! Prepared statement templating.
//!
//! A statement is prepared from the same fully literal message a direct
//! execution would send. [`PreparedStatement::new`] rewrites every literal
//! argument into a placeholder numbered by its traversal position:
//!
//! - find, update, delete: limit row count, limit offset, then the filter
//!   literals in tree order;
//! - insert: every field of every row, row by row;
//! - SQL: every positional argument in order.
//!
//! Executing the template with [`PreparedStatement::literal_args`] is
//! equivalent to sending the original message.

use mycat_protocol::crud::{Delete, Find, Insert, Update};
use mycat_protocol::expr::{Expr, Limit, LimitExpr};
use mycat_protocol::prepare::{Execute, PreparableMessage};
use mycat_protocol::{Any, Scalar};

use crate::error::Result;

/// A server-side prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    id: u32,
    template: PreparableMessage,
    literal_args: Vec<Scalar>,
}

impl PreparedStatement {
    /// Build the template for `message` under statement id `id`.
    pub fn new(id: u32, message: PreparableMessage) -> Result<Self> {
        let (template, literal_args) = templatize(message)?;
        Ok(Self {
            id,
            template,
            literal_args,
        })
    }

    /// Statement id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Message sent with the prepare request.
    #[must_use]
    pub fn template(&self) -> &PreparableMessage {
        &self.template
    }

    /// Values the placeholders replaced, in placeholder order.
    #[must_use]
    pub fn literal_args(&self) -> &[Scalar] {
        &self.literal_args
    }

    /// Number of values an execution must supply.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.literal_args.len()
    }

    /// Execute request binding `args` positionally.
    #[must_use]
    pub fn execute(&self, args: &[Any]) -> Execute {
        Execute::new(self.id, args)
    }
}

fn limit_template(limit: &mut Option<Limit>, out: &mut Vec<Scalar>) -> (Option<LimitExpr>, u32) {
    let Some(limit) = limit.take() else {
        return (None, 0);
    };
    out.push(Scalar::Unsigned(limit.row_count));
    let offset = limit.offset.map(|offset| {
        out.push(Scalar::Unsigned(offset));
        Expr::Placeholder(1)
    });
    (
        Some(LimitExpr {
            row_count: Expr::Placeholder(0),
            offset,
        }),
        limit.slots(),
    )
}

fn filter_template(
    criteria: &mut Option<Expr>,
    limit: &mut Option<Limit>,
    limit_expr: &mut Option<LimitExpr>,
    out: &mut Vec<Scalar>,
) {
    let (expr, mut next) = limit_template(limit, out);
    *limit_expr = expr;
    if let Some(criteria) = criteria {
        criteria.extract_literals(&mut next, out);
    }
}

/// Rewrite a literal message into a template and the values it replaced.
fn templatize(message: PreparableMessage) -> Result<(PreparableMessage, Vec<Scalar>)> {
    let mut out = Vec::new();
    let template = match message.resolve()? {
        PreparableMessage::Find(mut find) => {
            let Find {
                criteria,
                limit,
                limit_expr,
                ..
            } = &mut find;
            filter_template(criteria, limit, limit_expr, &mut out);
            PreparableMessage::Find(find)
        }
        PreparableMessage::Update(mut update) => {
            let Update {
                criteria,
                limit,
                limit_expr,
                ..
            } = &mut update;
            filter_template(criteria, limit, limit_expr, &mut out);
            PreparableMessage::Update(update)
        }
        PreparableMessage::Delete(mut delete) => {
            let Delete {
                criteria,
                limit,
                limit_expr,
                ..
            } = &mut delete;
            filter_template(criteria, limit, limit_expr, &mut out);
            PreparableMessage::Delete(delete)
        }
        PreparableMessage::Insert(mut insert) => {
            let Insert { rows, .. } = &mut insert;
            let mut next = 0;
            for row in rows {
                for field in &mut row.fields {
                    field.extract_literals(&mut next, &mut out);
                }
            }
            PreparableMessage::Insert(insert)
        }
        PreparableMessage::Stmt(mut stmt) => {
            for arg in std::mem::take(&mut stmt.args) {
                arg.flatten_into(&mut out);
            }
            PreparableMessage::Stmt(stmt)
        }
    };
    Ok((template, out))
}
