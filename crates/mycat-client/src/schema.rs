//! Schema metadata collections.
//!
//! [`InformationSchemaProvider`] answers collection requests with queries
//! against `INFORMATION_SCHEMA`. Restrictions are positional and `None`
//! means "any".

use std::collections::BTreeMap;

use async_trait::async_trait;
use mycat_protocol::Any;

use crate::error::{Error, Result};
use crate::procedure_cache::ProcedureSource;
use crate::row::Row;
use crate::session::Session;
use crate::topology::SchemaProvider;

/// One row of a collection, keyed by upper-cased column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRow {
    values: BTreeMap<String, Option<String>>,
}

impl SchemaRow {
    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_uppercase(), v.map(Into::into)))
                .collect(),
        }
    }

    /// Value of `column`; `None` when absent or NULL.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(&column.to_ascii_uppercase())
            .and_then(|v| v.as_deref())
    }

    /// Value of `column` parsed as an unsigned integer.
    #[must_use]
    pub fn get_u64(&self, column: &str) -> Option<u64> {
        self.get(column).and_then(|v| v.trim().parse().ok())
    }
}

/// A named collection of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaTable {
    /// Collection name.
    pub name: String,
    /// Column names, upper-cased, in result order.
    pub columns: Vec<String>,
    /// Rows.
    pub rows: Vec<SchemaRow>,
}

impl SchemaTable {
    /// Empty table with the given columns.
    pub fn new<S: AsRef<str>>(name: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .into_iter()
                .map(|c| c.as_ref().to_ascii_uppercase())
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row whose values follow the column order.
    pub fn push(&mut self, values: impl IntoIterator<Item = Option<String>>) {
        let row = SchemaRow::from_pairs(self.columns.iter().zip(values));
        self.rows.push(row);
    }

    fn from_rows(name: &str, rows: &[Row]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self::new(name, std::iter::empty::<&str>()));
        };
        let mut table = Self::new(name, first.columns().iter().map(|c| c.name.as_str()));
        for row in rows {
            let values = (0..row.len())
                .map(|i| row.get::<Option<String>>(i))
                .collect::<Result<Vec<_>>>()?;
            table.push(values);
        }
        Ok(table)
    }
}

/// Restriction columns of each supported collection.
fn collection_source(name: &str) -> Option<(&'static str, &'static [&'static str], &'static str)> {
    let source = match name.to_ascii_lowercase().as_str() {
        "databases" => (
            "SCHEMATA",
            &["CATALOG_NAME", "SCHEMA_NAME"][..],
            "SCHEMA_NAME",
        ),
        "tables" => (
            "TABLES",
            &["TABLE_CATALOG", "TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"][..],
            "TABLE_SCHEMA, TABLE_NAME",
        ),
        "procedures" => (
            "ROUTINES",
            &[
                "ROUTINE_CATALOG",
                "ROUTINE_SCHEMA",
                "ROUTINE_NAME",
                "ROUTINE_TYPE",
            ][..],
            "ROUTINE_SCHEMA, ROUTINE_NAME",
        ),
        _ => return None,
    };
    Some(source)
}

fn restricted_query(
    table: &str,
    columns: &[&str],
    order_by: &str,
    restrictions: &[Option<String>],
) -> (String, Vec<Any>) {
    let mut sql = format!("SELECT * FROM INFORMATION_SCHEMA.{table}");
    let mut args = Vec::new();
    let mut first = true;
    for (column, value) in columns.iter().zip(restrictions) {
        let Some(value) = value else { continue };
        sql.push_str(if first { " WHERE " } else { " AND " });
        sql.push_str(column);
        sql.push_str(" = ?");
        args.push(Any::from(value.as_str()));
        first = false;
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order_by);
    (sql, args)
}

/// Collections backed by `INFORMATION_SCHEMA` queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct InformationSchemaProvider;

#[async_trait]
impl SchemaProvider for InformationSchemaProvider {
    async fn schema_collection(
        &self,
        session: &mut Session,
        name: &str,
        restrictions: &[Option<String>],
    ) -> Result<SchemaTable> {
        let (table, columns, order_by) = collection_source(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown schema collection '{name}'")))?;
        let (sql, args) = restricted_query(table, columns, order_by, restrictions);
        let rows = session.query_all(&sql, &args).await?;
        SchemaTable::from_rows(name, &rows)
    }

    async fn procedure_parameters(
        &self,
        session: &mut Session,
        restrictions: &[Option<String>],
        _procedures: &SchemaTable,
    ) -> Result<SchemaTable> {
        // Parameters are keyed by schema and routine name only.
        let restrictions = [
            restrictions.get(1).cloned().flatten(),
            restrictions.get(2).cloned().flatten(),
        ];
        let (sql, args) = restricted_query(
            "PARAMETERS",
            &["SPECIFIC_SCHEMA", "SPECIFIC_NAME"],
            "ORDINAL_POSITION",
            &restrictions,
        );
        let rows = session.query_all(&sql, &args).await?;
        SchemaTable::from_rows("procedure parameters", &rows)
    }
}

/// Routine metadata read through an open session.
pub struct SchemaSource<'a> {
    provider: &'a dyn SchemaProvider,
    session: &'a mut Session,
    database: Option<String>,
    user: String,
    server: String,
}

impl<'a> SchemaSource<'a> {
    /// Read through `session` using `provider`.
    pub fn new(provider: &'a dyn SchemaProvider, session: &'a mut Session) -> Self {
        let settings = session.settings();
        let database = settings.database.clone().filter(|d| !d.is_empty());
        let user = settings.user_id.clone();
        let server = settings.server.clone();
        Self {
            provider,
            session,
            database,
            user,
            server,
        }
    }
}

#[async_trait]
impl ProcedureSource for SchemaSource<'_> {
    async fn current_database(&mut self) -> Result<String> {
        if let Some(database) = &self.database {
            return Ok(database.clone());
        }
        if let Some(schema) = self.session.current_schema() {
            return Ok(schema.to_string());
        }
        let rows = self.session.query_all("SELECT DATABASE()", &[]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.try_get::<String>(0))
            .unwrap_or_default())
    }

    async fn routines(&mut self, restrictions: &[Option<String>]) -> Result<SchemaTable> {
        self.provider
            .schema_collection(self.session, "procedures", restrictions)
            .await
    }

    async fn parameters(
        &mut self,
        restrictions: &[Option<String>],
        routines: &SchemaTable,
    ) -> Result<SchemaTable> {
        self.provider
            .procedure_parameters(self.session, restrictions, routines)
            .await
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn server(&self) -> &str {
        &self.server
    }

    fn thread(&self) -> Option<u64> {
        self.session.server_thread()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = SchemaRow::from_pairs([("ordinal_position", Some("3")), ("DATA_TYPE", None)]);
        assert_eq!(row.get("ORDINAL_POSITION"), Some("3"));
        assert_eq!(row.get_u64("Ordinal_Position"), Some(3));
        assert_eq!(row.get("data_type"), None);
    }

    #[test]
    fn test_push_follows_column_order() {
        let mut table = SchemaTable::new("t", ["a", "b"]);
        table.push([Some("1".to_string()), None]);
        assert_eq!(table.columns, vec!["A", "B"]);
        assert_eq!(table.rows[0].get("a"), Some("1"));
        assert_eq!(table.rows[0].get("b"), None);
    }

    #[test]
    fn test_restricted_query() {
        let (table, columns, order_by) = collection_source("procedures").unwrap();
        let restrictions = [None, Some("shop".into()), Some("p".into()), None];
        let (sql, args) = restricted_query(table, columns, order_by, &restrictions);
        assert_eq!(
            sql,
            "SELECT * FROM INFORMATION_SCHEMA.ROUTINES WHERE ROUTINE_SCHEMA = ? \
             AND ROUTINE_NAME = ? ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME"
        );
        assert_eq!(args, vec![Any::from("shop"), Any::from("p")]);

        let (sql, args) = restricted_query(table, columns, order_by, &[]);
        assert!(!sql.contains("WHERE"));
        assert!(args.is_empty());
        assert!(collection_source("nope").is_none());
    }
}
