//! Span names and statement rendering for trace output.
//!
//! Spans carry `db.system` and `server.*` fields in the OpenTelemetry
//! database style so an exporter layer can pick them up as they are.

use std::time::Instant;

/// Value of the `db.system` span field.
pub const DB_SYSTEM: &str = "mysql";

/// Span names.
pub mod span_names {
    /// Opening a logical connection.
    pub const CONNECT: &str = "mycat.connect";
    /// Running a statement that returns rows.
    pub const QUERY: &str = "mycat.query";
    /// Running a statement for its side effects.
    pub const EXECUTE: &str = "mycat.execute";
    /// Starting a transaction.
    pub const BEGIN_TRANSACTION: &str = "mycat.begin_transaction";
    /// Committing.
    pub const COMMIT: &str = "mycat.commit";
    /// Rolling back.
    pub const ROLLBACK: &str = "mycat.rollback";
    /// Killing a running statement over a side connection.
    pub const CANCEL: &str = "mycat.cancel";
}

/// Statements longer than this are cut in trace output.
pub const TRACE_STATEMENT_LENGTH: usize = 300;

/// How statement text is rendered into trace events.
///
/// Short statements are logged as written. A statement over `limit`
/// bytes is cut, and when `normalize` is set its literal-free form is
/// logged next to it so long `INSERT ... VALUES` batches still group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementTrace {
    /// Byte length at which statements are cut.
    pub limit: usize,
    /// Also log the normalized form of cut statements.
    pub normalize: bool,
}

impl Default for StatementTrace {
    fn default() -> Self {
        Self {
            limit: TRACE_STATEMENT_LENGTH,
            normalize: true,
        }
    }
}

impl StatementTrace {
    /// Log statements whole, however long.
    #[must_use]
    pub fn verbatim() -> Self {
        Self {
            limit: usize::MAX,
            normalize: false,
        }
    }

    /// The statement as logged, plus its normalized form if it was cut.
    #[must_use]
    pub fn render(&self, sql: &str) -> (String, Option<String>) {
        if sql.len() <= self.limit {
            return (sql.to_string(), None);
        }
        let normalized = self
            .normalize
            .then(|| cut(&normalize_sql(sql), self.limit));
        (cut(sql, self.limit), normalized)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Plain,
    Quoted(char),
    Identifier,
    Number,
}

/// Replace string and numeric literals with `?`.
///
/// Back-quoted identifiers are kept as written; digits that continue an
/// identifier (`t1`, `col_2`) are not literals.
#[must_use]
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = Lexeme::Plain;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lexeme::Quoted(quote) => match c {
                '\\' => {
                    chars.next();
                }
                _ if c == quote && chars.peek() == Some(&quote) => {
                    chars.next();
                }
                _ if c == quote => {
                    out.push('?');
                    state = Lexeme::Plain;
                }
                _ => {}
            },
            Lexeme::Identifier => {
                out.push(c);
                if c == '`' {
                    state = Lexeme::Plain;
                }
            }
            Lexeme::Number if c.is_ascii_digit() || c == '.' => {}
            Lexeme::Number | Lexeme::Plain => {
                state = Lexeme::Plain;
                match c {
                    '\'' | '"' => state = Lexeme::Quoted(c),
                    '`' => {
                        out.push(c);
                        state = Lexeme::Identifier;
                    }
                    _ if c.is_ascii_digit()
                        && !out.ends_with(|p: char| p.is_alphanumeric() || p == '_') =>
                    {
                        out.push('?');
                        state = Lexeme::Number;
                    }
                    _ => out.push(c),
                }
            }
        }
    }

    if matches!(state, Lexeme::Quoted(_)) {
        out.push('?');
    }
    out
}

/// Cut `s` to at most `max_len` bytes on a char boundary, ending in `...`.
#[must_use]
pub fn cut(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Coarse statement kind for the `operation` field.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    const KINDS: [(&str, &str); 16] = [
        ("SELECT", "SELECT"),
        ("INSERT", "INSERT"),
        ("REPLACE", "INSERT"),
        ("UPDATE", "UPDATE"),
        ("DELETE", "DELETE"),
        ("CALL", "CALL"),
        ("BEGIN", "BEGIN"),
        ("START TRANSACTION", "BEGIN"),
        ("COMMIT", "COMMIT"),
        ("ROLLBACK", "ROLLBACK"),
        ("CREATE", "CREATE"),
        ("ALTER", "ALTER"),
        ("DROP", "DROP"),
        ("KILL", "KILL"),
        ("SET", "SET"),
        ("USE", "SET"),
    ];

    let head = sql.trim_start();
    KINDS
        .iter()
        .find(|(keyword, _)| {
            head.get(..keyword.len())
                .is_some_and(|h| h.eq_ignore_ascii_case(keyword))
        })
        .map_or("OTHER", |(_, kind)| kind)
}

/// Wall-clock timing of a driver operation, logged when finished.
#[derive(Debug)]
pub struct OperationTimer {
    started: Instant,
    operation: &'static str,
}

impl OperationTimer {
    /// Start timing `operation`.
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            started: Instant::now(),
            operation,
        }
    }

    /// Log how long the operation took and whether it worked.
    pub fn finish(self, success: bool) {
        tracing::debug!(
            operation = self.operation,
            elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success,
            "operation finished"
        );
    }
}
