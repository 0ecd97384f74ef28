//! Session trace hooks.
//!
//! A [`HookPipeline`] is a list of named [`SessionHook`]s fixed when the
//! session is created. Every event is delivered to every hook in the order
//! they were added. The `logging` option installs [`TracingHook`] and
//! `use usage advisor` installs [`UsageAdvisorHook`].

use std::fmt;
use std::sync::Arc;

use mycat_protocol::classic::ServerStatus;
use mycat_protocol::notice::Warning;

use crate::config::Config;
use crate::error::Error;
use crate::instrumentation::{StatementTrace, extract_operation};
use crate::result::ResultSummary;

/// Receives session events. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait SessionHook: Send + Sync {
    /// Hook name, for diagnostics.
    fn name(&self) -> &str;

    /// A session finished its handshake.
    fn on_open(&self, driver_id: u64, settings: &Config) {}

    /// A session was closed physically.
    fn on_close(&self, driver_id: u64) {}

    /// A statement is about to be sent.
    fn on_query(&self, driver_id: u64, sql: &str) {}

    /// A statement produced a result; `columns` is zero for updates.
    fn on_result(&self, driver_id: u64, columns: usize) {}

    /// A result was closed.
    fn on_result_closed(&self, driver_id: u64, summary: &ResultSummary) {}

    /// A statement was prepared on the server.
    fn on_statement_prepared(&self, driver_id: u64, stmt_id: u32) {}

    /// A prepared statement was executed.
    fn on_statement_executed(&self, driver_id: u64, stmt_id: u32) {}

    /// A prepared statement was deallocated.
    fn on_statement_closed(&self, driver_id: u64, stmt_id: u32) {}

    /// The default schema changed.
    fn on_set_database(&self, driver_id: u64, database: &str) {}

    /// Reading a row failed.
    fn on_fetch_error(&self, driver_id: u64, error: &Error) {}

    /// The last result of a statement was closed.
    fn on_query_closed(&self, driver_id: u64) {}

    /// A result carried warnings.
    fn on_warnings(&self, driver_id: u64, warnings: &[Warning]) {}
}

/// Ordered set of hooks shared by one session.
#[derive(Clone, Default)]
pub struct HookPipeline {
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl HookPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the hooks the settings ask for.
    #[must_use]
    pub fn from_config(settings: &Config) -> Self {
        let mut pipeline = Self::new();
        if settings.logging {
            pipeline = pipeline.with(TracingHook::default());
        }
        if settings.use_usage_advisor {
            pipeline = pipeline.with(UsageAdvisorHook);
        }
        pipeline
    }

    /// Append a hook.
    #[must_use]
    pub fn with(mut self, hook: impl SessionHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Append a shared hook.
    #[must_use]
    pub fn with_shared(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Whether no hooks are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the installed hooks, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Deliver `on_open`.
    pub fn on_open(&self, driver_id: u64, settings: &Config) {
        self.hooks.iter().for_each(|h| h.on_open(driver_id, settings));
    }

    /// Deliver `on_close`.
    pub fn on_close(&self, driver_id: u64) {
        self.hooks.iter().for_each(|h| h.on_close(driver_id));
    }

    /// Deliver `on_query`.
    pub fn on_query(&self, driver_id: u64, sql: &str) {
        self.hooks.iter().for_each(|h| h.on_query(driver_id, sql));
    }

    /// Deliver `on_result`.
    pub fn on_result(&self, driver_id: u64, columns: usize) {
        self.hooks.iter().for_each(|h| h.on_result(driver_id, columns));
    }

    /// Deliver `on_result_closed`, then `on_warnings` if there were any.
    pub fn on_result_closed(&self, driver_id: u64, summary: &ResultSummary) {
        for hook in &self.hooks {
            hook.on_result_closed(driver_id, summary);
            if !summary.warnings.is_empty() {
                hook.on_warnings(driver_id, &summary.warnings);
            }
        }
    }

    /// Deliver `on_statement_prepared`.
    pub fn on_statement_prepared(&self, driver_id: u64, stmt_id: u32) {
        self.hooks
            .iter()
            .for_each(|h| h.on_statement_prepared(driver_id, stmt_id));
    }

    /// Deliver `on_statement_executed`.
    pub fn on_statement_executed(&self, driver_id: u64, stmt_id: u32) {
        self.hooks
            .iter()
            .for_each(|h| h.on_statement_executed(driver_id, stmt_id));
    }

    /// Deliver `on_statement_closed`.
    pub fn on_statement_closed(&self, driver_id: u64, stmt_id: u32) {
        self.hooks
            .iter()
            .for_each(|h| h.on_statement_closed(driver_id, stmt_id));
    }

    /// Deliver `on_set_database`.
    pub fn on_set_database(&self, driver_id: u64, database: &str) {
        self.hooks
            .iter()
            .for_each(|h| h.on_set_database(driver_id, database));
    }

    /// Deliver `on_fetch_error`.
    pub fn on_fetch_error(&self, driver_id: u64, error: &Error) {
        self.hooks
            .iter()
            .for_each(|h| h.on_fetch_error(driver_id, error));
    }

    /// Deliver `on_query_closed`.
    pub fn on_query_closed(&self, driver_id: u64) {
        self.hooks.iter().for_each(|h| h.on_query_closed(driver_id));
    }
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Emits one `tracing` event per session event.
#[derive(Debug, Clone, Default)]
pub struct TracingHook {
    statements: StatementTrace,
}

impl TracingHook {
    /// Render statement text with `statements` instead of the default.
    #[must_use]
    pub fn with_statement_trace(statements: StatementTrace) -> Self {
        Self { statements }
    }
}

impl SessionHook for TracingHook {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_open(&self, driver_id: u64, settings: &Config) {
        tracing::info!(
            driver_id,
            settings = %settings.to_connection_string(false),
            "session opened"
        );
    }

    fn on_close(&self, driver_id: u64) {
        tracing::info!(driver_id, "session closed");
    }

    fn on_query(&self, driver_id: u64, sql: &str) {
        let (statement, normalized) = self.statements.render(sql);
        tracing::debug!(
            driver_id,
            operation = extract_operation(sql),
            statement = %statement,
            normalized = normalized.as_deref(),
            "query"
        );
    }

    fn on_result(&self, driver_id: u64, columns: usize) {
        tracing::debug!(driver_id, columns, "result opened");
    }

    fn on_result_closed(&self, driver_id: u64, summary: &ResultSummary) {
        tracing::debug!(
            driver_id,
            rows_read = summary.rows_read,
            rows_skipped = summary.rows_skipped,
            affected_rows = summary.affected_rows,
            "result closed"
        );
    }

    fn on_statement_prepared(&self, driver_id: u64, stmt_id: u32) {
        tracing::debug!(driver_id, stmt_id, "statement prepared");
    }

    fn on_statement_executed(&self, driver_id: u64, stmt_id: u32) {
        tracing::debug!(driver_id, stmt_id, "statement executed");
    }

    fn on_statement_closed(&self, driver_id: u64, stmt_id: u32) {
        tracing::debug!(driver_id, stmt_id, "statement closed");
    }

    fn on_set_database(&self, driver_id: u64, database: &str) {
        tracing::debug!(driver_id, database, "database changed");
    }

    fn on_fetch_error(&self, driver_id: u64, error: &Error) {
        tracing::warn!(driver_id, error = %error, "fetch failed");
    }

    fn on_query_closed(&self, driver_id: u64) {
        tracing::debug!(driver_id, "query closed");
    }

    fn on_warnings(&self, driver_id: u64, warnings: &[Warning]) {
        for warning in warnings {
            tracing::debug!(
                driver_id,
                level = ?warning.level,
                code = warning.code,
                msg = %warning.msg,
                "server warning"
            );
        }
    }
}

/// Warns about wasteful result handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAdvisorHook;

impl UsageAdvisorHook {
    /// Advice for a closed result, one line per finding.
    #[must_use]
    pub fn advise(summary: &ResultSummary) -> Vec<String> {
        let mut advice = Vec::new();
        if summary.status.contains(ServerStatus::NO_INDEX) {
            advice.push("query does not use an index".to_string());
        }
        if summary.status.contains(ServerStatus::BAD_INDEX) {
            advice.push("query uses a poorly chosen index".to_string());
        }
        if summary.rows_skipped > 0 {
            advice.push(format!(
                "{} rows were fetched but never read",
                summary.rows_skipped
            ));
        }
        if !summary.unread_columns.is_empty() {
            advice.push(format!(
                "columns never read: {}",
                summary.unread_columns.join(", ")
            ));
        }
        advice
    }
}

impl SessionHook for UsageAdvisorHook {
    fn name(&self) -> &str {
        "usage-advisor"
    }

    fn on_result_closed(&self, driver_id: u64, summary: &ResultSummary) {
        for advice in Self::advise(summary) {
            tracing::warn!(driver_id, advice = %advice, "usage advisor");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SessionHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_query(&self, driver_id: u64, sql: &str) {
            self.events.lock().push(format!("{driver_id}:{sql}"));
        }

        fn on_warnings(&self, _driver_id: u64, warnings: &[Warning]) {
            self.events.lock().push(format!("warnings:{}", warnings.len()));
        }
    }

    #[test]
    fn test_pipeline_from_config() {
        let settings = Config::new().logging(true).use_usage_advisor(true);
        let pipeline = HookPipeline::from_config(&settings);
        assert_eq!(pipeline.names(), vec!["tracing", "usage-advisor"]);
        assert!(HookPipeline::from_config(&Config::new()).is_empty());
    }

    #[test]
    fn test_pipeline_fan_out() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = HookPipeline::new()
            .with(TracingHook::default())
            .with_shared(recorder.clone());
        pipeline.on_query(3, "SELECT 1");
        pipeline.on_result_closed(
            3,
            &ResultSummary {
                warnings: vec![Warning {
                    level: Default::default(),
                    code: 1,
                    msg: "w".into(),
                }],
                ..Default::default()
            },
        );
        pipeline.on_result_closed(3, &ResultSummary::default());
        assert_eq!(*recorder.events.lock(), vec!["3:SELECT 1", "warnings:1"]);
    }

    #[test]
    fn test_usage_advice() {
        let summary = ResultSummary {
            status: ServerStatus::NO_INDEX,
            rows_skipped: 4,
            unread_columns: vec!["b".into(), "c".into()],
            ..Default::default()
        };
        let advice = UsageAdvisorHook::advise(&summary);
        assert_eq!(advice.len(), 3);
        assert!(advice[2].ends_with("b, c"));
        assert!(UsageAdvisorHook::advise(&ResultSummary::default()).is_empty());
    }
}
