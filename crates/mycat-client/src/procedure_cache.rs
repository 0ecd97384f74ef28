//! Stored routine metadata cache.
//!
//! Entries are keyed by a signature such as `name(?,?)` or `?=name(?)`
//! that encodes the parameter arity, so the key is only known once the
//! metadata has been fetched. Callers keep the key returned by
//! [`ProcedureCache::get_procedure`] and pass it back on the next lookup.
//!
//! Eviction is FIFO by insertion order. A capacity of zero disables
//! caching.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Error, Result};
use crate::schema::SchemaTable;

/// Where routine metadata comes from.
#[async_trait]
pub trait ProcedureSource: Send {
    /// Schema used when the routine name is not qualified.
    async fn current_database(&mut self) -> Result<String>;

    /// Rows of the `procedures` collection matching
    /// `[catalog, schema, name, type]`.
    async fn routines(&mut self, restrictions: &[Option<String>]) -> Result<SchemaTable>;

    /// Parameter rows for `routines`.
    async fn parameters(
        &mut self,
        restrictions: &[Option<String>],
        routines: &SchemaTable,
    ) -> Result<SchemaTable>;

    /// User name, for error messages.
    fn user(&self) -> &str;

    /// Server, for error messages.
    fn server(&self) -> &str;

    /// Server thread, for log events.
    fn thread(&self) -> Option<u64> {
        None
    }
}

/// Cached metadata of one routine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCacheEntry {
    /// The routine row.
    pub procedure: SchemaTable,
    /// Parameter rows, ordered by position; position 0 is a function's
    /// return value.
    pub parameters: SchemaTable,
}

impl ProcedureCacheEntry {
    /// Signature key for `name`.
    #[must_use]
    pub fn cache_key(&self, name: &str) -> String {
        let mut returns = "";
        let mut placeholders = Vec::new();
        for row in &self.parameters.rows {
            if row.get_u64("ORDINAL_POSITION") == Some(0) {
                returns = "?=";
            } else {
                placeholders.push("?");
            }
        }
        format!("{returns}{name}({})", placeholders.join(","))
    }
}

/// Result of a lookup.
#[derive(Debug, Clone)]
pub struct ProcedureLookup {
    /// Key to pass to the next lookup of the same routine.
    pub key: String,
    /// The metadata.
    pub entry: Arc<ProcedureCacheEntry>,
    /// Whether the entry came from the cache.
    pub cached: bool,
}

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<String, Arc<ProcedureCacheEntry>>,
    order: VecDeque<String>,
}

/// Bounded, FIFO-evicted routine metadata cache.
#[derive(Debug)]
pub struct ProcedureCache {
    capacity: usize,
    entries: Mutex<Entries>,
    soft_queries: AtomicU64,
    hard_queries: AtomicU64,
}

impl ProcedureCache {
    /// Create a cache holding up to `capacity` routines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
            soft_queries: AtomicU64::new(0),
            hard_queries: AtomicU64::new(0),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().by_key.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().by_key.contains_key(key)
    }

    /// Lookups answered from the cache.
    #[must_use]
    pub fn soft_queries(&self) -> u64 {
        self.soft_queries.load(Ordering::Relaxed)
    }

    /// Lookups that went to the server.
    #[must_use]
    pub fn hard_queries(&self) -> u64 {
        self.hard_queries.load(Ordering::Relaxed)
    }

    /// Look up `name`, fetching from `source` on a miss.
    ///
    /// `cache_key` is the key a previous lookup returned; without it the
    /// lookup is always a miss.
    pub async fn get_procedure(
        &self,
        source: &mut dyn ProcedureSource,
        name: &str,
        cache_key: Option<&str>,
        logging: bool,
    ) -> Result<ProcedureLookup> {
        let hit = cache_key.and_then(|key| {
            self.entries
                .lock()
                .by_key
                .get(key)
                .map(|entry| (key.to_string(), entry.clone()))
        });

        if let Some((key, entry)) = hit {
            self.soft_queries.fetch_add(1, Ordering::Relaxed);
            if logging {
                tracing::debug!(thread = ?source.thread(), routine = name, "soft procedure query");
            }
            return Ok(ProcedureLookup {
                key,
                entry,
                cached: true,
            });
        }

        let entry = Arc::new(fetch(source, name).await?);
        self.hard_queries.fetch_add(1, Ordering::Relaxed);
        if logging {
            tracing::debug!(thread = ?source.thread(), routine = name, "hard procedure query");
        }
        let key = entry.cache_key(name);
        let entry = self.insert(&key, entry);
        Ok(ProcedureLookup {
            key,
            entry,
            cached: false,
        })
    }

    fn insert(&self, key: &str, entry: Arc<ProcedureCacheEntry>) -> Arc<ProcedureCacheEntry> {
        if self.capacity == 0 {
            return entry;
        }
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.by_key.get(key) {
            return existing.clone();
        }
        while entries.by_key.len() >= self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.by_key.remove(&oldest);
            tracing::trace!(key = %oldest, "procedure cache entry evicted");
        }
        entries.by_key.insert(key.to_string(), entry.clone());
        entries.order.push_back(key.to_string());
        entry
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.by_key.clear();
        entries.order.clear();
    }
}

/// Split `` `schema`.`name` `` or `schema.name` into its parts.
fn split_name(name: &str) -> (Option<&str>, &str) {
    #[allow(clippy::expect_used)]
    static QUALIFIED_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:`([^`]+)`|([^`.]+))\.(?:`([^`]+)`|([^`.]+))$")
            .expect("qualified name pattern is valid")
    });

    let Some(caps) = QUALIFIED_RE.captures(name) else {
        return (None, name);
    };
    let schema = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
    let routine = caps
        .get(3)
        .or_else(|| caps.get(4))
        .map_or(name, |m| m.as_str());
    (schema, routine)
}

async fn fetch(source: &mut dyn ProcedureSource, spec: &str) -> Result<ProcedureCacheEntry> {
    let (schema, name) = split_name(spec);
    let schema = match schema {
        Some(schema) if !schema.is_empty() => schema.to_string(),
        _ => source.current_database().await?,
    };

    let restrictions = [None, Some(schema.clone()), Some(name.to_string()), None];
    let procedure = source.routines(&restrictions).await?;
    match procedure.rows.len() {
        0 => {
            return Err(Error::InvalidArgument(format!(
                "procedure or function '{name}' cannot be found in database '{schema}'; \
                 verify that user '{}'@'{}' has enough privileges to execute it",
                source.user(),
                source.server()
            )));
        }
        1 => {}
        _ => {
            return Err(Error::InvalidArgument(format!(
                "there is a procedure and a function with the same name '{name}'"
            )));
        }
    }

    let parameters = source.parameters(&restrictions, &procedure).await?;
    Ok(ProcedureCacheEntry {
        procedure,
        parameters,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::SchemaRow;

    struct FakeSource {
        fetches: usize,
        last_schema: Option<String>,
        duplicate: bool,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                fetches: 0,
                last_schema: None,
                duplicate: false,
            }
        }
    }

    #[async_trait]
    impl ProcedureSource for FakeSource {
        async fn current_database(&mut self) -> Result<String> {
            Ok("shop".into())
        }

        async fn routines(&mut self, restrictions: &[Option<String>]) -> Result<SchemaTable> {
            self.fetches += 1;
            self.last_schema = restrictions[1].clone();
            let name = restrictions[2].clone().unwrap_or_default();
            let mut table = SchemaTable::new("procedures", ["ROUTINE_NAME", "ROUTINE_TYPE"]);
            if name != "missing" {
                table.push([Some(name.clone()), Some("PROCEDURE".into())]);
            }
            if self.duplicate {
                table.push([Some(name), Some("FUNCTION".into())]);
            }
            Ok(table)
        }

        async fn parameters(
            &mut self,
            restrictions: &[Option<String>],
            _routines: &SchemaTable,
        ) -> Result<SchemaTable> {
            let name = restrictions[2].clone().unwrap_or_default();
            let mut table = SchemaTable::new("procedure parameters", ["ORDINAL_POSITION"]);
            if name.starts_with("fn") {
                table.push([Some("0".to_string())]);
            }
            for i in 1..=2 {
                table.push([Some(i.to_string())]);
            }
            Ok(table)
        }

        fn user(&self) -> &str {
            "app"
        }

        fn server(&self) -> &str {
            "db1"
        }
    }

    #[test]
    fn test_cache_key_formats() {
        let mut parameters = SchemaTable::new("p", ["ORDINAL_POSITION"]);
        parameters.push([Some("1".to_string())]);
        parameters.push([Some("2".to_string())]);
        let entry = ProcedureCacheEntry {
            procedure: SchemaTable::new("procedures", ["ROUTINE_NAME"]),
            parameters: parameters.clone(),
        };
        assert_eq!(entry.cache_key("add"), "add(?,?)");

        let mut with_return = SchemaTable::new("p", ["ORDINAL_POSITION"]);
        with_return.rows.push(SchemaRow::from_pairs([("ORDINAL_POSITION", Some("0"))]));
        with_return.rows.extend(parameters.rows);
        let function = ProcedureCacheEntry {
            procedure: SchemaTable::new("procedures", ["ROUTINE_NAME"]),
            parameters: with_return,
        };
        assert_eq!(function.cache_key("f"), "?=f(?,?)");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("`db`.`proc`"), (Some("db"), "proc"));
        assert_eq!(split_name("proc"), (None, "proc"));
        assert_eq!(split_name("db.proc"), (Some("db"), "proc"));
        assert_eq!(split_name("`my.db`.`proc`"), (Some("my.db"), "proc"));
        assert_eq!(split_name("a.b.c"), (None, "a.b.c"));
    }

    #[tokio::test]
    async fn test_first_lookup_misses_then_hits() {
        let cache = ProcedureCache::new(4);
        let mut source = FakeSource::new();

        let first = cache.get_procedure(&mut source, "p", None, true).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.key, "p(?,?)");
        assert_eq!(source.last_schema.as_deref(), Some("shop"));

        let second = cache
            .get_procedure(&mut source, "p", Some(&first.key), true)
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(source.fetches, 1);
        assert_eq!((cache.soft_queries(), cache.hard_queries()), (1, 1));
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let cache = ProcedureCache::new(2);
        let mut source = FakeSource::new();
        let mut keys = Vec::new();
        for name in ["a", "b", "c"] {
            keys.push(cache.get_procedure(&mut source, name, None, false).await.unwrap().key);
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&keys[0]));

        let again = cache
            .get_procedure(&mut source, "a", Some(&keys[0]), false)
            .await
            .unwrap();
        assert!(!again.cached);
        assert_eq!(cache.hard_queries(), 4);
        assert_eq!(cache.soft_queries(), 0);
    }

    #[tokio::test]
    async fn test_existing_key_not_reinserted() {
        let cache = ProcedureCache::new(2);
        let mut source = FakeSource::new();
        cache.get_procedure(&mut source, "a", None, false).await.unwrap();
        cache.get_procedure(&mut source, "a", None, false).await.unwrap();
        cache.get_procedure(&mut source, "b", None, false).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a(?,?)"));
    }

    #[tokio::test]
    async fn test_zero_capacity_never_caches() {
        let cache = ProcedureCache::new(0);
        let mut source = FakeSource::new();
        let first = cache.get_procedure(&mut source, "a", None, false).await.unwrap();
        let second = cache
            .get_procedure(&mut source, "a", Some(&first.key), false)
            .await
            .unwrap();
        assert!(!second.cached);
        assert!(cache.is_empty());
        assert_eq!(cache.hard_queries(), 2);
        assert_eq!(source.fetches, 2);
    }

    #[tokio::test]
    async fn test_qualified_name_and_errors() {
        let cache = ProcedureCache::new(2);
        let mut source = FakeSource::new();
        let lookup = cache
            .get_procedure(&mut source, "`other`.`fn_total`", None, false)
            .await
            .unwrap();
        assert_eq!(lookup.key, "?=`other`.`fn_total`(?,?)");
        assert_eq!(source.last_schema.as_deref(), Some("other"));

        let err = cache
            .get_procedure(&mut source, "missing", None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'app'@'db1'"));

        source.duplicate = true;
        let err = cache
            .get_procedure(&mut source, "dup", None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("same name"));
    }
}
