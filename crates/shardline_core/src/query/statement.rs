//! Prepared statement descriptors and the per-shard statement cache.
//!
//! # Invariants
//! - Cache entries are keyed by `(shard, fingerprint)`; a statement is never
//!   handed out for a shard other than the one it was prepared on.
//! - The compiled handle lives in the owning connection's statement cache,
//!   addressed by `sql`; it is dropped with the connection.
//! - The cache holds at most `capacity` entries; the least recently used
//!   entry is evicted first.

use crate::shard::ShardId;
use crate::sql::StatementKind;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Opt-in statement caching for one call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatementCaching {
    /// Prepare for this call only.
    #[default]
    Off,
    /// Cache under a hash of the SQL text.
    Hashed,
    /// Cache under a caller-chosen key. A hit reuses the cached statement
    /// even when the caller's SQL text differs.
    Keyed(String),
}

/// Immutable description of a statement prepared on one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    sql: Arc<str>,
    shard_id: ShardId,
    kind: StatementKind,
    fingerprint: Option<String>,
}

impl PreparedStatement {
    pub(crate) fn new(
        sql: &str,
        shard_id: ShardId,
        kind: StatementKind,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            sql: Arc::from(sql),
            shard_id,
            kind,
            fingerprint,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_write_query(&self) -> bool {
        self.kind.is_write()
    }

    /// Cache key, or `None` for one-off statements.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Whether the connection-level compiled handle should be kept.
    pub(crate) fn keeps_handle(&self) -> bool {
        self.fingerprint.is_some()
    }
}

/// Computes the cache key for `sql` under `caching`.
pub fn fingerprint(sql: &str, caching: &StatementCaching) -> Option<String> {
    match caching {
        StatementCaching::Off => None,
        StatementCaching::Hashed => Some(format!("{:x}", md5::compute(sql.as_bytes()))),
        StatementCaching::Keyed(key) => Some(key.clone()),
    }
}

/// Statement descriptors memoized per `(shard, fingerprint)`, bounded LRU.
#[derive(Debug)]
pub struct StatementCache {
    entries: LruCache<(ShardId, String), PreparedStatement>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn lookup(&mut self, shard_id: ShardId, fingerprint: &str) -> Option<PreparedStatement> {
        match self.entries.get(&(shard_id, fingerprint.to_string())) {
            Some(statement) => {
                self.hits += 1;
                Some(statement.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores a fingerprinted statement; one-off statements are ignored.
    pub fn insert(&mut self, statement: PreparedStatement) {
        if let Some(fingerprint) = statement.fingerprint.clone() {
            self.entries.put((statement.shard_id, fingerprint), statement);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
