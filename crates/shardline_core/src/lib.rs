//! Sharded relational data-access layer.
//!
//! Routes statements to the shard that owns a library, groups work on many
//! shards into one virtual transaction, and normalizes query results.

pub mod config;
pub mod db;
pub mod error;
pub mod group;
pub mod logging;
pub mod query;
pub mod registry;
pub mod shard;
pub mod sql;
pub mod txn;

pub use config::{ClusterConfig, ConfigError, GroupConfig, LoggingConfig};
pub use error::{NotFoundTarget, QueryFailure, ShardError, ShardResult};
pub use group::{CloseReport, DatabaseGroup};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use query::{BulkInsertSummary, PreparedStatement, QueryOutcome, Row, StatementCaching};
pub use registry::{DatabaseRegistry, RegistryError};
pub use rusqlite::types::Value;
pub use shard::{LibraryId, ShardId, ShardInfo, ShardState};
pub use sql::StatementKind;
pub use txn::{TxnEvent, TxnOutcome};

/// Minimal health-check API for process supervisors.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
