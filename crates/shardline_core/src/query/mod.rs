//! Query execution: statements, result rows, and bulk inserts.
//!
//! # Responsibility
//! - Execute parameterized statements on a shard connection.
//! - Normalize result shapes and integer column typing.
//! - Memoize statement descriptors per `(shard, fingerprint)`.
//! - Plan chunked multi-row inserts.

pub mod bulk;
pub mod engine;
pub mod row;
pub mod statement;

pub use bulk::{plan_bulk_insert, BulkChunk, BulkInsertSummary};
pub use engine::QueryOutcome;
pub use row::Row;
pub use statement::{fingerprint, PreparedStatement, StatementCache, StatementCaching};
