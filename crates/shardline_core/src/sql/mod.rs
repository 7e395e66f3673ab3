//! SQL text heuristics the execution path depends on.
//!
//! # Responsibility
//! - Classify statements as reads or writes from their leading keyword.
//! - Rewrite `?` placeholders bound to NULL into literal NULL comparisons.
//!
//! # Invariants
//! - Only `SELECT` and `SHOW` statements are reads.
//! - Quoted strings, quoted identifiers and comments never contain placeholders.

mod classify;
mod nulls;

pub use classify::{classify, StatementKind};
pub use nulls::{placeholder_count, substitute_nulls, BoundSql};
