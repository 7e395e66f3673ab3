//! Error taxonomy shared by every data-access component.
//!
//! # Responsibility
//! - Provide one closed set of failure kinds callers can branch on.
//! - Classify raw SQLite driver errors into retryable vs data failures.
//!
//! # Invariants
//! - Connection-level failures always surface as `ShardUnavailable`.
//! - `QueryFailed` keeps the driver's original codes plus the failing SQL,
//!   bound parameters and shard id.

use crate::db::DbError;
use crate::shard::{LibraryId, ShardId};
use rusqlite::types::Value;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ShardResult<T> = Result<T, ShardError>;

/// Lookup target that could not be found in the shard directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundTarget {
    Shard(ShardId),
    Library(LibraryId),
}

/// Diagnostic context for a statement the driver rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    /// Primary SQLite result code, or `-1` for non-SQLite driver errors.
    pub code: i32,
    /// Extended SQLite result code.
    pub extended_code: i32,
    pub message: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub shard_id: ShardId,
}

/// Failure kinds surfaced by the sharded data-access layer.
#[derive(Debug)]
pub enum ShardError {
    /// Shard is marked down or its database could not be reached.
    ShardUnavailable { shard_id: ShardId, reason: String },
    /// Write attempted against a shard that does not accept writes.
    ShardReadOnly(ShardId),
    /// Transaction operation requested while no virtual transaction is open.
    NoTransactionOpen,
    NotFound(NotFoundTarget),
    QueryFailed(Box<QueryFailure>),
    /// Caller supplied arguments the layer cannot execute.
    InvalidInput(String),
    /// Master database bootstrap failed.
    Bootstrap(DbError),
}

impl ShardError {
    /// Returns true when the caller may retry or apply failover policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ShardUnavailable { .. })
    }

    /// Returns the original driver code for statement-level failures.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            Self::QueryFailed(failure) => Some(failure.extended_code),
            _ => None,
        }
    }

    /// Classifies a driver error raised while executing `sql` on `shard_id`.
    pub(crate) fn from_driver(
        err: rusqlite::Error,
        sql: &str,
        params: &[Value],
        shard_id: ShardId,
    ) -> Self {
        if is_connection_failure(&err) {
            return Self::ShardUnavailable {
                shard_id,
                reason: err.to_string(),
            };
        }

        let (code, extended_code) = match &err {
            rusqlite::Error::SqliteFailure(inner, _) => {
                (inner.extended_code & 0xff, inner.extended_code)
            }
            _ => (-1, -1),
        };

        Self::QueryFailed(Box::new(QueryFailure {
            code,
            extended_code,
            message: err.to_string(),
            sql: sql.to_string(),
            params: params.to_vec(),
            shard_id,
        }))
    }

    /// Classifies a driver error raised while opening or controlling a
    /// connection; anything that fails here means the shard is unreachable.
    pub(crate) fn unavailable(shard_id: ShardId, err: impl Display) -> Self {
        Self::ShardUnavailable {
            shard_id,
            reason: err.to_string(),
        }
    }
}

impl Display for ShardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShardUnavailable { shard_id, reason } => {
                write!(f, "shard {shard_id} is unavailable: {reason}")
            }
            Self::ShardReadOnly(shard_id) => write!(f, "shard {shard_id} is read-only"),
            Self::NoTransactionOpen => write!(f, "no transaction open"),
            Self::NotFound(NotFoundTarget::Shard(shard_id)) => {
                write!(f, "shard not found: {shard_id}")
            }
            Self::NotFound(NotFoundTarget::Library(library_id)) => {
                write!(f, "no shard assigned to library {library_id}")
            }
            Self::QueryFailed(failure) => write!(
                f,
                "query failed on shard {} (code {}): {} [sql: {}] [params: {}]",
                failure.shard_id,
                failure.extended_code,
                failure.message,
                failure.sql,
                describe_params(&failure.params)
            ),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Bootstrap(err) => write!(f, "master bootstrap failed: {err}"),
        }
    }
}

impl Error for ShardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bootstrap(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ShardError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) if is_connection_failure(&err) => {
                Self::unavailable(ShardId::MASTER, err)
            }
            other => Self::Bootstrap(other),
        }
    }
}

fn is_connection_failure(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::DatabaseBusy)
    )
}

/// Renders parameters by type only; bound values may carry user data.
fn describe_params(params: &[Value]) -> String {
    params
        .iter()
        .map(|value| match value {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        })
        .collect::<Vec<_>>()
        .join(",")
}
