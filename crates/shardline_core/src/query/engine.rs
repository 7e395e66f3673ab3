//! Statement execution against one shard connection.
//!
//! # Invariants
//! - Reads return rows with integer-family columns coerced on every row.
//! - Updates/deletes return the affected-row count.
//! - Inserts return the generated rowid, else the affected-row count, else
//!   `NothingInserted` when no row was written.

use super::row::{coerce_integer, is_integer_decl_type, Row};
use super::statement::PreparedStatement;
use crate::error::{ShardError, ShardResult};
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Statement};
use std::sync::Arc;
use std::time::Instant;

/// Result shape of one executed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    /// Rows changed by an UPDATE, DELETE, DDL, or id-less INSERT.
    Affected(usize),
    /// Rowid generated by an INSERT/REPLACE.
    InsertedId(i64),
    /// INSERT/REPLACE that wrote nothing (e.g. `INSERT OR IGNORE` conflict).
    NothingInserted,
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn affected(&self) -> Option<usize> {
        match self {
            Self::Affected(count) => Some(*count),
            _ => None,
        }
    }

    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            Self::InsertedId(id) => Some(*id),
            _ => None,
        }
    }
}

/// Executes a statement on the connection it was prepared for.
pub(crate) fn run(
    conn: &Connection,
    statement: &PreparedStatement,
    params: &[Value],
) -> ShardResult<QueryOutcome> {
    let started_at = Instant::now();
    debug!(
        "event=query module=query status=start shard_id={} kind={} cached={} sql={}",
        statement.shard_id(),
        statement.kind().as_str(),
        statement.keeps_handle(),
        statement.sql()
    );

    let result = if statement.keeps_handle() {
        conn.prepare_cached(statement.sql())
            .and_then(|mut prepared| execute_prepared(conn, &mut prepared, statement, params))
    } else {
        conn.prepare(statement.sql())
            .and_then(|mut prepared| execute_prepared(conn, &mut prepared, statement, params))
    };

    match result {
        Ok(outcome) => {
            debug!(
                "event=query module=query status=ok shard_id={} kind={} duration_ms={}",
                statement.shard_id(),
                statement.kind().as_str(),
                started_at.elapsed().as_millis()
            );
            Ok(outcome)
        }
        Err(err) => {
            let classified =
                ShardError::from_driver(err, statement.sql(), params, statement.shard_id());
            error!(
                "event=query_failed module=query status=error shard_id={} kind={} duration_ms={} retryable={} error_code={}",
                statement.shard_id(),
                statement.kind().as_str(),
                started_at.elapsed().as_millis(),
                classified.is_retryable(),
                classified.driver_code().unwrap_or_default()
            );
            Err(classified)
        }
    }
}

fn execute_prepared(
    conn: &Connection,
    prepared: &mut Statement<'_>,
    statement: &PreparedStatement,
    params: &[Value],
) -> rusqlite::Result<QueryOutcome> {
    if statement.kind().is_read() {
        return read_rows(prepared, params).map(QueryOutcome::Rows);
    }

    let changes = prepared.execute(params_from_iter(params.iter()))?;
    if !statement.kind().returns_insert_id() {
        return Ok(QueryOutcome::Affected(changes));
    }
    if changes == 0 {
        return Ok(QueryOutcome::NothingInserted);
    }

    let rowid = conn.last_insert_rowid();
    if rowid > 0 {
        Ok(QueryOutcome::InsertedId(rowid))
    } else {
        Ok(QueryOutcome::Affected(changes))
    }
}

fn read_rows(prepared: &mut Statement<'_>, params: &[Value]) -> rusqlite::Result<Vec<Row>> {
    let columns: Arc<[String]> = prepared
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into();
    let integer_columns = prepared
        .columns()
        .iter()
        .map(|column| column.decl_type().is_some_and(is_integer_decl_type))
        .collect::<Vec<_>>();

    let mut rows = prepared.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(integer_columns.len());
        for (index, is_integer) in integer_columns.iter().enumerate() {
            let value = Value::from(row.get_ref(index)?);
            values.push(if *is_integer {
                coerce_integer(value)
            } else {
                value
            });
        }
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(out)
}
