//! Multi-row INSERT batching.

use crate::error::{ShardError, ShardResult};
use rusqlite::types::Value;

/// One multi-row INSERT ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkChunk {
    pub sql: String,
    pub params: Vec<Value>,
    pub rows: usize,
}

/// Totals reported after a bulk insert ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertSummary {
    pub statements: usize,
    pub rows: usize,
}

/// Splits `rows` into INSERT statements of at most `max_rows_per_statement`
/// value groups each.
///
/// `sql_prefix` is everything up to the value list, e.g.
/// `INSERT INTO t (owner, a, b) VALUES`. When `leading` is set it is bound
/// first in every row's group.
///
/// # Errors
/// - `InvalidInput` for a zero chunk size, rows of differing width, or rows
///   with no values and no leading constant.
pub fn plan_bulk_insert(
    sql_prefix: &str,
    rows: &[Vec<Value>],
    max_rows_per_statement: usize,
    leading: Option<&Value>,
) -> ShardResult<Vec<BulkChunk>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    if max_rows_per_statement == 0 {
        return Err(ShardError::InvalidInput(
            "max rows per statement must be greater than zero".to_string(),
        ));
    }

    let width = first.len();
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
        return Err(ShardError::InvalidInput(format!(
            "bulk insert row {index} has {} values, expected {width}",
            row.len()
        )));
    }

    let params_per_row = width + usize::from(leading.is_some());
    if params_per_row == 0 {
        return Err(ShardError::InvalidInput(
            "bulk insert rows must contain at least one value".to_string(),
        ));
    }

    let group = format!("({})", vec!["?"; params_per_row].join(", "));
    let prefix = sql_prefix.trim_end();

    let chunks = rows
        .chunks(max_rows_per_statement)
        .map(|chunk| {
            let mut params = Vec::with_capacity(chunk.len() * params_per_row);
            for row in chunk {
                if let Some(value) = leading {
                    params.push(value.clone());
                }
                params.extend(row.iter().cloned());
            }
            BulkChunk {
                sql: format!("{prefix} {}", vec![group.as_str(); chunk.len()].join(", ")),
                params,
                rows: chunk.len(),
            }
        })
        .collect();

    Ok(chunks)
}
