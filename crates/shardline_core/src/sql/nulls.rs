//! NULL placeholder substitution.
//!
//! A NULL bound to `col = ?` never matches in SQL, so NULL parameters are
//! written into the statement text instead of being bound:
//!
//! | context              | read            | write           |
//! |----------------------|-----------------|-----------------|
//! | `col = ?`            | `col IS NULL`   | `col=NULL`      |
//! | `col != ?`, `col <> ?` | `col IS NOT NULL` | `col IS NOT NULL` |
//! | anything else        | ` NULL`         | ` NULL`         |
//!
//! Whitespace before the placeholder (and its operator) is consumed, so
//! `VALUES (?,?)` with a trailing NULL becomes `VALUES (?, NULL)`.
//!
//! Placeholders are located with a small scanner that skips quoted strings,
//! quoted identifiers and comments, so a literal `'?'` is never rewritten.

use super::StatementKind;
use crate::error::{ShardError, ShardResult};
use rusqlite::types::Value;

/// Statement text and parameters ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub params: Vec<Value>,
    /// True when at least one NULL was written into the text.
    pub rewritten: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    None,
}

/// Rewrites NULL parameters into the SQL text, left to right.
///
/// # Errors
/// - `InvalidInput` when NULLs are present and the number of `?`
///   placeholders differs from the number of parameters, or the statement
///   uses numbered placeholders (`?1`).
pub fn substitute_nulls(
    sql: &str,
    params: &[Value],
    kind: StatementKind,
) -> ShardResult<BoundSql> {
    if !params.iter().any(|value| matches!(value, Value::Null)) {
        return Ok(BoundSql {
            sql: sql.to_string(),
            params: params.to_vec(),
            rewritten: false,
        });
    }

    let positions = scan_placeholders(sql)?;
    if positions.len() != params.len() {
        return Err(ShardError::InvalidInput(format!(
            "statement has {} placeholders but {} parameters were supplied",
            positions.len(),
            params.len()
        )));
    }

    let mut out = String::with_capacity(sql.len() + 16);
    let mut bound = Vec::with_capacity(params.len());
    let mut cursor = 0;

    for (position, value) in positions.into_iter().zip(params) {
        out.push_str(&sql[cursor..position]);
        cursor = position + 1;

        if !matches!(value, Value::Null) {
            out.push('?');
            bound.push(value.clone());
            continue;
        }

        let comparison = strip_trailing_comparison(&mut out);
        let replacement = match (comparison, kind.is_read()) {
            (Comparison::Equal, true) => " IS NULL",
            (Comparison::Equal, false) => "=NULL",
            (Comparison::NotEqual, _) => " IS NOT NULL",
            (Comparison::None, _) => " NULL",
        };
        out.push_str(replacement);
    }
    out.push_str(&sql[cursor..]);

    Ok(BoundSql {
        sql: out,
        params: bound,
        rewritten: true,
    })
}

/// Number of bare `?` placeholders outside strings and comments.
pub fn placeholder_count(sql: &str) -> ShardResult<usize> {
    Ok(scan_placeholders(sql)?.len())
}

/// Trims whitespace, an equality operator and the whitespace before it.
fn strip_trailing_comparison(out: &mut String) -> Comparison {
    truncate_trailing_whitespace(out);

    let (operator_len, comparison) = if out.ends_with("!=") || out.ends_with("<>") {
        (2, Comparison::NotEqual)
    } else if out.ends_with("==") {
        (2, Comparison::Equal)
    } else if out.ends_with("<=") || out.ends_with(">=") || out.ends_with(":=") {
        (0, Comparison::None)
    } else if out.ends_with('=') {
        (1, Comparison::Equal)
    } else {
        (0, Comparison::None)
    };

    if operator_len > 0 {
        out.truncate(out.len() - operator_len);
        truncate_trailing_whitespace(out);
    }
    comparison
}

fn truncate_trailing_whitespace(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
}

/// Byte offsets of bare `?` placeholders.
fn scan_placeholders(sql: &str) -> ShardResult<Vec<usize>> {
    let bytes = sql.as_bytes();
    let mut positions = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            quote @ (b'\'' | b'"' | b'`') => {
                index = skip_quoted(bytes, index, quote);
            }
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                index = bytes[index..]
                    .iter()
                    .position(|byte| *byte == b'\n')
                    .map_or(bytes.len(), |offset| index + offset + 1);
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                index = sql[index + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |offset| index + 2 + offset + 2);
            }
            b'?' => {
                if bytes.get(index + 1).is_some_and(u8::is_ascii_digit) {
                    return Err(ShardError::InvalidInput(
                        "numbered placeholders cannot be combined with NULL parameters"
                            .to_string(),
                    ));
                }
                positions.push(index);
                index += 1;
            }
            _ => index += 1,
        }
    }

    Ok(positions)
}

/// Returns the index just past the closing quote; doubled quotes escape.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut index = start + 1;
    while index < bytes.len() {
        if bytes[index] == quote {
            if bytes.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    bytes.len()
}
