//! Result rows and integer column coercion.

use rusqlite::types::Value;
use std::sync::Arc;

/// Declared column types treated as fixed-width integers.
const INTEGER_DECL_TYPES: &[&str] = &[
    "TINYINT",
    "SMALLINT",
    "MEDIUMINT",
    "INT",
    "INTEGER",
    "BIGINT",
    "INT2",
    "INT4",
    "INT8",
    "BIG INT",
];

/// One result row; column names are shared by every row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// True when a declared column type is in the fixed-width integer family,
/// e.g. `INT`, `INT(11)`, `BIGINT UNSIGNED`, `UNSIGNED BIG INT`.
pub fn is_integer_decl_type(decl_type: &str) -> bool {
    let upper = decl_type.to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or_default();
    let normalized = base
        .split_whitespace()
        .filter(|word| *word != "UNSIGNED" && *word != "SIGNED" && *word != "ZEROFILL")
        .collect::<Vec<_>>()
        .join(" ");
    INTEGER_DECL_TYPES.contains(&normalized.as_str())
}

/// Coerces a value read from an integer column to `Value::Integer`.
///
/// NULL stays NULL; values that do not represent an integer pass through.
pub fn coerce_integer(value: Value) -> Value {
    match value {
        Value::Text(text) => match text.trim().parse::<i64>() {
            Ok(parsed) => Value::Integer(parsed),
            Err(_) => Value::Text(text),
        },
        Value::Real(real)
            if real.fract() == 0.0 && real >= i64::MIN as f64 && real <= i64::MAX as f64 =>
        {
            Value::Integer(real as i64)
        }
        Value::Blob(bytes) => match std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
        {
            Some(parsed) => Value::Integer(parsed),
            None => Value::Blob(bytes),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{coerce_integer, is_integer_decl_type, Row};
    use rusqlite::types::Value;
    use std::sync::Arc;

    #[test]
    fn integer_family_is_recognized() {
        for decl in [
            "INT",
            "integer",
            "INT(11)",
            "BIGINT UNSIGNED",
            "UNSIGNED BIG INT",
            "tinyint(1)",
            "SMALLINT",
            "MEDIUMINT",
            "INT8",
        ] {
            assert!(is_integer_decl_type(decl), "{decl} should be an integer type");
        }
        for decl in ["TEXT", "VARCHAR(255)", "REAL", "POINT", "DECIMAL(10,2)", "BLOB"] {
            assert!(!is_integer_decl_type(decl), "{decl} should not be an integer type");
        }
    }

    #[test]
    fn coercion_preserves_null_and_converts_numeric_text() {
        assert_eq!(coerce_integer(Value::Null), Value::Null);
        assert_eq!(coerce_integer(Value::Text("42".into())), Value::Integer(42));
        assert_eq!(coerce_integer(Value::Text("-7 ".into())), Value::Integer(-7));
        assert_eq!(coerce_integer(Value::Real(3.0)), Value::Integer(3));
        assert_eq!(coerce_integer(Value::Integer(9)), Value::Integer(9));
        assert_eq!(coerce_integer(Value::Text("abc".into())), Value::Text("abc".into()));
        assert_eq!(coerce_integer(Value::Real(1.5)), Value::Real(1.5));
    }

    #[test]
    fn row_lookup_by_column_name() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(columns, vec![Value::Integer(1), Value::Text("a".into())]);
        assert_eq!(row.get_i64("id"), Some(1));
        assert_eq!(row.get_text("name"), Some("a"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }
}
