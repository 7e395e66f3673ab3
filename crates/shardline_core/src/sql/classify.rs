//! Leading-keyword statement classification.

use once_cell::sync::Lazy;
use regex::Regex;

// Leading whitespace, opening parentheses and comments are skipped.
static LEADING_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\s|\(|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/)*([A-Za-z]+)")
        .expect("valid leading keyword regex")
});

/// Statement kind derived from the first SQL keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Show,
    Insert,
    Replace,
    Update,
    Delete,
    /// DDL and anything else; treated as a write.
    Other,
}

impl StatementKind {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Select | Self::Show)
    }

    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// Insert-like statements report a generated id when one exists.
    pub fn returns_insert_id(self) -> bool {
        matches!(self, Self::Insert | Self::Replace)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Show => "show",
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

/// Classifies a statement by its first keyword.
pub fn classify(sql: &str) -> StatementKind {
    let Some(captures) = LEADING_KEYWORD_RE.captures(sql) else {
        return StatementKind::Other;
    };
    let keyword = captures
        .get(1)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();

    match keyword.as_str() {
        "SELECT" => StatementKind::Select,
        "SHOW" => StatementKind::Show,
        "INSERT" => StatementKind::Insert,
        "REPLACE" => StatementKind::Replace,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        _ => StatementKind::Other,
    }
}
