//! Statement classification
//!
//! Mutating statements are classified once, when they are about to run. The parsed
//! [`StatementKind`] travels with the recorded operation so the undo path can pattern
//! match on it instead of re-reading statement prefixes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Parsed shape of a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementKind {
    /// `UPDATE <table> SET ... [WHERE ...]`
    Update {
        /// Target table, unquoted
        table: String,
        /// Top-level WHERE condition, without the keyword
        where_clause: Option<String>,
    },
    /// `DELETE FROM <table> [WHERE ...]`
    Delete {
        /// Target table, unquoted
        table: String,
        /// Top-level WHERE condition, without the keyword
        where_clause: Option<String>,
    },
    /// `INSERT INTO <table> ...`
    Insert {
        /// Target table, unquoted
        table: String,
    },
    /// Read-only query
    Select,
    /// Anything else (DDL, PRAGMA, transaction control)
    Other,
}

const TABLE_PATTERN: &str = r#"([`"\[]?[\w.]+[`"\]]?)"#;

fn update_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(&format!(r"(?is)^\s*UPDATE\s+(?:OR\s+\w+\s+)?{}\s+SET\s", TABLE_PATTERN))
            .expect("Invalid regex")
    })
}

fn delete_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(&format!(r"(?is)^\s*DELETE\s+FROM\s+{}", TABLE_PATTERN)).expect("Invalid regex")
    })
}

fn insert_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^\s*(?:INSERT|REPLACE)(?:\s+OR\s+\w+)?\s+INTO\s+{}",
            TABLE_PATTERN
        ))
        .expect("Invalid regex")
    })
}

fn select_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?is)^\s*(?:SELECT|WITH|VALUES)\b").expect("Invalid regex"))
}

impl StatementKind {
    /// Classify statement text
    pub fn parse(sql: &str) -> Self {
        if let Some(caps) = update_regex().captures(sql) {
            return StatementKind::Update {
                table: unquote(&caps[1]),
                where_clause: where_clause(sql),
            };
        }

        if let Some(caps) = delete_regex().captures(sql) {
            return StatementKind::Delete {
                table: unquote(&caps[1]),
                where_clause: where_clause(sql),
            };
        }

        if let Some(caps) = insert_regex().captures(sql) {
            return StatementKind::Insert {
                table: unquote(&caps[1]),
            };
        }

        if select_regex().is_match(sql) {
            return StatementKind::Select;
        }

        StatementKind::Other
    }

    /// Target table of a mutating statement
    pub fn table(&self) -> Option<&str> {
        match self {
            StatementKind::Update { table, .. }
            | StatementKind::Delete { table, .. }
            | StatementKind::Insert { table } => Some(table),
            StatementKind::Select | StatementKind::Other => None,
        }
    }

    /// WHERE condition of an UPDATE or DELETE
    pub fn where_clause(&self) -> Option<&str> {
        match self {
            StatementKind::Update { where_clause, .. } | StatementKind::Delete { where_clause, .. } => {
                where_clause.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the statement changes data
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StatementKind::Update { .. } | StatementKind::Delete { .. } | StatementKind::Insert { .. }
        )
    }

    /// Whether rows must be captured before the statement runs
    pub fn needs_snapshot(&self) -> bool {
        matches!(self, StatementKind::Update { .. } | StatementKind::Delete { .. })
    }

    /// Short uppercase label for logs and audit detail
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Update { .. } => "UPDATE",
            StatementKind::Delete { .. } => "DELETE",
            StatementKind::Insert { .. } => "INSERT",
            StatementKind::Select => "SELECT",
            StatementKind::Other => "OTHER",
        }
    }
}

fn unquote(raw: &str) -> String {
    raw.split('.')
        .map(|part| part.trim_matches(|c| matches!(c, '`' | '"' | '[' | ']')))
        .collect::<Vec<_>>()
        .join(".")
}

/// Extract the top-level WHERE condition, stopping at a trailing RETURNING clause
fn where_clause(sql: &str) -> Option<String> {
    let start = find_top_level_keyword(sql, "WHERE", 0)? + "WHERE".len();
    let end = find_top_level_keyword(sql, "RETURNING", start).unwrap_or(sql.len());

    let clause = sql[start..end].trim().trim_end_matches(';').trim();
    if clause.is_empty() {
        None
    } else {
        Some(clause.to_string())
    }
}

/// Byte offset of `keyword` outside quotes and parentheses, searching from `from`
fn find_top_level_keyword(sql: &str, keyword: &str, from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let kw = keyword.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'[' => quote = Some(b']'),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if depth == 0
                    && i >= from
                    && i + kw.len() <= bytes.len()
                    && bytes[i..i + kw.len()].eq_ignore_ascii_case(kw) =>
                {
                    let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                    let after_ok = i + kw.len() == bytes.len() || !is_word_byte(bytes[i + kw.len()]);
                    if before_ok && after_ok {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_with_where() {
        let kind = StatementKind::parse("UPDATE units SET attack = attack * 1.1 WHERE class = 'archer';");
        assert_eq!(
            kind,
            StatementKind::Update {
                table: "units".to_string(),
                where_clause: Some("class = 'archer'".to_string()),
            }
        );
        assert!(kind.needs_snapshot());
        assert_eq!(kind.label(), "UPDATE");
    }

    #[test]
    fn test_parse_update_without_where() {
        let kind = StatementKind::parse("update \"units\" set attack = 0");
        assert_eq!(kind.table(), Some("units"));
        assert_eq!(kind.where_clause(), None);
    }

    #[test]
    fn test_where_inside_subquery_is_ignored() {
        let kind = StatementKind::parse(
            "UPDATE units SET attack = (SELECT max(attack) FROM units u WHERE u.tier = 2) WHERE id = 4",
        );
        assert_eq!(kind.where_clause(), Some("id = 4"));
    }

    #[test]
    fn test_where_inside_string_literal_is_ignored() {
        let kind = StatementKind::parse("UPDATE notes SET body = 'look WHERE it hurts' WHERE id = 1");
        assert_eq!(kind.where_clause(), Some("id = 1"));
    }

    #[test]
    fn test_returning_clause_is_trimmed() {
        let kind = StatementKind::parse("DELETE FROM items WHERE price > 10 RETURNING id");
        assert_eq!(kind.where_clause(), Some("price > 10"));
    }

    #[test]
    fn test_parse_delete() {
        let kind = StatementKind::parse("  DELETE FROM [items] WHERE id IN (1, 2)");
        assert_eq!(
            kind,
            StatementKind::Delete {
                table: "items".to_string(),
                where_clause: Some("id IN (1, 2)".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_insert_variants() {
        assert_eq!(
            StatementKind::parse("INSERT INTO items (name) VALUES ('a')"),
            StatementKind::Insert { table: "items".to_string() }
        );
        assert_eq!(
            StatementKind::parse("INSERT OR REPLACE INTO main.items VALUES (1)").table(),
            Some("main.items")
        );
        assert!(!StatementKind::parse("INSERT INTO items VALUES (1)").needs_snapshot());
    }

    #[test]
    fn test_parse_select_and_other() {
        assert_eq!(StatementKind::parse("SELECT * FROM items"), StatementKind::Select);
        assert_eq!(StatementKind::parse("WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Select);
        assert_eq!(StatementKind::parse("CREATE TABLE t (id INTEGER)"), StatementKind::Other);
        assert!(!StatementKind::Other.is_mutation());
    }

    #[test]
    fn test_column_named_like_keyword_is_not_split() {
        let kind = StatementKind::parse("UPDATE t SET somewhere = 1 WHERE id = 2");
        assert_eq!(kind.where_clause(), Some("id = 2"));
    }
}
