//! Read-only policy gate for generated SQL

use serde::Serialize;

/// Statements containing any of these words are rejected
pub const DENYLIST: [&str; 7] = [
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "UPDATE", "INSERT",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "SQL passed safety checks".to_string(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Stateless check: no denylisted whole word anywhere, and the statement
/// starts with `SELECT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate;

impl SafetyGate {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, sql: &str) -> SafetyVerdict {
        let upper = sql.trim().to_uppercase();

        // Words are maximal runs of identifier characters, so UPDATED_AT or
        // CREATED_BY never match UPDATE or CREATE
        let denied = upper
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .find_map(|word| DENYLIST.iter().find(|kw| **kw == word));

        if let Some(keyword) = denied {
            tracing::warn!("Rejected SQL containing {}", keyword);
            return SafetyVerdict::deny(format!("Forbidden SQL keyword: {}", keyword));
        }

        if !starts_with_select(&upper) {
            tracing::warn!("Rejected non-SELECT statement");
            return SafetyVerdict::deny("Only SELECT statements may be executed");
        }

        SafetyVerdict::allow()
    }
}

/// `SELECT` as a whole leading word, so `SELECTX` or `SELECT_ALL` do not count
fn starts_with_select(upper: &str) -> bool {
    match upper.strip_prefix("SELECT") {
        Some(rest) => !rest
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}
