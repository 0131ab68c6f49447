//! Read-only statement gate.
//!
//! A statement is safe when its leading command is on the allow-list **and** no deny-list
//! keyword appears anywhere in its text. The deny-list check is a plain case-insensitive
//! substring match, so `SELECT update_count FROM stats` and `SELECT 'drop' AS x` are rejected
//! too. That over-rejection is intended: it also catches `SELECT 1; DROP TABLE x`.
//!
//! ```ignore
//! use dbdoctor::validate::is_safe;
//!
//! assert!(is_safe("SELECT * FROM pg_stat_activity"));
//! assert!(!is_safe("SELECT * FROM x; DROP TABLE x"));
//! ```

use crate::config::SafetyPolicy;
use serde::Serialize;
use std::fmt;

/// Why a statement was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "keyword", rename_all = "snake_case")]
pub enum Rejection {
    /// Empty or whitespace-only statement.
    Empty,
    /// The leading command is not on the allow-list.
    CommandNotAllowed(String),
    /// A deny-list keyword appears in the statement text.
    ForbiddenKeyword(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty statement"),
            Rejection::CommandNotAllowed(cmd) => {
                write!(f, "leading command `{cmd}` is not allowed")
            }
            Rejection::ForbiddenKeyword(kw) => write!(f, "contains forbidden keyword `{kw}`"),
        }
    }
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub is_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Rejection>,
}

impl Verdict {
    fn safe() -> Self {
        Self {
            is_safe: true,
            reason: None,
        }
    }

    fn rejected(reason: Rejection) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason),
        }
    }
}

/// Classifies statements against a [`SafetyPolicy`].
#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    policy: SafetyPolicy,
}

impl QueryValidator {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Validate a statement, reporting the first reason it is rejected.
    ///
    /// Deny-list keywords are checked in policy order, so the reported keyword is stable.
    pub fn validate(&self, sql: &str) -> Verdict {
        let upper = sql.trim().to_uppercase();
        let Some(command) = upper.split_whitespace().next() else {
            return Verdict::rejected(Rejection::Empty);
        };

        if !self.policy.allowed_commands.iter().any(|c| c == command) {
            return Verdict::rejected(Rejection::CommandNotAllowed(command.to_string()));
        }

        if let Some(keyword) = self
            .policy
            .denied_keywords
            .iter()
            .find(|kw| upper.contains(kw.as_str()))
        {
            return Verdict::rejected(Rejection::ForbiddenKeyword(keyword.clone()));
        }

        Verdict::safe()
    }

    /// Whether `sql` may be executed.
    pub fn is_safe(&self, sql: &str) -> bool {
        self.validate(sql).is_safe
    }
}

/// Check a statement against the default policy.
pub fn is_safe(sql: &str) -> bool {
    QueryValidator::default().is_safe(sql)
}
