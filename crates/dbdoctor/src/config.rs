//! Limits and safety policy for the query pipeline.

use std::time::Duration;

/// Default maximum number of rows fetched per statement.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Default per-statement timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Leading commands a statement may start with.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "PRAGMA"];

/// Keywords that reject a statement wherever they appear in its text.
pub const DEFAULT_DENIED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE",
];

/// Keyword sets gating statement safety.
///
/// Keywords are stored uppercased; matching against statements is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyPolicy {
    pub allowed_commands: Vec<String>,
    pub denied_keywords: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            denied_keywords: DEFAULT_DENIED_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SafetyPolicy {
    /// Create a policy with the default allow/deny lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the allow-list of leading commands.
    pub fn allowed_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_commands = normalize_keywords(commands);
        self
    }

    /// Replace the deny-list of keywords.
    pub fn denied_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denied_keywords = normalize_keywords(keywords);
        self
    }

    /// Add one command to the allow-list.
    pub fn allow(mut self, command: &str) -> Self {
        let command = command.trim().to_uppercase();
        if !command.is_empty() && !self.allowed_commands.contains(&command) {
            self.allowed_commands.push(command);
        }
        self
    }

    /// Add one keyword to the deny-list.
    pub fn deny(mut self, keyword: &str) -> Self {
        let keyword = keyword.trim().to_uppercase();
        if !keyword.is_empty() && !self.denied_keywords.contains(&keyword) {
            self.denied_keywords.push(keyword);
        }
        self
    }
}

fn normalize_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for k in keywords {
        let k = k.as_ref().trim().to_uppercase();
        // An empty deny keyword would match every statement.
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

/// Configuration for [`crate::QueryExecutor`] and everything built on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorConfig {
    /// Maximum rows kept per statement; extra rows are dropped.
    pub max_rows: usize,
    /// Per-statement timeout. `None` leaves it to the driver.
    pub query_timeout: Option<Duration>,
    /// Statement safety gate.
    pub safety: SafetyPolicy,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
            safety: SafetyPolicy::default(),
        }
    }
}

impl DoctorConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of rows returned per statement.
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Set the per-statement timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.query_timeout = Some(duration);
        self
    }

    /// Disable the per-statement timeout.
    pub fn no_timeout(mut self) -> Self {
        self.query_timeout = None;
        self
    }

    /// Set the safety policy.
    pub fn safety(mut self, policy: SafetyPolicy) -> Self {
        self.safety = policy;
        self
    }
}
