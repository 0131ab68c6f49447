//! Guarded execution of a single diagnostic statement.

use crate::config::DoctorConfig;
use crate::connection::{ConnectionFactory, DiagnosticConnection, StatementOutput};
use crate::error::{DoctorError, DoctorResult};
use crate::validate::QueryValidator;
use crate::value::RowMap;
use serde::{Serialize, Serializer};
use std::time::Instant;

/// Error text for statements rejected by the safety gate.
pub const UNSAFE_QUERY_ERROR: &str = "Unsafe query - only SELECT/SHOW/DESCRIBE allowed";

/// Message for statements that ran without producing a result set.
pub const SUCCESS_MESSAGE: &str = "Query executed successfully";

const LOG_SQL_MAX_BYTES: usize = 200;

/// Why a statement did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFailureKind {
    /// Rejected by the safety gate; never sent to the database.
    Rejected,
    /// The database or driver reported an error.
    Execution,
    /// The configured query timeout elapsed.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub kind: QueryFailureKind,
    pub message: String,
}

/// The single populated outcome of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// A result set, capped at the configured row limit.
    Rows {
        columns: Vec<String>,
        rows: Vec<RowMap>,
    },
    /// The statement succeeded without a result set.
    Message(String),
    Failed(QueryFailure),
}

/// The record produced for one executed (or rejected) statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query: String,
    pub outcome: QueryOutcome,
}

impl QueryResult {
    pub fn new(query: impl Into<String>, outcome: QueryOutcome) -> Self {
        Self {
            query: query.into(),
            outcome,
        }
    }

    /// A statement the safety gate refused.
    pub fn rejected(query: impl Into<String>) -> Self {
        Self::failed(query, QueryFailureKind::Rejected, UNSAFE_QUERY_ERROR)
    }

    pub fn failed(
        query: impl Into<String>,
        kind: QueryFailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            query,
            QueryOutcome::Failed(QueryFailure {
                kind,
                message: message.into(),
            }),
        )
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, QueryOutcome::Failed(_))
    }

    pub fn rows(&self) -> Option<&[RowMap]> {
        match &self.outcome {
            QueryOutcome::Rows { rows, .. } => Some(rows),
            _ => None,
        }
    }

    pub fn columns(&self) -> Option<&[String]> {
        match &self.outcome {
            QueryOutcome::Rows { columns, .. } => Some(columns),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Failed(f) => Some(&f.message),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<QueryFailureKind> {
        match &self.outcome {
            QueryOutcome::Failed(f) => Some(f.kind),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct QueryResultRecord<'a> {
    query: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<&'a [RowMap]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<QueryFailureKind>,
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        QueryResultRecord {
            query: &self.query,
            success: self.succeeded(),
            columns: self.columns(),
            rows: self.rows(),
            message: self.message(),
            error: self.error(),
            error_kind: self.failure_kind(),
        }
        .serialize(serializer)
    }
}

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Runs statements through the safety gate and a [`ConnectionFactory`].
///
/// `execute` never fails: rejections, driver errors and timeouts all come back as a
/// [`QueryResult`] with a [`QueryOutcome::Failed`] outcome.
pub struct QueryExecutor<F> {
    factory: F,
    validator: QueryValidator,
    config: DoctorConfig,
}

impl<F: ConnectionFactory> QueryExecutor<F> {
    pub fn new(factory: F, config: DoctorConfig) -> Self {
        Self {
            validator: QueryValidator::new(config.safety.clone()),
            factory,
            config,
        }
    }

    pub fn config(&self) -> &DoctorConfig {
        &self.config
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Validate, then run one statement.
    pub async fn execute(&self, sql: &str) -> QueryResult {
        let log_sql = truncate_sql_bytes(sql, LOG_SQL_MAX_BYTES);

        let verdict = self.validator.validate(sql);
        if let Some(reason) = verdict.reason {
            tracing::warn!(target: "dbdoctor.sql", sql = %log_sql, %reason, "statement rejected");
            return QueryResult::rejected(sql);
        }

        let start = Instant::now();
        let outcome = match self.run(sql).await {
            Ok(StatementOutput::Rows { columns, mut rows }) => {
                rows.truncate(self.config.max_rows);
                QueryOutcome::Rows { columns, rows }
            }
            Ok(StatementOutput::Completed) => QueryOutcome::Message(SUCCESS_MESSAGE.to_string()),
            Err(e) => {
                let kind = if e.is_timeout() {
                    QueryFailureKind::Timeout
                } else {
                    QueryFailureKind::Execution
                };
                QueryOutcome::Failed(QueryFailure {
                    kind,
                    message: e.to_string(),
                })
            }
        };
        let duration = start.elapsed();

        match &outcome {
            QueryOutcome::Rows { rows, .. } => tracing::debug!(
                target: "dbdoctor.sql",
                sql = %log_sql,
                rows = rows.len(),
                ?duration,
                "statement returned rows"
            ),
            QueryOutcome::Message(_) => tracing::debug!(
                target: "dbdoctor.sql",
                sql = %log_sql,
                ?duration,
                "statement completed"
            ),
            QueryOutcome::Failed(f) => tracing::warn!(
                target: "dbdoctor.sql",
                sql = %log_sql,
                kind = ?f.kind,
                error = %f.message,
                ?duration,
                "statement failed"
            ),
        }

        QueryResult::new(sql, outcome)
    }

    async fn run(&self, sql: &str) -> DoctorResult<StatementOutput> {
        let max_rows = self.config.max_rows;
        let Some(timeout) = self.config.query_timeout else {
            let mut conn = self.factory.connect().await?;
            return conn.fetch(sql, max_rows).await;
        };

        // One deadline covers checkout and execution.
        let deadline = tokio::time::Instant::now() + timeout;
        let mut conn = tokio::time::timeout_at(deadline, self.factory.connect())
            .await
            .map_err(|_| DoctorError::Timeout(timeout))??;

        let cancel_token = conn.cancel_token();
        let fetch = conn.fetch(sql, max_rows);
        tokio::pin!(fetch);
        tokio::select! {
            result = &mut fetch => result,
            _ = tokio::time::sleep_until(deadline) => {
                if let Some(cancel_token) = cancel_token {
                    tokio::spawn(async move {
                        let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
                    });
                }
                Err(DoctorError::Timeout(timeout))
            }
        }
    }
}

impl<F> std::fmt::Debug for QueryExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("validator", &self.validator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
