//! Sequential execution of a list of diagnostic statements.

use crate::connection::ConnectionFactory;
use crate::executor::{QueryExecutor, QueryResult};
use serde::Serialize;

/// Aggregate view over one batch execution.
///
/// Invariant: `total == results.len() == succeeded_count + failed_count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticBatch {
    #[serde(rename = "query_results")]
    pub results: Vec<QueryResult>,
    #[serde(rename = "queries_executed")]
    pub total: usize,
    #[serde(rename = "successful_queries")]
    pub succeeded_count: usize,
    #[serde(rename = "failed_queries")]
    pub failed_count: usize,
}

impl DiagnosticBatch {
    /// Tally a list of results.
    pub fn from_results(results: Vec<QueryResult>) -> Self {
        let succeeded_count = results.iter().filter(|r| r.succeeded()).count();
        Self {
            total: results.len(),
            failed_count: results.len() - succeeded_count,
            succeeded_count,
            results,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.results.len() && self.total == self.succeeded_count + self.failed_count
    }
}

/// Runs statements through a [`QueryExecutor`] one at a time, in input order.
///
/// A failing statement never stops the ones after it.
#[derive(Debug)]
pub struct BatchRunner<'a, F> {
    executor: &'a QueryExecutor<F>,
}

impl<'a, F: ConnectionFactory> BatchRunner<'a, F> {
    pub fn new(executor: &'a QueryExecutor<F>) -> Self {
        Self { executor }
    }

    /// One result per statement, same length and order as the input.
    pub async fn run_batch<S: AsRef<str>>(&self, statements: &[S]) -> Vec<QueryResult> {
        let mut results = Vec::with_capacity(statements.len());
        for (idx, sql) in statements.iter().enumerate() {
            tracing::debug!(target: "dbdoctor.sql", index = idx, total = statements.len(), "running diagnostic statement");
            results.push(self.executor.execute(sql.as_ref()).await);
        }
        results
    }

    /// Run the statements and tally the outcome.
    pub async fn run<S: AsRef<str>>(&self, statements: &[S]) -> DiagnosticBatch {
        DiagnosticBatch::from_results(self.run_batch(statements).await)
    }
}
