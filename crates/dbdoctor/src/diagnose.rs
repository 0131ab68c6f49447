//! The diagnosis pipeline: analysis → diagnostic batch → health check → report.

use crate::analysis::{AnalysisProvider, ErrorAnalysis};
use crate::batch::{BatchRunner, DiagnosticBatch};
use crate::connection::ConnectionFactory;
use crate::error::{DoctorError, DoctorResult};
use crate::executor::QueryExecutor;
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Probe statement run after every batch.
pub const HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Recommendation given when the pipeline itself fails.
pub const FALLBACK_RECOMMENDATION: &str = "Please check your setup and try again";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub connection_healthy: bool,
}

/// Everything learned from the database for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investigation {
    #[serde(flatten)]
    pub batch: DiagnosticBatch,
    pub health_check: HealthCheck,
}

/// The top-level answer to one diagnosis request.
///
/// `ai_analysis` and `investigation` are set iff `success`; `error` is set iff it is not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisReport {
    pub success: bool,
    pub user_input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<ErrorAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation: Option<Investigation>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prevention_tips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiagnosisReport {
    pub fn completed(
        user_input: impl Into<String>,
        analysis: ErrorAnalysis,
        investigation: Investigation,
    ) -> Self {
        Self {
            success: true,
            user_input: user_input.into(),
            recommendations: analysis.recommended_fixes.clone(),
            prevention_tips: analysis.prevention_tips.clone(),
            ai_analysis: Some(analysis),
            investigation: Some(investigation),
            error: None,
        }
    }

    pub fn failed(user_input: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            user_input: user_input.into(),
            ai_analysis: None,
            investigation: None,
            recommendations: vec![FALLBACK_RECOMMENDATION.to_string()],
            prevention_tips: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Runs the full diagnosis pipeline for one error description at a time.
///
/// Requests are independent: the only shared state is the executor's connection factory.
pub struct Diagnoser<F, A> {
    executor: QueryExecutor<F>,
    analyzer: A,
}

impl<F, A> Diagnoser<F, A>
where
    F: ConnectionFactory,
    A: AnalysisProvider,
{
    pub fn new(executor: QueryExecutor<F>, analyzer: A) -> Self {
        Self { executor, analyzer }
    }

    pub fn executor(&self) -> &QueryExecutor<F> {
        &self.executor
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// Diagnose an error description. Always returns a report.
    pub async fn diagnose(&self, error_text: &str, db_type: &str) -> DiagnosisReport {
        let pipeline = AssertUnwindSafe(self.run_pipeline(error_text, db_type)).catch_unwind();

        let err = match pipeline.await {
            Ok(Ok(report)) => return report,
            Ok(Err(e)) => e,
            Err(panic) => DoctorError::orchestration(panic_message(panic.as_ref())),
        };

        tracing::error!(target: "dbdoctor", error = %err, "diagnosis failed");
        DiagnosisReport::failed(error_text, err.to_string())
    }

    /// Run the fixed probe statement.
    pub async fn health_check(&self) -> HealthCheck {
        let result = self.executor.execute(HEALTH_CHECK_QUERY).await;
        HealthCheck {
            connection_healthy: result.succeeded(),
        }
    }

    async fn run_pipeline(&self, error_text: &str, db_type: &str) -> DoctorResult<DiagnosisReport> {
        tracing::info!(target: "dbdoctor", db_type, "requesting error analysis");
        let analysis = self.analyzer.analyze(error_text, db_type).await;

        tracing::info!(
            target: "dbdoctor",
            category = %analysis.error_category,
            severity = %analysis.severity,
            statements = analysis.diagnostic_queries.len(),
            "executing diagnostic statements"
        );
        let batch = BatchRunner::new(&self.executor)
            .run(&analysis.diagnostic_queries)
            .await;
        if !batch.is_consistent() {
            return Err(DoctorError::orchestration(format!(
                "inconsistent batch tally: {} results, {} succeeded, {} failed",
                batch.results.len(),
                batch.succeeded_count,
                batch.failed_count
            )));
        }

        let health_check = self.health_check().await;
        tracing::info!(
            target: "dbdoctor",
            succeeded = batch.succeeded_count,
            failed = batch.failed_count,
            connection_healthy = health_check.connection_healthy,
            "diagnosis complete"
        );

        Ok(DiagnosisReport::completed(
            error_text,
            analysis,
            Investigation {
                batch,
                health_check,
            },
        ))
    }
}

impl<F, A> std::fmt::Debug for Diagnoser<F, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnoser")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests;
