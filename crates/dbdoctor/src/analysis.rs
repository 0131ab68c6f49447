//! The analysis collaborator: turns an error description into a structured diagnosis.

use serde::{Deserialize, Serialize};

/// Structured analysis of a reported database error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    /// One of `connection`, `query`, `performance`, `permissions`, `other`.
    #[serde(default = "default_category")]
    pub error_category: String,
    /// One of `low`, `medium`, `high`, `critical`.
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub analysis: String,
    /// Read-only statements proposed to investigate the error.
    #[serde(default)]
    pub diagnostic_queries: Vec<String>,
    #[serde(default)]
    pub potential_causes: Vec<String>,
    #[serde(default)]
    pub recommended_fixes: Vec<String>,
    #[serde(default)]
    pub prevention_tips: Vec<String>,
}

fn default_category() -> String {
    "other".to_string()
}

fn default_severity() -> String {
    "medium".to_string()
}

impl ErrorAnalysis {
    /// The analysis used whenever the backend cannot produce one.
    pub fn fallback(error_text: &str) -> Self {
        Self {
            error_category: default_category(),
            severity: default_severity(),
            analysis: format!("Could not analyze: {error_text}"),
            diagnostic_queries: vec!["SELECT 1 as health_check".to_string()],
            potential_causes: vec!["Analysis unavailable".to_string()],
            recommended_fixes: vec!["Manual investigation needed".to_string()],
            prevention_tips: Vec::new(),
        }
    }
}

/// Produces an [`ErrorAnalysis`] for an error description.
///
/// Implementations must be total: on any internal failure they return
/// [`ErrorAnalysis::fallback`] instead of an error.
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, error_text: &str, db_type: &str) -> ErrorAnalysis;
}

#[async_trait::async_trait]
impl<P: AnalysisProvider + ?Sized> AnalysisProvider for std::sync::Arc<P> {
    async fn analyze(&self, error_text: &str, db_type: &str) -> ErrorAnalysis {
        (**self).analyze(error_text, db_type).await
    }
}

#[async_trait::async_trait]
impl<P: AnalysisProvider + ?Sized> AnalysisProvider for Box<P> {
    async fn analyze(&self, error_text: &str, db_type: &str) -> ErrorAnalysis {
        (**self).analyze(error_text, db_type).await
    }
}

/// A provider with no backend; always answers with the fallback analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAnalyzer;

#[async_trait::async_trait]
impl AnalysisProvider for OfflineAnalyzer {
    async fn analyze(&self, error_text: &str, _db_type: &str) -> ErrorAnalysis {
        ErrorAnalysis::fallback(error_text)
    }
}
