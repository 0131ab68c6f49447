use super::*;
use crate::config::DoctorConfig;
use crate::executor::{QueryFailureKind, UNSAFE_QUERY_ERROR};
use crate::testing::MemoryDb;
use serde_json::json;
use std::sync::Mutex;

// ── Scripted analysis provider ──

struct ScriptedAnalyzer {
    queries: Vec<String>,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedAnalyzer {
    fn new(queries: &[&str]) -> Self {
        Self {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl AnalysisProvider for ScriptedAnalyzer {
    async fn analyze(&self, error_text: &str, db_type: &str) -> ErrorAnalysis {
        self.seen
            .lock()
            .unwrap()
            .push((error_text.to_string(), db_type.to_string()));
        ErrorAnalysis {
            error_category: "connection".to_string(),
            severity: "high".to_string(),
            analysis: "The server refused the connection.".to_string(),
            diagnostic_queries: self.queries.clone(),
            potential_causes: vec!["server not running".to_string()],
            recommended_fixes: vec![
                "Start the database server".to_string(),
                "Check the port".to_string(),
            ],
            prevention_tips: vec!["Monitor the service".to_string()],
        }
    }
}

fn diagnoser(db: &MemoryDb, queries: &[&str]) -> Diagnoser<MemoryDb, ScriptedAnalyzer> {
    Diagnoser::new(
        QueryExecutor::new(db.clone(), DoctorConfig::default()),
        ScriptedAnalyzer::new(queries),
    )
}

#[tokio::test]
async fn healthy_database_end_to_end() {
    let db = MemoryDb::new();
    let doctor = diagnoser(&db, &["SELECT 1"]);

    let report = doctor.diagnose("connection refused", "postgresql").await;

    assert!(report.success);
    assert!(report.error.is_none());
    let investigation = report.investigation.as_ref().unwrap();
    assert_eq!(investigation.batch.total, 1);
    assert_eq!(investigation.batch.succeeded_count, 1);
    assert_eq!(investigation.batch.failed_count, 0);
    assert!(investigation.health_check.connection_healthy);
    assert_eq!(
        report.recommendations,
        vec!["Start the database server", "Check the port"]
    );
    assert_eq!(report.prevention_tips, vec!["Monitor the service"]);
    assert_eq!(
        doctor.analyzer().seen.lock().unwrap().as_slice(),
        &[("connection refused".to_string(), "postgresql".to_string())]
    );

    // Batch first, then the probe.
    assert_eq!(db.executed(), vec!["SELECT 1", HEALTH_CHECK_QUERY]);
}

#[tokio::test]
async fn destructive_proposal_is_rejected_and_nothing_is_dropped() {
    let db = MemoryDb::new().with_table("users", 4);
    let doctor = diagnoser(&db, &["DROP TABLE users"]);

    let report = doctor.diagnose("connection refused", "postgresql").await;

    assert!(report.success);
    let investigation = report.investigation.as_ref().unwrap();
    assert_eq!(investigation.batch.total, 1);
    assert_eq!(investigation.batch.failed_count, 1);
    let result = &investigation.batch.results[0];
    assert!(!result.succeeded());
    assert!(result.error().unwrap().contains("Unsafe query"));
    assert_eq!(result.failure_kind(), Some(QueryFailureKind::Rejected));

    assert_eq!(db.table_len("users"), Some(4));
    assert_eq!(db.executed(), vec![HEALTH_CHECK_QUERY]);
}

#[tokio::test]
async fn unreachable_database_still_produces_a_report() {
    let db = MemoryDb::unreachable();
    let doctor = diagnoser(&db, &["SELECT 1", "SHOW max_connections"]);

    let report = doctor.diagnose("connection refused", "postgresql").await;

    assert!(report.success);
    let investigation = report.investigation.as_ref().unwrap();
    assert_eq!(investigation.batch.failed_count, 2);
    assert!(!investigation.health_check.connection_healthy);
}

#[tokio::test]
async fn empty_input_and_empty_batch() {
    let db = MemoryDb::new();
    let doctor = diagnoser(&db, &[]);

    let report = doctor.diagnose("", "").await;

    assert!(report.success);
    let investigation = report.investigation.as_ref().unwrap();
    assert_eq!(investigation.batch.total, 0);
    assert!(investigation.batch.is_consistent());
    assert!(investigation.health_check.connection_healthy);
}

#[tokio::test]
async fn driver_panic_becomes_a_failed_report() {
    let db = MemoryDb::new();
    let doctor = diagnoser(&db, &["SELECT panic()"]);

    let report = doctor.diagnose("something broke", "postgresql").await;

    assert!(!report.success);
    assert!(report.ai_analysis.is_none());
    assert!(report.investigation.is_none());
    assert_eq!(report.recommendations, vec![FALLBACK_RECOMMENDATION]);
    let error = report.error.as_deref().unwrap();
    assert!(error.contains("driver bug"), "{error}");
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn mixed_batch_counts_add_up() {
    let db = MemoryDb::new().with_table("locks", 2);
    let doctor = diagnoser(
        &db,
        &[
            "SELECT * FROM locks",
            "DELETE FROM locks",
            "SELECT * FROM nowhere",
            "SHOW deadlock_timeout",
        ],
    );

    let report = doctor.diagnose("deadlock detected", "postgresql").await;
    let batch = &report.investigation.as_ref().unwrap().batch;

    assert_eq!(batch.total, 4);
    assert_eq!(batch.succeeded_count, 2);
    assert_eq!(batch.failed_count, 2);
    assert_eq!(batch.total, batch.succeeded_count + batch.failed_count);
    assert_eq!(batch.results[1].error(), Some(UNSAFE_QUERY_ERROR));
}

#[tokio::test]
async fn report_serializes_as_nested_structure() {
    let db = MemoryDb::new();
    let doctor = diagnoser(&db, &["DROP TABLE users"]);

    let report = doctor.diagnose("connection refused", "postgresql").await;
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["success"], json!(true));
    assert_eq!(value["investigation"]["queries_executed"], json!(1));
    assert_eq!(value["investigation"]["failed_queries"], json!(1));
    assert_eq!(value["investigation"]["successful_queries"], json!(0));
    assert_eq!(
        value["investigation"]["health_check"]["connection_healthy"],
        json!(true)
    );
    assert_eq!(
        value["investigation"]["query_results"][0]["error"],
        json!(UNSAFE_QUERY_ERROR)
    );
    assert_eq!(value["ai_analysis"]["error_category"], json!("connection"));
    assert!(value.get("error").is_none());
}

#[test]
fn failed_report_shape() {
    let value = serde_json::to_value(DiagnosisReport::failed("oops", "boom")).unwrap();
    assert_eq!(
        value,
        json!({
            "success": false,
            "user_input": "oops",
            "recommendations": [FALLBACK_RECOMMENDATION],
            "error": "boom",
        })
    );
}
