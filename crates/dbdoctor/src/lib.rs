//! # dbdoctor
//!
//! AI-assisted diagnosis of database errors with a read-only execution pipeline.
//!
//! ## Features
//!
//! - **Read-only by construction**: every statement passes the [`QueryValidator`]
//!   before a connection is even opened
//! - **Bounded**: row cap and per-statement timeout from [`DoctorConfig`]
//! - **Total**: [`Diagnoser::diagnose`] always returns a [`DiagnosisReport`]
//! - **Pluggable analysis**: anything implementing [`AnalysisProvider`]
//!   (an OpenAI-backed one ships behind the `openai` feature)
//!
//! ## Example
//!
//! ```ignore
//! use dbdoctor::{create_pool, Diagnoser, DoctorConfig, OfflineAnalyzer, QueryExecutor};
//!
//! let pool = create_pool(&std::env::var("DATABASE_URL")?)?;
//! let doctor = Diagnoser::new(
//!     QueryExecutor::new(pool, DoctorConfig::default()),
//!     OfflineAnalyzer,
//! );
//!
//! let report = doctor.diagnose("FATAL: too many connections", "postgresql").await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod analysis;
pub mod batch;
pub mod config;
pub mod connection;
pub mod diagnose;
pub mod error;
pub mod executor;
pub mod validate;
pub mod value;

pub use analysis::{AnalysisProvider, ErrorAnalysis, OfflineAnalyzer};
pub use batch::{BatchRunner, DiagnosticBatch};
pub use config::{DoctorConfig, SafetyPolicy};
pub use connection::{ConnectionFactory, DiagnosticConnection, PgConnector, StatementOutput};
pub use diagnose::{Diagnoser, DiagnosisReport, HealthCheck, Investigation};
pub use error::{DoctorError, DoctorResult};
pub use executor::{QueryExecutor, QueryFailure, QueryFailureKind, QueryOutcome, QueryResult};
pub use validate::{QueryValidator, Rejection, Verdict, is_safe};
pub use value::RowMap;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_builder, create_pool_with_config};

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::{OpenAiAnalyzer, OpenAiConfig};

#[cfg(test)]
mod testing;
