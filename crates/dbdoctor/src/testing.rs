//! In-memory database double shared by unit tests.

use crate::connection::{ConnectionFactory, DiagnosticConnection, StatementOutput};
use crate::error::{DoctorError, DoctorResult};
use crate::value::RowMap;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub tables: BTreeMap<String, Vec<RowMap>>,
    pub executed: Vec<String>,
}

/// A tiny table store that understands just enough SQL for the tests:
///
/// - `SELECT 1` (with an optional alias)
/// - `SELECT * FROM <table>`
/// - `SHOW <anything>` (no result set)
/// - `SELECT pg_sleep(<secs>)`
/// - `DROP TABLE <table>`
/// - `SELECT panic()` (panics inside the driver)
///
/// Anything else is a syntax error.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryDb {
    pub state: Arc<Mutex<MemoryState>>,
    pub connects: Arc<AtomicUsize>,
    pub open: Arc<AtomicUsize>,
    pub unreachable: bool,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_table(self, name: &str, rows: usize) -> Self {
        let data = (0..rows)
            .map(|i| {
                let mut row = RowMap::new();
                row.insert("id".to_string(), json!(i));
                row.insert("name".to_string(), json!(format!("row-{i}")));
                row
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), data);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn table_len(&self, name: &str) -> Option<usize> {
        self.state.lock().unwrap().tables.get(name).map(Vec::len)
    }
}

pub(crate) struct MemoryConnection {
    db: MemoryDb,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.db.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn single_value(column: &str, value: Value) -> StatementOutput {
    let mut row = RowMap::new();
    row.insert(column.to_string(), value);
    StatementOutput::Rows {
        columns: vec![column.to_string()],
        rows: vec![row],
    }
}

#[async_trait::async_trait]
impl DiagnosticConnection for MemoryConnection {
    async fn fetch(&mut self, sql: &str, _max_rows: usize) -> DoctorResult<StatementOutput> {
        self.db
            .state
            .lock()
            .unwrap()
            .executed
            .push(sql.to_string());

        let words: Vec<String> = sql
            .trim()
            .trim_end_matches(';')
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["select", "1"] => Ok(single_value("?column?", json!(1))),
            ["select", "1", "as", alias] => Ok(single_value(alias, json!(1))),
            ["select", "*", "from", table] => {
                let state = self.db.state.lock().unwrap();
                let rows = state.tables.get(*table).cloned().ok_or_else(|| {
                    DoctorError::Database {
                        code: "42P01".to_string(),
                        message: format!("relation \"{table}\" does not exist"),
                    }
                })?;
                // Ignores the row cap so the executor's own cap is exercised.
                Ok(StatementOutput::Rows {
                    columns: vec!["id".to_string(), "name".to_string()],
                    rows,
                })
            }
            ["show", ..] => Ok(StatementOutput::Completed),
            [select, sleep] if *select == "select" && sleep.starts_with("pg_sleep(") => {
                let secs: u64 = sleep
                    .trim_start_matches("pg_sleep(")
                    .trim_end_matches(')')
                    .parse()
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(single_value("pg_sleep", Value::Null))
            }
            ["drop", "table", table] => {
                self.db.state.lock().unwrap().tables.remove(*table);
                Ok(StatementOutput::Completed)
            }
            ["select", "panic()"] => panic!("driver bug"),
            _ => Err(DoctorError::Database {
                code: "42601".to_string(),
                message: format!("syntax error in \"{sql}\""),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryDb {
    type Connection = MemoryConnection;

    async fn connect(&self) -> DoctorResult<MemoryConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(DoctorError::Connection(
                "connection refused (os error 111)".to_string(),
            ));
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection { db: self.clone() })
    }
}
