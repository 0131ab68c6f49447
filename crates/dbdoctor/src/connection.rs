//! Connection seams for running diagnostic statements.
//!
//! The executor only sees two traits:
//!
//! - [`ConnectionFactory`]: the long-lived, shareable source of connections
//!   (`deadpool_postgres::Pool`, [`PgConnector`], or a test double).
//! - [`DiagnosticConnection`]: one scoped connection that can run a statement with a row cap.
//!
//! A connection is released when it is dropped, so every exit path of the executor returns it.

use crate::error::{DoctorError, DoctorResult};
use crate::value::{RowMap, row_to_map};

/// What the driver produced for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    /// The statement yields a result set (possibly with zero rows).
    Rows {
        columns: Vec<String>,
        rows: Vec<RowMap>,
    },
    /// The statement ran but yields no result set.
    Completed,
}

/// One scoped database connection.
#[async_trait::async_trait]
pub trait DiagnosticConnection: Send + Sync {
    /// Run `sql` and fetch at most `max_rows` rows of its result set.
    async fn fetch(&mut self, sql: &str, max_rows: usize) -> DoctorResult<StatementOutput>;

    /// Return a cancellation token for the underlying connection, if supported.
    ///
    /// Used for best-effort server-side cancellation when a statement times out.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }
}

/// A shareable source of connections.
///
/// Implementations must be safe to use from independent concurrent requests.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: DiagnosticConnection;

    /// Open (or check out) a connection.
    async fn connect(&self) -> DoctorResult<Self::Connection>;
}

#[async_trait::async_trait]
impl<F: ConnectionFactory + ?Sized> ConnectionFactory for std::sync::Arc<F> {
    type Connection = F::Connection;

    async fn connect(&self) -> DoctorResult<Self::Connection> {
        (**self).connect().await
    }
}

/// Run `sql` in a read-only transaction and fetch at most `max_rows` rows through a portal.
///
/// The server stops producing rows at the cap, and the rollback closes the portal, so the
/// connection is idle again when this returns and can go straight back to a pool.
pub async fn fetch_limited(
    client: &mut tokio_postgres::Client,
    sql: &str,
    max_rows: usize,
) -> DoctorResult<StatementOutput> {
    let tx = client
        .build_transaction()
        .read_only(true)
        .start()
        .await
        .map_err(DoctorError::from_db_error)?;

    let stmt = tx.prepare(sql).await.map_err(DoctorError::from_db_error)?;

    let output = if stmt.columns().is_empty() {
        tx.execute(&stmt, &[])
            .await
            .map_err(DoctorError::from_db_error)?;
        StatementOutput::Completed
    } else {
        let columns = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = match portal_limit(max_rows) {
            Some(limit) => {
                let portal = tx
                    .bind(&stmt, &[])
                    .await
                    .map_err(DoctorError::from_db_error)?;
                tx.query_portal(&portal, limit)
                    .await
                    .map_err(DoctorError::from_db_error)?
                    .iter()
                    .map(row_to_map)
                    .collect::<DoctorResult<Vec<_>>>()?
            }
            None => Vec::new(),
        };

        StatementOutput::Rows { columns, rows }
    };

    tx.rollback().await.map_err(DoctorError::from_db_error)?;
    Ok(output)
}

/// Row limit for a portal execute. The protocol reads `0` as "no limit", so a zero cap
/// skips the execute entirely.
fn portal_limit(max_rows: usize) -> Option<i32> {
    match max_rows {
        0 => None,
        n => Some(i32::try_from(n).unwrap_or(i32::MAX)),
    }
}

#[async_trait::async_trait]
impl DiagnosticConnection for tokio_postgres::Client {
    async fn fetch(&mut self, sql: &str, max_rows: usize) -> DoctorResult<StatementOutput> {
        fetch_limited(self, sql, max_rows).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

/// Opens a fresh, unpooled connection per statement.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    /// Parse a database URL (`postgres://...`) or key/value connection string.
    pub fn new(database_url: &str) -> DoctorResult<Self> {
        let config = database_url
            .parse()
            .map_err(DoctorError::invalid_database_url)?;
        Ok(Self { config })
    }

    pub fn from_config(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

/// A connection opened by [`PgConnector`]; the background connection task ends when this is
/// dropped.
pub struct PgConnection {
    client: tokio_postgres::Client,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait::async_trait]
impl DiagnosticConnection for PgConnection {
    async fn fetch(&mut self, sql: &str, max_rows: usize) -> DoctorResult<StatementOutput> {
        fetch_limited(&mut self.client, sql, max_rows).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(self.client.cancel_token())
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> DoctorResult<PgConnection> {
        let (client, connection) = self
            .config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| DoctorError::Connection(e.to_string()))?;

        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(target: "dbdoctor.sql", error = %e, "connection closed with error");
            }
        });

        Ok(PgConnection { client, task })
    }
}

#[cfg(feature = "pool")]
#[async_trait::async_trait]
impl DiagnosticConnection for deadpool_postgres::Object {
    async fn fetch(&mut self, sql: &str, max_rows: usize) -> DoctorResult<StatementOutput> {
        fetch_limited(self, sql, max_rows).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

#[cfg(feature = "pool")]
#[async_trait::async_trait]
impl ConnectionFactory for deadpool_postgres::Pool {
    type Connection = deadpool_postgres::Object;

    async fn connect(&self) -> DoctorResult<deadpool_postgres::Object> {
        Ok(self.get().await?)
    }
}
