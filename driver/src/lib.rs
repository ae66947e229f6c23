pub mod executor;

use model::query::{ColumnMeta, Row, ServerQueryId};
use std::sync::Arc;
use thiserror::Error;

pub use executor::{BlockingExecutor, ExecutorError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("failed to open connection: {0}")]
    Connect(String),

    #[error("query rejected: {message}")]
    Rejected { message: String, code: Option<i64> },

    #[error("driver protocol error: {0}")]
    Protocol(String),
}

/// Server-side view of an asynchronously submitted query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteQueryStatus {
    Running,
    Succeeded,
    Failed { message: String, code: Option<i64> },
}

/// Inline result of a terminally successful query.
///
/// `rows` is truncated to the requested cap; `total_rows` is the
/// server-side count.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnMeta>,
    pub total_rows: usize,
}

/// One open connection to the warehouse.
///
/// Every method blocks; callers dispatch them through [`BlockingExecutor`].
/// Connections are shared as `Arc<dyn Connection>` so a poller can run a
/// status check on an executor thread while the registry retains ownership.
pub trait Connection: Send + Sync {
    /// Submit a query asynchronously, returning once the server accepted it
    /// and assigned a server-side id.
    fn submit_async(&self, sql: &str) -> Result<ServerQueryId, DriverError>;

    fn query_status(&self, id: &ServerQueryId) -> Result<RemoteQueryStatus, DriverError>;

    /// Fetch the inline result of a succeeded query, keeping at most
    /// `max_rows` rows.
    fn fetch_result(&self, id: &ServerQueryId, max_rows: usize) -> Result<ResultSet, DriverError>;

    /// Issue a server-side cancel for `id`. The connection used for this is
    /// never the one that submitted the query.
    fn cancel_query(&self, id: &ServerQueryId) -> Result<(), DriverError>;

    /// Single-shot execution path used by the simple effect handlers.
    fn execute(&self, sql: &str) -> Result<Vec<Row>, DriverError>;

    fn close(&self) -> Result<(), DriverError>;
}

/// Opens fresh connections for a fixed account configuration.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Connection>, DriverError>;

    /// Best-effort close; never propagates teardown errors.
    fn close_safely(&self, conn: &dyn Connection) {
        if let Err(error) = conn.close() {
            tracing::debug!(%error, "Suppressed error while closing connection");
        }
    }
}
