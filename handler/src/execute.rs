use crate::runner::{HandlerError, SingleShotRunner};
use model::query::Row;
use model::sql::sql_preview;
use tracing::warn;

/// Seam for the external SQL write-detection logic; the generic execute tool
/// only runs statements the detector classifies as read-only.
pub trait WriteSqlDetector: Send + Sync {
    fn is_write_sql(&self, sql: &str) -> bool;
}

#[derive(Clone, Debug)]
pub struct ExecuteResult {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
}

/// Run a read-only statement once and return its rows with column names.
pub async fn execute_read_query(
    runner: &SingleShotRunner,
    detector: &dyn WriteSqlDetector,
    sql: &str,
) -> Result<ExecuteResult, HandlerError> {
    if detector.is_write_sql(sql) {
        warn!(sql = %sql_preview(sql), "Rejected write statement");
        return Err(HandlerError::WriteSqlRejected(sql_preview(sql)));
    }

    let rows = runner.run(sql).await?;
    let columns = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    Ok(ExecuteResult { rows, columns })
}
