use driver::{BlockingExecutor, ConnectionProvider, DriverError, ExecutorError};
use model::query::Row;
use model::sql::sql_preview;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("blocking executor unavailable: {0}")]
    Executor(#[from] ExecutorError),

    #[error("write statements are not allowed: {0}")]
    WriteSqlRejected(String),

    #[error("could not decode result: {0}")]
    Decode(String),
}

/// Runs one SQL statement on a fresh connection and closes it again, all
/// inside a single blocking job.
pub struct SingleShotRunner {
    provider: Arc<dyn ConnectionProvider>,
    executor: Arc<BlockingExecutor>,
}

impl SingleShotRunner {
    pub fn new(provider: Arc<dyn ConnectionProvider>, executor: Arc<BlockingExecutor>) -> Self {
        SingleShotRunner { provider, executor }
    }

    pub async fn run(&self, sql: impl Into<String>) -> Result<Vec<Row>, HandlerError> {
        let sql = sql.into();
        debug!(sql = %sql_preview(&sql), "Running single-shot query");

        let provider = self.provider.clone();
        let rows = self
            .executor
            .run(move || {
                let connection = provider.connect()?;
                let result = connection.execute(&sql);
                // The connection never outlives the job, error or not
                provider.close_safely(connection.as_ref());
                result
            })
            .await??;
        Ok(rows)
    }

    /// For aggregation statements that produce exactly one row.
    pub async fn run_single_row(&self, sql: impl Into<String>) -> Result<Row, HandlerError> {
        self.run(sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HandlerError::Decode("query returned no rows".to_string()))
    }
}
