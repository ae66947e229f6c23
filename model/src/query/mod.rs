pub mod status;

use chrono::{DateTime, Utc};
#[cfg(feature = "testing")]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter};
use uuid::Uuid;

pub use status::QueryStatus;

/// Registry-generated opaque identifier, distinct from the server-side id.
pub type QueryId = String;
/// The driver/server-assigned identifier (`sfqid`) used for status checks
/// and cancellation.
pub type ServerQueryId = String;
/// A single result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub fn generate_query_id() -> QueryId {
    Uuid::new_v4().to_string()
}

/// Immutable per-query execution options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    pub query_timeout: Option<Duration>,
    /// Upper bound on rows kept in memory for paging.
    pub max_inline_rows: usize,
    pub poll_interval: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            query_timeout: None,
            max_inline_rows: 1000,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[cfg_attr(feature = "testing", derive(Arbitrary))]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Failed to open a connection.
    Connect,
    /// The driver rejected the async submission.
    Submit,
    /// Query started but failed server-side.
    Execution,
    /// `query_timeout` elapsed while running.
    Timeout,
    /// Unexpected error in the registry's own code.
    Internal,
    /// Terminal success but result rows could not be decoded.
    ParseResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<i64>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorInfo {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(kind: ErrorKind, message: impl Into<String>, code: Option<i64>) -> Self {
        ErrorInfo {
            kind,
            message: message.into(),
            code,
        }
    }
}

/// Mutable query record, exclusively owned by the registry.
///
/// Once the status is terminal no field other than `ttl_expires_at` changes;
/// the transition methods enforce this.
#[derive(Clone, Debug)]
pub struct QueryRecord {
    pub query_id: QueryId,
    pub sql: String,
    pub status: QueryStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub options: QueryOptions,
    /// Set before the `Pending -> Running` transition; kept on the record so
    /// snapshots of terminal queries still expose it after runtime teardown.
    pub server_query_id: Option<ServerQueryId>,
    pub row_count: Option<usize>,
    pub columns: Vec<ColumnMeta>,
    pub result_inline: Option<Vec<Row>>,
    pub error: Option<ErrorInfo>,
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}

impl QueryRecord {
    pub fn new(
        query_id: QueryId,
        sql: impl Into<String>,
        options: QueryOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        QueryRecord {
            query_id,
            sql: sql.into(),
            status: QueryStatus::Pending,
            created_at,
            started_at: None,
            finished_at: None,
            options,
            server_query_id: None,
            row_count: None,
            columns: Vec::new(),
            result_inline: None,
            error: None,
            ttl_expires_at: None,
            cancel_requested: false,
        }
    }

    pub fn mark_running(&mut self, server_query_id: ServerQueryId, started_at: DateTime<Utc>) {
        debug_assert_eq!(self.status, QueryStatus::Pending);
        debug_assert!(started_at >= self.created_at);
        self.server_query_id = Some(server_query_id);
        self.status = QueryStatus::Running;
        self.started_at = Some(started_at);
    }

    pub fn mark_succeeded(
        &mut self,
        rows: Vec<Row>,
        columns: Vec<ColumnMeta>,
        row_count: usize,
        finished_at: DateTime<Utc>,
    ) {
        self.finish(QueryStatus::Succeeded, finished_at);
        self.result_inline = Some(rows);
        self.columns = columns;
        self.row_count = Some(row_count);
    }

    pub fn mark_failed(&mut self, error: ErrorInfo, finished_at: DateTime<Utc>) {
        self.finish(QueryStatus::Failed, finished_at);
        self.error = Some(error);
    }

    pub fn mark_canceled(&mut self, finished_at: DateTime<Utc>) {
        self.finish(QueryStatus::Canceled, finished_at);
    }

    pub fn mark_timeout(&mut self, message: impl Into<String>, finished_at: DateTime<Utc>) {
        self.finish(QueryStatus::Timeout, finished_at);
        self.error = Some(ErrorInfo::new(ErrorKind::Timeout, message));
    }

    fn finish(&mut self, status: QueryStatus, finished_at: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal(), "terminal records are immutable");
        debug_assert!(status.is_terminal());
        debug_assert!(finished_at >= self.started_at.unwrap_or(self.created_at));
        self.status = status;
        self.finished_at = Some(finished_at);
    }

    /// Immutable projection handed to callers; shares no mutable state.
    pub fn snapshot(&self, now: DateTime<Utc>) -> QuerySnapshot {
        let updated_at = self.finished_at.unwrap_or(now);
        let execution_time_seconds = self
            .started_at
            .map(|started| (updated_at - started).num_milliseconds() as f64 / 1000.0);

        QuerySnapshot {
            query_id: self.query_id.clone(),
            sql: self.sql.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            execution_time_seconds,
            row_count: self.row_count,
            columns: self.columns.clone(),
            error: self.error.clone(),
            snowflake: SnowflakeInfo {
                sfqid: self.server_query_id.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnowflakeInfo {
    pub sfqid: Option<ServerQueryId>,
}

/// Read-only snapshot of query state for external consumption.
#[derive(Clone, Debug, Serialize)]
pub struct QuerySnapshot {
    pub query_id: QueryId,
    pub sql: String,
    pub status: QueryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
    pub row_count: Option<usize>,
    pub columns: Vec<ColumnMeta>,
    pub error: Option<ErrorInfo>,
    pub snowflake: SnowflakeInfo,
}

/// One page of an inline result.
#[derive(Clone, Debug, Serialize)]
pub struct QueryPage {
    pub rows: Vec<Row>,
    pub total_rows: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
    pub columns: Vec<ColumnMeta>,
}
