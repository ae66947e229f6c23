use chrono::{TimeDelta, Utc};
use driver::{BlockingExecutor, Connection, ConnectionProvider, DriverError};
use model::query::{
    generate_query_id, ErrorInfo, ErrorKind, QueryId, QueryOptions, QueryPage, QueryRecord,
    QuerySnapshot, QueryStatus,
};
use model::settings::RegistrySettings;
use model::sql::sql_preview;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is closed")]
    Closed,

    #[error("sql must not be empty")]
    EmptySql,
}

/// Driver-facing state of one live query. Never exposed to callers and
/// dropped as part of finalization.
pub(crate) struct QueryRuntime {
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) stop: Option<flume::Sender<()>>,
    pub(crate) poller: Option<JoinHandle<()>>,
    pub(crate) poll_interval: Duration,
}

pub(crate) struct Entry {
    /// Insertion order for `list_queries`.
    pub(crate) seq: u64,
    pub(crate) record: QueryRecord,
    pub(crate) runtime: Option<QueryRuntime>,
}

#[derive(Default)]
pub(crate) struct Store {
    pub(crate) entries: HashMap<QueryId, Entry>,
    pub(crate) next_seq: u64,
    pub(crate) closed: bool,
}

/// Process-wide manager for long-running asynchronous queries.
///
/// One record exists per registry-generated query id, from submission until
/// pruning or [`close`](QueryRegistry::close). A single mutex guards the
/// record store; it is held only for O(1) critical sections and never across
/// a driver call or a task join. Each live query owns one connection and one
/// poller task; teardown always signals the poller, joins it, and only then
/// closes the connection.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct QueryRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) executor: Arc<BlockingExecutor>,
    pub(crate) settings: RegistrySettings,
    pub(crate) ttl: TimeDelta,
    store: Mutex<Store>,
    internal_errors: AtomicU64,
}

impl QueryRegistry {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        executor: Arc<BlockingExecutor>,
        settings: RegistrySettings,
    ) -> Self {
        let ttl = TimeDelta::from_std(settings.ttl).unwrap_or(TimeDelta::MAX);
        QueryRegistry {
            inner: Arc::new(RegistryInner {
                provider,
                executor,
                settings,
                ttl,
                store: Mutex::new(Store::default()),
                internal_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Count of `internal`-kind errors; non-zero values indicate a registry
    /// bug.
    pub fn internal_error_count(&self) -> u64 {
        self.inner.internal_errors.load(Ordering::Relaxed)
    }

    /// Submit `sql` for asynchronous execution and return a registry-local
    /// query id.
    ///
    /// Connection and submission failures do not error: the returned id
    /// points at a record finalized as `failed` with kind `connect` /
    /// `submit`, so the caller can inspect it. When this method returns,
    /// the record is either running with a live poller or terminal with all
    /// resources released.
    pub async fn execute_query(
        &self,
        sql: &str,
        options: Option<QueryOptions>,
    ) -> Result<QueryId, RegistryError> {
        if sql.trim().is_empty() {
            return Err(RegistryError::EmptySql);
        }
        let inner = &self.inner;

        let mut options = options.unwrap_or_else(|| inner.settings.default_options());
        options.query_timeout = inner.settings.clamp_timeout(options.query_timeout);
        if options.poll_interval.is_zero() {
            options.poll_interval = inner.settings.default_poll_interval;
        }
        let poll_interval = options.poll_interval;

        let query_id = generate_query_id();
        let now = Utc::now();
        let mut record = QueryRecord::new(query_id.clone(), sql, options, now);
        record.ttl_expires_at = Some(now + inner.ttl);

        {
            let mut store = inner.store();
            if store.closed {
                return Err(RegistryError::Closed);
            }
            let seq = store.next_seq;
            store.next_seq += 1;
            store.entries.insert(
                query_id.clone(),
                Entry {
                    seq,
                    record,
                    runtime: None,
                },
            );
        }
        info!(query_id = %query_id, sql = %sql_preview(sql), "Submitting query");

        // A fresh connection per query, opened off the mutex.
        let connection = {
            let provider = inner.provider.clone();
            match inner.executor.run(move || provider.connect()).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(error)) => {
                    inner.fail_startup(
                        &query_id,
                        ErrorInfo::new(ErrorKind::Connect, error.to_string()),
                    );
                    return Ok(query_id);
                }
                Err(error) => {
                    inner.count_internal_error();
                    inner.fail_startup(
                        &query_id,
                        ErrorInfo::new(ErrorKind::Internal, error.to_string()),
                    );
                    return Ok(query_id);
                }
            }
        };

        let sfqid = {
            let conn = connection.clone();
            let sql_owned = sql.to_owned();
            match inner.executor.run(move || conn.submit_async(&sql_owned)).await {
                Ok(Ok(sfqid)) => sfqid,
                Ok(Err(error)) => {
                    let error_info = match error {
                        DriverError::Rejected { message, code } => {
                            ErrorInfo::with_code(ErrorKind::Submit, message, code)
                        }
                        other => ErrorInfo::new(ErrorKind::Submit, other.to_string()),
                    };
                    inner.close_connection_safely(connection).await;
                    inner.fail_startup(&query_id, error_info);
                    return Ok(query_id);
                }
                Err(error) => {
                    inner.count_internal_error();
                    inner.close_connection_safely(connection).await;
                    inner.fail_startup(
                        &query_id,
                        ErrorInfo::new(ErrorKind::Internal, error.to_string()),
                    );
                    return Ok(query_id);
                }
            }
        };

        // Transition to running, spawn the poller and attach the runtime in
        // one critical section, so teardown paths always observe either no
        // runtime at all or a runtime with a joinable poller handle.
        // `tokio::spawn` is synchronous; the task itself blocks on this same
        // mutex until we release it.
        let (stop, stop_listener) = flume::bounded(1);
        let closed_mid_submission = {
            let mut store = inner.store();
            match store.entries.get_mut(&query_id) {
                Some(entry) => {
                    entry.record.mark_running(sfqid.clone(), Utc::now());

                    let handle = tokio::spawn(
                        Arc::clone(inner)
                            .poll_until_done(query_id.clone(), stop_listener)
                            .instrument(info_span!("poller", query_id = %query_id, sfqid = %sfqid)),
                    );
                    entry.runtime = Some(QueryRuntime {
                        connection: Some(connection),
                        stop: Some(stop),
                        poller: Some(handle),
                        poll_interval,
                    });
                    None
                }
                // close() drained the store while we were submitting
                None => Some(connection),
            }
        };

        if let Some(connection) = closed_mid_submission {
            inner.close_connection_safely(connection).await;
            return Err(RegistryError::Closed);
        }

        Ok(query_id)
    }

    /// Cancel a running query.
    ///
    /// Returns `true` once teardown is complete: the poller has been joined,
    /// a server-side cancel was dispatched on a throwaway connection, and the
    /// record is `canceled` with its connection closed. Returns `false` for
    /// unknown, terminal, mid-submission, or already-canceling records.
    pub async fn cancel(&self, query_id: &str) -> bool {
        self.inner.cancel(query_id).await
    }

    /// Current state of a query as an immutable snapshot.
    pub fn get_snapshot(&self, query_id: &str) -> Option<QuerySnapshot> {
        let now = Utc::now();
        let store = self.inner.store();
        store
            .entries
            .get(query_id)
            .map(|entry| entry.record.snapshot(now))
    }

    /// Page into the inline result of a succeeded query.
    ///
    /// `None` for unknown or non-succeeded records. `limit` defaults to all
    /// remaining rows.
    pub fn fetch_result(
        &self,
        query_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Option<QueryPage> {
        let store = self.inner.store();
        let entry = store.entries.get(query_id)?;
        if entry.record.status != QueryStatus::Succeeded {
            return None;
        }

        let rows = entry.record.result_inline.as_deref().unwrap_or(&[]);
        let total_rows = rows.len();
        let start = offset.min(total_rows);
        let (end, limit, has_more) = match limit {
            Some(limit) => (
                start.saturating_add(limit).min(total_rows),
                limit,
                offset.saturating_add(limit) < total_rows,
            ),
            None => (total_rows, total_rows - start, false),
        };

        Some(QueryPage {
            rows: rows[start..end].to_vec(),
            total_rows,
            offset,
            limit,
            has_more,
            columns: entry.record.columns.clone(),
        })
    }

    /// Snapshots of all records in insertion order, optionally filtered by
    /// status.
    pub fn list_queries(&self, status_filter: Option<QueryStatus>) -> Vec<QuerySnapshot> {
        let now = Utc::now();
        let store = self.inner.store();
        let mut entries: Vec<&Entry> = store
            .entries
            .values()
            .filter(|entry| status_filter.is_none_or(|status| entry.record.status == status))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| entry.record.snapshot(now))
            .collect()
    }

    /// Remove records whose TTL has expired, returning how many were removed.
    ///
    /// Records that are unexpectedly still alive get the same
    /// signal -> join -> close order as [`cancel`](QueryRegistry::cancel).
    pub async fn prune_expired(&self) -> usize {
        self.inner.prune_expired().await
    }

    /// Drain the registry: stop every poller, close every connection, clear
    /// the store. Afterwards every operation reports the absent result and
    /// no new queries can be submitted.
    pub async fn close(&self) {
        self.inner.close().await
    }
}

impl RegistryInner {
    pub(crate) fn store(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .expect("No one should panic while holding this lock")
    }

    pub(crate) fn count_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    async fn cancel(&self, query_id: &str) -> bool {
        let (stop, poller, sfqid) = {
            let mut store = self.store();
            let Some(entry) = store.entries.get_mut(query_id) else {
                return false;
            };
            if entry.record.status.is_terminal() || entry.record.cancel_requested {
                return false;
            }
            let Some(sfqid) = entry.record.server_query_id.clone() else {
                // Still mid-submission; there is nothing to cancel server-side.
                return false;
            };
            entry.record.cancel_requested = true;
            match entry.runtime.as_mut() {
                Some(runtime) => (runtime.stop.take(), runtime.poller.take(), sfqid),
                None => (None, None, sfqid),
            }
        };

        info!(query_id, sfqid = %sfqid, "Canceling query");

        // Signal the poller, then wait for it. The owning connection must not
        // be closed before this join returns: a blocking status check may
        // still be holding it.
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        if let Some(poller) = poller {
            if let Err(error) = poller.await {
                warn!(query_id, %error, "Poller ended abnormally during cancel");
            }
        }

        // The poller may have finalized the record before it saw the signal.
        {
            let store = self.store();
            match store.entries.get(query_id) {
                Some(entry) if !entry.record.status.is_terminal() => {}
                _ => return false,
            }
        }

        self.cancel_server_side(query_id, sfqid).await;

        let connection = {
            let mut store = self.store();
            store
                .entries
                .get_mut(query_id)
                .and_then(|entry| entry.runtime.as_mut())
                .and_then(|runtime| runtime.connection.take())
        };
        if let Some(connection) = connection {
            self.close_connection_safely(connection).await;
        }

        let now = Utc::now();
        {
            let mut store = self.store();
            if let Some(entry) = store.entries.get_mut(query_id) {
                entry.record.mark_canceled(now);
                entry.record.ttl_expires_at = Some(now + self.ttl);
                entry.runtime = None;
            }
        }
        true
    }

    async fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let (expired, stops, pollers) = {
            let mut store = self.store();
            let mut expired = Vec::new();
            let mut stops = Vec::new();
            let mut pollers = Vec::new();
            for (query_id, entry) in store.entries.iter_mut() {
                if entry
                    .record
                    .ttl_expires_at
                    .is_some_and(|expires| expires <= now)
                {
                    expired.push(query_id.clone());
                    if let Some(runtime) = entry.runtime.as_mut() {
                        stops.extend(runtime.stop.take());
                        pollers.extend(runtime.poller.take());
                    }
                }
            }
            (expired, stops, pollers)
        };
        if expired.is_empty() {
            return 0;
        }

        for stop in stops {
            let _ = stop.send(());
        }
        for poller in pollers {
            let _ = poller.await;
        }

        let connections: Vec<_> = {
            let mut store = self.store();
            expired
                .iter()
                .filter_map(|query_id| {
                    store
                        .entries
                        .get_mut(query_id)
                        .and_then(|entry| entry.runtime.as_mut())
                        .and_then(|runtime| runtime.connection.take())
                })
                .collect()
        };
        for connection in connections {
            self.close_connection_safely(connection).await;
        }

        let mut removed = 0;
        {
            let mut store = self.store();
            for query_id in &expired {
                if store.entries.remove(query_id).is_some() {
                    removed += 1;
                }
            }
        }
        debug!(removed, "Pruned expired query records");
        removed
    }

    async fn close(&self) {
        info!("Closing query registry");
        let (stops, pollers) = {
            let mut store = self.store();
            store.closed = true;
            let mut stops = Vec::new();
            let mut pollers = Vec::new();
            for entry in store.entries.values_mut() {
                if let Some(runtime) = entry.runtime.as_mut() {
                    stops.extend(runtime.stop.take());
                    pollers.extend(runtime.poller.take());
                }
            }
            (stops, pollers)
        };

        for stop in stops {
            let _ = stop.send(());
        }
        // Pollers were all signaled above; individual failures are ignored.
        for poller in pollers {
            let _ = poller.await;
        }

        let connections: Vec<_> = {
            let mut store = self.store();
            store
                .entries
                .values_mut()
                .filter_map(|entry| {
                    entry
                        .runtime
                        .as_mut()
                        .and_then(|runtime| runtime.connection.take())
                })
                .collect()
        };
        for connection in connections {
            self.close_connection_safely(connection).await;
        }

        self.store().entries.clear();
    }

    /// Finalize a record that never reached the running state.
    fn fail_startup(&self, query_id: &str, error: ErrorInfo) {
        let now = Utc::now();
        let mut store = self.store();
        if let Some(entry) = store.entries.get_mut(query_id) {
            warn!(query_id, kind = %error.kind, message = %error.message, "Query startup failed");
            entry.record.mark_failed(error, now);
            entry.record.ttl_expires_at = Some(now + self.ttl);
        }
    }

    /// Server-side cancel on a throwaway second connection, so the owning
    /// connection is never shared with an out-of-band call. Best effort: a
    /// failure here does not undo the local teardown.
    async fn cancel_server_side(&self, query_id: &str, sfqid: String) {
        let provider = self.provider.clone();
        let connection = match self.executor.run(move || provider.connect()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(error)) => {
                warn!(query_id, %error, "Could not open connection for server-side cancel");
                return;
            }
            Err(error) => {
                warn!(query_id, %error, "Executor unavailable for server-side cancel");
                return;
            }
        };

        let cancel_result = {
            let connection = connection.clone();
            self.executor
                .run(move || connection.cancel_query(&sfqid))
                .await
        };
        match cancel_result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(query_id, %error, "Server-side cancel failed"),
            Err(error) => warn!(query_id, %error, "Executor unavailable for server-side cancel"),
        }

        self.close_connection_safely(connection).await;
    }

    pub(crate) async fn close_connection_safely(&self, connection: Arc<dyn Connection>) {
        let provider = self.provider.clone();
        if let Err(error) = self
            .executor
            .run(move || provider.close_safely(connection.as_ref()))
            .await
        {
            debug!(%error, "Executor unavailable while closing connection");
        }
    }
}
