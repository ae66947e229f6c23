use crate::registry::RegistryInner;
use chrono::{TimeDelta, Utc};
use driver::{Connection, DriverError, RemoteQueryStatus, ResultSet};
use model::query::{ErrorInfo, ErrorKind, QueryId, ServerQueryId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the poller reads at the top of one loop iteration, captured
/// under the mutex in a single lookup.
struct PollContext {
    connection: Arc<dyn Connection>,
    sfqid: ServerQueryId,
    poll_interval: Duration,
    query_timeout: Option<Duration>,
    deadline_exceeded: bool,
    cancel_requested: bool,
}

/// Terminal outcome written by the poller-side finalizer.
enum TerminalWrite {
    Succeeded(ResultSet),
    Failed(ErrorInfo),
    Timeout(Duration),
}

impl RegistryInner {
    /// Per-query background task: check the server-side status until it is
    /// terminal, then finalize the record.
    ///
    /// The poller never closes its own connection directly; all teardown
    /// goes through [`RegistryInner::finalize`]. When it exits on the stop
    /// signal the outer cancel handler owns finalization instead.
    pub(crate) async fn poll_until_done(
        self: Arc<Self>,
        query_id: QueryId,
        stop: flume::Receiver<()>,
    ) {
        debug!("Poller started");
        loop {
            // A stop may have arrived while we were inside a blocking call.
            if stop.try_recv().is_ok() {
                return;
            }

            let Some(ctx) = self.poll_context(&query_id) else {
                // Record gone or already torn down
                return;
            };
            if ctx.cancel_requested {
                return;
            }
            if ctx.deadline_exceeded {
                let timeout = ctx.query_timeout.unwrap_or_default();
                self.finalize(&query_id, TerminalWrite::Timeout(timeout)).await;
                return;
            }

            let status = {
                let connection = ctx.connection.clone();
                let sfqid = ctx.sfqid.clone();
                self.executor
                    .run(move || connection.query_status(&sfqid))
                    .await
            };

            match status {
                Ok(Ok(RemoteQueryStatus::Running)) => {
                    // The inter-poll sleep must stay cancelable; a stop (or a
                    // dropped runtime) wins over the timer.
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.poll_interval) => {}
                        _ = stop.recv_async() => return,
                    }
                }
                Ok(Ok(RemoteQueryStatus::Succeeded)) => {
                    self.fetch_and_finalize(&query_id, ctx.connection, ctx.sfqid)
                        .await;
                    return;
                }
                Ok(Ok(RemoteQueryStatus::Failed { message, code })) => {
                    let info = ErrorInfo::with_code(ErrorKind::Execution, message, code);
                    self.finalize(&query_id, TerminalWrite::Failed(info)).await;
                    return;
                }
                Ok(Err(driver_error)) => {
                    let info = ErrorInfo::new(ErrorKind::Internal, driver_error.to_string());
                    self.finalize(&query_id, TerminalWrite::Failed(info)).await;
                    return;
                }
                Err(executor_error) => {
                    let info = ErrorInfo::new(ErrorKind::Internal, executor_error.to_string());
                    self.finalize(&query_id, TerminalWrite::Failed(info)).await;
                    return;
                }
            }
        }
    }

    fn poll_context(&self, query_id: &str) -> Option<PollContext> {
        let store = self.store();
        let entry = store.entries.get(query_id)?;
        let runtime = entry.runtime.as_ref()?;
        let connection = runtime.connection.clone()?;
        let sfqid = entry.record.server_query_id.clone()?;

        let query_timeout = entry.record.options.query_timeout;
        let deadline_exceeded = match (query_timeout, entry.record.started_at) {
            (Some(timeout), Some(started)) => {
                Utc::now() - started > TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
            }
            _ => false,
        };

        Some(PollContext {
            connection,
            sfqid,
            poll_interval: runtime.poll_interval,
            query_timeout,
            deadline_exceeded,
            cancel_requested: entry.record.cancel_requested,
        })
    }

    /// Fetch the inline result of a terminally successful query, then
    /// finalize.
    async fn fetch_and_finalize(
        &self,
        query_id: &str,
        connection: Arc<dyn Connection>,
        sfqid: ServerQueryId,
    ) {
        let max_rows = {
            let store = self.store();
            match store.entries.get(query_id) {
                Some(entry) => entry.record.options.max_inline_rows,
                None => return,
            }
        };

        let fetched = {
            let connection = connection.clone();
            self.executor
                .run(move || connection.fetch_result(&sfqid, max_rows))
                .await
        };

        let write = match fetched {
            Ok(Ok(result)) => TerminalWrite::Succeeded(result),
            // The query succeeded server-side but its rows could not be
            // decoded.
            Ok(Err(DriverError::Protocol(message))) => {
                TerminalWrite::Failed(ErrorInfo::new(ErrorKind::ParseResult, message))
            }
            Ok(Err(driver_error)) => {
                TerminalWrite::Failed(ErrorInfo::new(ErrorKind::Internal, driver_error.to_string()))
            }
            Err(executor_error) => TerminalWrite::Failed(ErrorInfo::new(
                ErrorKind::Internal,
                executor_error.to_string(),
            )),
        };
        self.finalize(query_id, write).await;
    }

    /// Poller-side finalization: write the terminal fields under the mutex,
    /// close the connection outside it, then drop the runtime.
    async fn finalize(&self, query_id: &str, write: TerminalWrite) {
        let now = Utc::now();
        let connection = {
            let mut store = self.store();
            let Some(entry) = store.entries.get_mut(query_id) else {
                return;
            };
            if entry.record.status.is_terminal() {
                // An external teardown won the race; leave the record alone.
                return;
            }

            match write {
                TerminalWrite::Succeeded(result) => {
                    info!(
                        query_id,
                        rows = result.rows.len(),
                        total_rows = result.total_rows,
                        "Query succeeded"
                    );
                    entry.record.mark_succeeded(
                        result.rows,
                        result.columns,
                        result.total_rows,
                        now,
                    );
                }
                TerminalWrite::Failed(info) => {
                    if info.kind == ErrorKind::Internal {
                        self.count_internal_error();
                        error!(
                            query_id,
                            sfqid = entry.record.server_query_id.as_deref().unwrap_or(""),
                            message = %info.message,
                            "Internal error while polling"
                        );
                    } else {
                        warn!(query_id, kind = %info.kind, message = %info.message, "Query failed");
                    }
                    entry.record.mark_failed(info, now);
                }
                TerminalWrite::Timeout(limit) => {
                    warn!(query_id, ?limit, "Query timed out");
                    entry
                        .record
                        .mark_timeout(format!("query exceeded timeout of {limit:?}"), now);
                }
            }
            entry.record.ttl_expires_at = Some(now + self.ttl);
            entry
                .runtime
                .as_mut()
                .and_then(|runtime| runtime.connection.take())
        };

        if let Some(connection) = connection {
            self.close_connection_safely(connection).await;
        }

        let mut store = self.store();
        if let Some(entry) = store.entries.get_mut(query_id) {
            entry.runtime = None;
        }
    }
}
