//! Test utilities for the registry and handler crates.
//! Provides a scripted mock driver with an event log for ordering assertions.

use driver::{Connection, ConnectionProvider, DriverError, RemoteQueryStatus, ResultSet};
use model::query::{ColumnMeta, Row, ServerQueryId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// Re-export the model strategies for convenience
pub use model::testing::{numbered_columns, numbered_rows};

/// Everything the mock driver does, in call order. `conn` is the creation
/// index of the connection the call went through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    Connect { conn: usize },
    Submit { conn: usize, sfqid: ServerQueryId },
    StatusStart { conn: usize, sfqid: ServerQueryId },
    StatusEnd { conn: usize, sfqid: ServerQueryId },
    Fetch { conn: usize, sfqid: ServerQueryId },
    CancelQuery { conn: usize, sfqid: ServerQueryId },
    Execute { conn: usize },
    Close { conn: usize },
}

#[derive(Clone, Debug)]
enum ScriptedOutcome {
    Running,
    Succeeded(ResultSet),
    Failed { message: String, code: Option<i64> },
}

#[derive(Default)]
struct MockState {
    query_states: HashMap<ServerQueryId, ScriptedOutcome>,
    submitted: Vec<ServerQueryId>,
    next_sfqid: usize,
    next_conn: usize,
    events: Vec<MockEvent>,
    connect_failures: usize,
    submit_failure: Option<DriverError>,
    status_failure: Option<DriverError>,
    fetch_failure: Option<DriverError>,
    /// Outcome installed for the next submitted query instead of `Running`.
    next_submit_outcome: Option<ScriptedOutcome>,
    status_delay: Option<Duration>,
    execute_results: VecDeque<Result<Vec<Row>, DriverError>>,
}

/// Scripted provider: every connection shares one state cell, so tests can
/// steer outcomes mid-flight and inspect the full call history afterwards.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        MockProvider::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("No one should panic while holding this lock")
    }

    // -- scripting --

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connect(&self, count: usize) {
        self.state().connect_failures = count;
    }

    pub fn fail_next_submit(&self, message: impl Into<String>, code: Option<i64>) {
        self.state().submit_failure = Some(DriverError::Rejected {
            message: message.into(),
            code,
        });
    }

    pub fn fail_next_status(&self, error: DriverError) {
        self.state().status_failure = Some(error);
    }

    pub fn fail_next_fetch(&self, error: DriverError) {
        self.state().fetch_failure = Some(error);
    }

    /// Make the next submitted query report terminal success on its first
    /// status check.
    pub fn succeed_next_submit(&self, rows: Vec<Row>, columns: Vec<ColumnMeta>) {
        let total_rows = rows.len();
        self.state().next_submit_outcome = Some(ScriptedOutcome::Succeeded(ResultSet {
            rows,
            columns,
            total_rows,
        }));
    }

    /// Make the next submitted query report terminal failure on its first
    /// status check.
    pub fn fail_next_query(&self, message: impl Into<String>, code: Option<i64>) {
        self.state().next_submit_outcome = Some(ScriptedOutcome::Failed {
            message: message.into(),
            code,
        });
    }

    /// Flip an already-running query to terminal success.
    pub fn complete(&self, sfqid: &str, rows: Vec<Row>, columns: Vec<ColumnMeta>) {
        let total_rows = rows.len();
        self.state().query_states.insert(
            sfqid.to_string(),
            ScriptedOutcome::Succeeded(ResultSet {
                rows,
                columns,
                total_rows,
            }),
        );
    }

    /// Flip an already-running query to terminal failure.
    pub fn fail_query(&self, sfqid: &str, message: impl Into<String>, code: Option<i64>) {
        self.state().query_states.insert(
            sfqid.to_string(),
            ScriptedOutcome::Failed {
                message: message.into(),
                code,
            },
        );
    }

    /// Blocking delay inside every status check, to widen race windows.
    pub fn set_status_delay(&self, delay: Duration) {
        self.state().status_delay = Some(delay);
    }

    /// Queue a canned response for the next single-shot `execute` call.
    pub fn push_execute_result(&self, result: Result<Vec<Row>, DriverError>) {
        self.state().execute_results.push_back(result);
    }

    // -- inspection --

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Server-side ids in submission order.
    pub fn sfqids(&self) -> Vec<ServerQueryId> {
        self.state().submitted.clone()
    }

    pub fn last_sfqid(&self) -> Option<ServerQueryId> {
        self.state().submitted.last().cloned()
    }

    pub fn connections_created(&self) -> usize {
        self.state().next_conn
    }

    pub fn cancel_calls(&self) -> Vec<ServerQueryId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::CancelQuery { sfqid, .. } => Some(sfqid),
                _ => None,
            })
            .collect()
    }

    pub fn status_check_count(&self, sfqid: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, MockEvent::StatusStart { sfqid: s, .. } if s == sfqid)
            })
            .count()
    }

    pub fn close_count(&self, conn: usize) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, MockEvent::Close { conn: c } if *c == conn))
            .count()
    }

    pub fn total_close_calls(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, MockEvent::Close { .. }))
            .count()
    }

    /// Connection that submitted `sfqid`, i.e. the one owned by its record.
    pub fn owning_connection(&self, sfqid: &str) -> Option<usize> {
        self.events().into_iter().find_map(|event| match event {
            MockEvent::Submit { conn, sfqid: s } if s == sfqid => Some(conn),
            _ => None,
        })
    }

    /// Index of the first event matching `predicate`.
    pub fn event_position<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&MockEvent) -> bool,
    {
        self.events().iter().position(predicate)
    }
}

impl ConnectionProvider for MockProvider {
    fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let mut state = self.state();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DriverError::Connect("mock connect failure".to_string()));
        }
        let id = state.next_conn;
        state.next_conn += 1;
        state.events.push(MockEvent::Connect { conn: id });
        drop(state);

        Ok(Arc::new(MockConnection {
            id,
            provider: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockConnection {
    id: usize,
    provider: MockProvider,
    closed: AtomicBool,
}

impl MockConnection {
    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol(format!(
                "connection {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn submit_async(&self, _sql: &str) -> Result<ServerQueryId, DriverError> {
        self.check_open()?;
        let mut state = self.provider.state();
        if let Some(error) = state.submit_failure.take() {
            return Err(error);
        }
        let sfqid = format!("sfqid-{}", state.next_sfqid);
        state.next_sfqid += 1;
        let outcome = state
            .next_submit_outcome
            .take()
            .unwrap_or(ScriptedOutcome::Running);
        state.query_states.insert(sfqid.clone(), outcome);
        state.submitted.push(sfqid.clone());
        state.events.push(MockEvent::Submit {
            conn: self.id,
            sfqid: sfqid.clone(),
        });
        Ok(sfqid)
    }

    fn query_status(&self, id: &ServerQueryId) -> Result<RemoteQueryStatus, DriverError> {
        self.check_open()?;
        let delay = {
            let mut state = self.provider.state();
            state.events.push(MockEvent::StatusStart {
                conn: self.id,
                sfqid: id.clone(),
            });
            state.status_delay
        };
        // Block outside the state lock, like a real wire call would
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.provider.state();
        state.events.push(MockEvent::StatusEnd {
            conn: self.id,
            sfqid: id.clone(),
        });
        if let Some(error) = state.status_failure.take() {
            return Err(error);
        }
        match state.query_states.get(id) {
            Some(ScriptedOutcome::Running) => Ok(RemoteQueryStatus::Running),
            Some(ScriptedOutcome::Succeeded(_)) => Ok(RemoteQueryStatus::Succeeded),
            Some(ScriptedOutcome::Failed { message, code }) => Ok(RemoteQueryStatus::Failed {
                message: message.clone(),
                code: *code,
            }),
            None => Err(DriverError::Protocol(format!("unknown query {id}"))),
        }
    }

    fn fetch_result(&self, id: &ServerQueryId, max_rows: usize) -> Result<ResultSet, DriverError> {
        self.check_open()?;
        let mut state = self.provider.state();
        state.events.push(MockEvent::Fetch {
            conn: self.id,
            sfqid: id.clone(),
        });
        if let Some(error) = state.fetch_failure.take() {
            return Err(error);
        }
        match state.query_states.get(id) {
            Some(ScriptedOutcome::Succeeded(result)) => {
                let mut rows = result.rows.clone();
                rows.truncate(max_rows);
                Ok(ResultSet {
                    rows,
                    columns: result.columns.clone(),
                    total_rows: result.total_rows,
                })
            }
            Some(_) => Err(DriverError::Protocol(format!("query {id} not succeeded"))),
            None => Err(DriverError::Protocol(format!("unknown query {id}"))),
        }
    }

    fn cancel_query(&self, id: &ServerQueryId) -> Result<(), DriverError> {
        self.check_open()?;
        let mut state = self.provider.state();
        state.events.push(MockEvent::CancelQuery {
            conn: self.id,
            sfqid: id.clone(),
        });
        Ok(())
    }

    fn execute(&self, _sql: &str) -> Result<Vec<Row>, DriverError> {
        self.check_open()?;
        let mut state = self.provider.state();
        state.events.push(MockEvent::Execute { conn: self.id });
        state
            .execute_results
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        self.provider
            .state()
            .events
            .push(MockEvent::Close { conn: self.id });
        Ok(())
    }
}

/// Build a row from column/value pairs.
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}
