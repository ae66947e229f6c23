use flume::Receiver;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("blocking executor is shut down")]
    Shutdown,

    #[error("blocking job died before replying")]
    JobFailed,
}

/// Fixed pool of worker threads for blocking driver calls.
///
/// The async control logic of the registry never blocks the scheduler: every
/// driver call is boxed up, sent over the job channel and awaited via a
/// oneshot reply. The queue is unbounded; concurrency is naturally bounded
/// by the number of outstanding queries.
///
/// Worker threads exit once the executor (and every clone of its sender) is
/// dropped.
pub struct BlockingExecutor {
    jobs: flume::Sender<Job>,
}

impl BlockingExecutor {
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "Worker count must be greater than 0");
        let (jobs, job_listener) = flume::unbounded::<Job>();

        for i in 0..worker_count {
            let listener = job_listener.clone();
            std::thread::Builder::new()
                .name(format!("driver-worker-{i}"))
                .spawn(move || worker_loop(listener))
                .expect("Failed to spawn executor worker thread");
        }

        BlockingExecutor { jobs }
    }

    /// Schedule a blocking call and await its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, on_reply) = oneshot::channel();
        let job: Job = Box::new(move || {
            if let Ok(value) = panic::catch_unwind(AssertUnwindSafe(f)) {
                // The receiver may be gone when the caller stopped waiting
                let _ = reply.send(value);
            }
        });

        self.jobs
            .send_async(job)
            .await
            .map_err(|_| ExecutorError::Shutdown)?;
        on_reply.await.map_err(|_| ExecutorError::JobFailed)
    }
}

fn worker_loop(listener: Receiver<Job>) {
    while let Ok(job) = listener.recv() {
        job();
    }
}
