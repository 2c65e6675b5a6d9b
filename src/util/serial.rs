//! Strict-FIFO executor for state mutations.
//!
//! Jobs submitted from any task run one at a time, in submission order. The
//! queue lock is held only to push or pop a job, never while a job runs.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::RociError;

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    worker_running: bool,
}

/// Runs submitted jobs sequentially on a single worker.
#[derive(Clone, Default)]
pub struct SerialJobExecutor {
    queue: Arc<Mutex<Queue>>,
}

impl std::fmt::Debug for SerialJobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.queue.lock().map(|q| q.jobs.len()).unwrap_or(0);
        f.debug_struct("SerialJobExecutor")
            .field("pending", &pending)
            .finish()
    }
}

impl SerialJobExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `job` and wait for its result.
    ///
    /// A job that panics resolves to an error; later jobs still run.
    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T, RociError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RociError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { job().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RociError::InvalidState("serial job panicked".into())));
            let _ = tx.send(outcome);
        });

        let spawn_worker = {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| RociError::InvalidState("serial job queue poisoned".into()))?;
            queue.jobs.push_back(wrapped);
            !std::mem::replace(&mut queue.worker_running, true)
        };

        if spawn_worker {
            tokio::spawn(Self::drain(self.queue.clone()));
        }

        rx.await
            .map_err(|_| RociError::InvalidState("serial job dropped before completion".into()))?
    }

    async fn drain(queue: Arc<Mutex<Queue>>) {
        loop {
            let next = match queue.lock() {
                Ok(mut q) => {
                    let job = q.jobs.pop_front();
                    if job.is_none() {
                        q.worker_running = false;
                    }
                    job
                }
                Err(_) => return,
            };
            match next {
                Some(job) => job.await,
                None => return,
            }
        }
    }
}
