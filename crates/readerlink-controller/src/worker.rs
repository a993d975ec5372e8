//! Single-consumer job queues.
//!
//! Every controller runs three serial workers: one for tag executions, one
//! for port executions and one for reconnection. A worker is one tokio task
//! draining an unbounded channel, so the jobs of one worker never overlap
//! and run in submission order.
//!
//! ```text
//! submit() ──► [job][job][job] ──► worker task ──► job.await
//!                                    (one at a time)
//! ```

use crate::error::{ControllerError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A named queue whose jobs run strictly one after another.
#[derive(Debug)]
pub(crate) struct SerialWorker {
    role: &'static str,
    jobs: mpsc::UnboundedSender<Job>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialWorker {
    /// Spawn the worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(role: &'static str) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let task = tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job.await;
            }
            trace!("{} worker drained", role);
        });

        Self {
            role,
            jobs,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue `job` and return a receiver for its output.
    ///
    /// The job starts once every previously submitted job has finished.
    pub(crate) fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (output, receiver) = oneshot::channel();
        self.jobs
            .send(Box::pin(async move {
                let _ = output.send(job.await);
            }))
            .map_err(|_| ControllerError::WorkerStopped(self.role))?;
        Ok(receiver)
    }

    /// Queue `job` and wait for its output.
    pub(crate) async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(job)?
            .await
            .map_err(|_| ControllerError::WorkerStopped(self.role))
    }

    /// Stop the worker, cancelling the running job and dropping queued ones.
    pub(crate) async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            trace!("{} worker stopped", self.role);
        }
    }
}
