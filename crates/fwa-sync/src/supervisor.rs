//! # Task Supervisor
//!
//! Persistence of reports and newly seen images must not delay the caller
//! that triggered it, yet must not be silently lost at shutdown. Such work
//! is launched through a [`TaskSupervisor`]:
//!
//! - every task is counted from spawn until it finishes (or panics);
//! - once [`TaskSupervisor::shutdown`] starts, new work is rejected;
//! - shutdown waits up to the grace period, then signals cancellation to
//!   the stragglers and blocks until every task has rejoined.
//!
//! Cancellation drops the task's future at its next poll; a task that is
//! mid-write sees the same effect as a caller-side timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fwa_core::FwaErrorKind;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

/// Errors returned by [`TaskSupervisor::spawn`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// Shutdown has begun; the task was not started.
    #[error("task supervisor is shutting down; rejected task {0:?}")]
    ShuttingDown(&'static str),
}

impl SupervisorError {
    pub fn kind(&self) -> FwaErrorKind {
        FwaErrorKind::Transient
    }
}

/// Outcome of [`TaskSupervisor::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks still running when the grace period expired.
    pub cancelled: usize,
}

impl ShutdownReport {
    pub fn graceful(&self) -> bool {
        self.cancelled == 0
    }
}

struct Inner {
    accepting: Mutex<bool>,
    active: watch::Sender<usize>,
    cancel: watch::Sender<bool>,
}

/// Decrements the active count when the task ends, however it ends.
struct Finished(Arc<Inner>);

impl Drop for Finished {
    fn drop(&mut self) {
        self.0.active.send_modify(|n| *n -= 1);
    }
}

/// Launcher for supervised background tasks. Cloning shares the supervisor.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0usize);
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                accepting: Mutex::new(true),
                active,
                cancel,
            }),
        }
    }

    /// Start `fut` on the runtime under supervision.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let accepting = self.inner.accepting.lock();
            if !*accepting {
                tracing::debug!(task = name, "rejecting task after shutdown began");
                return Err(SupervisorError::ShuttingDown(name));
            }
            // Counted under the accepting lock so shutdown cannot miss it.
            self.inner.active.send_modify(|n| *n += 1);
        }

        let finished = Finished(Arc::clone(&self.inner));
        let mut cancel = self.inner.cancel.subscribe();
        tokio::spawn(async move {
            let _finished = finished;
            tokio::select! {
                _ = fut => {}
                _ = cancel.wait_for(|c| *c) => {
                    tracing::warn!(task = name, "background task cancelled at shutdown");
                }
            }
        });
        Ok(())
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        !*self.inner.accepting.lock()
    }

    /// Wait until no task is running. Does not stop new work from arriving.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Reject new work, wait up to `grace` for running tasks, then cancel
    /// the rest and wait for them to rejoin.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        *self.inner.accepting.lock() = false;
        let running = self.active();
        tracing::info!(running, grace = ?grace, "task supervisor shutting down");

        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return ShutdownReport { cancelled: 0 };
        }

        let cancelled = self.active();
        tracing::warn!(cancelled, "grace period elapsed; cancelling background tasks");
        self.inner.cancel.send_replace(true);
        self.wait_idle().await;
        ShutdownReport { cancelled }
    }
}
