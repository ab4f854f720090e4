//! Supervised per-request tasks
//!
//! Each inbound request is executed on its own tokio task. The transport
//! awaits the task's outcome, so a dropped connection does not abort a tool
//! call halfway, and a task that dies is logged, counted and turned into an
//! internal error instead of vanishing.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;

use crate::error::{panic_message, BridgeError, Result};

/// Counters for the supervised task group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub in_flight: usize,
    pub completed: u64,
    pub faults: u64,
}

#[derive(Debug, Default)]
pub struct RequestSupervisor {
    tracker: TaskTracker,
    completed: AtomicU64,
    faults: AtomicU64,
}

impl RequestSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` as a supervised task and wait for its output
    pub async fn run<F, T>(&self, label: &str, future: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.tracker.spawn(future);
        match handle.await {
            Ok(output) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(output)
            }
            Err(e) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                let message = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    "request task was cancelled".to_string()
                };
                tracing::error!("Request task '{}' failed: {}", label, message);
                Err(BridgeError::Internal(message))
            }
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            in_flight: self.tracker.len(),
            completed: self.completed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    /// Returns whether everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                "{} request tasks still running after {:?}",
                self.tracker.len(),
                grace
            );
        }
        drained
    }
}
