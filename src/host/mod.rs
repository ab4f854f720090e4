//! Host context bridge
//!
//! The host application only tolerates state access from one privileged
//! thread. Tool handlers receive a [`HostContext`] and must go through
//! [`HostContext::run`] before touching host-only state; the executor behind
//! it decides where the callback actually runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::container::Disposable;
use crate::error::{BridgeError, Result};

/// A unit of work posted to the host's privileged context
pub type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// Primitive offered by the host: run a callback on its privileged context
pub trait HostExecutor: Send + Sync {
    /// Queue `job` for execution. Must not block waiting for the job.
    fn post(&self, job: HostJob) -> Result<()>;

    /// Label used in logs
    fn label(&self) -> &str {
        "host"
    }
}

/// Capability handed to every tool call
#[derive(Clone)]
pub struct HostContext {
    executor: Arc<dyn HostExecutor>,
}

impl HostContext {
    pub fn new(executor: Arc<dyn HostExecutor>) -> Self {
        Self { executor }
    }

    /// Context that runs callbacks on the caller's thread (tests, headless hosts)
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineExecutor))
    }

    pub fn label(&self) -> &str {
        self.executor.label()
    }

    /// Run `f` on the privileged context and await its result
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.executor.post(Box::new(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
                Err(BridgeError::HostUnavailable(
                    "host callback panicked".to_string(),
                ))
            });
            let _ = tx.send(outcome);
        }))?;

        rx.await.map_err(|_| {
            BridgeError::HostUnavailable("host context dropped the callback".to_string())
        })?
    }

    /// Poll a host-side condition until it holds.
    ///
    /// The condition is evaluated on the privileged context; between polls the
    /// wait is cancellable through `cancel`.
    pub async fn wait_until<F>(
        &self,
        cancel: &CancellationToken,
        poll: Duration,
        condition: F,
    ) -> Result<()>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let condition = Arc::new(condition);
        loop {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            let check = condition.clone();
            if self.run(move || Ok(check())).await? {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("executor", &self.executor.label())
            .finish()
    }
}

/// Executes jobs immediately on the posting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl HostExecutor for InlineExecutor {
    fn post(&self, job: HostJob) -> Result<()> {
        job();
        Ok(())
    }

    fn label(&self) -> &str {
        "inline"
    }
}

/// A dedicated OS thread standing in for the host's main thread.
///
/// Jobs run strictly one at a time in posting order.
pub struct MainThreadExecutor {
    label: String,
    sender: Mutex<Option<mpsc::UnboundedSender<HostJob>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MainThreadExecutor {
    /// Start the thread
    pub fn spawn(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<HostJob>();

        let thread_label = label.clone();
        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                tracing::debug!("Host thread '{}' started", thread_label);
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                tracing::debug!("Host thread '{}' stopped", thread_label);
            })?;

        Ok(Self {
            label,
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs, drain the queue and join the thread
    pub fn shutdown(&self) {
        self.sender.lock().take();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == std::thread::current().id() {
                // Shutting down from a job; the loop exits once the queue drains.
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("Host thread '{}' panicked during shutdown", self.label);
            }
        }
    }
}

impl HostExecutor for MainThreadExecutor {
    fn post(&self, job: HostJob) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or_else(|| {
            BridgeError::HostUnavailable(format!("host thread '{}' has stopped", self.label))
        })?;
        sender.send(job).map_err(|_| {
            BridgeError::HostUnavailable(format!("host thread '{}' has exited", self.label))
        })
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Disposable for MainThreadExecutor {
    fn dispose(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for MainThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_inline_run() {
        let host = HostContext::inline();
        let value = host.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(host.label(), "inline");
    }

    #[tokio::test]
    async fn test_main_thread_affinity() {
        let executor = Arc::new(MainThreadExecutor::spawn("host-main-test").unwrap());
        let host = HostContext::new(executor.clone());

        let name = host
            .run(|| Ok(std::thread::current().name().map(String::from)))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("host-main-test"));

        executor.shutdown();
        assert!(!executor.is_running());
        let err = host.run(|| Ok(())).await.unwrap_err();
        assert!(matches!(err, BridgeError::HostUnavailable(_)));
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let host = HostContext::inline();
        let err = host
            .run::<(), _>(|| panic!("host exploded"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::HostUnavailable(_)));
    }

    #[tokio::test]
    async fn test_wait_until_condition() {
        let host = HostContext::inline();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let cancel = CancellationToken::new();

        host.wait_until(&cancel, Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_cancelled() {
        let host = HostContext::inline();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = host
            .wait_until(&cancel, Duration::from_millis(5), || false)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }
}
