//! Background work registered while handling the request.
//!
//! Applications hand fire-and-forget futures (analytics flushes, cache
//! writes) to [`Background::wait_until`]. They start running right away,
//! alongside the response; [`Background::drain`] waits for all of them after
//! the response has been written, so the process only exits once they settle.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::BoxError;

type Tasks = JoinSet<Result<(), BoxError>>;

/// Outcome of [`Background::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
}

/// Cloneable handle to the set of in-flight background tasks.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use procweb::lifecycle::Background;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let background = Background::new();
/// background.wait_until(async {
///     tokio::time::sleep(Duration::from_millis(10)).await;
///     Ok(())
/// });
///
/// let report = background.drain().await;
/// assert_eq!(report.completed, 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Background {
    tasks: Arc<Mutex<Tasks>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `task` now and keeps the process alive until it settles.
    ///
    /// Must be called from within the tokio runtime.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.lock().spawn(task);
    }

    /// Number of tasks registered and not yet drained.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Waits for every registered task, including ones registered while
    /// draining. Failures and panics are logged, never propagated.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let mut tasks = std::mem::take(&mut *self.lock());
            if tasks.is_empty() {
                break;
            }
            debug!(pending = tasks.len(), "waiting for background tasks");
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => report.completed += 1,
                    Ok(Err(e)) => {
                        warn!(error = %e, "background task failed");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "background task panicked or was cancelled");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_slow_tasks() {
        let background = Background::new();
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            background.wait_until(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                done.store(true, Ordering::SeqCst);
                Ok(())
            });
        }

        let start = Instant::now();
        let report = background.drain().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(report, DrainReport { completed: 1, failed: 0 });
        assert!(background.is_empty());
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let background = Background::new();
        background.wait_until(async { Err("flush failed".into()) });
        background.wait_until(async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        background.wait_until(async { Ok(()) });

        let report = background.drain().await;
        assert_eq!(report, DrainReport { completed: 1, failed: 2 });
    }

    #[tokio::test]
    async fn tasks_registered_while_draining_are_awaited() {
        let background = Background::new();
        let inner = background.clone();
        background.wait_until(async move {
            inner.wait_until(async { Ok(()) });
            Ok(())
        });

        let report = background.drain().await;
        assert_eq!(report.completed, 2);
    }

    #[tokio::test]
    async fn empty_drain_returns_immediately() {
        assert_eq!(Background::new().drain().await, DrainReport::default());
    }
}
