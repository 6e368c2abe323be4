//! Fixed-delay task scheduling.
//!
//! The delay is measured from the end of one tick to the start of the next,
//! so a slow tick never overlaps the following one. Cancellation is checked
//! before every tick and interrupts the wait between ticks.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Something a [`Scheduler`] runs repeatedly. Implementations log their own
/// failures; a tick never propagates an error.
#[async_trait]
pub trait Task: Send {
    fn name(&self) -> &str;

    async fn tick(&mut self);
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    name: String,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            name: name.into(),
            interval,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `task` until shutdown. Returns the number of ticks executed.
    pub async fn run<T: Task + ?Sized>(&self, task: &mut T) -> u64 {
        info!(scheduler = %self.name, task = task.name(), interval_ms = self.interval.as_millis() as u64, "scheduler started");
        let mut ticks = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            task.tick().await;
            ticks += 1;
            debug!(scheduler = %self.name, ticks, "tick finished");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(scheduler = %self.name, ticks, "scheduler stopped");
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        hits: Arc<AtomicU64>,
        stop_after: u64,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Task for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn tick(&mut self) {
            let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                self.shutdown.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_runs_until_cancelled() {
        let shutdown = CancellationToken::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut task = Counter {
            hits: hits.clone(),
            stop_after: 3,
            shutdown: shutdown.clone(),
        };

        let scheduler = Scheduler::new("test", Duration::from_millis(1), shutdown);
        let ticks = scheduler.run(&mut task).await;
        assert_eq!(ticks, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let hits = Arc::new(AtomicU64::new(0));
        let mut task = Counter {
            hits: hits.clone(),
            stop_after: 100,
            shutdown: shutdown.clone(),
        };
        let scheduler = Scheduler::new("test", Duration::from_secs(60), shutdown);
        assert_eq!(scheduler.run(&mut task).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_long_wait() {
        let shutdown = CancellationToken::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut task = Counter {
            hits: hits.clone(),
            stop_after: u64::MAX,
            shutdown: shutdown.clone(),
        };
        let scheduler = Scheduler::new("test", Duration::from_secs(3600), shutdown.clone());

        let handle = tokio::spawn(async move { scheduler.run(&mut task).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
