//! Periodic status polling
//!
//! The timer only ticks; the callback decides what a tick means.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Callback run on every tick
pub type PollCallback = Arc<dyn Fn() + Send + Sync>;

struct PollTask {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Tokio task that invokes a callback at a configurable interval
///
/// The interval is re-read before every sleep, so changing it while
/// running takes effect on the next tick.
pub struct StatusPollTimer {
    interval_ms: Arc<AtomicU64>,
    callback: PollCallback,
    task: Mutex<Option<PollTask>>,
}

impl StatusPollTimer {
    pub fn new(interval: Duration, callback: PollCallback) -> Self {
        Self {
            interval_ms: Arc::new(AtomicU64::new(interval.as_millis() as u64)),
            callback,
            task: Mutex::new(None),
        }
    }

    /// Start ticking; restarting an already running timer is a no-op
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let interval_ms = Arc::clone(&self.interval_ms);
        let callback = Arc::clone(&self.callback);

        let handle = tokio::spawn(async move {
            loop {
                let period = Duration::from_millis(interval_ms.load(Ordering::Relaxed).max(1));
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(period) => callback(),
                }
            }
            tracing::debug!("Status poll timer stopped");
        });

        *task = Some(PollTask {
            shutdown: shutdown_tx,
            handle,
        });
        tracing::debug!(
            "Status poll timer started at {}ms",
            self.interval_ms.load(Ordering::Relaxed)
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown.try_send(());
            task.handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }
}

impl Drop for StatusPollTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timer(interval_ms: u64) -> (StatusPollTimer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let timer = StatusPollTimer::new(
            Duration::from_millis(interval_ms),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (timer, ticks)
    }

    #[tokio::test]
    async fn test_ticks_while_running() {
        let (timer, ticks) = counting_timer(10);
        assert!(!timer.is_running());

        timer.start();
        assert!(timer.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.stop();
        assert!(!timer.is_running());

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {}", seen);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_interval_change_while_stopped() {
        let (timer, ticks) = counting_timer(1000);
        timer.set_interval(Duration::from_millis(10));
        assert_eq!(timer.interval(), Duration::from_millis(10));

        timer.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        timer.stop();
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_interval_change_while_running() {
        let (timer, ticks) = counting_timer(10);
        timer.start();
        timer.set_interval(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.stop();
        // At most the tick already scheduled with the old interval fires
        assert!(ticks.load(Ordering::SeqCst) <= 1);
    }
}
