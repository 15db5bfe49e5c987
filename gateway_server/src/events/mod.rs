//! C2 — per-adapter timer multiplexing. Rather than a hand-rolled
//! reactor, each timer is a `tokio::time::interval` drive loop spawned
//! as its own task; `tokio` itself is the event loop. `TimerHandle`
//! gives the synchronous-cancellation guarantee that callers rely on:
//! `stop()` waits for any in-flight callback to return before
//! returning, by joining the spawned task after signalling it to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;

/// Blocking timers serialize their callback against the next tick
/// (the drive loop `.await`s the callback before ticking again);
/// non-blocking timers spawn the callback so ticks may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Blocking,
    NonBlocking,
}

/// A level-triggered readiness notification surfaced by a
/// [`Connection`](crate::conn::Connection) to code that wants to react
/// to it without owning the read loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    Read,
    Closed,
    Hup,
}

/// Handle to a running periodic timer. Dropping it does *not* stop the
/// timer (matching `tokio::task::JoinHandle` semantics) — call
/// [`stop`](Self::stop) to cancel and wait for in-flight callbacks.
pub struct TimerHandle {
    stop_signal: Arc<Notify>,
    task: JoinHandle<()>,
    non_blocking_tasks: Arc<Mutex<JoinSet<()>>>,
}

impl TimerHandle {
    /// Spawns a periodic timer calling `callback` every `period`. The
    /// first tick fires after `period`, matching `tokio::time::interval`.
    pub fn spawn<F, Fut>(period: Duration, mode: TimerMode, mut callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let stop_signal = Arc::new(Notify::new());
        let stop_for_task = stop_signal.clone();
        let non_blocking_tasks = Arc::new(Mutex::new(JoinSet::new()));
        let tasks_for_loop = non_blocking_tasks.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = stop_for_task.notified() => break,
                    _ = ticker.tick() => {
                        match mode {
                            TimerMode::Blocking => callback().await,
                            TimerMode::NonBlocking => {
                                tasks_for_loop.lock().await.spawn(callback());
                            }
                        }
                    }
                }
            }
        });

        TimerHandle { stop_signal, task, non_blocking_tasks }
    }

    /// Cancels the timer and waits for the drive loop to exit, then for
    /// every non-blocking callback still in flight to finish. Blocking
    /// callbacks are already awaited inline by the drive loop, so
    /// joining that loop alone covers them.
    pub async fn stop(self) {
        self.stop_signal.notify_one();
        let _ = self.task.await;
        let mut tasks = self.non_blocking_tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn blocking_timer_ticks_and_stops_cleanly() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let handle = TimerHandle::spawn(Duration::from_millis(10), TimerMode::Blocking, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.stop().await;
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_callback() {
        let finished = Arc::new(AtomicU32::new(0));
        let f = finished.clone();
        let handle = TimerHandle::spawn(Duration::from_millis(5), TimerMode::Blocking, move || {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_non_blocking_callback() {
        let finished = Arc::new(AtomicU32::new(0));
        let f = finished.clone();
        let handle = TimerHandle::spawn(Duration::from_millis(5), TimerMode::NonBlocking, move || {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
