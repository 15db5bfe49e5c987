//! Per-group runtime state: the `Group` data plus the three timer
//! handles the adapter spawns for it (read/report/write). Kept
//! separate from `Group` itself so `tags::tag` stays a plain data
//! model with no event-loop dependency.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::events::TimerHandle;
use crate::tags::tag::Group;

pub struct GroupTimers {
    pub read: TimerHandle,
    pub report: TimerHandle,
    pub write: TimerHandle,
}

pub struct GroupRuntime {
    pub group: Arc<Group>,
    timers: Mutex<Option<GroupTimers>>,
}

impl GroupRuntime {
    pub fn new(group: Arc<Group>) -> Self {
        GroupRuntime {
            group,
            timers: Mutex::new(None),
        }
    }

    /// Installs the three spawned timers; panics if called twice
    /// without an intervening [`stop_timers`](Self::stop_timers) since
    /// that would leak the previous set.
    pub async fn install_timers(&self, timers: GroupTimers) {
        let mut slot = self.timers.lock().await;
        assert!(slot.is_none(), "group timers already installed");
        *slot = Some(timers);
    }

    /// Stops and drops whatever timers are installed; a no-op if none
    /// are. Used both by sync-read (stop, call plugin, restart) and by
    /// adapter stop/uninit (stop, never restart).
    pub async fn stop_timers(&self) {
        let taken = self.timers.lock().await.take();
        if let Some(timers) = taken {
            timers.read.stop().await;
            timers.report.stop().await;
            timers.write.stop().await;
        }
    }

    pub async fn has_timers(&self) -> bool {
        self.timers.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::events::TimerMode;

    #[tokio::test]
    async fn install_then_stop_timers_round_trips() {
        let group = Arc::new(Group::new("g1", Duration::from_millis(500)));
        let runtime = GroupRuntime::new(group);
        let ticks = Arc::new(AtomicU32::new(0));

        let spawn = |ticks: Arc<AtomicU32>| {
            TimerHandle::spawn(Duration::from_millis(5), TimerMode::Blocking, move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        runtime
            .install_timers(GroupTimers {
                read: spawn(ticks.clone()),
                report: spawn(ticks.clone()),
                write: spawn(ticks.clone()),
            })
            .await;
        assert!(runtime.has_timers().await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        runtime.stop_timers().await;
        assert!(!runtime.has_timers().await);
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
