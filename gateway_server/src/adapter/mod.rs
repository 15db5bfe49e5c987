//! The driver adapter. Owns a plugin, the tag cache, the message
//! queue, and a slab of groups each running three timers. `GroupId`
//! (a `slab::Slab` index) is the externally-held handle, so subscribers
//! and REST handlers never hold a raw pointer into the group table.

pub mod group;
pub mod queue;
pub mod report;
pub mod state;
pub mod sync_read;
pub mod write;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use slab::Slab;
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};

use crate::drivers::traits::{AdapterCallbacks, DriverPlugin, PluginGroup, WriteRequest};
use crate::events::{TimerHandle, TimerMode};
use crate::tags::tag::{Group, WriteItem};
use crate::tags::value::TagValue;
use crate::tags::TagCache;
use crate::trace::TraceContext;

pub use group::{GroupRuntime, GroupTimers};
pub use queue::{AdapterMessage, AdapterQueue};
pub use state::{AdapterError, AdapterState, InvalidTransition};
pub use write::{RequestIdGen, WriteError};

const REPORT_STAGGER: Duration = Duration::from_millis(20);
const WRITE_TIMER_PERIOD: Duration = Duration::from_millis(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// Routes plugin callbacks into the cache and the adapter queue. One
/// instance is handed to the plugin at `open()` and lives behind an
/// `Arc` for the plugin's own lifetime.
struct CallbackSink {
    cache: Arc<TagCache>,
    queue: Arc<AdapterQueue>,
    groups: Arc<RwLock<Slab<Arc<GroupRuntime>>>>,
    name_to_id: Arc<RwLock<HashMap<String, GroupId>>>,
}

#[async_trait::async_trait]
impl AdapterCallbacks for CallbackSink {
    async fn update(&self, group_name: &str, tag_name: Option<&str>, value: TagValue) {
        match tag_name {
            Some(tag_name) => {
                let key = crate::tags::TagKey::new(group_name, tag_name);
                self.cache
                    .update_change(&key, report::now_millis(), value.clone(), crate::tags::cache::empty_metas(), false, 0);
                let _ = self.queue.try_push(AdapterMessage::TagUpdated {
                    group_name: group_name.to_string(),
                    tag_name: tag_name.to_string(),
                    value,
                });
            }
            None => self.mark_group_error(group_name, value).await,
        }
    }

    async fn update_with_meta(&self, group_name: &str, tag_name: &str, value: TagValue, timestamp_ms: u64) {
        let key = crate::tags::TagKey::new(group_name, tag_name);
        self.cache
            .update_change(&key, timestamp_ms, value.clone(), crate::tags::cache::empty_metas(), false, 0);
        let _ = self.queue.try_push(AdapterMessage::TagUpdated {
            group_name: group_name.to_string(),
            tag_name: tag_name.to_string(),
            value,
        });
    }

    async fn update_im(&self, group_name: &str, tag_name: &str, value: TagValue) {
        let key = crate::tags::TagKey::new(group_name, tag_name);
        self.cache
            .update_change(&key, report::now_millis(), value, crate::tags::cache::empty_metas(), true, 0);
    }

    async fn update_with_trace(&self, group_name: &str, tag_name: &str, value: TagValue, trace: TraceContext) {
        self.cache.update_trace(group_name, Arc::new(tokio::sync::Mutex::new(trace)));
        self.update(group_name, Some(tag_name), value).await;
    }

    async fn write_response(&self, req: &WriteRequest, tag_name: &str, result: crate::drivers::traits::PluginResult<()>) {
        let _ = self.queue.try_push(AdapterMessage::WriteCompleted {
            request_id: 0,
            tag_name: tag_name.to_string(),
            ok: result.is_ok(),
        });
        if let Err(e) = result {
            warn!(group = %req.group_name, tag = %tag_name, error = %e, "write failed");
        }
    }

    async fn write_responses(&self, req: &WriteRequest, results: &[(String, crate::drivers::traits::PluginResult<()>)]) {
        for (tag_name, result) in results {
            self.write_response(req, tag_name, clone_plugin_result(result)).await;
        }
    }

    async fn register_metric(&self, name: &str) {
        info!(metric = %name, "metric registered");
    }

    async fn update_metric(&self, name: &str, value: f64) {
        tracing::debug!(metric = %name, value, "metric updated");
    }
}

impl CallbackSink {
    /// A plugin reported a group-wide failure: every read-enabled tag
    /// in the group is written as `value`, and the group's last-error
    /// metrics are registered/bumped.
    async fn mark_group_error(&self, group_name: &str, value: TagValue) {
        let Some(id) = self.name_to_id.read().await.get(group_name).copied() else {
            return;
        };
        let Some(runtime) = self.groups.read().await.get(id.0).cloned() else {
            return;
        };
        let now = report::now_millis();
        for tag in runtime.group.tags.iter().filter(|t| t.attribute().is_readable()) {
            let key = crate::tags::TagKey::new(group_name, &tag.name);
            self.cache
                .update_change(&key, now, value.clone(), crate::tags::cache::empty_metas(), false, 0);
        }

        let code = match &value {
            TagValue::Error(c) => *c as f64,
            _ => 0.0,
        };
        self.register_metric("GROUP_LAST_ERROR_CODE").await;
        self.update_metric("GROUP_LAST_ERROR_CODE", code).await;
        self.register_metric("GROUP_LAST_ERROR_TS").await;
        self.update_metric("GROUP_LAST_ERROR_TS", now as f64).await;
    }
}

fn clone_plugin_result(r: &crate::drivers::traits::PluginResult<()>) -> crate::drivers::traits::PluginResult<()> {
    match r {
        Ok(()) => Ok(()),
        Err(e) => Err(match e {
            crate::drivers::traits::PluginError::NotRunning => crate::drivers::traits::PluginError::NotRunning,
            crate::drivers::traits::PluginError::Unsupported => crate::drivers::traits::PluginError::Unsupported,
            crate::drivers::traits::PluginError::InvalidSetting(s) => {
                crate::drivers::traits::PluginError::InvalidSetting(s.clone())
            }
            crate::drivers::traits::PluginError::Transport(s) => crate::drivers::traits::PluginError::Transport(s.clone()),
        }),
    }
}

/// Owns one plugin instance and every group configured under it.
pub struct Adapter {
    pub driver_name: String,
    plugin: Arc<dyn DriverPlugin>,
    cache: Arc<TagCache>,
    queue: Arc<AdapterQueue>,
    state: RwLock<AdapterState>,
    groups: Arc<RwLock<Slab<Arc<GroupRuntime>>>>,
    name_to_id: Arc<RwLock<HashMap<String, GroupId>>>,
    ids: RequestIdGen,
    socket_dir: std::path::PathBuf,
}

impl Adapter {
    pub fn new(driver_name: impl Into<String>, plugin: Arc<dyn DriverPlugin>, cache: Arc<TagCache>) -> Self {
        Self::with_socket_dir(driver_name, plugin, cache, "/run/gateway/sockets")
    }

    pub fn with_socket_dir(
        driver_name: impl Into<String>,
        plugin: Arc<dyn DriverPlugin>,
        cache: Arc<TagCache>,
        socket_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Adapter {
            driver_name: driver_name.into(),
            plugin,
            cache,
            queue: Arc::new(AdapterQueue::new(queue::DEFAULT_CAPACITY)),
            state: RwLock::new(AdapterState::Idle),
            groups: Arc::new(RwLock::new(Slab::new())),
            name_to_id: Arc::new(RwLock::new(HashMap::new())),
            ids: RequestIdGen::new(),
            socket_dir: socket_dir.into(),
        }
    }

    pub async fn state(&self) -> AdapterState {
        *self.state.read().await
    }

    pub fn queue(&self) -> Arc<AdapterQueue> {
        self.queue.clone()
    }

    pub fn cache(&self) -> Arc<TagCache> {
        self.cache.clone()
    }

    pub async fn add_group(&self, name: impl Into<String>, interval: Duration) -> GroupId {
        self.add_group_with_tags(name, interval, Vec::new()).await
    }

    /// Like [`Self::add_group`] but pre-populates the group's tag list;
    /// `Group::tags` has no interior mutability, so tags must be known
    /// before the group is shared behind an `Arc`.
    pub async fn add_group_with_tags(&self, name: impl Into<String>, interval: Duration, tags: Vec<crate::tags::Tag>) -> GroupId {
        let name = name.into();
        let group = Arc::new(Group::new(name.clone(), interval).with_tags(tags));
        let runtime = Arc::new(GroupRuntime::new(group));
        let mut groups = self.groups.write().await;
        let idx = groups.insert(runtime);
        self.name_to_id.write().await.insert(name, GroupId(idx));
        GroupId(idx)
    }

    pub async fn group_id(&self, name: &str) -> Option<GroupId> {
        self.name_to_id.read().await.get(name).copied()
    }

    async fn group_runtime(&self, id: GroupId) -> Option<Arc<GroupRuntime>> {
        self.groups.read().await.get(id.0).cloned()
    }

    /// Cascade-destroys one group: stops its timers, then drops its
    /// entry (and with it, its write-queue and subscriber list, owned
    /// by the `Group` itself) from both the slab and the name index.
    pub async fn remove_group(&self, id: GroupId) {
        if let Some(runtime) = self.group_runtime(id).await {
            runtime.stop_timers().await;
        }
        let mut groups = self.groups.write().await;
        if groups.contains(id.0) {
            groups.remove(id.0);
        }
        drop(groups);
        self.name_to_id.write().await.retain(|_, v| *v != id);
    }

    /// `Idle -> Init -> Ready`: opens the plugin with a fresh callback
    /// sink, then runs its own init.
    pub async fn init(&self, load_from_db: bool) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if !state.can_init() {
            return Err(InvalidTransition {
                from: *state,
                action: "init",
            }
            .into());
        }
        let sink: Arc<dyn AdapterCallbacks> = Arc::new(CallbackSink {
            cache: self.cache.clone(),
            queue: self.queue.clone(),
            groups: self.groups.clone(),
            name_to_id: self.name_to_id.clone(),
        });
        self.plugin
            .open(sink)
            .await
            .map_err(|e| AdapterError::Plugin(e, "open"))?;
        self.plugin
            .init(load_from_db)
            .await
            .map_err(|e| AdapterError::Plugin(e, "init"))?;
        *state = AdapterState::Ready;
        Ok(())
    }

    /// `Ready|Stopped -> Running`: starts the plugin then spawns the
    /// three per-group timers for every configured group.
    pub async fn start(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if !state.can_start() {
            return Err(InvalidTransition {
                from: *state,
                action: "start",
            }
            .into());
        }
        self.plugin
            .start()
            .await
            .map_err(|e| AdapterError::Plugin(e, "start"))?;

        let groups: Vec<Arc<GroupRuntime>> = self.groups.read().await.iter().map(|(_, g)| g.clone()).collect();
        for runtime in groups {
            if runtime.has_timers().await {
                continue;
            }
            runtime.install_timers(self.spawn_group_timers(runtime.group.clone())).await;
        }

        *state = AdapterState::Running;
        Ok(())
    }

    fn spawn_group_timers(&self, group: Arc<Group>) -> GroupTimers {
        let driver_name = self.driver_name.clone();
        let plugin = self.plugin.clone();
        let cache = self.cache.clone();
        let g = group.clone();
        let driver_name_read = driver_name.clone();
        let read = TimerHandle::spawn(group.interval, TimerMode::Blocking, move || {
            let plugin = plugin.clone();
            let driver_name = driver_name_read.clone();
            let g = g.clone();
            let span = info_span!("read_timer", driver = %driver_name, group = %g.name);
            async move {
                let plugin_group = PluginGroup {
                    name: g.name.clone(),
                    tags: g.tags.clone(),
                };
                if let Err(e) = plugin.group_timer(&plugin_group).await {
                    warn!(error = %e, "read timer failed");
                }
            }
            .instrument(span)
        });

        let driver_name_report = driver_name.clone();
        let cache_report = cache.clone();
        let socket_dir = self.socket_dir.clone();
        let g = group.clone();
        let report = TimerHandle::spawn(group.interval + REPORT_STAGGER, TimerMode::Blocking, move || {
            let driver_name = driver_name_report.clone();
            let cache = cache_report.clone();
            let socket_dir = socket_dir.clone();
            let g = g.clone();
            let span = info_span!("report_timer", driver = %driver_name, group = %g.name);
            async move {
                let built = report::build_report(&cache, &g);
                if built.is_empty() {
                    return;
                }
                report::dispatch_report(&driver_name, &g, &built, None, &socket_dir).await;
            }
            .instrument(span)
        });

        let plugin_write = self.plugin.clone();
        let driver_name_write = driver_name.clone();
        let g = group.clone();
        let write = TimerHandle::spawn(WRITE_TIMER_PERIOD, TimerMode::Blocking, move || {
            let plugin = plugin_write.clone();
            let driver_name = driver_name_write.clone();
            let g = g.clone();
            let span = info_span!("write_timer", driver = %driver_name, group = %g.name);
            async move {
                let items: Vec<WriteItem> = write::drain_write_queue(&g, usize::MAX).await;
                if items.is_empty() {
                    return;
                }
                let req = WriteRequest {
                    group_name: g.name.clone(),
                    trace_ctx: None,
                };
                for item in items {
                    let tag = match g.find_tag(&item.tag_name) {
                        Some(t) => t.clone(),
                        None => continue,
                    };
                    if let Err(e) = plugin.write_tag(&req, &tag, item.value).await {
                        warn!(tag = %item.tag_name, error = %e, "write failed");
                    }
                }
            }
            .instrument(span)
        });

        GroupTimers { read, report, write }
    }

    /// `Running -> Stopped`: stops every group's timers, then the
    /// plugin itself.
    pub async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if !state.can_stop() {
            return Err(InvalidTransition {
                from: *state,
                action: "stop",
            }
            .into());
        }
        let groups: Vec<Arc<GroupRuntime>> = self.groups.read().await.iter().map(|(_, g)| g.clone()).collect();
        for runtime in groups {
            runtime.stop_timers().await;
        }
        self.plugin
            .stop()
            .await
            .map_err(|e| AdapterError::Plugin(e, "stop"))?;
        *state = AdapterState::Stopped;
        Ok(())
    }

    /// Tears down every group (cascade) and closes the plugin,
    /// returning the adapter to `Idle`.
    pub async fn uninit(&self) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        if !state.can_uninit() {
            return Err(InvalidTransition {
                from: *state,
                action: "uninit",
            }
            .into());
        }
        let ids: Vec<GroupId> = self
            .name_to_id
            .read()
            .await
            .values()
            .copied()
            .collect();
        drop(state);
        for id in ids {
            self.remove_group(id).await;
        }
        let mut state = self.state.write().await;
        self.plugin
            .uninit()
            .await
            .map_err(|e| AdapterError::Plugin(e, "uninit"))?;
        self.plugin
            .close()
            .await
            .map_err(|e| AdapterError::Plugin(e, "close"))?;
        *state = AdapterState::Idle;
        Ok(())
    }

    /// A plain cache read: the same fan-out build the report timer
    /// runs, without touching the group's timers. Used by the REST
    /// `read_group` handler when the caller didn't ask for `sync=true`.
    pub async fn peek_group(&self, id: GroupId) -> Option<Vec<report::ReportedTag>> {
        let runtime = self.group_runtime(id).await?;
        Some(report::build_report(&self.cache, &runtime.group))
    }

    /// Registers a subscriber on a group; it starts receiving the
    /// group's `TRANS_DATA` fan-out on the next report tick.
    pub async fn add_subscriber(&self, id: GroupId, subscriber: crate::tags::tag::Subscriber) -> bool {
        let Some(runtime) = self.group_runtime(id).await else {
            return false;
        };
        runtime.group.apps.write().await.push(subscriber);
        true
    }

    /// Synchronous group read: stops the group's
    /// timers, calls the plugin's `group_sync`, then restarts them.
    pub async fn read_group_sync(&self, id: GroupId) -> Option<Vec<report::ReportedTag>> {
        let runtime = self.group_runtime(id).await?;
        let had_timers = runtime.has_timers().await;
        if had_timers {
            runtime.stop_timers().await;
        }
        let result = sync_read::group_sync(self.plugin.as_ref(), &self.cache, &runtime.group).await;
        if had_timers {
            runtime.install_timers(self.spawn_group_timers(runtime.group.clone())).await;
        }
        Some(result)
    }

    /// `write_tag`/`write_tags` on one group.
    pub async fn write_tags(&self, id: GroupId, items: &[(String, TagValue)]) -> Option<Vec<Result<u64, WriteError>>> {
        let runtime = self.group_runtime(id).await?;
        let state = self.state().await;
        Some(write::write_tags(state, true, &runtime.group, items, &self.ids).await)
    }

    /// `write_gtags` across multiple groups, first group's queue wins
    /// ordering.
    pub async fn write_gtags(
        &self,
        ids: &[GroupId],
        items_per_group: &[Vec<(String, TagValue)>],
    ) -> Vec<Result<u64, WriteError>> {
        let mut runtimes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.group_runtime(*id).await {
                Some(r) => runtimes.push(r),
                None => return Vec::new(),
            }
        }
        let groups: Vec<&Group> = runtimes.iter().map(|r| r.group.as_ref()).collect();
        let state = self.state().await;
        write::write_gtags(state, true, &groups, items_per_group, &self.ids).await
    }
}
