//! The plugin ABI a driver adapter drives. Every lifecycle method takes
//! `&self` (plugins hold their mutable state behind an internal
//! `Mutex`, the same pattern `OpcUaDriver` uses for its client handle)
//! so a plugin can be shared as `Arc<dyn DriverPlugin>` across an
//! adapter's read/report/write timers without an outer lock.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tags::{Tag, TagValue};
use crate::trace::TraceContext;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not running")]
    NotRunning,
    #[error("operation not supported by this plugin")]
    Unsupported,
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Static identity of a plugin instance, analogous to the source's
/// module/version metadata exchanged at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub module_name: String,
    pub version: String,
    pub kind: String,
}

/// Common configuration for a driver instance. Kept from the original
/// repo and extended with `connection_param`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    pub id: String,
    pub name: String,
    pub address: String,
    pub scan_rate_ms: u64,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_uri: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub max_message_size: Option<usize>,
    #[serde(default)]
    pub max_chunk_count: Option<usize>,
    #[serde(default)]
    pub connect_retry_attempts: Option<u32>,
    #[serde(default)]
    pub connect_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub connect_retry_backoff: Option<f64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub connection_param: Option<crate::conn::ConnectionParam>,
}

/// A group as handed down to the plugin during `group_timer`/`group_sync` —
/// just enough for the plugin to know what to read, not the adapter's
/// full internal bookkeeping.
#[derive(Debug, Clone)]
pub struct PluginGroup {
    pub name: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub group_name: String,
    pub trace_ctx: Option<TraceContext>,
}

/// The core trait every protocol plugin implements.
#[async_trait]
pub trait DriverPlugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;
    /// Hands the plugin its callback sink; called once before `init`.
    async fn open(&self, callbacks: Arc<dyn AdapterCallbacks>) -> PluginResult<()>;
    async fn close(&self) -> PluginResult<()>;
    async fn init(&self, load_from_db: bool) -> PluginResult<()>;
    async fn uninit(&self) -> PluginResult<()>;
    async fn start(&self) -> PluginResult<()>;
    async fn stop(&self) -> PluginResult<()>;
    async fn setting(&self, setting_json: &str) -> PluginResult<()>;
    async fn validate_tag(&self, tag: &Tag) -> PluginResult<()>;
    async fn group_timer(&self, group: &PluginGroup) -> PluginResult<()>;
    /// `None` means the plugin does not implement synchronous group
    /// reads; the adapter reports `READ_SYNC_UNSUPPORTED` per tag.
    async fn group_sync(&self, group: &PluginGroup) -> Option<PluginResult<()>>;
    async fn write_tag(&self, req: &WriteRequest, tag: &Tag, value: TagValue) -> PluginResult<()>;
    async fn write_tags(
        &self,
        req: &WriteRequest,
        items: &[(Tag, TagValue)],
    ) -> PluginResult<()>;
    /// Enables `Any::downcast_ref` probing for `ExtendedPluginOps`, the
    /// same pattern the REST layer uses to reach `OpcUaDriver`-specific
    /// methods.
    fn as_any(&self) -> &dyn Any;
}

/// Handed to a plugin at `open()`; lets it push values and write
/// results back into the adapter without owning the cache itself.
#[async_trait]
pub trait AdapterCallbacks: Send + Sync {
    /// `tag_name = None` reports a group-wide plugin failure rather
    /// than a single tag's value: every read-enabled tag in the group
    /// is marked with `value`, and the group's last-error metrics are
    /// bumped.
    async fn update(&self, group_name: &str, tag_name: Option<&str>, value: TagValue);
    async fn update_with_meta(
        &self,
        group_name: &str,
        tag_name: &str,
        value: TagValue,
        timestamp_ms: u64,
    );
    /// `im` = in-memory only, bypassing change detection (e.g. a forced
    /// republish after a sync read).
    async fn update_im(&self, group_name: &str, tag_name: &str, value: TagValue);
    async fn update_with_trace(
        &self,
        group_name: &str,
        tag_name: &str,
        value: TagValue,
        trace: TraceContext,
    );
    async fn write_response(&self, req: &WriteRequest, tag_name: &str, result: PluginResult<()>);
    async fn write_responses(
        &self,
        req: &WriteRequest,
        results: &[(String, PluginResult<()>)],
    );
    async fn register_metric(&self, name: &str);
    async fn update_metric(&self, name: &str, value: f64);
}

/// Optional surface for plugins supporting file transfer, scan, action
/// execution, or test-read hooks. An adapter probes for it via
/// `as_any().downcast_ref`; plugins that don't implement it simply
/// aren't queried.
#[async_trait]
pub trait ExtendedPluginOps: Send + Sync {
    async fn scan_tags(&self) -> PluginResult<Vec<String>>;
    async fn test_read_tag(&self, address: &str) -> PluginResult<TagValue>;
    async fn exec_action(&self, action: &str, payload: &str) -> PluginResult<String>;
    async fn list_directory(&self, path: &str) -> PluginResult<Vec<String>>;
    async fn file_upload_begin(&self, remote_path: &str, size: u64) -> PluginResult<u32>;
    async fn file_upload_chunk(&self, handle: u32, data: &[u8]) -> PluginResult<()>;
    async fn file_download_begin(&self, remote_path: &str) -> PluginResult<(u32, u64)>;
    async fn file_download_chunk(&self, handle: u32) -> PluginResult<Vec<u8>>;
}

pub type SharedPlugin = Arc<dyn DriverPlugin>;
