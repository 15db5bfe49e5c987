//! Synchronous group read: `read_group(sync=true)`
//! bypasses the cache's age window and asks the plugin to populate it
//! in-line. Stopping/restarting the group's timers around this call is
//! the adapter's job (it owns the `GroupRuntime`); this module is the
//! pure read-and-report step sandwiched in between.

use crate::drivers::traits::{DriverPlugin, PluginGroup};
use crate::tags::tag::Group;
use crate::tags::value::TagValue;
use crate::tags::TagCache;

use super::report::{build_report, ReportedTag};

/// Runs `plugin.group_sync`, then the same reporting fan-out build as
/// the periodic report timer. Testable property #4 (sync-read
/// isolation): the caller is expected to have already stopped the
/// group's read/report timers so this call sees a quiescent cache.
pub async fn group_sync(plugin: &dyn DriverPlugin, cache: &TagCache, group: &Group) -> Vec<ReportedTag> {
    let plugin_group = PluginGroup {
        name: group.name.clone(),
        tags: group.tags.clone(),
    };

    match plugin.group_sync(&plugin_group).await {
        Some(Ok(())) => build_report(cache, group),
        Some(Err(_)) | None => group
            .tags
            .iter()
            .filter(|t| t.attribute().is_readable())
            .map(|t| ReportedTag {
                name: t.name.clone(),
                value: TagValue::read_sync_unsupported(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::traits::{AdapterCallbacks, PluginDescriptor, PluginError, PluginResult, WriteRequest};
    use crate::tags::tag::{TagAttrSerde, TagAttribute};
    use crate::tags::value::AddressOption;
    use crate::tags::Tag;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Arc;
    use std::time::Duration;

    struct SyncCapablePlugin {
        descriptor: PluginDescriptor,
        cache: Arc<TagCache>,
    }

    #[async_trait]
    impl DriverPlugin for SyncCapablePlugin {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }
        async fn open(&self, _callbacks: Arc<dyn AdapterCallbacks>) -> PluginResult<()> {
            Ok(())
        }
        async fn close(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn init(&self, _load_from_db: bool) -> PluginResult<()> {
            Ok(())
        }
        async fn uninit(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn start(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn stop(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn setting(&self, _setting_json: &str) -> PluginResult<()> {
            Ok(())
        }
        async fn validate_tag(&self, _tag: &Tag) -> PluginResult<()> {
            Ok(())
        }
        async fn group_timer(&self, _group: &PluginGroup) -> PluginResult<()> {
            Ok(())
        }
        async fn group_sync(&self, group: &PluginGroup) -> Option<PluginResult<()>> {
            for tag in &group.tags {
                let key = crate::tags::TagKey::new(&group.name, &tag.name);
                self.cache.update_change(
                    &key,
                    super::report::now_millis(),
                    TagValue::Int16(42),
                    crate::tags::cache::empty_metas(),
                    false,
                    0,
                );
            }
            Some(Ok(()))
        }
        async fn write_tag(&self, _req: &WriteRequest, _tag: &Tag, _value: TagValue) -> PluginResult<()> {
            Err(PluginError::Unsupported)
        }
        async fn write_tags(&self, _req: &WriteRequest, _items: &[(Tag, TagValue)]) -> PluginResult<()> {
            Err(PluginError::Unsupported)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct NoSyncPlugin {
        descriptor: PluginDescriptor,
    }

    #[async_trait]
    impl DriverPlugin for NoSyncPlugin {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }
        async fn open(&self, _callbacks: Arc<dyn AdapterCallbacks>) -> PluginResult<()> {
            Ok(())
        }
        async fn close(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn init(&self, _load_from_db: bool) -> PluginResult<()> {
            Ok(())
        }
        async fn uninit(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn start(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn stop(&self) -> PluginResult<()> {
            Ok(())
        }
        async fn setting(&self, _setting_json: &str) -> PluginResult<()> {
            Ok(())
        }
        async fn validate_tag(&self, _tag: &Tag) -> PluginResult<()> {
            Ok(())
        }
        async fn group_timer(&self, _group: &PluginGroup) -> PluginResult<()> {
            Ok(())
        }
        async fn group_sync(&self, _group: &PluginGroup) -> Option<PluginResult<()>> {
            None
        }
        async fn write_tag(&self, _req: &WriteRequest, _tag: &Tag, _value: TagValue) -> PluginResult<()> {
            Err(PluginError::Unsupported)
        }
        async fn write_tags(&self, _req: &WriteRequest, _items: &[(Tag, TagValue)]) -> PluginResult<()> {
            Err(PluginError::Unsupported)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn tag(name: &str) -> Tag {
        Tag {
            name: name.into(),
            address: "x".into(),
            attribute: TagAttrSerde(TagAttribute::READ),
            kind: crate::tags::value::TagType::Int16,
            precision: 0,
            decimal: 0.0,
            bias: 0.0,
            description: String::new(),
            address_option: AddressOption::None,
            meta: Vec::new(),
            format_tokens: Vec::new(),
        }
    }

    #[tokio::test]
    async fn sync_capable_plugin_populates_cache_and_reports() {
        let cache = Arc::new(TagCache::new(false));
        let plugin = SyncCapablePlugin {
            descriptor: PluginDescriptor {
                module_name: "test".into(),
                version: "0".into(),
                kind: "test".into(),
            },
            cache: cache.clone(),
        };
        let mut group = Group::new("g1", Duration::from_secs(60));
        group.tags.push(tag("t1"));

        let report = group_sync(&plugin, &cache, &group).await;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].value, TagValue::Int16(42));
    }

    /// Scenario S5: plugin without `group_sync` support reports
    /// `READ_SYNC_UNSUPPORTED` for every tag.
    #[tokio::test]
    async fn unsupported_plugin_reports_read_sync_unsupported() {
        let cache = TagCache::new(false);
        let plugin = NoSyncPlugin {
            descriptor: PluginDescriptor {
                module_name: "test".into(),
                version: "0".into(),
                kind: "test".into(),
            },
        };
        let mut group = Group::new("g1", Duration::from_secs(60));
        group.tags.push(tag("t1"));

        let report = group_sync(&plugin, &cache, &group).await;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].value, TagValue::read_sync_unsupported());
    }
}
