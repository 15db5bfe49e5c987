//! Write path: validates an incoming write
//! against the tag's type/range, resolves it to the tag's storage
//! representation, applies the endianness fix-up, and enqueues it on
//! the owning group's write-queue for the write timer to drain.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::tags::range::{resolve_write_value, WriteValueError};
use crate::tags::tag::{Group, TagAttribute, WriteItem};
use crate::tags::value::TagValue;

use super::report::apply_endian;
use super::state::AdapterState;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WriteError {
    #[error("adapter is not running")]
    NotRunning,
    #[error("plugin does not support writes")]
    Unsupported,
    #[error("tag {0} does not exist in this group")]
    TagNotFound(String),
    #[error("tag {0} is not write-enabled")]
    NotWritable(String),
    #[error("tag {0}: {1}")]
    InvalidValue(String, WriteValueError),
}

/// Monotonic request id source for `WriteItem`/`WriteCompleted`
/// correlation, shared across every group on an adapter.
#[derive(Debug, Default)]
pub struct RequestIdGen(AtomicU64);

impl RequestIdGen {
    pub fn new() -> Self {
        RequestIdGen(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Validates one `(tag_name, value)` write against the group's tag
/// table and returns the resolved `WriteItem` ready for enqueue.
/// Does not touch the queue itself — callers enqueue in request order
/// so a multi-tag write preserves ordering.
pub fn resolve_one(group: &Group, tag_name: &str, value: &TagValue, request_id: u64) -> Result<WriteItem, WriteError> {
    let tag = group
        .find_tag(tag_name)
        .ok_or_else(|| WriteError::TagNotFound(tag_name.to_string()))?;
    if !tag.attribute().has(TagAttribute::WRITE) {
        return Err(WriteError::NotWritable(tag_name.to_string()));
    }

    let resolved = resolve_write_value(tag.kind, tag.decimal, value)
        .map_err(|e| WriteError::InvalidValue(tag_name.to_string(), e))?;
    let resolved = apply_endian(tag.kind, &tag.address_option, resolved);

    Ok(WriteItem {
        tag_name: tag_name.to_string(),
        value: resolved,
        request_id,
    })
}

/// `write_tag`/`write_tags`. `adapter_state`
/// and `plugin_supports_writes` gate step 1; every accepted item lands
/// on `group.write_queue` in the order given.
pub async fn write_tags(
    adapter_state: AdapterState,
    plugin_supports_writes: bool,
    group: &Group,
    items: &[(String, TagValue)],
    ids: &RequestIdGen,
) -> Vec<Result<u64, WriteError>> {
    if adapter_state != AdapterState::Running {
        return items.iter().map(|_| Err(WriteError::NotRunning)).collect();
    }
    if !plugin_supports_writes {
        return items.iter().map(|_| Err(WriteError::Unsupported)).collect();
    }

    let mut results = Vec::with_capacity(items.len());
    let mut queue = group.write_queue.lock().await;
    for (tag_name, value) in items {
        let request_id = ids.next();
        match resolve_one(group, tag_name, value, request_id) {
            Ok(item) => {
                queue.push_back(item);
                results.push(Ok(request_id));
            }
            Err(e) => results.push(Err(e)),
        }
    }
    results
}

/// `write_gtags`: all items across every named group enqueue on the
/// first group's write-queue so a single aggregated reply preserves
/// cross-group ordering.
pub async fn write_gtags(
    adapter_state: AdapterState,
    plugin_supports_writes: bool,
    groups_in_order: &[&Group],
    items_per_group: &[Vec<(String, TagValue)>],
    ids: &RequestIdGen,
) -> Vec<Result<u64, WriteError>> {
    if adapter_state != AdapterState::Running {
        return items_per_group.iter().flatten().map(|_| Err(WriteError::NotRunning)).collect();
    }
    if !plugin_supports_writes {
        return items_per_group
            .iter()
            .flatten()
            .map(|_| Err(WriteError::Unsupported))
            .collect();
    }

    let first = match groups_in_order.first() {
        Some(g) => g,
        None => return Vec::new(),
    };

    let mut results = Vec::new();
    let mut queue = first.write_queue.lock().await;
    for (group, items) in groups_in_order.iter().zip(items_per_group.iter()) {
        for (tag_name, value) in items {
            let request_id = ids.next();
            match resolve_one(group, tag_name, value, request_id) {
                Ok(item) => {
                    queue.push_back(item);
                    results.push(Ok(request_id));
                }
                Err(e) => results.push(Err(e)),
            }
        }
    }
    results
}

/// Drains up to `max_items` from the group's write-queue, in FIFO
/// order, for the write timer to hand to the plugin.
pub async fn drain_write_queue(group: &Group, max_items: usize) -> Vec<WriteItem> {
    let mut queue = group.write_queue.lock().await;
    let n = max_items.min(queue.len());
    queue.drain(..n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tag::{Tag, TagAttrSerde};
    use crate::tags::value::{AddressOption, TagType};
    use std::time::Duration;

    fn writable_tag(name: &str, kind: TagType, decimal: f64) -> Tag {
        Tag {
            name: name.into(),
            address: "x".into(),
            attribute: TagAttrSerde(TagAttribute::READ | TagAttribute::WRITE),
            kind,
            precision: 0,
            decimal,
            bias: 0.0,
            description: String::new(),
            address_option: AddressOption::None,
            meta: Vec::new(),
            format_tokens: Vec::new(),
        }
    }

    #[tokio::test]
    async fn rejects_when_adapter_not_running() {
        let mut group = Group::new("g1", Duration::from_millis(500));
        group.tags.push(writable_tag("t1", TagType::Int16, 0.0));
        let ids = RequestIdGen::new();

        let results = write_tags(
            AdapterState::Idle,
            true,
            &group,
            &[("t1".into(), TagValue::Int64(5))],
            &ids,
        )
        .await;
        assert_eq!(results, vec![Err(WriteError::NotRunning)]);
    }

    #[tokio::test]
    async fn rejects_when_plugin_lacks_write_support() {
        let mut group = Group::new("g1", Duration::from_millis(500));
        group.tags.push(writable_tag("t1", TagType::Int16, 0.0));
        let ids = RequestIdGen::new();

        let results = write_tags(
            AdapterState::Running,
            false,
            &group,
            &[("t1".into(), TagValue::Int64(5))],
            &ids,
        )
        .await;
        assert_eq!(results, vec![Err(WriteError::Unsupported)]);
    }

    #[tokio::test]
    async fn scenario_s2_decimal_write_enqueues_scaled_value() {
        let mut group = Group::new("g1", Duration::from_millis(500));
        group.tags.push(writable_tag("t1", TagType::Int16, 0.1));
        let ids = RequestIdGen::new();

        let results = write_tags(
            AdapterState::Running,
            true,
            &group,
            &[("t1".into(), TagValue::Int64(123))],
            &ids,
        )
        .await;
        assert!(results[0].is_ok());

        let drained = drain_write_queue(&group, 10).await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].value.as_i64(), Some(1230));
    }

    /// Testable property #3: two writes submitted in order W1, W2 to
    /// the same group dequeue in that same order.
    #[tokio::test]
    async fn write_ordering_is_preserved_within_a_group() {
        let mut group = Group::new("g1", Duration::from_millis(500));
        group.tags.push(writable_tag("t1", TagType::Int16, 0.0));
        group.tags.push(writable_tag("t2", TagType::Int16, 0.0));
        let ids = RequestIdGen::new();

        write_tags(AdapterState::Running, true, &group, &[("t1".into(), TagValue::Int64(1))], &ids).await;
        write_tags(AdapterState::Running, true, &group, &[("t2".into(), TagValue::Int64(2))], &ids).await;

        let drained = drain_write_queue(&group, 10).await;
        assert_eq!(drained[0].tag_name, "t1");
        assert_eq!(drained[1].tag_name, "t2");
    }

    #[tokio::test]
    async fn rejects_write_to_non_writable_tag() {
        let mut group = Group::new("g1", Duration::from_millis(500));
        let mut tag = writable_tag("t1", TagType::Int16, 0.0);
        tag.attribute = TagAttrSerde(TagAttribute::READ);
        group.tags.push(tag);
        let ids = RequestIdGen::new();

        let results = write_tags(
            AdapterState::Running,
            true,
            &group,
            &[("t1".into(), TagValue::Int64(5))],
            &ids,
        )
        .await;
        assert_eq!(results, vec![Err(WriteError::NotWritable("t1".into()))]);
    }

    #[tokio::test]
    async fn write_gtags_enqueues_on_first_groups_queue_preserving_order() {
        let mut g1 = Group::new("g1", Duration::from_millis(500));
        g1.tags.push(writable_tag("a", TagType::Int16, 0.0));
        let mut g2 = Group::new("g2", Duration::from_millis(500));
        g2.tags.push(writable_tag("b", TagType::Int16, 0.0));
        let ids = RequestIdGen::new();

        let items_per_group = vec![
            vec![("a".to_string(), TagValue::Int64(1))],
            vec![("b".to_string(), TagValue::Int64(2))],
        ];
        let results = write_gtags(AdapterState::Running, true, &[&g1, &g2], &items_per_group, &ids).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let drained_g1 = drain_write_queue(&g1, 10).await;
        assert_eq!(drained_g1.len(), 2);
        assert_eq!(drained_g1[0].tag_name, "a");
        assert_eq!(drained_g1[1].tag_name, "b");
        assert!(drain_write_queue(&g2, 10).await.is_empty());
    }
}
