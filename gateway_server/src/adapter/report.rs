//! Reporting fan-out: walks a group's read-enabled
//! tags, pulls each from the cache, applies wire-format promotion,
//! and hands the surviving tags to the subscriber dispatch path.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::tags::tag::{CachePolicy, Group, TagAttribute};
use crate::tags::value::{TagType, TagValue};
use crate::tags::wire::{decimal_compaction, encode16, encode32, encode64};
use crate::tags::{TagCache, TagKey};

/// Cache entries older than `interval * CACHE_EXPIRE_FACTOR` report
/// `VALUE_EXPIRED` rather than a stale value (unless the group's cache
/// policy is `Never`).
pub const CACHE_EXPIRE_FACTOR: u64 = 3;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One entry of a built `TRANS_DATA` report payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedTag {
    pub name: String,
    pub value: TagValue,
}

/// Applies endian byte-swap promotion for scalar 16/32/64-bit values
/// per the tag's configured endianness, a no-op for anything else.
pub(crate) fn apply_endian(_tag_kind: TagType, endian_opt: &crate::tags::value::AddressOption, value: TagValue) -> TagValue {
    use crate::tags::value::AddressOption;
    match endian_opt {
        AddressOption::Endian16(e) => match value {
            TagValue::Word(w) => TagValue::Word(u16::from_le_bytes(encode16(w, *e))),
            TagValue::Uint16(w) => TagValue::Uint16(u16::from_le_bytes(encode16(w, *e))),
            TagValue::Int16(i) => TagValue::Int16(u16::from_le_bytes(encode16(i as u16, *e)) as i16),
            other => other,
        },
        AddressOption::Endian32(e) => match value {
            TagValue::Dword(w) => TagValue::Dword(u32::from_le_bytes(encode32(w, *e))),
            TagValue::Uint32(w) => TagValue::Uint32(u32::from_le_bytes(encode32(w, *e))),
            TagValue::Int32(i) => TagValue::Int32(u32::from_le_bytes(encode32(i as u32, *e)) as i32),
            TagValue::Float(f) => {
                let bits = u32::from_le_bytes(encode32(f.to_bits(), *e));
                TagValue::Float(f32::from_bits(bits))
            }
            other => other,
        },
        AddressOption::Endian64(e) => match value {
            TagValue::Lword(w) => TagValue::Lword(u64::from_le_bytes(encode64(w, *e))),
            TagValue::Uint64(w) => TagValue::Uint64(u64::from_le_bytes(encode64(w, *e))),
            TagValue::Int64(i) => TagValue::Int64(u64::from_le_bytes(encode64(i as u64, *e)) as i64),
            TagValue::Double(d) => {
                let bits = u64::from_le_bytes(encode64(d.to_bits(), *e));
                TagValue::Double(f64::from_bits(bits))
            }
            other => other,
        },
        AddressOption::None
        | AddressOption::StringOpt { .. }
        | AddressOption::BytesOpt { .. }
        | AddressOption::BitOpt { .. } => value,
    }
}

/// Promotes to `DOUBLE = raw * decimal + bias` for numeric source
/// types when either scale factor is non-default. Independently of
/// that, a precision-0, bias-0 `DOUBLE` tag always runs the
/// decimal-compaction pass, even when neither scale factor applies —
/// compaction trims float-representation noise on a native `DOUBLE`
/// read, not just a promoted one.
fn apply_scale_and_compaction(tag: &crate::tags::Tag, raw: TagValue) -> TagValue {
    let needs_compaction = tag.kind == TagType::Double && tag.precision == 0 && tag.bias == 0.0;

    if tag.decimal == 0.0 && tag.bias == 0.0 {
        if !needs_compaction {
            return raw;
        }
        let Some(numeric) = raw.as_f64() else {
            return raw;
        };
        return TagValue::Double(decimal_compaction(numeric));
    }

    let numeric = match raw.as_f64() {
        Some(n) => n,
        None => return raw,
    };
    let decimal = if tag.decimal == 0.0 { 1.0 } else { tag.decimal };
    let scaled = numeric * decimal + tag.bias;
    let scaled = if needs_compaction { decimal_compaction(scaled) } else { scaled };
    TagValue::Double(scaled)
}

/// Builds the reportable tag list for one group: change-detection,
/// staleness, and error-passthrough in one pass. Tags with no
/// survivable value are dropped unless the walk degenerates to
/// `NOT_READY`/`VALUE_EXPIRED`, which are still reported rather than
/// dropped.
pub fn build_report(cache: &TagCache, group: &Group) -> Vec<ReportedTag> {
    let now = now_millis();
    let mut out = Vec::with_capacity(group.tags.len());

    for tag in &group.tags {
        if !tag.attribute().is_readable() {
            continue;
        }
        let key = TagKey::new(&group.name, &tag.name);

        let entry = if tag.attribute().has(TagAttribute::SUBSCRIBE) {
            match cache.meta_get_changed(&key) {
                Some(e) => e,
                None => continue,
            }
        } else {
            match cache.meta_get(&key) {
                Some(e) => e,
                None => {
                    out.push(ReportedTag {
                        name: tag.name.clone(),
                        value: TagValue::not_ready(),
                    });
                    continue;
                }
            }
        };

        let (ts, value, _metas) = entry;
        let age = now.saturating_sub(ts);
        let interval_ms = group.interval.as_millis() as u64;
        if group.cache_policy != CachePolicy::Never && age > interval_ms * CACHE_EXPIRE_FACTOR {
            out.push(ReportedTag {
                name: tag.name.clone(),
                value: TagValue::value_expired(),
            });
            continue;
        }

        if value.is_error() {
            out.push(ReportedTag {
                name: tag.name.clone(),
                value,
            });
            continue;
        }

        let value = apply_endian(tag.kind, &tag.address_option, value);
        let value = apply_scale_and_compaction(tag, value);
        out.push(ReportedTag {
            name: tag.name.clone(),
            value,
        });
    }

    out
}

/// Serialized body sent to each subscriber.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransData {
    pub driver_name: String,
    pub group_name: String,
    pub trace_ctx: Option<String>,
    pub tags: Vec<ReportedTagWire>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportedTagWire {
    pub name: String,
    pub value: TagValue,
}

/// Dispatches one (deep-copied) payload per subscriber under the
/// group's `apps` lock, over a filesystem-path Unix datagram socket
/// named after the subscriber's app. A failed send just drops the
/// clone — no explicit free needed under Rust ownership.
pub async fn dispatch_report(
    driver_name: &str,
    group: &Group,
    payload: &[ReportedTag],
    trace_ctx: Option<String>,
    socket_dir: &std::path::Path,
) {
    if payload.is_empty() {
        return;
    }
    let apps = group.apps.read().await;
    for subscriber in apps.iter() {
        let body = TransData {
            driver_name: driver_name.to_string(),
            group_name: group.name.clone(),
            trace_ctx: trace_ctx.clone(),
            tags: payload
                .iter()
                .map(|t| ReportedTagWire {
                    name: t.name.clone(),
                    value: t.value.clone(),
                })
                .collect(),
        };
        if let Err(e) = send_trans_data(socket_dir, &subscriber.app_name, &body).await {
            warn!(app = %subscriber.app_name, error = %e, "subscriber dispatch failed");
        }
    }
}

/// Subscribers listen on a well-known per-app datagram socket path
/// under the runtime socket directory; `neuron-<app_name>` mirrors the
/// driver-to-app naming convention used elsewhere in the gateway.
pub fn subscriber_socket_path(socket_dir: &std::path::Path, app_name: &str) -> std::path::PathBuf {
    socket_dir.join(format!("neuron-{app_name}.sock"))
}

async fn send_trans_data(socket_dir: &std::path::Path, app_name: &str, body: &TransData) -> std::io::Result<()> {
    use tokio::net::UnixDatagram;

    let socket = UnixDatagram::unbound()?;
    let payload = serde_json::to_vec(body)?;
    let path = subscriber_socket_path(socket_dir, app_name);
    socket.connect(&path)?;
    socket.send(&payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tag::TagAttrSerde;
    use crate::tags::value::AddressOption;
    use crate::tags::Tag;
    use std::time::Duration;

    fn tag(name: &str, kind: TagType, attr: u8) -> Tag {
        Tag {
            name: name.into(),
            address: "x".into(),
            attribute: TagAttrSerde(attr),
            kind,
            precision: 0,
            decimal: 0.0,
            bias: 0.0,
            description: String::new(),
            address_option: AddressOption::None,
            meta: Vec::new(),
            format_tokens: Vec::new(),
        }
    }

    #[test]
    fn missing_cache_entry_reports_not_ready() {
        let cache = TagCache::new(false);
        let mut group = Group::new("g1", Duration::from_millis(500));
        group.tags.push(tag("t1", TagType::Int16, TagAttribute::READ));

        let report = build_report(&cache, &group);
        assert_eq!(report.len(), 1);
        assert!(report[0].value.is_error());
    }

    #[test]
    fn expired_entry_reports_value_expired() {
        let cache = TagCache::new(false);
        let mut group = Group::new("g1", Duration::from_millis(10));
        group.tags.push(tag("t1", TagType::Int16, TagAttribute::READ));
        let key = TagKey::new("g1", "t1");
        cache.update_change(&key, 0, TagValue::Int16(5), crate::tags::cache::empty_metas(), false, 0);

        let report = build_report(&cache, &group);
        assert_eq!(report[0].value, TagValue::value_expired());
    }

    #[test]
    fn native_double_tag_still_gets_decimal_compacted() {
        let cache = TagCache::new(false);
        let mut group = Group::new("g1", Duration::from_secs(3600));
        group.tags.push(tag("t1", TagType::Double, TagAttribute::READ));
        let key = TagKey::new("g1", "t1");
        cache.update_change(&key, now_millis(), TagValue::Double(19.999999997), crate::tags::cache::empty_metas(), false, 0);

        let report = build_report(&cache, &group);
        match report[0].value {
            TagValue::Double(v) => assert!((v - 20.0).abs() < 1e-4),
            ref other => panic!("expected a compacted Double, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_tag_skipped_when_unchanged() {
        let cache = TagCache::new(false);
        let mut group = Group::new("g1", Duration::from_secs(3600));
        group
            .tags
            .push(tag("t1", TagType::Int16, TagAttribute::READ | TagAttribute::SUBSCRIBE));
        let key = TagKey::new("g1", "t1");
        cache.update_change(&key, now_millis(), TagValue::Int16(5), crate::tags::cache::empty_metas(), false, 0);
        cache.meta_get_changed(&key);

        let report = build_report(&cache, &group);
        assert!(report.is_empty());
    }
}
