//! The concurrent tag value cache. A single coarse mutex guards the
//! whole `(group,tag) -> element` map; sharding per group for
//! scalability is a documented option, not built, so the single-mutex
//! contract stays easy to reason about and test.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::tag::TagKey;
use super::value::{TagType, TagValue};

pub const META_SLOTS: usize = 8;
pub type Metas = [Option<TagValue>; META_SLOTS];

pub fn empty_metas() -> Metas {
    Default::default()
}

/// Exclusively owned by the cache; current + previous value (to
/// support change detection under error filtering), timestamp, change
/// flag, and a fixed-size array of meta entries.
#[derive(Debug, Clone)]
pub struct CacheElement {
    pub value: TagValue,
    pub value_old: TagValue,
    pub timestamp: u64,
    pub changed: bool,
    pub metas: Metas,
}

impl CacheElement {
    fn fresh() -> Self {
        CacheElement {
            value: TagValue::not_ready(),
            value_old: TagValue::not_ready(),
            timestamp: 0,
            changed: false,
            metas: empty_metas(),
        }
    }
}

pub struct TagCache {
    inner: Mutex<HashMap<TagKey, CacheElement>>,
    /// Per-group opaque trace handle slot (C8 hands this in as
    /// `Arc<Mutex<TraceContext>>`; the cache itself only stores and
    /// returns the handle, never inspects it).
    traces: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    /// Read-only for the cache's lifetime — passed at construction,
    /// never mutated at runtime.
    sub_filter_err: bool,
}

impl TagCache {
    pub fn new(sub_filter_err: bool) -> Self {
        TagCache {
            inner: Mutex::new(HashMap::new()),
            traces: Mutex::new(HashMap::new()),
            sub_filter_err,
        }
    }

    pub fn sub_filter_err(&self) -> bool {
        self.sub_filter_err
    }

    /// Insert if missing with zero timestamp and `changed=false`; a
    /// no-op if the key is already present (the source's `add` is
    /// idempotent, it does not overwrite an existing element).
    pub fn add(&self, key: TagKey, value: TagValue) {
        let mut map = self.inner.lock().unwrap();
        map.entry(key).or_insert_with(|| CacheElement {
            value,
            value_old: TagValue::not_ready(),
            timestamp: 0,
            changed: false,
            metas: empty_metas(),
        });
    }

    pub fn del(&self, key: &TagKey) {
        self.inner.lock().unwrap().remove(key);
    }

    /// The multi-step change-detection algorithm: compares the
    /// incoming value and metadata against the stored entry and
    /// decides whether this update counts as a change. Returns
    /// whether this update was flagged as a change.
    pub fn update_change(
        &self,
        key: &TagKey,
        ts: u64,
        new: TagValue,
        metas: Metas,
        force_change: bool,
        precision: u8,
    ) -> bool {
        let mut map = self.inner.lock().unwrap();
        let elem = map.entry(key.clone()).or_insert_with(CacheElement::fresh);
        let mut changed = false;

        let new_is_error = new.is_error();
        let skip_compare = self.sub_filter_err && new_is_error;

        if !skip_compare {
            let old_type = elem.value.tag_type();
            let new_type = new.tag_type();

            if old_type != new_type && (!self.sub_filter_err || old_type != TagType::Error) {
                changed = true;
            } else {
                let compare_against = if self.sub_filter_err && old_type == TagType::Error {
                    &elem.value_old
                } else {
                    &elem.value
                };
                if !compare_against.equal_for_change_detection(&new, precision) {
                    changed = true;
                }
            }
        }

        if self.sub_filter_err && !new_is_error {
            elem.value_old = new.clone();
        }

        if force_change {
            changed = true;
        }

        elem.value = new;
        elem.timestamp = ts;
        elem.changed = changed;
        elem.metas = metas;

        changed
    }

    /// Deep-copies the current value and metas to the caller
    /// regardless of the change flag.
    pub fn meta_get(&self, key: &TagKey) -> Option<(u64, TagValue, Metas)> {
        let map = self.inner.lock().unwrap();
        map.get(key)
            .map(|e| (e.timestamp, e.value.clone(), e.metas.clone()))
    }

    /// Same as [`meta_get`](Self::meta_get) but only returns `Some`
    /// when `changed == true`; clears the flag afterward unless the
    /// current value is `ERROR` (an error condition stays "changed"
    /// until a non-error value clears it, so a restart report still
    /// sees it).
    pub fn meta_get_changed(&self, key: &TagKey) -> Option<(u64, TagValue, Metas)> {
        let mut map = self.inner.lock().unwrap();
        let elem = map.get_mut(key)?;
        if !elem.changed {
            return None;
        }
        let snapshot = (elem.timestamp, elem.value.clone(), elem.metas.clone());
        if !elem.value.is_error() {
            elem.changed = false;
        }
        Some(snapshot)
    }

    pub fn update_trace(&self, group: &str, ctx: Arc<dyn Any + Send + Sync>) {
        self.traces.lock().unwrap().insert(group.to_string(), ctx);
    }

    pub fn get_trace(&self, group: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.traces.lock().unwrap().get(group).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TagKey {
        TagKey::new("g1", "t1")
    }

    /// Testable property #1: cache monotonicity.
    #[test]
    fn update_then_get_round_trips() {
        let cache = TagCache::new(false);
        let k = key();
        cache.update_change(&k, 42, TagValue::Int16(5), empty_metas(), false, 0);
        let (ts, v, _) = cache.meta_get(&k).unwrap();
        assert_eq!(ts, 42);
        matches!(v, TagValue::Int16(5));
    }

    /// Scenario S1: two SUBSCRIBE tags, second update only flags the
    /// tag whose value actually changed.
    #[test]
    fn scenario_s1_only_changed_tag_flags_changed() {
        let cache = TagCache::new(false);
        let t1 = TagKey::new("g1", "t1");
        let t2 = TagKey::new("g1", "t2");

        cache.update_change(&t1, 0, TagValue::Int16(5), empty_metas(), false, 0);
        cache.update_change(&t2, 0, TagValue::Int16(7), empty_metas(), false, 0);
        assert!(cache.meta_get_changed(&t1).is_some());
        assert!(cache.meta_get_changed(&t2).is_some());

        cache.update_change(&t1, 1000, TagValue::Int16(5), empty_metas(), false, 0);
        cache.update_change(&t2, 1000, TagValue::Int16(8), empty_metas(), false, 0);
        assert!(cache.meta_get_changed(&t1).is_none());
        let (_, v2, _) = cache.meta_get_changed(&t2).unwrap();
        matches!(v2, TagValue::Int16(8));
    }

    #[test]
    fn float_within_tolerance_not_reported_changed() {
        let cache = TagCache::new(false);
        let k = key();
        cache.update_change(&k, 0, TagValue::Double(1.0), empty_metas(), false, 2);
        cache.meta_get_changed(&k);
        let changed = cache.update_change(&k, 1, TagValue::Double(1.001), empty_metas(), false, 2);
        assert!(!changed);
    }

    #[test]
    fn force_change_overrides_identical_value() {
        let cache = TagCache::new(false);
        let k = key();
        cache.update_change(&k, 0, TagValue::Int16(5), empty_metas(), false, 0);
        cache.meta_get_changed(&k);
        let changed = cache.update_change(&k, 1, TagValue::Int16(5), empty_metas(), true, 0);
        assert!(changed);
    }

    /// Testable property #2: change gating under error filtering —
    /// transition into ERROR never flags changed, but the value
    /// compares against the last non-error value once it clears.
    #[test]
    fn filtering_suppresses_error_transitions_and_compares_against_last_good() {
        let cache = TagCache::new(true);
        let k = key();

        cache.update_change(&k, 0, TagValue::Int16(10), empty_metas(), false, 0);
        cache.meta_get_changed(&k);

        let changed_on_error = cache.update_change(&k, 1, TagValue::Error(-2), empty_metas(), false, 0);
        assert!(!changed_on_error, "entering ERROR must not be flagged changed when filtering");

        // Recovering to the same value as before the error should not
        // be flagged as changed either, since it compares to value_old.
        let changed_on_recovery =
            cache.update_change(&k, 2, TagValue::Int16(10), empty_metas(), false, 0);
        assert!(!changed_on_recovery);

        let changed_on_new_value =
            cache.update_change(&k, 3, TagValue::Int16(11), empty_metas(), false, 0);
        assert!(changed_on_new_value);
    }

    #[test]
    fn meta_get_changed_clears_flag_except_for_error() {
        let cache = TagCache::new(false);
        let k = key();
        cache.update_change(&k, 0, TagValue::Error(-1), empty_metas(), false, 0);
        assert!(cache.meta_get_changed(&k).is_some());
        // Still ERROR, so the flag must not have been cleared.
        assert!(cache.meta_get_changed(&k).is_some());
    }

    #[test]
    fn meta_get_returns_none_for_missing_key() {
        let cache = TagCache::new(false);
        assert!(cache.meta_get(&key()).is_none());
    }

    #[test]
    fn del_removes_entry() {
        let cache = TagCache::new(false);
        let k = key();
        cache.add(k.clone(), TagValue::Bool(true));
        assert_eq!(cache.len(), 1);
        cache.del(&k);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn trace_slot_round_trips_per_group() {
        let cache = TagCache::new(false);
        let handle: Arc<dyn Any + Send + Sync> = Arc::new(1234u64);
        cache.update_trace("g1", handle.clone());
        let got = cache.get_trace("g1").unwrap();
        assert_eq!(*got.downcast_ref::<u64>().unwrap(), 1234u64);
        assert!(cache.get_trace("g2").is_none());
    }
}
