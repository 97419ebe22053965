//! Bidirectional tag <-> key index backing tag-based invalidation.
//!
//! Grounded on the concurrent-map idiom `cache_manager.rs` uses for its
//! in-flight request map, but the two directions are updated together under
//! a single critical section rather than independently, since the tag index
//! needs the stronger "both maps agree" invariant that a pair of lock-free
//! `DashMap`s can't give us for free.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct TagIndex {
    tag_to_keys: DashMap<String, DashSet<String>>,
    key_to_tags: DashMap<String, DashSet<String>>,
    // Guards cross-map mutation; reads of either map alone stay lock-free.
    write_lock: Mutex<()>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tag set for `key`, wiring up both directions atomically.
    pub fn register(&self, key: &str, tags: &[String]) {
        let _guard = self.write_lock.lock();
        self.unregister_locked(key);
        if tags.is_empty() {
            return;
        }
        let tag_set: DashSet<String> = tags.iter().cloned().collect();
        self.key_to_tags.insert(key.to_string(), tag_set);
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    pub fn unregister(&self, key: &str) {
        let _guard = self.write_lock.lock();
        self.unregister_locked(key);
    }

    fn unregister_locked(&self, key: &str) {
        if let Some((_, tags)) = self.key_to_tags.remove(key) {
            for tag in tags.iter() {
                if let Some(keys) = self.tag_to_keys.get(tag.as_str()) {
                    keys.remove(key);
                }
            }
            self.tag_to_keys.retain(|_, keys| !keys.is_empty());
        }
    }

    /// Resolve every key touched by any of `tags` and drop them from the
    /// index in the same critical section, so a concurrent `register` can't
    /// observe a half-invalidated state.
    pub fn invalidate(&self, tags: &[String]) -> Vec<String> {
        let _guard = self.write_lock.lock();
        let mut keys = std::collections::HashSet::new();
        for tag in tags {
            if let Some(set) = self.tag_to_keys.get(tag) {
                for key in set.iter() {
                    keys.insert(key.clone());
                }
            }
        }
        for key in &keys {
            self.unregister_locked(key);
        }
        keys.into_iter().collect()
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.key_to_tags
            .get(key)
            .map(|s| s.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }
}

pub type SharedTagIndex = Arc<TagIndex>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_invalidate_removes_both_directions() {
        let idx = TagIndex::new();
        idx.register("user:1", &["users".into(), "active".into()]);
        idx.register("user:2", &["users".into()]);

        let mut removed = idx.invalidate(&["users".into()]);
        removed.sort();
        assert_eq!(removed, vec!["user:1".to_string(), "user:2".to_string()]);
        assert!(idx.tags_for("user:1").is_empty());
        assert!(idx.tags_for("user:2").is_empty());
    }

    #[test]
    fn re_registering_a_key_drops_its_old_tags() {
        let idx = TagIndex::new();
        idx.register("k", &["a".into()]);
        idx.register("k", &["b".into()]);
        assert_eq!(idx.tags_for("k"), vec!["b".to_string()]);
        assert!(idx.invalidate(&["a".into()]).is_empty());
        assert_eq!(idx.invalidate(&["b".into()]), vec!["k".to_string()]);
    }
}
