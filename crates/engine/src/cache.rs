//! Graph cache — TTL-bounded map of compiled topologies.
//!
//! Keyed on `(workflow_id, fingerprint, trigger_node_id)` where the
//! fingerprint hashes the update timestamps of the workflow, its nodes,
//! and their configs. Builds happen outside the lock; a double compute
//! under a race is acceptable because builds are idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use db::models::WorkflowRow;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::topology::Topology;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Process-wide cache of compiled topologies.
pub struct GraphCache {
    entries: Mutex<HashMap<String, (Instant, Arc<Topology>)>>,
    ttl: Duration,
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl GraphCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Compute the cache key for a workflow: `<workflow_id>:<12-hex>` (plus
    /// the trigger). `node_stamps` pairs each node's `(node_id, updated_at,
    /// config_updated_at)`.
    pub fn cache_key(
        workflow: &WorkflowRow,
        node_stamps: &[(String, DateTime<Utc>, DateTime<Utc>)],
        trigger_node_id: Option<i64>,
    ) -> String {
        let mut parts: Vec<String> = vec![
            workflow.updated_at.to_rfc3339(),
            format!("{trigger_node_id:?}"),
        ];
        for (node_id, node_updated, config_updated) in node_stamps {
            parts.push(format!(
                "{node_id}:{}:{}",
                node_updated.to_rfc3339(),
                config_updated.to_rfc3339()
            ));
        }
        let digest = Sha256::digest(parts.join("|").as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{}:{}", workflow.id, &hex[..12])
    }

    /// Fetch a live entry; expired entries are discarded on the way.
    pub fn get(&self, key: &str) -> Option<Arc<Topology>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((inserted, topology)) if inserted.elapsed() < self.ttl => {
                Some(Arc::clone(topology))
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a freshly built topology, replacing any racing insert.
    pub fn insert(&self, key: String, topology: Arc<Topology>) {
        self.entries.lock().insert(key, (Instant::now(), topology));
    }

    /// Remove all entries for a workflow.
    pub fn invalidate(&self, workflow_id: i64) {
        let prefix = format!("{workflow_id}:");
        self.entries.lock().retain(|k, _| !k.starts_with(&prefix));
    }

    /// Empty the cache.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::workflow_row;

    fn stamps() -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        vec![("a".into(), Utc::now(), Utc::now())]
    }

    #[test]
    fn key_is_stable_and_workflow_prefixed() {
        let workflow = workflow_row(7, "wf");
        let stamps = stamps();
        let k1 = GraphCache::cache_key(&workflow, &stamps, None);
        let k2 = GraphCache::cache_key(&workflow, &stamps, None);
        assert_eq!(k1, k2);
        assert!(k1.starts_with("7:"));
        // 12 hex chars after the prefix.
        assert_eq!(k1.len(), "7:".len() + 12);
    }

    #[test]
    fn key_changes_with_trigger_and_timestamps() {
        let workflow = workflow_row(7, "wf");
        let stamps = stamps();
        let base = GraphCache::cache_key(&workflow, &stamps, None);
        assert_ne!(base, GraphCache::cache_key(&workflow, &stamps, Some(3)));

        let mut newer = workflow_row(7, "wf");
        newer.updated_at = Utc::now() + chrono::Duration::seconds(5);
        assert_ne!(base, GraphCache::cache_key(&newer, &stamps, None));
    }

    #[test]
    fn same_object_identity_within_ttl() {
        let cache = GraphCache::default();
        let topology = Arc::new(Topology::default());
        cache.insert("1:abc".into(), Arc::clone(&topology));

        let first = cache.get("1:abc").unwrap();
        let second = cache.get("1:abc").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &topology));
    }

    #[test]
    fn expired_entries_are_discarded() {
        let cache = GraphCache::new(Duration::from_millis(0));
        cache.insert("1:abc".into(), Arc::new(Topology::default()));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("1:abc").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_is_prefix_scoped() {
        let cache = GraphCache::default();
        cache.insert("1:aaa".into(), Arc::new(Topology::default()));
        cache.insert("1:bbb".into(), Arc::new(Topology::default()));
        cache.insert("12:ccc".into(), Arc::new(Topology::default()));

        cache.invalidate(1);
        assert!(cache.get("1:aaa").is_none());
        assert!(cache.get("1:bbb").is_none());
        assert!(cache.get("12:ccc").is_some(), "workflow 12 must survive");
    }

    #[test]
    fn clear_empties_everything() {
        let cache = GraphCache::default();
        cache.insert("1:aaa".into(), Arc::new(Topology::default()));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
