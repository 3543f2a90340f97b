//! TTL cache for synced resources

use crate::integrations::{Resource, ResourceQuery};
use crate::metrics;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays readable after it was written
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    resource: Resource,
    stored_at: Instant,
}

/// In-memory resource cache keyed by (resource type, id)
///
/// Expired entries are dropped lazily on read or by [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct ResourceCache {
    entries: DashMap<(String, String), CacheEntry>,
    config: CacheConfig,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Insert or replace a resource
    pub fn put(&self, resource: Resource) {
        let key = (resource.resource_type.clone(), resource.id.clone());
        self.entries.insert(
            key,
            CacheEntry {
                resource,
                stored_at: Instant::now(),
            },
        );
    }

    /// Look up a live entry
    pub fn get(&self, resource_type: &str, id: &str) -> Option<Resource> {
        let key = (resource_type.to_string(), id.to_string());

        let found = self
            .entries
            .get(&key)
            .map(|e| (e.resource.clone(), self.is_expired(&e)));

        match found {
            Some((resource, false)) => {
                metrics::record_cache_hit();
                Some(resource)
            }
            Some((_, true)) => {
                self.entries.remove(&key);
                metrics::record_cache_miss();
                tracing::debug!(resource_type, id, "Cache entry expired");
                None
            }
            None => {
                metrics::record_cache_miss();
                None
            }
        }
    }

    /// Live entries of a type matching `query`, ordered by id
    pub fn list(&self, resource_type: &str, query: &ResourceQuery) -> Vec<Resource> {
        let mut matches: Vec<Resource> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == resource_type && !self.is_expired(e.value()))
            .map(|e| e.value().resource.clone())
            .filter(|r| query.matches(r))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        matches.into_iter().skip(offset).take(limit).collect()
    }

    /// Remove one entry; returns whether it was present
    pub fn invalidate(&self, resource_type: &str, id: &str) -> bool {
        self.entries
            .remove(&(resource_type.to_string(), id.to_string()))
            .is_some()
    }

    /// Remove every entry of a type; returns how many were removed
    pub fn clear_type(&self, resource_type: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(kind, _), _| kind != resource_type);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.config.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let expired = self
            .entries
            .iter()
            .filter(|e| self.is_expired(e.value()))
            .count();
        CacheStats {
            entries: self.entries.len(),
            expired,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.stored_at.elapsed() > self.config.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(id: &str, owner: &str) -> Resource {
        Resource::new("file", id, json!({ "owner": owner }))
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = ResourceCache::default();
        assert_eq!(cache.ttl(), Duration::from_secs(300));
        assert!(cache.get("file", "1").is_none());

        cache.put(file("1", "me"));
        cache.put(Resource::new("folder", "1", json!({})));
        assert_eq!(cache.get("file", "1").unwrap().data["owner"], "me");
        assert_eq!(cache.len(), 2);

        assert!(cache.invalidate("file", "1"));
        assert!(!cache.invalidate("file", "1"));
        assert!(cache.get("file", "1").is_none());
        assert!(cache.get("folder", "1").is_some());
    }

    #[test]
    fn test_list_filters_and_pages() {
        let cache = ResourceCache::default();
        for (id, owner) in [("c", "me"), ("a", "me"), ("b", "you"), ("d", "me")] {
            cache.put(file(id, owner));
        }

        let mine = cache.list("file", &ResourceQuery::default().with_filter("owner", "me"));
        let ids: Vec<&str> = mine.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);

        let page = cache.list("file", &ResourceQuery::default().with_offset(1).with_limit(2));
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        assert!(cache.list("folder", &ResourceQuery::default()).is_empty());
    }

    #[test]
    fn test_clear_type() {
        let cache = ResourceCache::default();
        cache.put(file("1", "me"));
        cache.put(file("2", "me"));
        cache.put(Resource::new("folder", "1", json!({})));

        assert_eq!(cache.clear_type("file"), 2);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResourceCache::new(CacheConfig {
            ttl: Duration::from_secs(10),
        });
        cache.put(file("1", "me"));
        cache.put(file("2", "me"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get("file", "1").is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.stats(), CacheStats { entries: 2, expired: 2 });
        assert!(cache.get("file", "1").is_none());
        assert!(cache.list("file", &ResourceQuery::default()).is_empty());

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
