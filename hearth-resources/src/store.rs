use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cache key: resource segment, owning family, optional discriminator
/// (e.g. the month of a budget query).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    resource: String,
    family_id: Uuid,
    discriminator: Option<String>,
}

impl QueryKey {
    pub fn new(resource: &str, family_id: Uuid) -> Self {
        Self {
            resource: resource.to_string(),
            family_id,
            discriminator: None,
        }
    }

    pub fn with(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }
}

struct CachedEntry {
    stored_at: Instant,
    value: serde_json::Value,
}

/// TTL'd read-through cache for resource queries. Entries are stored as
/// JSON so one cache serves every resource type; invalidation removes
/// every discriminated entry under a `(resource, family)` segment.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<RwLock<HashMap<QueryKey, CachedEntry>>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let map = self.inner.read().await;
        let entry = map.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    pub async fn put<T: Serialize>(&self, key: QueryKey, value: &T) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        self.inner.write().await.insert(
            key,
            CachedEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Drop every entry under `(resource, family_id)`, whatever its
    /// discriminator.
    pub async fn invalidate(&self, resource: &str, family_id: Uuid) {
        let mut map = self.inner.write().await;
        map.retain(|key, _| !(key.resource == resource && key.family_id == family_id));
    }

    pub async fn invalidate_many(&self, resources: &[&str], family_id: Uuid) {
        let mut map = self.inner.write().await;
        map.retain(|key, _| {
            !(key.family_id == family_id && resources.contains(&key.resource.as_str()))
        });
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
