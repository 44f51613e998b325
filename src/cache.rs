use std::time::Duration;

use anyhow::{Context, Result};
use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn cart_key(user_id: i32) -> String {
    format!("cart:{user_id}")
}

pub fn address_key(user_id: i32) -> String {
    format!("address:{user_id}")
}

pub fn product_key(slug: &str) -> String {
    format!("product:{slug}")
}

/// Process-wide snapshot cache: string keys mapped to serialized JSON
/// payloads, bounded by the configured TTL.
///
/// Every mutating handler overwrites its resource entry with the
/// post-mutation snapshot before responding (write-through); entries are
/// never explicitly invalidated, expiry is the TTL's job.
#[derive(Clone)]
pub struct SnapshotCache {
    entries: Cache<String, String>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).await
    }

    pub async fn put_raw(&self, key: String, payload: String) {
        self.entries.insert(key, payload).await;
    }

    /// Read-through lookup. An entry that no longer decodes as `T` counts
    /// as a miss and sits until the next write-through overwrites it.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.entries.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Serializes `value` once, stores the snapshot, and returns the exact
    /// string that was cached so callers can respond with the same bytes.
    pub async fn put_json<T: Serialize>(&self, key: String, value: &T) -> Result<String> {
        let payload =
            serde_json::to_string(value).context("Failed to serialize cache snapshot")?;
        self.entries.insert(key, payload.clone()).await;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        id: i32,
        name: String,
    }

    fn snapshot(id: i32) -> Snapshot {
        Snapshot {
            id,
            name: format!("item-{id}"),
        }
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 16);
        cache
            .put_json("cart:1".to_string(), &vec![snapshot(1), snapshot(2)])
            .await
            .unwrap();

        let hit: Vec<Snapshot> = cache.get_json("cart:1").await.unwrap();
        assert_eq!(hit, vec![snapshot(1), snapshot(2)]);
        assert!(cache.get_json::<Vec<Snapshot>>("cart:2").await.is_none());
    }

    #[tokio::test]
    async fn put_json_returns_the_cached_bytes() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 16);
        let payload = cache
            .put_json("product:widget".to_string(), &snapshot(7))
            .await
            .unwrap();

        assert_eq!(cache.get_raw("product:widget").await.unwrap(), payload);
        assert_eq!(payload, serde_json::to_string(&snapshot(7)).unwrap());
    }

    #[tokio::test]
    async fn write_through_overwrites_previous_snapshot() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 16);
        cache
            .put_json("cart:1".to_string(), &vec![snapshot(1)])
            .await
            .unwrap();
        cache
            .put_json("cart:1".to_string(), &vec![snapshot(1), snapshot(9)])
            .await
            .unwrap();

        let hit: Vec<Snapshot> = cache.get_json("cart:1").await.unwrap();
        assert_eq!(hit.len(), 2);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = SnapshotCache::new(Duration::from_millis(50), 16);
        cache
            .put_json("cart:1".to_string(), &snapshot(1))
            .await
            .unwrap();
        assert!(cache.get_json::<Snapshot>("cart:1").await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get_json::<Snapshot>("cart:1").await.is_none());
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 16);
        cache
            .put_raw("cart:1".to_string(), "not json".to_string())
            .await;
        assert!(cache.get_json::<Snapshot>("cart:1").await.is_none());
    }
}
