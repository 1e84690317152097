// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Storage seam for all per-key guard state.
//!
//! Counters, attempt records and lock entries live behind [`KeyValueStore`]
//! so the in-process map can be swapped for a shared store (Redis,
//! Dragonfly) in multi-instance deployments without touching the
//! algorithms. The bundled [`InMemoryStore`] is the single-process default.

use crate::clock::{duration_ms, Clock};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// State of a fixed-window counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Window start (Unix ms)
    pub window_start: u64,
    /// Window end (Unix ms); the counter resets at this instant
    pub reset_at: u64,
}

/// Key/value storage with TTLs and atomic fixed-window counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a live value. Expired values read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Count one hit against a fixed window of length `window`.
    ///
    /// Starts a fresh window (count 0, start now) when the key is absent or
    /// its window has ended, then increments. Must be atomic per key.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Take back one hit from a live window. No-op once the window ended.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Drop values whose TTL elapsed and counters whose window ended more
    /// than `horizon` ago. Returns the number of entries removed.
    async fn sweep(&self, horizon: Duration) -> usize;
}

/// Read a JSON-encoded value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Write a JSON-encoded value with a TTL.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw, ttl).await
}

#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at: u64,
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    window_start: u64,
    count: u64,
    reset_at: u64,
}

/// In-process store. Counters are lost on restart and not shared across
/// instances.
pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    values: RwLock<HashMap<String, ValueEntry>>,
    counters: RwLock<HashMap<String, CounterEntry>>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            values: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an entry exists under `key`, expired or not.
    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key) || self.counters.read().await.contains_key(key)
    }

    /// Total entries held, expired or not.
    pub async fn len(&self) -> usize {
        self.values.read().await.len() + self.counters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut values = self.values.write().await;
        match values.get(key) {
            Some(entry) if now < entry.expires_at => Ok(Some(entry.value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now_ms().saturating_add(duration_ms(ttl));
        self.values
            .write()
            .await
            .insert(key.to_string(), ValueEntry { value, expires_at });
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = self.clock.now_ms();
        let mut counters = self.counters.write().await;
        let entry = counters.entry(key.to_string()).or_insert(CounterEntry {
            window_start: now,
            count: 0,
            reset_at: now.saturating_add(duration_ms(window)),
        });

        if now >= entry.reset_at {
            entry.window_start = now;
            entry.count = 0;
            entry.reset_at = now.saturating_add(duration_ms(window));
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            window_start: entry.window_start,
            reset_at: entry.reset_at,
        })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut counters = self.counters.write().await;
        if let Some(entry) = counters.get_mut(key) {
            if now < entry.reset_at {
                entry.count = entry.count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().await.remove(key);
        self.counters.write().await.remove(key);
        Ok(())
    }

    async fn sweep(&self, horizon: Duration) -> usize {
        let now = self.clock.now_ms();
        let horizon = duration_ms(horizon);
        let mut removed = 0;

        {
            let mut values = self.values.write().await;
            let before = values.len();
            values.retain(|_, entry| now < entry.expires_at);
            removed += before - values.len();
        }

        {
            let mut counters = self.counters.write().await;
            let before = counters.len();
            counters.retain(|_, entry| now < entry.reset_at.saturating_add(horizon));
            removed += before - counters.len();
        }

        debug!(removed, "Swept guard store");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::default());
        (clock.clone(), InMemoryStore::new(clock))
    }

    #[tokio::test]
    async fn test_increment_resets_after_window() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);

        let first = store.increment("k", window).await.unwrap();
        assert_eq!(first.count, 1);
        store.increment("k", window).await.unwrap();
        assert_eq!(store.increment("k", window).await.unwrap().count, 3);

        clock.advance(window);
        let fresh = store.increment("k", window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.window_start, clock.now_ms());
        assert_eq!(fresh.reset_at, first.reset_at + 60_000);
    }

    #[tokio::test]
    async fn test_decrement_saturates_and_ignores_dead_windows() {
        let (clock, store) = store();
        let window = Duration::from_secs(10);

        store.decrement("missing").await.unwrap();
        store.increment("k", window).await.unwrap();
        store.decrement("k").await.unwrap();
        store.decrement("k").await.unwrap();
        assert_eq!(store.increment("k", window).await.unwrap().count, 1);

        clock.advance(window);
        store.decrement("k").await.unwrap();
        assert_eq!(store.increment("k", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_expired_value_reads_absent_and_is_removed() {
        let (clock, store) = store();
        store
            .set("lock", "1".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("1"));

        clock.advance(Duration::from_secs(5));
        assert!(store.get("lock").await.unwrap().is_none());
        assert!(!store.contains("lock").await);
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_horizon() {
        let (clock, store) = store();
        let horizon = Duration::from_secs(24 * 3600);
        store.increment("old", Duration::from_secs(60)).await.unwrap();
        store
            .set("v", "x".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(120));
        // The value's TTL elapsed; the counter is stale but inside the horizon
        assert_eq!(store.sweep(horizon).await, 1);
        assert!(store.contains("old").await);

        clock.advance(horizon);
        assert_eq!(store.sweep(horizon).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (_, store) = store();
        set_json(&store, "j", &vec![1u32, 2, 3], Duration::from_secs(1))
            .await
            .unwrap();
        let back: Option<Vec<u32>> = get_json(&store, "j").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        store
            .set("bad", "not json".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        let corrupt: Result<Option<Vec<u32>>, _> = get_json(&store, "bad").await;
        assert!(matches!(corrupt, Err(StoreError::Corrupt { .. })));
    }
}
