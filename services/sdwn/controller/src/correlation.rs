//! Correlation cache for synchronous-over-asynchronous node queries.
//!
//! The controller fires a CONFIG read into the network and the reply comes
//! back whenever the node and the route allow. Replies are parked here,
//! keyed by `(net, node, property, index)`, with a short lifetime enforced
//! by a background sweep task; the query helper polls the cache after its
//! fixed timeout. A reply arriving after that timeout but before the sweep
//! is silently lost with its entry; that loss is deliberate and documented.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant};
use tracing::debug;

use sdwn_wire::{ConfigProperty, NodeAddress};

/// Correlation key of one outstanding query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Network the node lives in
    pub net: u8,
    /// Queried node
    pub addr: NodeAddress,
    /// Queried property
    pub property: ConfigProperty,
    /// Sub-index for indexed properties (rules, aliases)
    pub index: Option<u8>,
}

#[derive(Debug, Clone)]
struct CachedReply {
    value: Vec<u8>,
    stored_at: Instant,
}

/// Expiring reply store shared by the dispatch task and the query helpers.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Arc<DashMap<QueryKey, CachedReply>>,
    sweep_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache whose entries live for `ttl`, swept every
    /// `sweep_interval`.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let entries: Arc<DashMap<QueryKey, CachedReply>> = Arc::new(DashMap::new());
        let sweep_handle = Arc::new(RwLock::new(None));

        let cache = ResponseCache {
            entries: Arc::clone(&entries),
            sweep_handle: Arc::clone(&sweep_handle),
            ttl,
        };

        let handle = tokio::spawn(async move {
            let mut tick = interval(sweep_interval);
            loop {
                tick.tick().await;

                let before = entries.len();
                entries.retain(|_, reply| reply.stored_at.elapsed() <= ttl);
                let dropped = before - entries.len();
                if dropped > 0 {
                    debug!(dropped, "expired cached replies");
                }
            }
        });
        if let Ok(mut guard) = cache.sweep_handle.try_write() {
            *guard = Some(handle);
        }

        cache
    }

    /// Park a reply under its key, replacing any stale one
    pub fn insert(&self, key: QueryKey, value: Vec<u8>) {
        self.entries.insert(
            key,
            CachedReply {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Take the reply for `key`, if one arrived and is still fresh
    pub fn take(&self, key: &QueryKey) -> Option<Vec<u8>> {
        let (_, reply) = self.entries.remove(key)?;
        if reply.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(reply.value)
    }

    /// Number of parked replies
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reply is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweep_handle.try_write() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(addr: u16) -> QueryKey {
        QueryKey {
            net: 1,
            addr: NodeAddress::new(addr),
            property: ConfigProperty::BeaconPeriod,
            index: None,
        }
    }

    #[tokio::test]
    async fn test_insert_take() {
        let cache = ResponseCache::new(Duration::from_secs(5), Duration::from_secs(1));
        cache.insert(key(2), vec![0, 10]);

        assert_eq!(cache.take(&key(2)), Some(vec![0, 10]));
        // taking consumes the entry
        assert_eq!(cache.take(&key(2)), None);
    }

    #[tokio::test]
    async fn test_keys_are_distinct() {
        let cache = ResponseCache::new(Duration::from_secs(5), Duration::from_secs(1));
        cache.insert(key(2), vec![1]);
        cache.insert(
            QueryKey {
                index: Some(3),
                ..key(2)
            },
            vec![2],
        );

        assert_eq!(cache.take(&key(2)), Some(vec![1]));
        assert_eq!(
            cache.take(&QueryKey {
                index: Some(3),
                ..key(2)
            }),
            Some(vec![2])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_entries() {
        let cache = ResponseCache::new(Duration::from_millis(50), Duration::from_millis(20));
        cache.insert(key(2), vec![1]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.take(&key(2)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_refuses_stale_entry_before_sweep() {
        // a reply older than the ttl is dead even if the sweep has not
        // caught it yet
        let cache = ResponseCache::new(Duration::from_millis(50), Duration::from_secs(3600));
        cache.insert(key(2), vec![1]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.take(&key(2)), None);
    }
}
