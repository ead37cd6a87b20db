//! Caching layer for gateway state that must survive between requests
//!
//! Provides LRU caching for:
//! - Faucet claims (claimant address -> time of last successful claim)
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Generic, thread-safe LRU cache wrapper using RwLock.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<RwLock<LruCache<K, V>>>,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with specified capacity. Zero is mapped to one.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity_nz))),
            _phantom: PhantomData,
        }
    }

    /// Get a value without promoting it.
    pub async fn get<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        let cache = self.cache.read().await;
        cache.peek(key).cloned()
    }

    pub async fn put(&self, key: K, value: V) {
        self.cache.write().await.put(key, value);
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            _phantom: PhantomData,
        }
    }
}

/// Ledger of faucet claims keyed by bech32 claimant address.
pub type ClaimLedger = ThreadSafeCache<String, DateTime<Utc>>;

impl ClaimLedger {
    pub const DEFAULT_CAPACITY: usize = 50_000;

    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }

    /// Seconds left before `address` may claim again, or `None` if it may claim now.
    pub async fn remaining_cooldown(
        &self,
        address: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let last = self.get(address).await?;
        let ready_at = last + cooldown;
        if now >= ready_at {
            return None;
        }
        let remaining = (ready_at - now).num_seconds().max(1);
        Some(remaining as u64)
    }

    pub async fn record_claim(&self, address: String, at: DateTime<Utc>) {
        self.put(address, at).await;
    }
}

impl Default for ClaimLedger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
