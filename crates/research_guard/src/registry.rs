//! Sharded, bounded registry of per-key admission state.
//!
//! Each shard is an LRU cache behind its own mutex, so callers working on
//! different keys rarely contend. A caller's whole read-modify-write runs in
//! one closure while the shard lock is held.

use lru::LruCache;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::{GuardError, Result};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    touched: Instant,
}

type Shard<V> = LruCache<String, Slot<V>>;

/// Keyed state with per-shard locking, LRU capacity and lazy idle expiry.
#[derive(Debug)]
pub struct Registry<V> {
    name: &'static str,
    shards: Vec<Mutex<Shard<V>>>,
    hasher: RandomState,
    idle_ttl: Option<Duration>,
}

impl<V> Registry<V> {
    pub fn new(name: &'static str, config: &RegistryConfig) -> Self {
        let shard_count = config.shards.clamp(1, config.capacity.max(1));
        let per_shard = config.capacity.div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();

        Self {
            name,
            shards,
            hasher: RandomState::new(),
            idle_ttl: config.idle_ttl(),
        }
    }

    fn lock_shard(&self, key: &str) -> Result<MutexGuard<'_, Shard<V>>> {
        let idx = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        self.shards[idx]
            .lock()
            .map_err(|_| GuardError::poisoned(self.name))
    }

    fn is_expired(&self, slot: &Slot<V>, now: Instant) -> bool {
        match self.idle_ttl {
            Some(ttl) => now.saturating_duration_since(slot.touched) >= ttl,
            None => false,
        }
    }

    /// Drop idle entries from the cold end of the shard.
    fn expire_idle(&self, shard: &mut Shard<V>, now: Instant) {
        let mut expired = 0usize;
        while let Some((_, slot)) = shard.peek_lru() {
            if !self.is_expired(slot, now) {
                break;
            }
            shard.pop_lru();
            expired += 1;
        }
        if expired > 0 {
            debug!(registry = self.name, expired, "Expired idle entries");
        }
    }

    /// Run `f` on the entry for `key`, creating it with `create` if absent.
    ///
    /// The shard lock is held for the duration of `f`.
    pub fn with_entry<R>(
        &self,
        key: &str,
        now: Instant,
        create: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> Result<R> {
        let mut shard = self.lock_shard(key)?;
        self.expire_idle(&mut shard, now);

        if !shard.contains(key) {
            let slot = Slot {
                value: create(),
                touched: now,
            };
            if let Some((evicted, _)) = shard.push(key.to_string(), slot) {
                info!(
                    registry = self.name,
                    evicted = %evicted,
                    "Registry at capacity, evicted least recently used entry"
                );
            }
        }

        let slot = shard
            .get_mut(key)
            .ok_or_else(|| GuardError::Internal(format!("{} entry vanished", self.name)))?;
        slot.touched = now;
        Ok(f(&mut slot.value))
    }

    /// Read the entry for `key` without creating it or refreshing recency.
    pub fn peek<R>(&self, key: &str, now: Instant, f: impl FnOnce(&V) -> R) -> Result<Option<R>> {
        let shard = self.lock_shard(key)?;
        Ok(shard
            .peek(key)
            .filter(|slot| !self.is_expired(slot, now))
            .map(|slot| f(&slot.value)))
    }

    /// Remove the entry for `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut shard = self.lock_shard(key)?;
        Ok(shard.pop(key).is_some())
    }

    /// Number of live entries across all shards. Idle entries that have not
    /// been pruned yet are not counted, matching what `peek` shows.
    pub fn len(&self, now: Instant) -> Result<usize> {
        let mut total = 0;
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| GuardError::poisoned(self.name))?;
            total += shard
                .iter()
                .filter(|(_, slot)| !self.is_expired(slot, now))
                .count();
        }
        Ok(total)
    }

    pub fn is_empty(&self, now: Instant) -> Result<bool> {
        Ok(self.len(now)? == 0)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
