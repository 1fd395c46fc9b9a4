//! Bounded TTL+LRU caches for read paths.
//!
//! Negative results (entity known to be absent) are cached so repeated
//! misses stay cheap; `Unavailable` outcomes are never inserted, so a
//! transient directory outage recovers as soon as the store does.
//! Read-through caches never authorize writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue<V: Clone> {
    Hit(V),
    /// The lookup completed and found nothing.
    NegativeHit,
}

struct Entry<V: Clone> {
    value: CacheValue<V>,
    expires_at: Instant,
    last_used: u64,
}

struct Inner<V: Clone> {
    map: HashMap<String, Entry<V>>,
    tick: u64,
}

pub struct TtlLruCache<V: Clone> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.size, Duration::from_secs(config.expiry))
    }

    /// A stale entry is a miss and is dropped on the way out.
    pub fn get(&self, key: &str) -> Option<CacheValue<V>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let expired = match inner.map.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.last_used = tick;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.map.remove(key);
        }
        None
    }

    pub fn put(&self, key: impl Into<String>, value: CacheValue<V>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        let key = key.into();
        if !inner.map.contains_key(&key) && inner.map.len() >= self.capacity {
            // Evict the least-recently-used entry.
            if let Some(lru) = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                inner.map.remove(&lru);
            }
        }
        inner.map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
                last_used: tick,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().unwrap().map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One cache per read scope. Account-shaped lookups (accounts, operator
/// status, machine/server facts) share the `account_cache` tuning;
/// entity reads share `probe_cache`. The event window is fixed.
pub struct MasterCaches {
    pub account_by_login: TtlLruCache<crate::accounts::Account>,
    pub operator_status: TtlLruCache<bool>,
    pub machine_info: TtlLruCache<crate::mapi::MachineInfo>,
    pub server_exists: TtlLruCache<bool>,
    pub contact_get: TtlLruCache<amon_common::Contact>,
    pub contact_list: TtlLruCache<Vec<amon_common::Contact>>,
    pub monitor_get: TtlLruCache<amon_common::Monitor>,
    pub monitor_list: TtlLruCache<Vec<amon_common::Monitor>>,
    pub probe_get: TtlLruCache<amon_common::Probe>,
    pub probe_list: TtlLruCache<Vec<amon_common::Probe>>,
    /// Event uuids already dispatched (the ingest de-duplication window).
    pub event_seen: TtlLruCache<()>,
}

const EVENT_WINDOW_SIZE: usize = 1024;
const EVENT_WINDOW_SECS: u64 = 300;

impl MasterCaches {
    pub fn new(account: &CacheConfig, probe: &CacheConfig) -> Self {
        Self {
            account_by_login: TtlLruCache::from_config(account),
            operator_status: TtlLruCache::from_config(account),
            machine_info: TtlLruCache::from_config(account),
            server_exists: TtlLruCache::from_config(account),
            contact_get: TtlLruCache::from_config(probe),
            contact_list: TtlLruCache::from_config(probe),
            monitor_get: TtlLruCache::from_config(probe),
            monitor_list: TtlLruCache::from_config(probe),
            probe_get: TtlLruCache::from_config(probe),
            probe_list: TtlLruCache::from_config(probe),
            event_seen: TtlLruCache::new(
                EVENT_WINDOW_SIZE,
                Duration::from_secs(EVENT_WINDOW_SECS),
            ),
        }
    }
}

impl Default for MasterCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default(), &CacheConfig::default())
    }
}
