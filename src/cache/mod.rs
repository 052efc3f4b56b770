//! CacheManager: namespaced TTL cache shared by the classifier and context collector.
//!
//! Layout is `<root>/<namespace>/cache.db`. The cache never fails its caller:
//! a store that cannot be opened or queried is logged once at warn level and
//! the namespace runs uncached.

pub mod kv;

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::id::now_ms;
pub use kv::KvStore;

/// Namespace for classification results.
pub const ERRORS: &str = "errors";

/// Namespace for context fragments.
pub const CONTEXT: &str = "context";

const STORE_FILE: &str = "cache.db";

/// Receives hit/miss notifications, e.g. the metrics handle of the active run.
pub trait CacheObserver: Send + Sync {
    fn on_hit(&self, namespace: &str);
    fn on_miss(&self, namespace: &str);
}

/// Per-namespace counters since the manager was constructed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

enum Slot {
    Open(KvStore),
    Unavailable,
}

/// Constructed once and shared (via `Arc`) by every component that caches.
pub struct CacheManager {
    root: Option<PathBuf>,
    stores: Mutex<HashMap<String, Slot>>,
    stats: Mutex<HashMap<String, CacheStats>>,
    observer: Mutex<Option<Arc<dyn CacheObserver>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn valid_namespace(ns: &str) -> bool {
    !ns.is_empty() && ns.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl CacheManager {
    /// Cache rooted at `root`. Stores are opened lazily on first use.
    pub fn open(root: &Path) -> Self {
        Self {
            root: Some(root.to_path_buf()),
            stores: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        }
    }

    /// A cache that always misses and never writes.
    pub fn disabled() -> Self {
        Self {
            root: None,
            stores: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Install (or clear) the hit/miss observer.
    pub fn set_observer(&self, observer: Option<Arc<dyn CacheObserver>>) {
        *lock(&self.observer) = observer;
    }

    /// Look up a live entry.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let value = self.with_store(namespace, |store| store.get(key, now_ms())).flatten();

        {
            let mut stats = lock(&self.stats);
            let entry = stats.entry(namespace.to_string()).or_default();
            if value.is_some() {
                entry.hits += 1;
            } else {
                entry.misses += 1;
            }
        }

        if let Some(observer) = lock(&self.observer).clone() {
            if value.is_some() {
                observer.on_hit(namespace);
            } else {
                observer.on_miss(namespace);
            }
        }

        value
    }

    /// Store `value` under `key` for `ttl`.
    pub fn put(&self, namespace: &str, key: &str, value: &[u8], ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        if self
            .with_store(namespace, |store| store.put(key, value, now_ms(), ttl_ms))
            .is_some()
        {
            lock(&self.stats).entry(namespace.to_string()).or_default().writes += 1;
        }
    }

    /// Remove expired entries from every namespace on disk.
    pub fn cleanup(&self) -> usize {
        let Some(root) = self.root.as_ref() else {
            return 0;
        };

        let mut namespaces: Vec<String> = match fs::read_dir(root) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().join(STORE_FILE).exists())
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .collect(),
            Err(e) => {
                log::debug!("Cache root {} not readable: {}", root.display(), e);
                Vec::new()
            }
        };
        namespaces.sort();

        let mut removed = 0;
        for ns in namespaces {
            if let Some(n) = self.with_store(&ns, |store| store.purge_expired(now_ms())) {
                if n > 0 {
                    log::info!("Removed {} expired entries from cache namespace '{}'", n, ns);
                }
                removed += n;
            }
        }
        removed
    }

    pub fn stats(&self, namespace: &str) -> CacheStats {
        lock(&self.stats).get(namespace).copied().unwrap_or_default()
    }

    /// Snapshot of all namespace counters.
    pub fn all_stats(&self) -> HashMap<String, CacheStats> {
        lock(&self.stats).clone()
    }

    /// Run `f` against the namespace store, opening it on first use.
    /// Any failure is logged and reported as `None`.
    fn with_store<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(&KvStore) -> crate::error::Result<T>,
    ) -> Option<T> {
        let root = self.root.as_ref()?;

        let mut stores = lock(&self.stores);
        let slot = stores.entry(namespace.to_string()).or_insert_with(|| {
            if !valid_namespace(namespace) {
                log::warn!("Invalid cache namespace '{}', running uncached", namespace);
                return Slot::Unavailable;
            }
            let path = root.join(namespace).join(STORE_FILE);
            match KvStore::open(&path) {
                Ok(store) => {
                    log::debug!("Opened cache store {}", path.display());
                    Slot::Open(store)
                }
                Err(e) => {
                    log::warn!(
                        "Cache store {} unavailable, running uncached: {}",
                        path.display(),
                        e
                    );
                    Slot::Unavailable
                }
            }
        });

        let Slot::Open(store) = slot else {
            return None;
        };

        match f(store) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Cache operation on '{}' failed: {}", namespace, e);
                drop(stores);
                lock(&self.stats).entry(namespace.to_string()).or_default().errors += 1;
                None
            }
        }
    }
}
