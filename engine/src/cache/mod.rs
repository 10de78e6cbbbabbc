//! Response cache
//!
//! An expiring key/value map used to memoize answers. Expiry is lazy: a
//! read past an entry's deadline deletes it, and `set` sweeps every expired
//! entry once the map grows past a threshold. There is no background timer
//! and no LRU eviction.
//!
//! # Capacity
//!
//! Growth between sweeps is bounded only by the number of distinct keys
//! written within one TTL. That is acceptable for one chat deployment where
//! keys are user questions; it is not a general-purpose bounded cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default entry count above which `set` sweeps
pub const DEFAULT_SWEEP_THRESHOLD: usize = 100;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe TTL map
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    sweep_threshold: usize,
}

/// Cache of final replies keyed by [`fingerprint`]
pub type ResponseCache = TtlCache<String>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_sweep_threshold(ttl, DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(ttl: Duration, sweep_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            sweep_threshold,
        }
    }

    /// Value for `key` if present and not expired
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if Instant::now() <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` with a fresh TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );

        if entries.len() > self.sweep_threshold {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, entry| now <= entry.expires_at);
            debug!("Cache sweep removed {} expired entries", before - entries.len());
        }
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Cache key for a query and its optional reply context
///
/// The query is trimmed with inner whitespace collapsed. When a reply
/// context is present its first `context_chars` characters are appended
/// after a `|`.
pub fn fingerprint(query: &str, reply_context: Option<&str>, context_chars: usize) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    match reply_context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => {
            let prefix: String = context.chars().take(context_chars).collect();
            format!("{}|{}", normalized, prefix)
        }
        None => normalized,
    }
}
