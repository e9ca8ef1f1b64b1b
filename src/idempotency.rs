// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idempotency guard for mutating endpoints.
//!
//! A key is derived from the ordered request parts; the first successful
//! response is cached against it, and retries within the window replay that
//! exact response instead of re-executing the mutation.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

/// Derive an idempotency key from ordered request parts.
///
/// Parts are length-prefixed before hashing so `["ab", "c"]` and
/// `["a", "bc"]` produce different keys, and a `None` part hashes
/// differently from `Some("")`.
pub fn make_key(parts: &[Option<&str>]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        match part {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}

/// A captured response, replayed byte-for-byte on retry.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

struct CacheEntry {
    response: StoredResponse,
    inserted_at: Instant,
}

/// In-process LRU + TTL cache of responses keyed by idempotency key.
pub struct IdempotencyCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
            ttl,
        }
    }

    /// Look up a previously stored response; expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<StoredResponse> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.response.clone());
            }
            cache.pop(key);
        }
        None
    }

    /// Record the response for a key.
    pub fn put(&self, key: &str, status: u16, body: Vec<u8>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key.to_string(),
                CacheEntry {
                    response: StoredResponse { status, body },
                    inserted_at: Instant::now(),
                },
            );
        }
    }
}
