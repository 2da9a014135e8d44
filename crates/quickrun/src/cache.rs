//! Content-addressed result cache
//!
//! Results are keyed by a hash of the source text. Entries expire lazily: an
//! entry older than the TTL is treated as absent when read and dropped then,
//! there is no background sweep. When the table is full the entry with the
//! oldest `last_accessed` time is evicted.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::types::CompilationResult;

/// Number of digest bytes kept in a content hash
pub const HASH_PREFIX_BYTES: usize = 16;

/// Hash of `source` used as the cache key: the first 16 bytes of its SHA-256
/// digest as lowercase hex
pub fn content_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..HASH_PREFIX_BYTES])
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entry hash {entry} does not match key {key}")]
    HashMismatch { key: String, entry: String },
}

/// A cached result with bookkeeping for expiry and eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: CompilationResult,

    pub hash: String,

    /// When the entry was created; expiry is measured from here
    pub timestamp: DateTime<Utc>,

    pub access_count: u64,

    pub last_accessed: DateTime<Utc>,

    /// Approximate size in bytes (captured stdout + stderr)
    pub size: u64,
}

impl CacheEntry {
    pub fn new(hash: impl Into<String>, result: CompilationResult) -> Self {
        let now = Utc::now();
        let size = (result.content.len() + result.error_output.len()) as u64;
        Self {
            result,
            hash: hash.into(),
            timestamp: now,
            access_count: 1,
            last_accessed: now,
            size,
        }
    }

    /// Whether the entry is older than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(Utc::now(), ttl)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(self.timestamp).to_std() {
            Ok(age) => age > ttl,
            // Created in the future (clock moved backwards)
            Err(_) => false,
        }
    }

    /// Record a read
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// Store of compilation results keyed by content hash
pub trait Cache: Send + Sync + fmt::Debug {
    /// Look up a live entry, recording the access
    ///
    /// Returns a copy; the stored entry is never handed out.
    fn get(&self, hash: &str) -> Option<CacheEntry>;

    /// Insert or replace an entry, evicting the least recently accessed one
    /// when the table is full
    fn set(&self, hash: &str, entry: CacheEntry) -> Result<(), CacheError>;

    fn delete(&self, hash: &str) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn size(&self) -> usize;

    /// Apply a new capacity and TTL
    fn reconfigure(&self, _capacity: usize, _ttl: Duration) {}
}

#[derive(Debug, Clone, Copy)]
struct CachePolicy {
    capacity: usize,
    ttl: Duration,
}

/// In-memory [`Cache`] guarded by a read-write lock
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    policy: RwLock<CachePolicy>,
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy: RwLock::new(CachePolicy {
                capacity: capacity.max(1),
                ttl,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.policy.read().capacity
    }

    pub fn ttl(&self) -> Duration {
        self.policy.read().ttl
    }

    /// Drop `hash` if it is still expired
    fn remove_expired(&self, hash: &str, ttl: Duration) {
        let mut entries = self.entries.write();
        if entries.get(hash).is_some_and(|entry| entry.is_expired(ttl)) {
            entries.remove(hash);
            debug!(hash, "dropped expired cache entry");
        }
    }
}

/// Remove the entry with the oldest `last_accessed` time
fn evict_least_recent(entries: &mut HashMap<String, CacheEntry>) -> Option<String> {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| (entry.last_accessed, entry.timestamp))
        .map(|(key, _)| key.clone())?;
    entries.remove(&oldest);
    Some(oldest)
}

impl Cache for MemoryCache {
    fn get(&self, hash: &str) -> Option<CacheEntry> {
        let ttl = self.ttl();

        let expired = {
            let entries = self.entries.read();
            entries.get(hash)?.is_expired(ttl)
        };
        if expired {
            self.remove_expired(hash, ttl);
            return None;
        }

        let mut entries = self.entries.write();
        let entry = entries.get_mut(hash)?;
        entry.touch();
        Some(entry.clone())
    }

    fn set(&self, hash: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if entry.hash != hash {
            return Err(CacheError::HashMismatch {
                key: hash.to_string(),
                entry: entry.hash,
            });
        }

        let capacity = self.capacity();
        let mut entries = self.entries.write();
        if !entries.contains_key(hash) {
            while entries.len() >= capacity {
                match evict_least_recent(&mut entries) {
                    Some(evicted) => debug!(hash = %evicted, "evicted cache entry"),
                    None => break,
                }
            }
        }
        entries.insert(hash.to_string(), entry);
        Ok(())
    }

    fn delete(&self, hash: &str) -> Result<(), CacheError> {
        self.entries.write().remove(hash);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }

    fn size(&self) -> usize {
        self.entries.read().len()
    }

    fn reconfigure(&self, capacity: usize, ttl: Duration) {
        *self.policy.write() = CachePolicy {
            capacity: capacity.max(1),
            ttl,
        };
    }
}
