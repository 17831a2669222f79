//! Replay caches (C3): a TTL-bounded set of used nonces keyed by
//! `(key_id, nonce)`, and a TTL-bounded set of seen message fingerprints.
//!
//! Both caches shard by key-id so one chatty peer's submap can't starve
//! insertion latency for anyone else's, matching the per-entry-lock
//! discipline the rest of the core uses (C4's per-session lock, C7's
//! per-entry session lock).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Shard {
    entries: HashMap<Vec<u8>, Instant>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

/// `(key_id, nonce) -> expiry`. See spec §4.3.
pub struct NonceCache {
    ttl: Duration,
    shards: RwLock<HashMap<String, Shard>>,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            shards: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `true` iff `(key_id, nonce)` was already recorded and has not
    /// expired; otherwise records it with a fresh expiry and returns `false`.
    pub fn seen_or_record(&self, key_id: &str, nonce: &[u8]) -> bool {
        let now = Instant::now();
        let mut shards = self.shards.write();
        let shard = shards
            .entry(key_id.to_string())
            .or_insert_with(Shard::new);
        if let Some(expiry) = shard.entries.get(nonce) {
            if *expiry > now {
                return true;
            }
        }
        shard.entries.insert(nonce.to_vec(), now + self.ttl);
        false
    }

    /// Drop every entry for `key_id` (session close / key unbind).
    pub fn forget(&self, key_id: &str) {
        self.shards.write().remove(key_id);
    }

    /// Expire every record whose TTL has elapsed. Called by the background
    /// sweeper (default interval 60 s).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut shards = self.shards.write();
        shards.retain(|_, shard| {
            shard.entries.retain(|_, expiry| *expiry > now);
            !shard.entries.is_empty()
        });
    }
}

/// `message_fingerprint -> expiry`, used by the validator to reject
/// duplicate inbound messages within a TTL window. Fingerprints are opaque
/// byte strings computed by the caller (typically
/// `H(nonce || sequence || timestamp || id_material)`).
pub struct FingerprintCache {
    ttl: Duration,
    entries: RwLock<HashMap<Vec<u8>, Instant>>,
}

impl FingerprintCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn seen_or_record(&self, fingerprint: &[u8]) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(expiry) = entries.get(fingerprint) {
            if *expiry > now {
                return true;
            }
        }
        entries.insert(fingerprint.to_vec(), now + self.ttl);
        false
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, expiry| *expiry > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_cache_rejects_replay_within_ttl() {
        let cache = NonceCache::new(Duration::from_millis(100));
        assert!(!cache.seen_or_record("K", b"N1"));
        assert!(cache.seen_or_record("K", b"N1"));
    }

    #[test]
    fn nonce_cache_accepts_again_after_ttl_and_sweep() {
        let cache = NonceCache::new(Duration::from_millis(100));
        assert!(!cache.seen_or_record("K", b"N1"));
        std::thread::sleep(Duration::from_millis(120));
        cache.sweep();
        assert!(!cache.seen_or_record("K", b"N1"));
    }

    #[test]
    fn nonce_cache_shards_are_independent_per_key_id() {
        let cache = NonceCache::new(Duration::from_secs(60));
        assert!(!cache.seen_or_record("K1", b"N1"));
        assert!(!cache.seen_or_record("K2", b"N1"));
    }

    #[test]
    fn forget_drops_the_whole_shard() {
        let cache = NonceCache::new(Duration::from_secs(60));
        cache.seen_or_record("K", b"N1");
        cache.forget("K");
        assert!(!cache.seen_or_record("K", b"N1"));
    }

    #[test]
    fn fingerprint_cache_deduplicates() {
        let cache = FingerprintCache::new(Duration::from_secs(60));
        let fp = b"fingerprint-bytes";
        assert!(!cache.seen_or_record(fp));
        assert!(cache.seen_or_record(fp));
    }
}
