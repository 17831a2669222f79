//! Session manager (C7): owns the live `SecureSession` table, binds
//! transport-visible key ids to session ids, and runs the background GC that
//! evicts expired sessions and their replay-cache shards.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sage_proto::SessionConfig;
use tracing::{debug, trace};

use crate::error::SageError;
use crate::periodic::spawn_periodic;
use crate::replay::NonceCache;
use crate::session::{HandshakeParams, SecureSession};

/// `session_id -> session`, plus the `key_id -> session_id` binding used to
/// route an inbound wire message (keyed by sender key id) to its session.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SecureSession>>>,
    key_bindings: RwLock<HashMap<String, String>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts a freshly-minted session, rejecting a same-id collision
    /// rather than silently overwriting the live session.
    pub fn create(&self, session: SecureSession) -> Result<Arc<SecureSession>, SageError> {
        let session = Arc::new(session);
        match self.sessions.write().entry(session.id().to_string()) {
            Entry::Occupied(_) => Err(SageError::AlreadyExists),
            Entry::Vacant(slot) => {
                debug!(session_id = slot.key().as_str(), "session created");
                slot.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Returns `NotFound` for a missing session, and also evicts and
    /// returns `NotFound` for one that has aged out but hasn't been swept
    /// by the background GC yet.
    pub fn get(&self, session_id: &str) -> Result<Arc<SecureSession>, SageError> {
        let found = self.sessions.read().get(session_id).cloned();
        match found {
            Some(session) if session.is_expired() => {
                trace!(session_id, "evicting expired session on lookup");
                self.delete(session_id);
                Err(SageError::NotFound)
            }
            Some(session) => Ok(session),
            None => Err(SageError::NotFound),
        }
    }

    /// Idempotent: closes and drops the session, and its key binding if any
    /// pointed at it.
    pub fn delete(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().remove(session_id) {
            session.close();
        }
        self.key_bindings
            .write()
            .retain(|_, sid| sid != session_id);
    }

    pub fn close_all(&self) {
        let sessions = self.sessions.read();
        for session in sessions.values() {
            session.close();
        }
    }

    pub fn bind_key_id(&self, key_id: &str, session_id: &str) {
        self.key_bindings
            .write()
            .insert(key_id.to_string(), session_id.to_string());
    }

    pub fn get_by_key_id(&self, key_id: &str) -> Result<Arc<SecureSession>, SageError> {
        let session_id = self
            .key_bindings
            .read()
            .get(key_id)
            .cloned()
            .ok_or(SageError::NotFound)?;
        self.get(&session_id)
    }

    /// Creates a session from an already-known exporter + id, unless a
    /// session with that id is already live (idempotent completion replay).
    /// Double-checked locking: the read-lock fast path skips derivation
    /// entirely for the common repeat-call case, and the write-lock entry
    /// check guarantees exactly one insertion ever wins a race between
    /// concurrent callers deriving the same id. Returns whether the session
    /// already existed, so a caller can tell a fresh mint from a replay.
    pub fn ensure_from_exporter(
        &self,
        exporter: &[u8],
        id: &str,
        initiator: bool,
        config: SessionConfig,
    ) -> Result<(Arc<SecureSession>, bool), SageError> {
        if let Some(existing) = self.sessions.read().get(id) {
            return Ok((Arc::clone(existing), true));
        }
        let session = Arc::new(SecureSession::from_exporter(exporter, id, initiator, config)?);
        match self.sessions.write().entry(id.to_string()) {
            Entry::Occupied(slot) => Ok((Arc::clone(slot.get()), true)),
            Entry::Vacant(slot) => {
                debug!(session_id = id, "session created from exporter");
                slot.insert(Arc::clone(&session));
                Ok((session, false))
            }
        }
    }

    /// Same double-checked-locking shape as [`Self::ensure_from_exporter`],
    /// but the session id isn't known until the shared secret is derived, so
    /// the fast path can't run before that derivation.
    pub fn ensure_from_shared_secret(
        &self,
        shared_secret: &[u8],
        params: HandshakeParams,
        initiator: bool,
        config: SessionConfig,
    ) -> Result<(Arc<SecureSession>, bool), SageError> {
        let session = SecureSession::from_shared_secret(shared_secret, params, initiator, config)?;
        let id = session.id().to_string();
        if let Some(existing) = self.sessions.read().get(&id) {
            return Ok((Arc::clone(existing), true));
        }
        let session = Arc::new(session);
        match self.sessions.write().entry(id) {
            Entry::Occupied(slot) => Ok((Arc::clone(slot.get()), true)),
            Entry::Vacant(slot) => {
                debug!(session_id = slot.key().as_str(), "session created from handshake");
                slot.insert(Arc::clone(&session));
                Ok((session, false))
            }
        }
    }

    /// Evict every session that reports itself expired, forgetting its
    /// replay-cache shard in the same pass so the two stay in lockstep.
    fn collect_garbage(&self, nonce_cache: &NonceCache) {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(id, _)| id.clone())
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "sweeping expired sessions");
        }
        for id in expired {
            nonce_cache.forget(&id);
            self.delete(&id);
        }
    }

    /// Spawn the background GC thread (default interval 30 s).
    pub fn spawn_gc(self: &Arc<Self>, nonce_cache: Arc<NonceCache>, interval: Duration) {
        let this = Arc::clone(self);
        spawn_periodic(interval, move || this.collect_garbage(&nonce_cache));
    }
}

/// Guards a one-shot action behind a flag, used by handshake completion
/// paths that may race to finalize the same context.
pub struct OnceFlag(AtomicBool);

impl Default for OnceFlag {
    fn default() -> Self {
        Self(AtomicBool::new(false))
    }
}

impl OnceFlag {
    pub fn take(&self) -> bool {
        !self.0.swap(true, AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SessionConfig {
        SessionConfig {
            max_age_secs: 0,
            idle_timeout_secs: 0,
            max_messages: 0,
        }
    }

    #[test]
    fn create_get_delete_roundtrip() {
        let manager = SessionManager::new();
        let session = SecureSession::from_exporter(&[0u8; 32], "S1", true, cfg()).unwrap();
        manager.create(session).unwrap();
        assert!(manager.get("S1").is_ok());
        manager.delete("S1");
        assert!(matches!(manager.get("S1"), Err(SageError::NotFound)));
    }

    #[test]
    fn create_rejects_a_same_id_collision() {
        let manager = SessionManager::new();
        let first = SecureSession::from_exporter(&[0u8; 32], "S1", true, cfg()).unwrap();
        let second = SecureSession::from_exporter(&[1u8; 32], "S1", true, cfg()).unwrap();
        manager.create(first).unwrap();
        assert!(matches!(
            manager.create(second),
            Err(SageError::AlreadyExists)
        ));
    }

    #[test]
    fn key_binding_routes_to_session() {
        let manager = SessionManager::new();
        let session = SecureSession::from_exporter(&[0u8; 32], "S1", true, cfg()).unwrap();
        manager.create(session).unwrap();
        manager.bind_key_id("peer-key-1", "S1");
        assert!(manager.get_by_key_id("peer-key-1").is_ok());
        manager.delete("S1");
        assert!(matches!(
            manager.get_by_key_id("peer-key-1"),
            Err(SageError::NotFound)
        ));
    }

    #[test]
    fn ensure_from_exporter_is_idempotent() {
        let manager = SessionManager::new();
        let (a, existed_a) = manager
            .ensure_from_exporter(&[0u8; 32], "S1", true, cfg())
            .unwrap();
        let (b, existed_b) = manager
            .ensure_from_exporter(&[0u8; 32], "S1", true, cfg())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!existed_a);
        assert!(existed_b);
    }

    #[test]
    fn get_evicts_an_expired_session_lazily() {
        let manager = SessionManager::new();
        let session = SecureSession::from_exporter(
            &[0u8; 32],
            "S1",
            true,
            SessionConfig {
                max_age_secs: 0,
                idle_timeout_secs: 0,
                max_messages: 1,
            },
        )
        .unwrap();
        manager.create(session).unwrap();
        manager.get("S1").unwrap().encrypt(b"one").unwrap();
        assert!(matches!(manager.get("S1"), Err(SageError::NotFound)));
    }

    #[test]
    fn garbage_collection_evicts_expired_sessions() {
        let manager = SessionManager::new();
        let session = SecureSession::from_exporter(
            &[0u8; 32],
            "S1",
            true,
            SessionConfig {
                max_age_secs: 0,
                idle_timeout_secs: 0,
                max_messages: 1,
            },
        )
        .unwrap();
        manager.create(session).unwrap();
        let s = manager.get("S1").unwrap();
        s.encrypt(b"one").unwrap();
        let nonce_cache = Arc::new(NonceCache::new(Duration::from_secs(60)));
        manager.collect_garbage(&nonce_cache);
        assert!(matches!(manager.get("S1"), Err(SageError::NotFound)));
    }

    #[test]
    fn once_flag_fires_exactly_once() {
        let flag = OnceFlag::default();
        assert!(flag.take());
        assert!(!flag.take());
    }
}
