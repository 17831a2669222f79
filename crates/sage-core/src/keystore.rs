//! Key storage and DID resolution seams. The core depends only on these
//! traits; any persistence or directory lookup lives behind them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sage_crypto::{KeyPair, PublicKey};

use crate::error::SageError;

/// Where local key material lives. `sage-proto::StorageBackend` names the
/// backend kind; this trait is the access pattern every backend implements.
/// Keys are handed out behind `Arc` so holding one never requires cloning
/// secret bytes out of the store.
pub trait KeyStore: Send + Sync {
    fn get(&self, key_id: &str) -> Result<Arc<KeyPair>, SageError>;
    fn put(&self, key_id: &str, pair: KeyPair) -> Result<(), SageError>;
    fn list(&self) -> Vec<String>;
}

/// In-process key store. The reference implementation used by tests and by
/// any deployment that accepts losing keys on restart.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Arc<KeyPair>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key_id: &str) -> Result<Arc<KeyPair>, SageError> {
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or(SageError::NotFound)
    }

    fn put(&self, key_id: &str, pair: KeyPair) -> Result<(), SageError> {
        self.keys.write().insert(key_id.to_string(), Arc::new(pair));
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.keys.read().keys().cloned().collect()
    }
}

/// Resolves a peer DID to its long-term authentication public key. A real
/// deployment backs this with a DID method resolver; tests back it with a
/// static map.
pub trait DidResolver: Send + Sync {
    fn resolve_long_term_pub(&self, did: &str) -> Result<PublicKey, SageError>;
}

#[derive(Default)]
pub struct StaticDidResolver {
    entries: RwLock<HashMap<String, PublicKey>>,
}

impl StaticDidResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, did: impl Into<String>, key: PublicKey) {
        self.entries.write().insert(did.into(), key);
    }
}

impl DidResolver for StaticDidResolver {
    fn resolve_long_term_pub(&self, did: &str) -> Result<PublicKey, SageError> {
        self.entries
            .read()
            .get(did)
            .cloned()
            .ok_or_else(|| SageError::UnknownDid(did.to_string()))
    }
}
