//! Configuration options recognized by the core. Plain, `Default`-able
//! structs — loading them from a file or environment is a CLI-shell
//! concern, not something this crate does.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 0 disables the bound.
    pub max_age_secs: u64,
    /// 0 disables the bound.
    pub idle_timeout_secs: u64,
    /// 0 disables the bound.
    pub max_messages: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            idle_timeout_secs: 600,
            max_messages: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub timestamp_tolerance_secs: u64,
    pub nonce_ttl_secs: u64,
    pub duplicate_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: 300,
            nonce_ttl_secs: 600,
            duplicate_ttl_secs: 600,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    pub pending_ttl_secs: u64,
    pub label: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 60,
            label: "a2a/handshake v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignAlgorithm {
    Ed25519,
    Secp256k1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    File,
    OsKeystore,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub default_sign_algorithm: SignAlgorithm,
    pub storage: StorageBackend,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            default_sign_algorithm: SignAlgorithm::Ed25519,
            storage: StorageBackend::Memory,
        }
    }
}
