//! sage-crypto — cryptographic primitives and key identity for SAGE
//!
//! # Design principles
//! - No custom crypto; all primitives come from audited Rust crates.
//! - Secret key material is zeroized on drop.
//! - Concrete key types are a closed enumeration, not open polymorphism.
//!
//! # Module layout
//! - `primitives` — signing, ECDH, HKDF-Extract/Expand, AEAD, HMAC, secure random
//! - `keys`       — the `KeyPair`/`PublicKey` enumerations (Ed25519, secp256k1, X25519)
//! - `identity`   — raw/JWK/PEM (de)serialization and fingerprint derivation
//! - `error`      — unified error type

pub mod error;
pub mod identity;
pub mod keys;
pub mod primitives;

pub use error::CryptoError;
pub use keys::{KeyKind, KeyPair, PublicKey, SignatureForm};
