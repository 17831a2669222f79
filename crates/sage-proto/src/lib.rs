//! sage-proto — wire envelope, plaintext handshake payloads, and core
//! configuration types for SAGE.
//!
//! Module layout:
//! - `envelope` — the framing-agnostic `Envelope`/`DataPart`/`Role` wire shape
//! - `payloads` — Invitation/Request/Response/Complete plaintext payloads
//! - `config`   — `SessionConfig`/`ValidatorConfig`/`HandshakeConfig`/`CryptoConfig`
//! - `error`    — unified error type

pub mod config;
pub mod envelope;
pub mod error;
pub mod payloads;

pub use config::{CryptoConfig, HandshakeConfig, SessionConfig, SignAlgorithm, StorageBackend, ValidatorConfig};
pub use envelope::{DataPart, Envelope, Role};
pub use error::ProtoError;
pub use payloads::{Complete, EncryptedPacket, Invitation, Request, Response};
