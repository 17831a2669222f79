use thiserror::Error;

use sage_crypto::CryptoError;
use sage_proto::ProtoError;

/// The unified error taxonomy surfaced by the SAGE core. Any error aborts
/// the phase/operation in progress for its context/session; the core never
/// retries cryptographic operations.
#[derive(Debug, Error)]
pub enum SageError {
    // ── Protocol ──────────────────────────────────────────────────────
    #[error("unknown handshake phase")]
    UnknownPhase,
    #[error("duplicate context id: {0}")]
    DuplicateContext(String),
    #[error("message arrived out of phase for context {0}")]
    OutOfPhase(String),

    // ── Authentication ────────────────────────────────────────────────
    #[error("signature verification failed")]
    BadSignature,
    #[error("peer ECDH contribution is invalid")]
    BadPeerKey,
    #[error("unknown DID: {0}")]
    UnknownDid(String),

    // ── Crypto ────────────────────────────────────────────────────────
    #[error("AEAD authentication failed")]
    AeadAuth,
    #[error("ciphertext truncated")]
    Truncated,
    #[error("unsupported key type or format: {0}")]
    UnsupportedKey(String),
    #[error("cryptographically secure RNG failed")]
    RngFailure,

    // ── Replay & ordering ─────────────────────────────────────────────
    #[error("replayed nonce")]
    Replay,
    #[error("duplicate message")]
    Duplicate,
    #[error("sequence did not strictly advance")]
    OutOfOrderSeq,
    #[error("timestamp did not strictly advance")]
    OutOfOrderTime,
    #[error("timestamp is zero")]
    EmptyTimestamp,
    #[error("timestamp outside the tolerated clock skew")]
    ClockSkew,

    // ── Lifecycle ─────────────────────────────────────────────────────
    #[error("session expired")]
    SessionExpired,
    #[error("session closed")]
    SessionClosed,
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,

    // ── Transport (opaque pass-through) ──────────────────────────────
    #[error("transport error: {0}")]
    TransportError(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SageError {
    /// `true` for error kinds that must transition an in-flight handshake
    /// to `FAILED` (spec §4.7's failure policy: any verification failure).
    pub fn is_handshake_fatal(&self) -> bool {
        matches!(
            self,
            SageError::BadSignature
                | SageError::BadPeerKey
                | SageError::UnknownDid(_)
                | SageError::AeadAuth
                | SageError::Truncated
                | SageError::UnknownPhase
                | SageError::OutOfPhase(_)
                | SageError::ClockSkew
                | SageError::DuplicateContext(_)
                | SageError::Crypto(_)
        )
    }
}
