use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("peer ECDH contribution is invalid")]
    BadPeerKey,

    #[error("AEAD authentication failed — ciphertext or associated data was tampered with")]
    AeadAuth,

    #[error("ciphertext shorter than the nonce prefix")]
    Truncated,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unsupported key type or format: {0}")]
    UnsupportedKey(String),

    #[error("cryptographically secure RNG failed")]
    RngFailure,

    #[error("conversion across curves is not supported")]
    CrossCurveConversion,

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("PEM decode error: {0}")]
    PemDecode(#[from] pem::PemError),
}
