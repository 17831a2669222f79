use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown handshake phase: {0}")]
    UnknownPhase(u8),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
