//! Plaintext payloads carried inside a handshake envelope's `content`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub context_id: String,
    /// Negotiation hint only — the authoritative session id is derived
    /// independently once the handshake completes.
    pub session_id: String,
    pub did: String,
    pub sequence: u64,
    pub nonce: String,
    pub timestamp: i64,
}

/// Plaintext of a `Request`/`Response` payload, before it is encrypted
/// under the peer's long-term key and wire-wrapped as an [`EncryptedPacket`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub context_id: String,
    pub session_id: String,
    /// 32 raw X25519 public bytes.
    pub ephemeral_pub_raw: Vec<u8>,
    pub did: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub context_id: String,
    pub session_id: String,
    pub ephemeral_pub_raw: Vec<u8>,
    pub did: String,
    pub ack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complete {
    pub context_id: String,
    pub session_id: String,
    pub did: String,
    pub sequence: u64,
    pub nonce: String,
    pub timestamp: i64,
}

/// Wire shape of an encrypted `Request`/`Response`. `bootstrap_ephemeral_pub`
/// is the sender's one-shot X25519 key used only to ECDH toward the
/// recipient's long-term key for this packet; it is unrelated to the session
/// ephemeral carried inside the encrypted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPacket {
    pub bootstrap_ephemeral_pub: Vec<u8>,
    pub packet: String,
}
