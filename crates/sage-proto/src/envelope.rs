//! The opaque wire envelope every handshake (and, once a session exists,
//! every application message) travels in. `sage-core` signs and verifies
//! these; the transport adapter (C9) only ever sees this shape.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// `USER` or `AGENT` — who this envelope speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Agent,
}

/// The inner content carried by an envelope. Deliberately thin: the
/// transport adapter never interprets it beyond extracting these bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataPart {
    /// UTF-8 text, typically a JSON-encoded handshake payload.
    Text { text: String },
    /// Opaque bytes, base64url-encoded on the wire (e.g. session ciphertext).
    Bytes { data: String },
}

impl DataPart {
    pub fn text(text: impl Into<String>) -> Self {
        DataPart::Text { text: text.into() }
    }

    pub fn bytes(data: &[u8]) -> Self {
        DataPart::Bytes {
            data: URL_SAFE_NO_PAD.encode(data),
        }
    }

    pub fn as_text(&self) -> Result<&str, ProtoError> {
        match self {
            DataPart::Text { text } => Ok(text),
            DataPart::Bytes { .. } => Err(ProtoError::MalformedEnvelope(
                "expected a text data part, found bytes".into(),
            )),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, ProtoError> {
        match self {
            DataPart::Bytes { data } => Ok(URL_SAFE_NO_PAD.decode(data)?),
            DataPart::Text { .. } => Err(ProtoError::MalformedEnvelope(
                "expected a bytes data part, found text".into(),
            )),
        }
    }
}

/// `{ context_id, task_id, role, content, metadata }`, framing-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub context_id: String,
    /// `"handshake/<phase>"`, phase in `0..=3`.
    pub task_id: String,
    pub role: Role,
    pub content: DataPart,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Envelope {
    pub fn task_id_for_phase(phase: u8) -> String {
        format!("handshake/{phase}")
    }

    pub fn phase_from_task_id(&self) -> Result<u8, ProtoError> {
        self.task_id
            .strip_prefix("handshake/")
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|p| *p <= 3)
            .ok_or_else(|| ProtoError::MalformedEnvelope(format!("bad task_id {}", self.task_id)))
    }

    pub fn signature(&self) -> Option<&str> {
        self.metadata.get("signature").map(String::as_str)
    }

    pub fn set_signature(&mut self, sig: &[u8]) {
        self.metadata
            .insert("signature".to_string(), URL_SAFE_NO_PAD.encode(sig));
    }

    /// The deterministic byte encoding that is signed: the canonical JSON of
    /// every field except `metadata`, with stable key ordering and no
    /// unknown fields. `serde_json::json!` sorts object keys alphabetically,
    /// which is what makes this stable across implementations.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let value = serde_json::json!({
            "content": self.content,
            "context_id": self.context_id,
            "message_id": self.message_id,
            "role": self.role,
            "task_id": self.task_id,
        });
        Ok(serde_json::to_vec(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signable_bytes_excludes_metadata() {
        let mut env = Envelope {
            message_id: "m1".into(),
            context_id: "ctx-1".into(),
            task_id: Envelope::task_id_for_phase(0),
            role: Role::Agent,
            content: DataPart::text("{}"),
            metadata: HashMap::new(),
        };
        let before = env.signable_bytes().unwrap();
        env.set_signature(b"fake-signature");
        let after = env.signable_bytes().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn phase_from_task_id_round_trips() {
        let env = Envelope {
            message_id: "m1".into(),
            context_id: "ctx-1".into(),
            task_id: Envelope::task_id_for_phase(2),
            role: Role::User,
            content: DataPart::text("{}"),
            metadata: HashMap::new(),
        };
        assert_eq!(env.phase_from_task_id().unwrap(), 2);
    }

    #[test]
    fn phase_from_task_id_rejects_out_of_range() {
        let env = Envelope {
            message_id: "m1".into(),
            context_id: "ctx-1".into(),
            task_id: "handshake/9".into(),
            role: Role::User,
            content: DataPart::text("{}"),
            metadata: HashMap::new(),
        };
        assert!(env.phase_from_task_id().is_err());
    }
}
