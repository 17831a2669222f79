//! Handshake state machine (C8): four-phase mutual authentication and
//! ephemeral key agreement, driven identically in shape for both roles but
//! with different message sequences (spec §4.7).
//!
//! Implementation note: the spec leaves open whether Invitation and Request
//! are dispatched independently or back-to-back by the initiator (§4.7 only
//! says Request follows Invitation with no intervening receive). This
//! implementation exposes them as two separate calls (`initiate`,
//! `send_request`) so a host can choose to pipeline them or wait for a
//! transport ack in between; nothing in the state machine requires either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::VerifyingKey;
use sage_crypto::keys::KeyKind;
use sage_crypto::primitives;
use sage_crypto::{KeyPair, PublicKey};
use sage_proto::{Complete, DataPart, EncryptedPacket, Envelope, HandshakeConfig, Invitation, Request, Response, Role, SessionConfig};
use tracing::{debug, warn};

use crate::error::SageError;
use crate::keystore::DidResolver;
use crate::manager::SessionManager;
use crate::ordering::next_sequence;
use crate::periodic::spawn_periodic;
use crate::session::{HandshakeParams, SecureSession};

fn map_crypto(e: sage_crypto::CryptoError) -> SageError {
    use sage_crypto::CryptoError as CE;
    match e {
        CE::AeadAuth => SageError::AeadAuth,
        CE::Truncated => SageError::Truncated,
        CE::BadSignature => SageError::BadSignature,
        CE::BadPeerKey => SageError::BadPeerKey,
        CE::UnsupportedKey(s) => SageError::UnsupportedKey(s),
        CE::RngFailure => SageError::RngFailure,
        other => SageError::Crypto(other),
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn random_nonce() -> Result<String, SageError> {
    let bytes = primitives::random(16).map_err(map_crypto)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Birational map from an Ed25519 public key to its X25519 equivalent, used
/// only for the handshake's bootstrap encryption step.
fn ed25519_pub_to_x25519(vk: &VerifyingKey) -> Result<[u8; 32], SageError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY(*vk.as_bytes());
    let point = compressed.decompress().ok_or_else(|| {
        SageError::UnsupportedKey("Ed25519 point does not decompress for X25519 conversion".into())
    })?;
    Ok(point.to_montgomery().to_bytes())
}

/// The matching conversion for the secret half: clamp
/// `SHA-512(seed)[0..32]` the way X25519 secret scalars are clamped.
fn ed25519_seed_to_x25519_secret(seed: &[u8; 32]) -> x25519_dalek::StaticSecret {
    use sha2::{Digest, Sha512};
    let digest = Sha512::digest(seed);
    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&digest[..32]);
    x25519_dalek::StaticSecret::from(scalar_bytes)
}

/// ECDH-then-HKDF-then-AEAD toward `recipient_long_term_pub`, carrying the
/// one-shot encrypter ephemeral alongside the ciphertext so the recipient
/// can reconstruct the same shared secret with only its long-term key.
fn bootstrap_encrypt(
    recipient_long_term_pub: &PublicKey,
    plaintext: &[u8],
) -> Result<EncryptedPacket, SageError> {
    let recipient_x25519_pub = match recipient_long_term_pub {
        PublicKey::Ed25519(vk) => ed25519_pub_to_x25519(vk)?,
        _ => {
            return Err(SageError::UnsupportedKey(
                "bootstrap encryption requires an Ed25519 recipient identity".into(),
            ))
        }
    };
    let ephemeral = KeyPair::generate(KeyKind::X25519).map_err(map_crypto)?;
    let ephemeral_pub_bytes = match ephemeral.public() {
        PublicKey::X25519(p) => *p.as_bytes(),
        _ => unreachable!("generate(X25519) always returns an X25519Pair"),
    };
    let shared = primitives::ecdh(&ephemeral, &recipient_x25519_pub).map_err(map_crypto)?;
    let prk = primitives::hkdf_extract(&shared, b"sage/bootstrap/v1");
    let mut key = [0u8; 32];
    primitives::hkdf_expand(&prk, b"bootstrap|enc|v1", &mut key).map_err(map_crypto)?;
    let ct = primitives::aead_seal(&key, &[], plaintext).map_err(map_crypto)?;
    Ok(EncryptedPacket {
        bootstrap_ephemeral_pub: ephemeral_pub_bytes.to_vec(),
        packet: URL_SAFE_NO_PAD.encode(ct),
    })
}

/// Inverse of [`bootstrap_encrypt`]: the recipient derives the same shared
/// secret from its own long-term Ed25519 identity and the carried ephemeral.
fn bootstrap_decrypt(
    self_identity: &KeyPair,
    packet: &EncryptedPacket,
) -> Result<Vec<u8>, SageError> {
    let seed = self_identity.ed25519_seed().map_err(map_crypto)?;
    let secret = ed25519_seed_to_x25519_secret(&seed);
    let public = x25519_dalek::PublicKey::from(&secret);
    let pair = KeyPair::X25519Pair { secret, public };
    if packet.bootstrap_ephemeral_pub.len() != 32 {
        return Err(SageError::BadPeerKey);
    }
    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(&packet.bootstrap_ephemeral_pub);
    let shared = primitives::ecdh(&pair, &ephemeral_pub).map_err(map_crypto)?;
    let prk = primitives::hkdf_extract(&shared, b"sage/bootstrap/v1");
    let mut key = [0u8; 32];
    primitives::hkdf_expand(&prk, b"bootstrap|enc|v1", &mut key).map_err(map_crypto)?;
    let ct = URL_SAFE_NO_PAD
        .decode(&packet.packet)
        .map_err(|_| SageError::Truncated)?;
    primitives::aead_open(&key, &[], &ct).map_err(map_crypto)
}

fn sign_envelope(identity: &KeyPair, mut envelope: Envelope) -> Result<Envelope, SageError> {
    let bytes = envelope.signable_bytes()?;
    let sig = primitives::sign(identity, &bytes).map_err(map_crypto)?;
    envelope.set_signature(&sig);
    Ok(envelope)
}

fn verify_envelope(peer_pub: &PublicKey, envelope: &Envelope) -> Result<(), SageError> {
    let sig_b64 = envelope.signature().ok_or(SageError::BadSignature)?;
    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SageError::BadSignature)?;
    let bytes = envelope.signable_bytes()?;
    primitives::verify(peer_pub, &bytes, &sig).map_err(|_| SageError::BadSignature)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inv,
    Req,
}

struct PendingContext {
    role: HandshakeRole,
    phase: Phase,
    peer_did: String,
    peer_long_term_pub: PublicKey,
    self_ephemeral: Option<KeyPair>,
    peer_ephemeral_pub: Option<[u8; 32]>,
    shared: Option<[u8; 32]>,
    expires_at: Instant,
}

/// Drives both roles of the four-phase handshake. One instance per local
/// identity; a single instance can run many concurrent contexts.
pub struct HandshakeMachine {
    self_did: String,
    self_identity: Arc<KeyPair>,
    resolver: Arc<dyn DidResolver>,
    manager: Arc<SessionManager>,
    config: HandshakeConfig,
    session_config: SessionConfig,
    pending: parking_lot::RwLock<HashMap<String, parking_lot::Mutex<PendingContext>>>,
}

impl HandshakeMachine {
    pub fn new(
        self_did: impl Into<String>,
        self_identity: Arc<KeyPair>,
        resolver: Arc<dyn DidResolver>,
        manager: Arc<SessionManager>,
        config: HandshakeConfig,
        session_config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_did: self_did.into(),
            self_identity,
            resolver,
            manager,
            config,
            session_config,
            pending: parking_lot::RwLock::new(HashMap::new()),
        })
    }

    fn build_envelope(&self, context_id: &str, phase: u8, payload: &impl serde::Serialize) -> Result<Envelope, SageError> {
        let text = serde_json::to_string(payload)?;
        Ok(Envelope {
            message_id: new_message_id(),
            context_id: context_id.to_string(),
            task_id: Envelope::task_id_for_phase(phase),
            role: Role::Agent,
            content: DataPart::text(text),
            metadata: HashMap::new(),
        })
    }

    /// `on_collision` lets the caller distinguish a genuine local conflict
    /// (the initiator re-using a context id it already owns) from a
    /// wire-level retransmit of a message for a context that's already
    /// active, which spec §4.7 requires to be dropped with `Replay` rather
    /// than treated as a fresh protocol violation.
    fn insert_pending(
        &self,
        context_id: &str,
        ctx: PendingContext,
        on_collision: SageError,
    ) -> Result<(), SageError> {
        let mut pending = self.pending.write();
        if pending.contains_key(context_id) {
            return Err(on_collision);
        }
        pending.insert(context_id.to_string(), parking_lot::Mutex::new(ctx));
        Ok(())
    }

    /// Forgets a pending context. Only called for errors `is_handshake_fatal`
    /// classifies as a verification failure — a duplicate/replay on an
    /// otherwise-active context must leave its staged state intact so the
    /// legitimate retry can still complete.
    fn fail(&self, context_id: &str) {
        debug!(context_id, "handshake context failed, forgetting state");
        self.pending.write().remove(context_id);
    }

    /// Step 1 for the initiator: send a signed `Invitation`.
    pub fn initiate(&self, context_id: &str, peer_did: &str) -> Result<Envelope, SageError> {
        let peer_long_term_pub = self
            .resolver
            .resolve_long_term_pub(peer_did)
            .map_err(|_| SageError::UnknownDid(peer_did.to_string()))?;
        self.insert_pending(
            context_id,
            PendingContext {
                role: HandshakeRole::Initiator,
                phase: Phase::Inv,
                peer_did: peer_did.to_string(),
                peer_long_term_pub,
                self_ephemeral: None,
                peer_ephemeral_pub: None,
                shared: None,
                expires_at: Instant::now() + Duration::from_secs(self.config.pending_ttl_secs),
            },
            SageError::DuplicateContext(context_id.to_string()),
        )?;

        let payload = Invitation {
            context_id: context_id.to_string(),
            session_id: context_id.to_string(),
            did: self.self_did.clone(),
            sequence: next_sequence(),
            nonce: random_nonce()?,
            timestamp: now_ts(),
        };
        let envelope = self.build_envelope(context_id, 0, &payload)?;
        sign_envelope(&self.self_identity, envelope)
    }

    /// Step 2 for the initiator: generate the session ephemeral and send an
    /// encrypted `Request` toward the peer's long-term key.
    pub fn send_request(&self, context_id: &str) -> Result<Envelope, SageError> {
        let pending = self.pending.read();
        let slot = pending.get(context_id).ok_or(SageError::NotFound)?;
        let (peer_long_term_pub, did) = {
            let mut ctx = slot.lock();
            if ctx.role != HandshakeRole::Initiator {
                return Err(SageError::OutOfPhase(context_id.to_string()));
            }
            match ctx.phase {
                Phase::Inv => {}
                Phase::Req => return Err(SageError::Replay),
            }
            let ephemeral = KeyPair::generate(KeyKind::X25519).map_err(map_crypto)?;
            ctx.self_ephemeral = Some(ephemeral);
            ctx.phase = Phase::Req;
            (ctx.peer_long_term_pub.clone(), self.self_did.clone())
        };

        let ephemeral_pub = {
            let ctx = slot.lock();
            match ctx.self_ephemeral.as_ref().unwrap().public() {
                PublicKey::X25519(p) => *p.as_bytes(),
                _ => unreachable!(),
            }
        };
        let payload = Request {
            context_id: context_id.to_string(),
            session_id: context_id.to_string(),
            ephemeral_pub_raw: ephemeral_pub.to_vec(),
            did,
        };
        let plaintext = serde_json::to_vec(&payload)?;
        let packet = bootstrap_encrypt(&peer_long_term_pub, &plaintext)?;
        let envelope = self.build_envelope(context_id, 1, &packet)?;
        sign_envelope(&self.self_identity, envelope)
    }

    /// Step 3+4 for the initiator: consume the responder's `Response`,
    /// derive the shared secret, mint the session, and send `Complete`.
    pub fn on_response(&self, envelope: &Envelope) -> Result<(Envelope, Arc<SecureSession>), SageError> {
        let context_id = envelope.context_id.clone();
        let result = self.on_response_inner(envelope, &context_id);
        if let Err(err) = &result {
            if err.is_handshake_fatal() {
                self.fail(&context_id);
            } else {
                warn!(context_id = context_id.as_str(), %err, "non-fatal response rejection, state preserved");
            }
        }
        result
    }

    fn on_response_inner(
        &self,
        envelope: &Envelope,
        context_id: &str,
    ) -> Result<(Envelope, Arc<SecureSession>), SageError> {
        let pending = self.pending.read();
        let slot = pending.get(context_id).ok_or(SageError::NotFound)?;
        let (peer_long_term_pub, self_ephemeral_pub) = {
            let ctx = slot.lock();
            if ctx.role != HandshakeRole::Initiator || ctx.phase != Phase::Req {
                return Err(SageError::OutOfPhase(context_id.to_string()));
            }
            (
                ctx.peer_long_term_pub.clone(),
                match ctx.self_ephemeral.as_ref().unwrap().public() {
                    PublicKey::X25519(p) => *p.as_bytes(),
                    _ => unreachable!(),
                },
            )
        };

        verify_envelope(&peer_long_term_pub, envelope)?;
        let packet: EncryptedPacket = serde_json::from_str(envelope.content.as_text()?)?;
        let plaintext = bootstrap_decrypt(&self.self_identity, &packet)?;
        let response: Response = serde_json::from_slice(&plaintext)?;
        if response.ephemeral_pub_raw.len() != 32 {
            return Err(SageError::BadPeerKey);
        }
        let mut peer_ephemeral_pub = [0u8; 32];
        peer_ephemeral_pub.copy_from_slice(&response.ephemeral_pub_raw);

        let shared = {
            let ctx = slot.lock();
            primitives::ecdh(ctx.self_ephemeral.as_ref().unwrap(), &peer_ephemeral_pub)
                .map_err(map_crypto)?
        };

        let (session, existed) = self.manager.ensure_from_shared_secret(
            &shared,
            HandshakeParams {
                context_id: context_id.to_string(),
                self_eph: self_ephemeral_pub,
                peer_eph: peer_ephemeral_pub,
                label: self.config.label.clone(),
            },
            true,
            self.session_config,
        )?;
        if existed {
            debug!(context_id, session_id = session.id(), "response replay minted an already-live session");
        }

        let complete = Complete {
            context_id: context_id.to_string(),
            session_id: session.id().to_string(),
            did: self.self_did.clone(),
            sequence: next_sequence(),
            nonce: random_nonce()?,
            timestamp: now_ts(),
        };
        let out = self.build_envelope(context_id, 3, &complete)?;
        let out = sign_envelope(&self.self_identity, out)?;

        drop(pending);
        self.pending.write().remove(context_id);
        Ok((out, session))
    }

    /// Step 1 for the responder: verify and stage an inbound `Invitation`.
    pub fn on_invitation(&self, envelope: &Envelope) -> Result<(), SageError> {
        let context_id = envelope.context_id.clone();
        let result = self.on_invitation_inner(envelope, &context_id);
        if let Err(err) = &result {
            if err.is_handshake_fatal() {
                self.fail(&context_id);
            } else {
                warn!(context_id = context_id.as_str(), %err, "non-fatal invitation rejection, state preserved");
            }
        }
        result
    }

    fn on_invitation_inner(&self, envelope: &Envelope, context_id: &str) -> Result<(), SageError> {
        let invitation: Invitation = serde_json::from_str(envelope.content.as_text()?)?;
        let peer_long_term_pub = self
            .resolver
            .resolve_long_term_pub(&invitation.did)
            .map_err(|_| SageError::UnknownDid(invitation.did.clone()))?;
        verify_envelope(&peer_long_term_pub, envelope)?;

        self.insert_pending(
            context_id,
            PendingContext {
                role: HandshakeRole::Responder,
                phase: Phase::Inv,
                peer_did: invitation.did,
                peer_long_term_pub,
                self_ephemeral: None,
                peer_ephemeral_pub: None,
                shared: None,
                expires_at: Instant::now() + Duration::from_secs(self.config.pending_ttl_secs),
            },
            SageError::Replay,
        )
    }

    /// Step 2 for the responder: decrypt the `Request`, agree the shared
    /// secret, and send an encrypted `Response`.
    pub fn on_request(&self, envelope: &Envelope) -> Result<Envelope, SageError> {
        let context_id = envelope.context_id.clone();
        let result = self.on_request_inner(envelope, &context_id);
        if let Err(err) = &result {
            if err.is_handshake_fatal() {
                self.fail(&context_id);
            } else {
                warn!(context_id = context_id.as_str(), %err, "non-fatal request rejection, state preserved");
            }
        }
        result
    }

    fn on_request_inner(&self, envelope: &Envelope, context_id: &str) -> Result<Envelope, SageError> {
        let pending = self.pending.read();
        let slot = pending.get(context_id).ok_or(SageError::NotFound)?;
        let peer_long_term_pub = {
            let ctx = slot.lock();
            if ctx.role != HandshakeRole::Responder {
                return Err(SageError::OutOfPhase(context_id.to_string()));
            }
            match ctx.phase {
                Phase::Inv => {}
                Phase::Req => return Err(SageError::Replay),
            }
            ctx.peer_long_term_pub.clone()
        };

        verify_envelope(&peer_long_term_pub, envelope)?;
        let packet: EncryptedPacket = serde_json::from_str(envelope.content.as_text()?)?;
        let plaintext = bootstrap_decrypt(&self.self_identity, &packet)?;
        let request: Request = serde_json::from_slice(&plaintext)?;
        if request.ephemeral_pub_raw.len() != 32 {
            return Err(SageError::BadPeerKey);
        }
        let mut peer_ephemeral_pub = [0u8; 32];
        peer_ephemeral_pub.copy_from_slice(&request.ephemeral_pub_raw);

        let ephemeral = KeyPair::generate(KeyKind::X25519).map_err(map_crypto)?;
        let shared = primitives::ecdh(&ephemeral, &peer_ephemeral_pub).map_err(map_crypto)?;
        let self_ephemeral_pub = match ephemeral.public() {
            PublicKey::X25519(p) => *p.as_bytes(),
            _ => unreachable!(),
        };

        {
            let mut ctx = slot.lock();
            ctx.self_ephemeral = Some(ephemeral);
            ctx.peer_ephemeral_pub = Some(peer_ephemeral_pub);
            ctx.shared = Some(shared);
            ctx.phase = Phase::Req;
        }

        let response = Response {
            context_id: context_id.to_string(),
            session_id: context_id.to_string(),
            ephemeral_pub_raw: self_ephemeral_pub.to_vec(),
            did: self.self_did.clone(),
            ack: true,
        };
        let plaintext = serde_json::to_vec(&response)?;
        let packet = bootstrap_encrypt(&peer_long_term_pub, &plaintext)?;
        let out = self.build_envelope(context_id, 2, &packet)?;
        sign_envelope(&self.self_identity, out)
    }

    /// Step 3 for the responder: verify `Complete`, mint the session, emit a
    /// final ack, and forget the pending context.
    pub fn on_complete(&self, envelope: &Envelope) -> Result<(Envelope, Arc<SecureSession>), SageError> {
        let context_id = envelope.context_id.clone();
        let result = self.on_complete_inner(envelope, &context_id);
        if let Err(err) = &result {
            if err.is_handshake_fatal() {
                self.fail(&context_id);
            } else {
                warn!(context_id = context_id.as_str(), %err, "non-fatal complete rejection, state preserved");
            }
        }
        result
    }

    fn on_complete_inner(
        &self,
        envelope: &Envelope,
        context_id: &str,
    ) -> Result<(Envelope, Arc<SecureSession>), SageError> {
        let pending = self.pending.read();
        let slot = pending.get(context_id).ok_or(SageError::NotFound)?;
        let (peer_long_term_pub, self_eph, peer_eph, shared, peer_did) = {
            let ctx = slot.lock();
            if ctx.role != HandshakeRole::Responder || ctx.phase != Phase::Req {
                return Err(SageError::OutOfPhase(context_id.to_string()));
            }
            let self_eph = match ctx.self_ephemeral.as_ref().unwrap().public() {
                PublicKey::X25519(p) => *p.as_bytes(),
                _ => unreachable!(),
            };
            (
                ctx.peer_long_term_pub.clone(),
                self_eph,
                ctx.peer_ephemeral_pub.unwrap(),
                ctx.shared.unwrap(),
                ctx.peer_did.clone(),
            )
        };

        verify_envelope(&peer_long_term_pub, envelope)?;
        let complete: Complete = serde_json::from_str(envelope.content.as_text()?)?;
        if complete.context_id != context_id || complete.did != peer_did {
            return Err(SageError::OutOfPhase(context_id.to_string()));
        }

        let (session, existed) = self.manager.ensure_from_shared_secret(
            &shared,
            HandshakeParams {
                context_id: context_id.to_string(),
                self_eph,
                peer_eph,
                label: self.config.label.clone(),
            },
            false,
            self.session_config,
        )?;
        if existed {
            debug!(context_id, session_id = session.id(), "complete replay minted an already-live session");
        }

        let ack = self.build_envelope(context_id, 3, &serde_json::json!({ "ack": true }))?;
        let ack = sign_envelope(&self.self_identity, ack)?;

        drop(pending);
        self.pending.write().remove(context_id);
        Ok((ack, session))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Spawn the background sweeper that forgets expired pending contexts
    /// (default interval matches the 60 s handshake TTL).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        spawn_periodic(interval, move || {
            let now = Instant::now();
            let expired: Vec<String> = this
                .pending
                .read()
                .iter()
                .filter(|(_, ctx)| ctx.lock().expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                this.pending.write().remove(&id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::StaticDidResolver;
    use sage_proto::HandshakeConfig;

    fn alice_bob() -> (Arc<HandshakeMachine>, Arc<HandshakeMachine>) {
        let alice_key = Arc::new(KeyPair::generate(KeyKind::Ed25519).unwrap());
        let bob_key = Arc::new(KeyPair::generate(KeyKind::Ed25519).unwrap());

        let resolver = Arc::new(StaticDidResolver::new());
        resolver.register("did:sage:test:alice", alice_key.public());
        resolver.register("did:sage:test:bob", bob_key.public());

        let alice = HandshakeMachine::new(
            "did:sage:test:alice",
            Arc::clone(&alice_key),
            Arc::clone(&resolver) as Arc<dyn DidResolver>,
            SessionManager::new(),
            HandshakeConfig::default(),
            SessionConfig::default(),
        );
        let bob = HandshakeMachine::new(
            "did:sage:test:bob",
            bob_key,
            resolver as Arc<dyn DidResolver>,
            SessionManager::new(),
            HandshakeConfig::default(),
            SessionConfig::default(),
        );
        (alice, bob)
    }

    #[test]
    fn scenario_6_handshake_happy_path() {
        let (alice, bob) = alice_bob();
        let ctx = "ctx-happy-path";

        let env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
        bob.on_invitation(&env_inv).unwrap();

        let env_req = alice.send_request(ctx).unwrap();
        let env_res = bob.on_request(&env_req).unwrap();

        let (env_complete, session_a) = alice.on_response(&env_res).unwrap();
        let (_env_ack, session_b) = bob.on_complete(&env_complete).unwrap();

        assert_eq!(session_a.id(), session_b.id());

        let mut xor = [0u8; 32];
        let out_a = session_a.out_enc();
        let in_b = session_b.in_enc();
        for i in 0..32 {
            xor[i] = out_a[i] ^ in_b[i];
        }
        assert_eq!(xor, [0u8; 32]);

        let ct = session_a.encrypt(b"ping").unwrap();
        let pt = session_b.decrypt(&ct).unwrap();
        assert_eq!(pt, b"ping");

        assert_eq!(alice.pending_count(), 0);
        assert_eq!(bob.pending_count(), 0);
    }

    #[test]
    fn duplicate_context_id_on_initiate_is_rejected() {
        let (alice, _bob) = alice_bob();
        let ctx = "ctx-dup";
        alice.initiate(ctx, "did:sage:test:bob").unwrap();
        assert!(matches!(
            alice.initiate(ctx, "did:sage:test:bob"),
            Err(SageError::DuplicateContext(_))
        ));
    }

    #[test]
    fn bad_signature_on_invitation_leaves_no_pending_state() {
        let (alice, bob) = alice_bob();
        let ctx = "ctx-bad-sig";
        let mut env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
        env_inv.set_signature(b"not-a-real-signature");
        assert!(matches!(
            bob.on_invitation(&env_inv),
            Err(SageError::BadSignature)
        ));
        assert_eq!(bob.pending_count(), 0);
    }

    #[test]
    fn replayed_request_is_rejected_but_handshake_still_completes() {
        let (alice, bob) = alice_bob();
        let ctx = "ctx-replay";
        let env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
        bob.on_invitation(&env_inv).unwrap();
        let env_req = alice.send_request(ctx).unwrap();
        let env_res = bob.on_request(&env_req).unwrap();
        assert!(matches!(
            bob.on_request(&env_req),
            Err(SageError::Replay)
        ));
        // the earlier Replay must not have wiped bob's staged shared secret
        assert_eq!(bob.pending_count(), 1);
        let (env_complete, _session_a) = alice.on_response(&env_res).unwrap();
        assert!(bob.on_complete(&env_complete).is_ok());
    }

    #[test]
    fn retransmitted_invitation_is_rejected_but_leaves_state_intact() {
        let (alice, bob) = alice_bob();
        let ctx = "ctx-retransmit-inv";
        let env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
        bob.on_invitation(&env_inv).unwrap();
        assert!(matches!(
            bob.on_invitation(&env_inv),
            Err(SageError::Replay)
        ));
        assert_eq!(bob.pending_count(), 1);

        let env_req = alice.send_request(ctx).unwrap();
        let env_res = bob.on_request(&env_req).unwrap();
        let (env_complete, _session_a) = alice.on_response(&env_res).unwrap();
        assert!(bob.on_complete(&env_complete).is_ok());
    }
}
