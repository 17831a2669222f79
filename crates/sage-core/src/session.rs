//! Secure session (C6): direction-separated AEAD keys derived from a
//! handshake exporter secret or a raw ECDH shared secret, session
//! lifecycle bounds, authenticated encryption, detached-MAC operations,
//! and zeroization on close.

use std::time::Instant;

use sage_crypto::primitives;
use sage_proto::SessionConfig;
use zeroize::Zeroize;

use crate::error::SageError;

/// `sage_crypto`'s error taxonomy is flatter than the core's; fold the
/// variants the core also names back onto its own, rather than nesting
/// them inside `SageError::Crypto`.
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

const INFO_C2S_ENC: &[u8] = b"c2s|enc|v1";
const INFO_C2S_SIGN: &[u8] = b"c2s|sign|v1";
const INFO_S2C_ENC: &[u8] = b"s2c|enc|v1";
const INFO_S2C_SIGN: &[u8] = b"s2c|sign|v1";

/// Parameters handed off by the handshake state machine (C8) on Complete.
pub struct HandshakeParams {
    pub context_id: String,
    pub self_eph: [u8; 32],
    pub peer_eph: [u8; 32],
    pub label: String,
}

struct Inner {
    last_used_at: Instant,
    message_count: u64,
    closed: bool,
    seed: [u8; 32],
    out_enc: [u8; 32],
    in_enc: [u8; 32],
    out_sign: [u8; 32],
    in_sign: [u8; 32],
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.zeroize_keys();
    }
}

impl Inner {
    fn zeroize_keys(&mut self) {
        self.seed.zeroize();
        self.out_enc.zeroize();
        self.in_enc.zeroize();
        self.out_sign.zeroize();
        self.in_sign.zeroize();
    }
}

pub struct SecureSession {
    id: String,
    created_at: Instant,
    config: SessionConfig,
    initiator: bool,
    inner: parking_lot::Mutex<Inner>,
}

/// Reduce `seed` + `id` into the four 32 B directional keys per spec §4.6.
/// `id` does double duty as the HKDF salt here — a deliberate, spec-mandated
/// non-standard reuse (see spec §9 open question (c)).
fn derive_directional_keys(
    seed: &[u8; 32],
    id: &str,
) -> Result<([u8; 32], [u8; 32], [u8; 32], [u8; 32]), SageError> {
    let prk = primitives::hkdf_extract(seed, id.as_bytes());
    let mut c2s_enc = [0u8; 32];
    let mut c2s_sign = [0u8; 32];
    let mut s2c_enc = [0u8; 32];
    let mut s2c_sign = [0u8; 32];
    primitives::hkdf_expand(&prk, INFO_C2S_ENC, &mut c2s_enc).map_err(map_crypto)?;
    primitives::hkdf_expand(&prk, INFO_C2S_SIGN, &mut c2s_sign).map_err(map_crypto)?;
    primitives::hkdf_expand(&prk, INFO_S2C_ENC, &mut s2c_enc).map_err(map_crypto)?;
    primitives::hkdf_expand(&prk, INFO_S2C_SIGN, &mut s2c_sign).map_err(map_crypto)?;
    Ok((c2s_enc, c2s_sign, s2c_enc, s2c_sign))
}

/// `(lo, hi)` of two 32-byte ephemeral public keys, sorted lexicographically —
/// makes the derived salt role-agnostic (both peers compute the same bytes).
fn sort_pair(a: &[u8; 32], b: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn base64url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

impl SecureSession {
    /// Construction from an exporter secret (preferred path). `id` is given,
    /// not derived — the caller (typically C7's `ensure_from_exporter`)
    /// already knows it.
    pub fn from_exporter(
        exporter: &[u8],
        id: impl Into<String>,
        initiator: bool,
        config: SessionConfig,
    ) -> Result<Self, SageError> {
        let id = id.into();
        let seed: [u8; 32] = if exporter.len() == 32 {
            let mut s = [0u8; 32];
            s.copy_from_slice(exporter);
            s
        } else {
            // An exporter outside the canonical 32 B is normalized through
            // HKDF-Extract rather than assigned directly.
            primitives::hkdf_extract(exporter, &[])
        };
        Self::from_seed_and_id(seed, id, initiator, config)
    }

    /// Construction from a raw ECDH shared secret and handshake params.
    /// Returns the session together with its derived id.
    pub fn from_shared_secret(
        shared_secret: &[u8],
        params: HandshakeParams,
        initiator: bool,
        config: SessionConfig,
    ) -> Result<Self, SageError> {
        let (lo, hi) = sort_pair(&params.self_eph, &params.peer_eph);
        let salt = sha256(&[
            params.label.as_bytes(),
            params.context_id.as_bytes(),
            &lo,
            &hi,
        ]);
        let seed = primitives::hkdf_extract(shared_secret, &salt);
        let id_hash = sha256(&[params.label.as_bytes(), &seed]);
        let id = base64url(&id_hash[..16]);
        Self::from_seed_and_id(seed, id, initiator, config)
    }

    fn from_seed_and_id(
        seed: [u8; 32],
        id: String,
        initiator: bool,
        config: SessionConfig,
    ) -> Result<Self, SageError> {
        let (c2s_enc, c2s_sign, s2c_enc, s2c_sign) = derive_directional_keys(&seed, &id)?;
        // I1: direction assignment.
        let (out_enc, in_enc, out_sign, in_sign) = if initiator {
            (c2s_enc, s2c_enc, c2s_sign, s2c_sign)
        } else {
            (s2c_enc, c2s_enc, s2c_sign, c2s_sign)
        };
        let now = Instant::now();
        Ok(Self {
            id,
            created_at: now,
            config,
            initiator,
            inner: parking_lot::Mutex::new(Inner {
                last_used_at: now,
                message_count: 0,
                closed: false,
                seed,
                out_enc,
                in_enc,
                out_sign,
                in_sign,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn initiator(&self) -> bool {
        self.initiator
    }

    pub fn out_enc(&self) -> [u8; 32] {
        self.inner.lock().out_enc
    }

    pub fn in_enc(&self) -> [u8; 32] {
        self.inner.lock().in_enc
    }

    pub fn message_count(&self) -> u64 {
        self.inner.lock().message_count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Disjunction of `max_age`, `idle_timeout`, and `max_messages` bounds,
    /// each active only if non-zero.
    pub fn is_expired(&self) -> bool {
        let inner = self.inner.lock();
        if inner.closed {
            return true;
        }
        let now = Instant::now();
        if self.config.max_age_secs != 0
            && now.duration_since(self.created_at).as_secs() >= self.config.max_age_secs
        {
            return true;
        }
        if self.config.idle_timeout_secs != 0
            && now.duration_since(inner.last_used_at).as_secs() >= self.config.idle_timeout_secs
        {
            return true;
        }
        if self.config.max_messages != 0 && inner.message_count >= self.config.max_messages {
            return true;
        }
        false
    }

    fn guard(&self, inner: &Inner) -> Result<(), SageError> {
        if inner.closed {
            return Err(SageError::SessionClosed);
        }
        let now = Instant::now();
        if self.config.max_age_secs != 0
            && now.duration_since(self.created_at).as_secs() >= self.config.max_age_secs
        {
            return Err(SageError::SessionExpired);
        }
        if self.config.idle_timeout_secs != 0
            && now.duration_since(inner.last_used_at).as_secs() >= self.config.idle_timeout_secs
        {
            return Err(SageError::SessionExpired);
        }
        if self.config.max_messages != 0 && inner.message_count >= self.config.max_messages {
            return Err(SageError::SessionExpired);
        }
        Ok(())
    }

    fn mark_used(inner: &mut Inner) {
        inner.last_used_at = Instant::now();
        inner.message_count += 1;
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SageError> {
        self.encrypt_with_aad(plaintext, &[])
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SageError> {
        self.decrypt_with_aad(data, &[])
    }

    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        let ct = primitives::aead_seal(&inner.out_enc, aad, plaintext).map_err(map_crypto)?;
        Self::mark_used(&mut inner);
        Ok(ct)
    }

    pub fn decrypt_with_aad(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        let pt = primitives::aead_open(&inner.in_enc, aad, data).map_err(map_crypto)?;
        Self::mark_used(&mut inner);
        Ok(pt)
    }

    /// AEAD-encrypt `pt` and, in parallel, HMAC-SHA256 `covered` under the
    /// outbound sign key. Counts as a single operation.
    pub fn encrypt_and_sign(
        &self,
        plaintext: &[u8],
        covered: &[u8],
    ) -> Result<(Vec<u8>, [u8; 32]), SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        let ct = primitives::aead_seal(&inner.out_enc, &[], plaintext).map_err(map_crypto)?;
        let mac = primitives::hmac_sha256(&inner.out_sign, covered);
        Self::mark_used(&mut inner);
        Ok((ct, mac))
    }

    /// Verifies `mac` (constant-time) before opening the AEAD — a failed MAC
    /// never reaches the decrypt call.
    pub fn decrypt_and_verify(
        &self,
        ciphertext: &[u8],
        covered: &[u8],
        mac: &[u8],
    ) -> Result<Vec<u8>, SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        primitives::hmac_verify(&inner.in_sign, covered, mac).map_err(|_| SageError::BadSignature)?;
        let pt = primitives::aead_open(&inner.in_enc, &[], ciphertext).map_err(map_crypto)?;
        Self::mark_used(&mut inner);
        Ok(pt)
    }

    /// HMAC path without encryption, for signature-only messages.
    pub fn sign_covered(&self, covered: &[u8]) -> Result<[u8; 32], SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        let mac = primitives::hmac_sha256(&inner.out_sign, covered);
        Self::mark_used(&mut inner);
        Ok(mac)
    }

    pub fn verify_covered(&self, covered: &[u8], sig: &[u8]) -> Result<(), SageError> {
        let mut inner = self.inner.lock();
        self.guard(&inner)?;
        primitives::hmac_verify(&inner.in_sign, covered, sig).map_err(|_| SageError::BadSignature)?;
        Self::mark_used(&mut inner);
        Ok(())
    }

    /// Zeros every key buffer and marks the session closed. Subsequent
    /// cryptographic operations return `SessionClosed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.zeroize_keys();
        inner.closed = true;
    }
}
