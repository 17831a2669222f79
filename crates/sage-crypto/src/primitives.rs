//! Crypto primitives: signing, ECDH, HKDF, AEAD, HMAC, secure random.
//!
//! Every other component composes these; raw key bytes are touched nowhere
//! else in the workspace.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::{KeyKind, KeyPair, PublicKey};

/// Generate a fresh key pair of the requested kind.
pub fn generate(kind: KeyKind) -> Result<KeyPair, CryptoError> {
    KeyPair::generate(kind)
}

/// Sign `msg` with the private half of `pair`.
pub fn sign(pair: &KeyPair, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    pair.sign(msg)
}

/// Verify `sig` over `msg` against `pub_key`.
pub fn verify(pub_key: &PublicKey, msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    pub_key.verify(msg, sig)
}

/// X25519 Diffie-Hellman. Rejects an all-zero output (a degenerate
/// low-order point contribution from the peer).
pub fn ecdh(pair: &KeyPair, peer_pub: &[u8]) -> Result<[u8; 32], CryptoError> {
    let KeyPair::X25519Pair { secret, .. } = pair else {
        return Err(CryptoError::InvalidKey(
            "ecdh requires an X25519Pair".into(),
        ));
    };
    if peer_pub.len() != 32 {
        return Err(CryptoError::BadPeerKey);
    }
    let mut peer_arr = [0u8; 32];
    peer_arr.copy_from_slice(peer_pub);
    let peer = x25519_dalek::PublicKey::from(peer_arr);
    let shared = secret.diffie_hellman(&peer);
    let shared_bytes = *shared.as_bytes();
    if shared_bytes == [0u8; 32] {
        return Err(CryptoError::BadPeerKey);
    }
    Ok(shared_bytes)
}

/// HKDF-Extract-SHA256: condense non-uniform `ikm` into a uniform 32 B PRK.
pub fn hkdf_extract(ikm: &[u8], salt: &[u8]) -> [u8; 32] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

/// HKDF-Expand-SHA256: derive `output.len()` bytes of key material from `prk`.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|_| CryptoError::KeyDerivation(
        "PRK has invalid length".into(),
    ))?;
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// ChaCha20-Poly1305 seal with a random 96-bit nonce, wire format
/// `nonce(12) || ciphertext || tag`.
pub fn aead_seal(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("bad AEAD key length".into()))?;
    let nonce_bytes = random(12)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadAuth)?;
    let mut out = Vec::with_capacity(12 + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Inverse of [`aead_seal`]. Fails `Truncated` if `data` is shorter than the
/// 12-byte nonce prefix, `AeadAuth` on tag mismatch.
pub fn aead_open(key: &[u8; 32], aad: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < 12 {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, ct) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("bad AEAD key length".into()))?;
    cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadAuth)
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `data` keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&tag);
    out
}

/// Constant-time verification of an HMAC-SHA256 tag.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| CryptoError::BadSignature)
}

/// `n` bytes from a cryptographically secure RNG. RNG failure is fatal —
/// there is no deterministic fallback.
pub fn random(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.try_fill_bytes(&mut buf).map_err(|_| CryptoError::RngFailure)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_extract_then_expand_is_deterministic() {
        let ikm = b"shared secret material";
        let salt = b"some-salt";
        let prk1 = hkdf_extract(ikm, salt);
        let prk2 = hkdf_extract(ikm, salt);
        assert_eq!(prk1, prk2);

        let mut out1 = [0u8; 32];
        let mut out2 = [0u8; 32];
        hkdf_expand(&prk1, b"info", &mut out1).unwrap();
        hkdf_expand(&prk2, b"info", &mut out2).unwrap();
        assert_eq!(out1, out2);
    }

    #[test]
    fn aead_roundtrip() {
        let key = [7u8; 32];
        let pt = b"hello";
        let ct = aead_seal(&key, b"aad", pt).unwrap();
        let back = aead_open(&key, b"aad", &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn aead_tamper_detected() {
        let key = [7u8; 32];
        let mut ct = aead_seal(&key, b"aad", b"hello").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(aead_open(&key, b"aad", &ct), Err(CryptoError::AeadAuth)));
    }

    #[test]
    fn aead_short_input_is_truncated() {
        let key = [7u8; 32];
        assert!(matches!(aead_open(&key, b"", &[0u8; 4]), Err(CryptoError::Truncated)));
    }

    #[test]
    fn hmac_roundtrip() {
        let key = b"key-material";
        let data = b"covered data";
        let tag = hmac_sha256(key, data);
        assert!(hmac_verify(key, data, &tag).is_ok());
        let mut bad_tag = tag;
        bad_tag[0] ^= 1;
        assert!(hmac_verify(key, data, &bad_tag).is_err());
    }

    #[test]
    fn random_bytes_are_not_all_zero() {
        let buf = random(32).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
    }
}
