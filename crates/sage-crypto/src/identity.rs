//! Key identity: (de)serialization of public keys in raw, JWK, and PEM
//! form, plus fingerprint derivation.
//!
//! DER encoding here is hand-rolled rather than pulled from a generic ASN.1
//! crate: every structure produced (SubjectPublicKeyInfo for a 32-byte OKP
//! key or a 65-byte uncompressed secp256k1 point) fits comfortably under the
//! 128-byte short-form DER length, so a general big-length encoder buys
//! nothing here.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use secp256k1::PublicKey as Secp256k1Public;
use serde_json::{json, Value};
use x25519_dalek::PublicKey as X25519Public;

use crate::error::CryptoError;
use crate::keys::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Raw,
    Jwk,
    Pem,
}

fn b64u(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn b64u_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(URL_SAFE_NO_PAD.decode(s)?)
}

// ── Raw ──────────────────────────────────────────────────────────────────

pub fn export_raw(key: &PublicKey) -> Vec<u8> {
    match key {
        PublicKey::Ed25519(vk) => vk.to_bytes().to_vec(),
        PublicKey::X25519(pk) => pk.to_bytes().to_vec(),
        PublicKey::Secp256k1(pk) => pk.serialize().to_vec(),
    }
}

/// `algo` disambiguates a raw byte string, since a bare 32-byte key is
/// structurally indistinguishable between Ed25519 and X25519.
pub fn import_raw(algo: &str, bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    match algo {
        "ed25519" => {
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("Ed25519 public key must be 32 bytes".into()))?;
            let vk = ed25519_dalek::VerifyingKey::from_bytes(&arr)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(PublicKey::Ed25519(vk))
        }
        "x25519" => {
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("X25519 public key must be 32 bytes".into()))?;
            Ok(PublicKey::X25519(X25519Public::from(arr)))
        }
        "secp256k1" => {
            let pk = Secp256k1Public::from_slice(bytes)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            Ok(PublicKey::Secp256k1(pk))
        }
        other => Err(CryptoError::UnsupportedKey(format!("unknown key algorithm {other}"))),
    }
}

/// Re-encode a secp256k1 public key in its 33-byte compressed form.
pub fn secp256k1_compressed(key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    match key {
        PublicKey::Secp256k1(pk) => Ok(pk.serialize().to_vec()),
        _ => Err(CryptoError::CrossCurveConversion),
    }
}

/// Re-encode a secp256k1 public key in its 65-byte uncompressed form.
pub fn secp256k1_uncompressed(key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    match key {
        PublicKey::Secp256k1(pk) => Ok(pk.serialize_uncompressed().to_vec()),
        _ => Err(CryptoError::CrossCurveConversion),
    }
}

// ── JWK (RFC 7517 subset: kty/crv/x/y/d) ────────────────────────────────

pub fn export_jwk(key: &PublicKey) -> Value {
    match key {
        PublicKey::Ed25519(vk) => json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": b64u(&vk.to_bytes()),
        }),
        PublicKey::X25519(pk) => json!({
            "kty": "OKP",
            "crv": "X25519",
            "x": b64u(&pk.to_bytes()),
        }),
        PublicKey::Secp256k1(pk) => {
            let uncompressed = pk.serialize_uncompressed();
            json!({
                "kty": "EC",
                "crv": "secp256k1",
                "x": b64u(&uncompressed[1..33]),
                "y": b64u(&uncompressed[33..65]),
            })
        }
    }
}

pub fn import_jwk(jwk: &Value) -> Result<PublicKey, CryptoError> {
    let kty = jwk
        .get("kty")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::UnsupportedKey("JWK missing kty".into()))?;
    let crv = jwk
        .get("crv")
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::UnsupportedKey("JWK missing crv".into()))?;

    match (kty, crv) {
        ("OKP", "Ed25519") => {
            let x = jwk.get("x").and_then(Value::as_str).ok_or_else(|| {
                CryptoError::UnsupportedKey("JWK missing x coordinate".into())
            })?;
            import_raw("ed25519", &b64u_decode(x)?)
        }
        ("OKP", "X25519") => {
            let x = jwk.get("x").and_then(Value::as_str).ok_or_else(|| {
                CryptoError::UnsupportedKey("JWK missing x coordinate".into())
            })?;
            import_raw("x25519", &b64u_decode(x)?)
        }
        ("EC", "secp256k1") => {
            let x = jwk.get("x").and_then(Value::as_str).ok_or_else(|| {
                CryptoError::UnsupportedKey("JWK missing x coordinate".into())
            })?;
            let y = jwk.get("y").and_then(Value::as_str).ok_or_else(|| {
                CryptoError::UnsupportedKey("JWK missing y coordinate".into())
            })?;
            let mut uncompressed = vec![0x04u8];
            uncompressed.extend(b64u_decode(x)?);
            uncompressed.extend(b64u_decode(y)?);
            import_raw("secp256k1", &uncompressed)
        }
        (kty, crv) => Err(CryptoError::UnsupportedKey(format!(
            "unsupported JWK kty={kty} crv={crv}"
        ))),
    }
}

// ── PEM (SubjectPublicKeyInfo) ──────────────────────────────────────────

const OID_ED25519: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];
const OID_X25519: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x6e];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_SECP256K1: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x0a];

fn der_len(len: usize) -> Vec<u8> {
    assert!(len < 128, "all SAGE key structures fit short-form DER length");
    vec![len as u8]
}

fn der_sequence(contents: &[u8]) -> Vec<u8> {
    let mut out = vec![0x30];
    out.extend(der_len(contents.len()));
    out.extend_from_slice(contents);
    out
}

fn der_bit_string(contents: &[u8]) -> Vec<u8> {
    let mut body = vec![0x00]; // zero unused bits
    body.extend_from_slice(contents);
    let mut out = vec![0x03];
    out.extend(der_len(body.len()));
    out.extend_from_slice(&body);
    out
}

fn spki_der(algorithm_id: &[u8], public_key_bytes: &[u8]) -> Vec<u8> {
    let alg_id = der_sequence(algorithm_id);
    let bit_string = der_bit_string(public_key_bytes);
    let mut body = alg_id;
    body.extend(bit_string);
    der_sequence(&body)
}

pub fn export_pem(key: &PublicKey) -> Result<String, CryptoError> {
    let der = match key {
        PublicKey::Ed25519(vk) => spki_der(OID_ED25519, &vk.to_bytes()),
        PublicKey::X25519(pk) => spki_der(OID_X25519, &pk.to_bytes()),
        PublicKey::Secp256k1(pk) => {
            let mut alg_id = OID_EC_PUBLIC_KEY.to_vec();
            alg_id.extend_from_slice(OID_SECP256K1);
            spki_der(&alg_id, &pk.serialize_uncompressed())
        }
    };
    let pem = pem::Pem::new("PUBLIC KEY", der);
    Ok(pem::encode(&pem))
}

pub fn import_pem(pem_str: &str) -> Result<PublicKey, CryptoError> {
    let parsed = pem::parse(pem_str)?;
    let der = parsed.contents();

    // Minimal SPKI walk: SEQUENCE { SEQUENCE { OID ... }, BIT STRING ... }
    let (alg_seq, rest) = read_der_tlv(der)?;
    let (_, bit_string) = read_der_tlv(rest)?;
    let key_bytes = &bit_string[1..]; // skip the "unused bits" byte

    if alg_seq.starts_with(OID_ED25519) {
        import_raw("ed25519", key_bytes)
    } else if alg_seq.starts_with(OID_X25519) {
        import_raw("x25519", key_bytes)
    } else if alg_seq.starts_with(OID_EC_PUBLIC_KEY) {
        import_raw("secp256k1", key_bytes)
    } else {
        Err(CryptoError::UnsupportedKey("unrecognised SPKI algorithm OID".into()))
    }
}

/// Read one DER TLV (tag+length+value), returning (value, remainder).
/// Supports only short-form lengths, matching what this module ever emits.
fn read_der_tlv(der: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    if der.len() < 2 {
        return Err(CryptoError::UnsupportedKey("truncated DER".into()));
    }
    let len = der[1] as usize;
    if len >= 128 {
        return Err(CryptoError::UnsupportedKey(
            "long-form DER lengths are not supported".into(),
        ));
    }
    let value_start = 2;
    let value_end = value_start + len;
    if der.len() < value_end {
        return Err(CryptoError::UnsupportedKey("truncated DER value".into()));
    }
    Ok((&der[value_start..value_end], &der[value_end..]))
}

// ── Fingerprint ──────────────────────────────────────────────────────────

/// Human-readable fingerprint: BLAKE3 of the raw public key bytes,
/// truncated to 20 bytes, hex-encoded in groups of 4.
pub fn fingerprint(key: &PublicKey) -> String {
    let raw = export_raw(key);
    let hash = blake3::hash(&raw);
    let hex = hex::encode(&hash.as_bytes()[..20]);
    hex.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyKind, KeyPair, SignatureForm};

    #[test]
    fn raw_roundtrip_ed25519() {
        let pair = KeyPair::generate(KeyKind::Ed25519).unwrap();
        let pub_key = pair.public();
        let raw = export_raw(&pub_key);
        let back = import_raw("ed25519", &raw).unwrap();
        assert_eq!(export_raw(&back), raw);
    }

    #[test]
    fn jwk_roundtrip_x25519() {
        let pair = KeyPair::generate(KeyKind::X25519).unwrap();
        let pub_key = pair.public();
        let jwk = export_jwk(&pub_key);
        let back = import_jwk(&jwk).unwrap();
        assert_eq!(export_raw(&back), export_raw(&pub_key));
    }

    #[test]
    fn jwk_roundtrip_secp256k1() {
        let pair = KeyPair::generate(KeyKind::Secp256k1(SignatureForm::Compact)).unwrap();
        let pub_key = pair.public();
        let jwk = export_jwk(&pub_key);
        let back = import_jwk(&jwk).unwrap();
        assert_eq!(export_raw(&back), export_raw(&pub_key));
    }

    #[test]
    fn pem_roundtrip_ed25519() {
        let pair = KeyPair::generate(KeyKind::Ed25519).unwrap();
        let pub_key = pair.public();
        let pem_str = export_pem(&pub_key).unwrap();
        assert!(pem_str.contains("PUBLIC KEY"));
        let back = import_pem(&pem_str).unwrap();
        assert_eq!(export_raw(&back), export_raw(&pub_key));
    }

    #[test]
    fn unknown_jwk_kty_is_rejected() {
        let jwk = json!({ "kty": "RSA", "crv": "none" });
        assert!(matches!(import_jwk(&jwk), Err(CryptoError::UnsupportedKey(_))));
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let pair = KeyPair::generate(KeyKind::Ed25519).unwrap();
        let pub_key = pair.public();
        let fp1 = fingerprint(&pub_key);
        let fp2 = fingerprint(&pub_key);
        assert_eq!(fp1, fp2);
    }
}
