//! Closed key-pair enumeration: Ed25519, secp256k1, X25519.
//!
//! Variants are disjoint by design (per spec: "conversion across curves is
//! forbidden") — the only cross-curve bridge is the explicit Ed25519→X25519
//! conversion used by the handshake's bootstrap encryption step, which lives
//! in `sage_core::handshake`, not here.

use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature as CompactSignature};
use secp256k1::{Message, Secp256k1};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Fixed at construction: whether a `Secp256k1Pair` produces 65-byte
/// recoverable signatures or 64-byte compact ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureForm {
    Recoverable,
    Compact,
}

/// Requested key kind for [`KeyPair::generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Ed25519,
    Secp256k1(SignatureForm),
    X25519,
}

/// A generated or imported key pair. The private half never leaves this
/// type in plaintext; only `export`/`sign`/`ecdh` touch it.
pub enum KeyPair {
    Ed25519Pair {
        verifying: VerifyingKey,
        secret_bytes: [u8; 32],
    },
    Secp256k1Pair {
        public: secp256k1::PublicKey,
        form: SignatureForm,
        secret_bytes: [u8; 32],
    },
    X25519Pair {
        secret: StaticSecret,
        public: X25519Public,
    },
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        match self {
            KeyPair::Ed25519Pair { secret_bytes, .. } => secret_bytes.zeroize(),
            KeyPair::Secp256k1Pair { secret_bytes, .. } => secret_bytes.zeroize(),
            // x25519_dalek::StaticSecret zeroizes itself on drop.
            KeyPair::X25519Pair { .. } => {}
        }
    }
}

/// Public half of a [`KeyPair`], freely extractable in raw/JWK/PEM form.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    Secp256k1(secp256k1::PublicKey),
    X25519(X25519Public),
}

impl KeyPair {
    pub fn generate(kind: KeyKind) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Ed25519 => {
                let signing = SigningKey::generate(&mut OsRng);
                Ok(KeyPair::Ed25519Pair {
                    verifying: signing.verifying_key(),
                    secret_bytes: signing.to_bytes(),
                })
            }
            KeyKind::Secp256k1(form) => {
                let secp = Secp256k1::new();
                let (secret, public) = secp.generate_keypair(&mut OsRng);
                Ok(KeyPair::Secp256k1Pair {
                    public,
                    form,
                    secret_bytes: secret.secret_bytes(),
                })
            }
            KeyKind::X25519 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public = X25519Public::from(&secret);
                Ok(KeyPair::X25519Pair { secret, public })
            }
        }
    }

    pub fn public(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519Pair { verifying, .. } => PublicKey::Ed25519(*verifying),
            KeyPair::Secp256k1Pair { public, .. } => PublicKey::Secp256k1(*public),
            KeyPair::X25519Pair { public, .. } => PublicKey::X25519(*public),
        }
    }

    /// The raw Ed25519 seed, for the birational Ed25519→X25519 conversion
    /// used by the handshake's bootstrap encryption step. Narrow escape
    /// hatch: callers must use the result immediately and let it drop.
    pub fn ed25519_seed(&self) -> Result<[u8; 32], CryptoError> {
        match self {
            KeyPair::Ed25519Pair { secret_bytes, .. } => Ok(*secret_bytes),
            _ => Err(CryptoError::UnsupportedKey(
                "ed25519_seed requires an Ed25519Pair".into(),
            )),
        }
    }

    /// Sign `msg`. Ed25519 signatures are 64 B; secp256k1 signatures are
    /// 65 B (recoverable) or 64 B (compact) depending on the form fixed at
    /// construction. secp256k1 signs the SHA-256 digest of `msg`.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            KeyPair::Ed25519Pair { secret_bytes, .. } => {
                let signing = SigningKey::from_bytes(secret_bytes);
                Ok(signing.sign(msg).to_bytes().to_vec())
            }
            KeyPair::Secp256k1Pair {
                secret_bytes, form, ..
            } => {
                let secp = Secp256k1::new();
                let secret = secp256k1::SecretKey::from_slice(secret_bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let digest = Sha256::digest(msg);
                let message = Message::from_digest_slice(&digest)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                match form {
                    SignatureForm::Recoverable => {
                        let sig = secp.sign_ecdsa_recoverable(&message, &secret);
                        let (recovery_id, bytes) = sig.serialize_compact();
                        let mut out = Vec::with_capacity(65);
                        out.extend_from_slice(&bytes);
                        out.push(recovery_id.to_i32() as u8);
                        Ok(out)
                    }
                    SignatureForm::Compact => {
                        let sig = secp.sign_ecdsa(&message, &secret);
                        Ok(sig.serialize_compact().to_vec())
                    }
                }
            }
            KeyPair::X25519Pair { .. } => Err(CryptoError::UnsupportedKey(
                "X25519Pair has no signing capability".into(),
            )),
        }
    }
}

impl PublicKey {
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        match self {
            PublicKey::Ed25519(verifying) => {
                let sig_bytes: [u8; 64] =
                    sig.try_into().map_err(|_| CryptoError::BadSignature)?;
                let signature = EdSignature::from_bytes(&sig_bytes);
                verifying
                    .verify(msg, &signature)
                    .map_err(|_| CryptoError::BadSignature)
            }
            PublicKey::Secp256k1(public) => {
                let secp = Secp256k1::new();
                let digest = Sha256::digest(msg);
                let message = Message::from_digest_slice(&digest)
                    .map_err(|_| CryptoError::BadSignature)?;
                let signature = match sig.len() {
                    65 => {
                        let recovery_id = RecoveryId::from_i32(sig[64] as i32)
                            .map_err(|_| CryptoError::BadSignature)?;
                        let recoverable =
                            RecoverableSignature::from_compact(&sig[..64], recovery_id)
                                .map_err(|_| CryptoError::BadSignature)?;
                        recoverable.to_standard()
                    }
                    64 => CompactSignature::from_compact(sig)
                        .map_err(|_| CryptoError::BadSignature)?,
                    _ => return Err(CryptoError::BadSignature),
                };
                secp.verify_ecdsa(&message, &signature, public)
                    .map_err(|_| CryptoError::BadSignature)
            }
            PublicKey::X25519(_) => Err(CryptoError::UnsupportedKey(
                "X25519 public keys cannot verify signatures".into(),
            )),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PublicKey::Ed25519(_) => "ed25519",
            PublicKey::Secp256k1(_) => "secp256k1",
            PublicKey::X25519(_) => "x25519",
        }
    }
}
