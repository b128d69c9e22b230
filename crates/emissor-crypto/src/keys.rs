//! Ed25519 key material behind signing credentials and certificates.
//!
//! Keys and signatures are stored as lowercase hex in `credential.json`
//! and `trust.json`, so every type here round-trips through hex.

use std::fmt;

use ed25519_dalek::{Signer as _, Verifier as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Private half of a signing credential. Never printed.
#[derive(Clone)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

/// Public key embedded in a certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// Detached signature over a digest.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature does not match the signed content")]
    InvalidSignature,
    #[error("public key is not a valid Ed25519 point")]
    InvalidKey,
    #[error("malformed hex key material: {0}")]
    InvalidEncoding(String),
}

impl SigningKey {
    pub fn generate() -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Reads the secret as written by [`SigningKey::to_hex`].
    pub fn from_hex(encoded: &str) -> Result<Self, SignatureError> {
        let secret: [u8; 32] = unhex(encoded)?;
        Ok(Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&secret),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, digest: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(digest),
        }
    }
}

impl VerifyingKey {
    pub fn verify(&self, digest: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        self.inner
            .verify(digest, &signature.inner)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, SignatureError> {
        let point: [u8; 32] = unhex(encoded)?;
        ed25519_dalek::VerifyingKey::from_bytes(&point)
            .map(|inner| Self { inner })
            .map_err(|_| SignatureError::InvalidKey)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.as_bytes())
    }
}

impl Signature {
    pub fn from_hex(encoded: &str) -> Result<Self, SignatureError> {
        let raw: [u8; 64] = unhex(encoded)?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&raw),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }
}

fn unhex<const N: usize>(encoded: &str) -> Result<[u8; N], SignatureError> {
    let bytes =
        hex::decode(encoded.trim()).map_err(|e| SignatureError::InvalidEncoding(e.to_string()))?;
    let found = bytes.len();
    <[u8; N]>::try_from(bytes)
        .map_err(|_| SignatureError::InvalidEncoding(format!("{found} bytes where {N} expected")))
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VerifyingKey").field(&self.to_hex()).finish()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Signature({}..)", &hex[..16])
    }
}

impl Serialize for VerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}
