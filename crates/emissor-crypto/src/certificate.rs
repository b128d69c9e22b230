use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;
use crate::keys::{Signature, SigningKey, VerifyingKey};

/// Why a certificate was refused for signing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate {subject:?} expired at {not_after}")]
    Expired {
        subject: String,
        not_after: DateTime<Utc>,
    },

    #[error("certificate {subject:?} is not valid before {not_before}")]
    NotYetValid {
        subject: String,
        not_before: DateTime<Utc>,
    },

    #[error("certificate {subject:?} does not chain to a trusted root: {reason}")]
    Untrusted { subject: String, reason: String },

    #[error("certificate {subject:?} does not match the credential's private key")]
    KeyMismatch { subject: String },
}

impl CertificateError {
    /// Suggested next action for the operator.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Expired { .. } => "renew the signing certificate and update the credential file",
            Self::NotYetValid { .. } => "check the system clock or wait until the certificate becomes valid",
            Self::Untrusted { .. } => "add the issuing authority to the trust store or use a certificate from a trusted authority",
            Self::KeyMismatch { .. } => "the credential file pairs a certificate with a different key; re-export it",
        }
    }
}

/// Certificate binding a subject to a public key, signed by an authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: u64,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: VerifyingKey,
    pub issuer_signature: Signature,
}

#[derive(Serialize)]
struct ToBeSigned<'a> {
    serial: u64,
    subject: &'a str,
    issuer: &'a str,
    not_before: &'a DateTime<Utc>,
    not_after: &'a DateTime<Utc>,
    public_key: &'a VerifyingKey,
}

fn tbs_digest(
    serial: u64,
    subject: &str,
    issuer: &str,
    not_before: &DateTime<Utc>,
    not_after: &DateTime<Utc>,
    public_key: &VerifyingKey,
) -> [u8; 32] {
    let tbs = ToBeSigned {
        serial,
        subject,
        issuer,
        not_before,
        not_after,
        public_key,
    };
    // Serializing a struct of plain fields cannot fail.
    let encoded = serde_json::to_vec(&tbs).unwrap_or_default();
    ContentHasher::CERTIFICATE.hash(&encoded)
}

impl Certificate {
    fn digest(&self) -> [u8; 32] {
        tbs_digest(
            self.serial,
            &self.subject,
            &self.issuer,
            &self.not_before,
            &self.not_after,
            &self.public_key,
        )
    }

    /// Check that `now` falls inside `[not_before, not_after]`.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Result<(), CertificateError> {
        if now < self.not_before {
            return Err(CertificateError::NotYetValid {
                subject: self.subject.clone(),
                not_before: self.not_before,
            });
        }
        if now > self.not_after {
            return Err(CertificateError::Expired {
                subject: self.subject.clone(),
                not_after: self.not_after,
            });
        }
        Ok(())
    }
}

/// A root authority whose signatures are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedRoot {
    pub name: String,
    pub public_key: VerifyingKey,
}

/// Set of trusted roots. Certificates are accepted only when issued by one of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustStore {
    pub roots: Vec<TrustedRoot>,
}

impl TrustStore {
    pub fn new(roots: Vec<TrustedRoot>) -> Self {
        Self { roots }
    }

    /// Verify validity window and chain of trust for `certificate` at `now`.
    pub fn verify(&self, certificate: &Certificate, now: DateTime<Utc>) -> Result<(), CertificateError> {
        certificate.check_validity(now)?;

        let untrusted = |reason: &str| CertificateError::Untrusted {
            subject: certificate.subject.clone(),
            reason: reason.to_string(),
        };

        let mut candidates = self
            .roots
            .iter()
            .filter(|root| root.name == certificate.issuer)
            .peekable();
        if candidates.peek().is_none() {
            return Err(untrusted("issuer is not in the trust store"));
        }

        let digest = certificate.digest();
        if candidates.any(|root| {
            root.public_key
                .verify(&digest, &certificate.issuer_signature)
                .is_ok()
        }) {
            Ok(())
        } else {
            Err(untrusted("issuer signature does not verify"))
        }
    }
}

/// Issues certificates. Used for development roots and tests.
pub struct CertificateAuthority {
    name: String,
    key: SigningKey,
}

impl CertificateAuthority {
    pub fn new(name: impl Into<String>, key: SigningKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(name, SigningKey::generate())
    }

    pub fn root(&self) -> TrustedRoot {
        TrustedRoot {
            name: self.name.clone(),
            public_key: self.key.verifying_key(),
        }
    }

    pub fn issue(
        &self,
        serial: u64,
        subject: impl Into<String>,
        public_key: VerifyingKey,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Certificate {
        let subject = subject.into();
        let digest = tbs_digest(serial, &subject, &self.name, &not_before, &not_after, &public_key);
        Certificate {
            serial,
            subject,
            issuer: self.name.clone(),
            not_before,
            not_after,
            public_key,
            issuer_signature: self.key.sign(&digest),
        }
    }
}
