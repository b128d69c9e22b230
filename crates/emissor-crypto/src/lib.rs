//! Document signing for the emission pipeline.
//!
//! Provides domain-separated BLAKE3 digests, Ed25519 keys, certificates
//! checked against a trust store, signing credentials and the [`Signer`]
//! that envelopes a signature block into canonical document bytes.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod certificate;
pub mod credential;
pub mod hasher;
pub mod keys;
pub mod sign;

pub use certificate::{Certificate, CertificateAuthority, CertificateError, TrustStore, TrustedRoot};
pub use credential::{
    load_trust_store, CredentialError, CredentialFile, CredentialProvider, FileCredentialProvider,
    SigningCredential, StaticCredentialProvider,
};
pub use hasher::ContentHasher;
pub use keys::{Signature, SignatureError, SigningKey, VerifyingKey};
pub use sign::{SignError, SignedDocument, Signer};
