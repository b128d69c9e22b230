use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use emissor_types::{CanonicalDocument, DocumentId, SequenceNumber};

use crate::certificate::{CertificateError, TrustStore};
use crate::credential::SigningCredential;
use crate::hasher::ContentHasher;
use crate::keys::{Signature, SignatureError, VerifyingKey};

/// Errors from [`Signer::sign`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("canonical document {0} has no closing root element to envelope the signature")]
    MissingRootClose(DocumentId),
}

/// Canonical bytes with an enveloped signature block.
///
/// `signed_at` is the only part that differs between two signatures of the
/// same canonical document with the same credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    pub sequence: SequenceNumber,
    pub document_id: DocumentId,
    pub digest: String,
    pub signed_at: DateTime<Utc>,
    pub signature: Signature,
    pub certificate_serial: u64,
    pub bytes: Vec<u8>,
}

impl SignedDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check this signature against the canonical bytes it claims to cover.
    pub fn verify(&self, canonical: &[u8], key: &VerifyingKey) -> Result<(), SignatureError> {
        let digest = ContentHasher::DOCUMENT.hash(canonical);
        if hex::encode(digest) != self.digest {
            return Err(SignatureError::InvalidSignature);
        }
        key.verify(&signed_info(&digest, &self.signed_at), &self.signature)
    }
}

fn signing_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn signed_info(digest: &[u8; 32], signed_at: &DateTime<Utc>) -> [u8; 32] {
    ContentHasher::SIGNED_INFO.hash_parts(&[digest, signing_time(signed_at).as_bytes()])
}

/// Verifies the credential against the trust store, then signs.
pub struct Signer {
    trust: TrustStore,
}

impl Signer {
    pub fn new(trust: TrustStore) -> Self {
        Self { trust }
    }

    pub fn sign(
        &self,
        canonical: &CanonicalDocument,
        credential: &SigningCredential,
    ) -> Result<SignedDocument, SignError> {
        self.sign_at(canonical, credential, Utc::now())
    }

    /// Run the checks `sign_at` would run, without a document.
    ///
    /// Lets callers refuse a credential before spending a sequence number on it.
    pub fn check_credential(
        &self,
        credential: &SigningCredential,
        now: DateTime<Utc>,
    ) -> Result<(), CertificateError> {
        let certificate = &credential.certificate;
        self.trust.verify(certificate, now)?;
        if certificate.public_key != credential.key.verifying_key() {
            return Err(CertificateError::KeyMismatch {
                subject: certificate.subject.clone(),
            });
        }
        Ok(())
    }

    /// Sign as of `now`, which drives both the validity check and the embedded timestamp.
    pub fn sign_at(
        &self,
        canonical: &CanonicalDocument,
        credential: &SigningCredential,
        now: DateTime<Utc>,
    ) -> Result<SignedDocument, SignError> {
        self.check_credential(credential, now)?;
        let certificate = &credential.certificate;

        let bytes = canonical.as_bytes();
        let split = root_close_offset(bytes)
            .ok_or_else(|| SignError::MissingRootClose(canonical.document_id.clone()))?;

        let signed_at = now.trunc_subsecs(0);
        let digest = ContentHasher::DOCUMENT.hash(bytes);
        let signature = credential.key.sign(&signed_info(&digest, &signed_at));

        let block = format!(
            concat!(
                "<Signature>",
                "<SignedInfo>",
                "<DigestMethod Algorithm=\"{digest_domain}\"/>",
                "<DigestValue>{digest}</DigestValue>",
                "<SigningTime>{time}</SigningTime>",
                "<SignatureMethod Algorithm=\"ed25519\"/>",
                "</SignedInfo>",
                "<SignatureValue>{signature}</SignatureValue>",
                "<KeyInfo>",
                "<SerialNumber>{serial}</SerialNumber>",
                "<SubjectName>{subject}</SubjectName>",
                "<IssuerName>{issuer}</IssuerName>",
                "<PublicKey>{public_key}</PublicKey>",
                "</KeyInfo>",
                "</Signature>"
            ),
            digest_domain = ContentHasher::DOCUMENT.domain(),
            digest = hex::encode(digest),
            time = signing_time(&signed_at),
            signature = signature.to_hex(),
            serial = certificate.serial,
            subject = escape_text(&certificate.subject),
            issuer = escape_text(&certificate.issuer),
            public_key = certificate.public_key.to_hex(),
        );

        let mut signed = Vec::with_capacity(bytes.len() + block.len());
        signed.extend_from_slice(&bytes[..split]);
        signed.extend_from_slice(block.as_bytes());
        signed.extend_from_slice(&bytes[split..]);

        debug!(
            seq = canonical.sequence.get(),
            document_id = %canonical.document_id,
            serial = certificate.serial,
            "document signed"
        );

        Ok(SignedDocument {
            sequence: canonical.sequence,
            document_id: canonical.document_id.clone(),
            digest: hex::encode(digest),
            signed_at,
            signature,
            certificate_serial: certificate.serial,
            bytes: signed,
        })
    }
}

/// Offset of the final `</...>` tag, ignoring trailing whitespace.
fn root_close_offset(bytes: &[u8]) -> Option<usize> {
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace())? + 1;
    if bytes[end - 1] != b'>' {
        return None;
    }
    let start = bytes[..end].windows(2).rposition(|w| w == b"</")?;
    Some(start)
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateAuthority;
    use crate::keys::SigningKey;
    use chrono::{Duration, TimeZone};
    use emissor_types::IssuerId;

    fn canonical() -> CanonicalDocument {
        let issuer = IssuerId::new("12345678000199").unwrap();
        let sequence = SequenceNumber::new(7);
        CanonicalDocument {
            sequence,
            document_id: DocumentId::derive("4205407", &issuer, "900", sequence).unwrap(),
            bytes: b"<DPS versao=\"1.00\"><infDPS>x</infDPS></DPS>".to_vec(),
        }
    }

    fn fixture() -> (Signer, SigningCredential, DateTime<Utc>) {
        let ca = CertificateAuthority::generate("AC Test");
        let key = SigningKey::generate();
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 13, 0, 0).unwrap();
        let certificate = ca.issue(
            42,
            "ACME <Software> LTDA",
            key.verifying_key(),
            now - Duration::days(10),
            now + Duration::days(10),
        );
        (
            Signer::new(TrustStore::new(vec![ca.root()])),
            SigningCredential { key, certificate },
            now,
        )
    }

    #[test]
    fn signature_is_enveloped_before_root_close() {
        let (signer, credential, now) = fixture();
        let signed = signer.sign_at(&canonical(), &credential, now).unwrap();
        let text = String::from_utf8(signed.bytes.clone()).unwrap();
        assert!(text.starts_with("<DPS versao=\"1.00\"><infDPS>x</infDPS><Signature>"));
        assert!(text.ends_with("</Signature></DPS>"));
        assert!(text.contains("<SubjectName>ACME &lt;Software&gt; LTDA</SubjectName>"));
        assert!(text.contains("<SigningTime>2026-10-01T13:00:00Z</SigningTime>"));
    }

    #[test]
    fn signature_verifies_against_canonical_bytes() {
        let (signer, credential, now) = fixture();
        let doc = canonical();
        let signed = signer.sign_at(&doc, &credential, now).unwrap();
        let key = credential.key.verifying_key();
        assert!(signed.verify(&doc.bytes, &key).is_ok());
        assert!(signed.verify(b"<DPS>other</DPS>", &key).is_err());
    }

    #[test]
    fn same_instant_signs_identically() {
        let (signer, credential, now) = fixture();
        let a = signer.sign_at(&canonical(), &credential, now).unwrap();
        let b = signer.sign_at(&canonical(), &credential, now).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn only_timestamp_differs_across_instants() {
        let (signer, credential, now) = fixture();
        let a = signer.sign_at(&canonical(), &credential, now).unwrap();
        let b = signer
            .sign_at(&canonical(), &credential, now + Duration::seconds(5))
            .unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.signed_at, b.signed_at);
    }

    #[test]
    fn expired_certificate_refuses_to_sign() {
        let (signer, credential, now) = fixture();
        let err = signer
            .sign_at(&canonical(), &credential, now + Duration::days(11))
            .unwrap_err();
        assert!(matches!(err, SignError::Certificate(CertificateError::Expired { .. })));
    }

    #[test]
    fn untrusted_root_refuses_to_sign() {
        let (_, credential, now) = fixture();
        let signer = Signer::new(TrustStore::default());
        let err = signer.sign_at(&canonical(), &credential, now).unwrap_err();
        assert!(matches!(err, SignError::Certificate(CertificateError::Untrusted { .. })));
    }

    #[test]
    fn foreign_key_is_a_mismatch() {
        let (signer, mut credential, now) = fixture();
        credential.key = SigningKey::generate();
        let err = signer.sign_at(&canonical(), &credential, now).unwrap_err();
        assert!(matches!(err, SignError::Certificate(CertificateError::KeyMismatch { .. })));
    }

    #[test]
    fn check_credential_matches_sign_checks() {
        let (signer, credential, now) = fixture();
        assert!(signer.check_credential(&credential, now).is_ok());
        assert!(matches!(
            signer.check_credential(&credential, now + Duration::days(11)),
            Err(CertificateError::Expired { .. })
        ));
    }

    #[test]
    fn document_without_root_close_is_rejected() {
        let (signer, credential, now) = fixture();
        let mut doc = canonical();
        doc.bytes = b"plain text".to_vec();
        assert!(matches!(
            signer.sign_at(&doc, &credential, now),
            Err(SignError::MissingRootClose(_))
        ));
    }
}
