use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::certificate::{Certificate, TrustStore};
use crate::keys::SigningKey;

/// Errors from obtaining a signing credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential file not found: {0}")]
    NotFound(PathBuf),

    #[error("cannot read credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credential {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl CredentialError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "set `credential` in emissor.toml or run `emissor keygen`",
            Self::Io { .. } => "check the credential file permissions",
            Self::Malformed { .. } => "re-export the credential file; it must hold `secret_key` and `certificate`",
        }
    }
}

/// A private key together with the certificate that vouches for it.
#[derive(Clone, Debug)]
pub struct SigningCredential {
    pub key: SigningKey,
    pub certificate: Certificate,
}

/// Source of the signing credential, consulted once per `prepare`.
pub trait CredentialProvider: Send + Sync {
    fn signing_credential(&self) -> Result<SigningCredential, CredentialError>;
}

/// Always returns the same credential.
pub struct StaticCredentialProvider {
    credential: SigningCredential,
}

impl StaticCredentialProvider {
    pub fn new(credential: SigningCredential) -> Self {
        Self { credential }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn signing_credential(&self) -> Result<SigningCredential, CredentialError> {
        Ok(self.credential.clone())
    }
}

/// On-disk credential layout: `{ "secret_key": "<hex>", "certificate": {...} }`.
#[derive(Serialize, Deserialize)]
pub struct CredentialFile {
    pub secret_key: String,
    pub certificate: Certificate,
}

impl CredentialFile {
    pub fn from_credential(credential: &SigningCredential) -> Self {
        Self {
            secret_key: credential.key.to_hex(),
            certificate: credential.certificate.clone(),
        }
    }
}

/// Reads the credential from a JSON file on every request, so a renewed
/// certificate is picked up without restarting.
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for FileCredentialProvider {
    fn signing_credential(&self) -> Result<SigningCredential, CredentialError> {
        let raw = read_file(&self.path)?;
        let file: CredentialFile =
            serde_json::from_slice(&raw).map_err(|e| CredentialError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        let key = SigningKey::from_hex(&file.secret_key).map_err(|e| CredentialError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(
            path = %self.path.display(),
            serial = file.certificate.serial,
            "loaded signing credential"
        );
        Ok(SigningCredential {
            key,
            certificate: file.certificate,
        })
    }
}

/// Load a trust store from a JSON file (`{ "roots": [...] }`).
pub fn load_trust_store(path: &Path) -> Result<TrustStore, CredentialError> {
    let raw = read_file(path)?;
    serde_json::from_slice(&raw).map_err(|e| CredentialError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CredentialError::NotFound(path.to_path_buf())
        } else {
            CredentialError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateAuthority;
    use chrono::{Duration, Utc};

    fn credential() -> SigningCredential {
        let ca = CertificateAuthority::generate("AC Test");
        let key = SigningKey::generate();
        let now = Utc::now();
        let certificate = ca.issue(
            1,
            "ACME LTDA",
            key.verifying_key(),
            now - Duration::days(1),
            now + Duration::days(1),
        );
        SigningCredential { key, certificate }
    }

    #[test]
    fn file_provider_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let original = credential();
        let file = CredentialFile::from_credential(&original);
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        let loaded = FileCredentialProvider::new(&path).signing_credential().unwrap();
        assert_eq!(loaded.key.verifying_key(), original.key.verifying_key());
        assert_eq!(loaded.certificate, original.certificate);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileCredentialProvider::new(dir.path().join("absent.json"))
            .signing_credential()
            .unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[test]
    fn garbage_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = FileCredentialProvider::new(&path).signing_credential().unwrap_err();
        assert!(matches!(err, CredentialError::Malformed { .. }));
    }

    #[test]
    fn trust_store_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        let ca = CertificateAuthority::generate("AC Test");
        let store = TrustStore::new(vec![ca.root()]);
        std::fs::write(&path, serde_json::to_vec(&store).unwrap()).unwrap();
        assert_eq!(load_trust_store(&path).unwrap(), store);
    }
}
