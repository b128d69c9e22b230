use std::fs;
use std::path::{Path, PathBuf};

use emissor_types::LedgerIdentity;

use crate::error::{StoreError, StoreResult};

/// Root of all persisted state. Each identity gets `<root>/<issuer>/<env>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub const SEQUENCE_FILE: &'static str = "sequence.json";
    pub const LEDGER_FILE: &'static str = "ledger.json";
    pub const LOCK_FILE: &'static str = ".lock";
    pub const ISSUED_DIR: &'static str = "issued";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity(&self, identity: &LedgerIdentity) -> IdentityPaths {
        let dir = self
            .root
            .join(identity.issuer.as_str())
            .join(identity.environment.as_str());
        IdentityPaths {
            identity: identity.clone(),
            sequence: dir.join(Self::SEQUENCE_FILE),
            ledger: dir.join(Self::LEDGER_FILE),
            lock: dir.join(Self::LOCK_FILE),
            issued: dir.join(Self::ISSUED_DIR),
            dir,
        }
    }
}

/// Files belonging to one (issuer, environment).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPaths {
    pub identity: LedgerIdentity,
    pub dir: PathBuf,
    pub sequence: PathBuf,
    pub ledger: PathBuf,
    pub lock: PathBuf,
    /// Issued NFS-e documents returned by the service, one file per access key.
    pub issued: PathBuf,
}

impl IdentityPaths {
    pub fn ensure_dir(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emissor_types::{Environment, IssuerId};

    #[test]
    fn identities_are_isolated() {
        let layout = DataLayout::new("/data");
        let issuer = IssuerId::new("12345678000199").unwrap();
        let staging = layout.identity(&LedgerIdentity::new(issuer.clone(), Environment::Staging));
        let prod = layout.identity(&LedgerIdentity::new(issuer, Environment::Production));

        assert_eq!(staging.sequence, Path::new("/data/12345678000199/homologacao/sequence.json"));
        assert_eq!(prod.ledger, Path::new("/data/12345678000199/producao/ledger.json"));
        assert_ne!(staging.lock, prod.lock);
        assert_eq!(prod.issued, Path::new("/data/12345678000199/producao/issued"));
    }
}
