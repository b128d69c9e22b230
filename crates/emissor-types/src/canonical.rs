use serde::{Deserialize, Serialize};

use crate::sequence::{DocumentId, SequenceNumber};

/// Deterministic unsigned serialization of a document.
///
/// Produced by the builder, consumed once by the signer. Identical inputs
/// always yield identical `bytes`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub sequence: SequenceNumber,
    pub document_id: DocumentId,
    pub bytes: Vec<u8>,
}

impl CanonicalDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
