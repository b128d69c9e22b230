use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use emissor_types::{ClientId, DocumentId, Money, SequenceNumber};

/// One row of the ledger, keyed by sequence number.
///
/// Written as `Draft` in the same critical section that allocated the
/// number, then resolved exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: SequenceNumber,
    pub document_id: DocumentId,
    pub status: EntryStatus,
    pub client: ClientRef,
    pub total: Money,
    pub foreign_total: Money,
    pub competence: NaiveDate,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    /// Hex digest of the canonical document that was signed.
    pub digest: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn is_draft(&self) -> bool {
        matches!(self.status, EntryStatus::Draft)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: ClientId,
    pub name: String,
}

/// Lifecycle of an entry. `Draft` is the only non-terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    Draft,
    Confirmed(Confirmation),
    Failed(FailureDetail),
}

impl EntryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed(_) => "confirmed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Identifiers returned by the remote service on acceptance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Access key of the issued invoice (`chNFSe`).
    pub access_key: String,
    /// Invoice number assigned remotely (`nNFSe`).
    pub document_number: String,
    /// Status code reported by the service (`cStat`).
    pub status_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub attempts: u32,
    pub confirmed_at: DateTime<Utc>,
}

/// Why an entry ended up `Failed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub hint: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl FailureDetail {
    pub const WITHDRAWN_MESSAGE: &'static str = "withdrawn before submission";

    /// A prepared document that was never sent.
    pub fn withdrawn(at: DateTime<Utc>) -> Self {
        Self {
            kind: FailureKind::Withdrawn,
            message: Self::WITHDRAWN_MESSAGE.to_string(),
            endpoint: None,
            hint: "emit again to send a new document; the withdrawn number stays consumed".to_string(),
            attempts: 0,
            failed_at: at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// An attempt ended without a response and the policy allowed no retry.
    NoResponse,
    /// Every attempt ended without a response and retries ran out.
    TimeoutExceeded,
    /// The service answered with a non-success status.
    ResponseReceived { status: u16 },
    /// A success status whose body broke the response contract.
    ProtocolContract,
    /// Never submitted.
    Withdrawn,
}

/// Terminal outcome accepted by `update_status`. There is no way back to `Draft`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(Confirmation),
    Failed(FailureDetail),
}

impl Resolution {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Confirmed(c) => c.confirmed_at,
            Self::Failed(f) => f.failed_at,
        }
    }
}

impl From<Resolution> for EntryStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Confirmed(c) => Self::Confirmed(c),
            Resolution::Failed(f) => Self::Failed(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_json_is_tagged() {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 13, 0, 0).unwrap();
        let failed = EntryStatus::Failed(FailureDetail {
            kind: FailureKind::ResponseReceived { status: 500 },
            message: "internal error".into(),
            endpoint: Some("https://sefin.example/nfse".into()),
            hint: "check the service status".into(),
            attempts: 1,
            failed_at: at,
        });
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"]["type"], "response_received");
        assert_eq!(json["kind"]["status"], 500);

        let back: EntryStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed);
        assert_eq!(serde_json::to_value(EntryStatus::Draft).unwrap()["state"], "draft");
    }

    #[test]
    fn withdrawn_detail() {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 13, 0, 0).unwrap();
        let d = FailureDetail::withdrawn(at);
        assert_eq!(d.kind, FailureKind::Withdrawn);
        assert_eq!(d.message, "withdrawn before submission");
        assert_eq!(Resolution::Failed(d).at(), at);
    }
}
