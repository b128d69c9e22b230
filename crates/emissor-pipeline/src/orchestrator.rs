use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use emissor_crypto::{CredentialProvider, SignedDocument, Signer};
use emissor_document::{BuildError, DocumentBuilder, FieldError, FieldValidator};
use emissor_ledger::{
    ClientRef, Confirmation, CorruptionNotice, EntryStatus, FailureDetail, FailureKind,
    FileLedger, LedgerEntry, LedgerReader, LedgerWriter, Resolution,
};
use emissor_store::{write_atomic, DataLayout, IdentityGuard, IdentityPaths, SequenceAllocator, StoreError};
use emissor_transport::{Delivered, Request, ResilientTransport, Sender, TransportError};
use emissor_types::{ClientId, DocumentId, DocumentModel, LedgerIdentity, Money, SequenceNumber};

use crate::audit::AuditReport;
use crate::config::OrchestratorConfig;
use crate::error::{PipelineError, PipelineResult, PrepareError, SubmitError};
use crate::response::{parse_submission_response, rejection_reason};
use crate::wire::{decode_document, submission_body, WireError};

/// Collaborators the orchestrator drives but does not own the policy of.
pub struct PipelineComponents {
    pub validator: Arc<dyn FieldValidator>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub signer: Signer,
    pub sender: Arc<dyn Sender>,
}

/// Where a submission is in its lifecycle. Used in log fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionPhase {
    Prepared,
    Submitting,
    /// An attempt produced no response; the service may or may not have the document.
    Ambiguous,
    Confirmed,
    Failed,
}

impl fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepared => "prepared",
            Self::Submitting => "submitting",
            Self::Ambiguous => "ambiguous",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        })
    }
}

/// A signed document with a `Draft` ledger entry, ready to send.
///
/// Consumed by [`Orchestrator::submit`] or [`Orchestrator::abandon`], so a
/// prepared document can start at most one attempt chain.
#[derive(Debug)]
pub struct PreparedSubmission {
    entry: LedgerEntry,
    signed: SignedDocument,
}

impl PreparedSubmission {
    pub fn sequence(&self) -> SequenceNumber {
        self.entry.sequence
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.entry.document_id
    }

    pub fn entry(&self) -> &LedgerEntry {
        &self.entry
    }

    pub fn signed(&self) -> &SignedDocument {
        &self.signed
    }
}

/// Terminal result of a submission, with the entry as recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed(LedgerEntry),
    Failed(LedgerEntry),
}

impl SubmissionOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Confirmed(e) | Self::Failed(e) => e,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Coordinates allocation, building, signing, submission and the ledger for
/// one (issuer, environment).
///
/// The only component that resolves ledger entries. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    paths: IdentityPaths,
    ledger: FileLedger,
    allocator: SequenceAllocator,
    builder: DocumentBuilder,
    validator: Arc<dyn FieldValidator>,
    credentials: Arc<dyn CredentialProvider>,
    signer: Signer,
    transport: ResilientTransport,
}

impl Orchestrator {
    /// Open the ledger and counter for `config.identity` under `layout`.
    ///
    /// A corrupt ledger is moved aside and reported through
    /// [`corruption`](Self::corruption). Audit findings are logged.
    pub fn open(
        layout: DataLayout,
        config: OrchestratorConfig,
        components: PipelineComponents,
    ) -> PipelineResult<Self> {
        let paths = layout.identity(&config.identity);
        paths.ensure_dir()?;
        let ledger = FileLedger::open(paths.clone())?;

        let orchestrator = Self {
            inner: Arc::new(Inner {
                paths,
                ledger,
                allocator: SequenceAllocator::new(layout),
                builder: DocumentBuilder::new(),
                validator: components.validator,
                credentials: components.credentials,
                signer: components.signer,
                transport: ResilientTransport::new(components.sender),
                config,
            }),
        };

        let report = orchestrator.audit()?;
        if report.is_clean() {
            debug!(identity = %report.identity, counter = report.counter, "audit clean");
        } else {
            warn!(
                identity = %report.identity,
                counter = report.counter,
                undrafted = report.undrafted_total,
                open_drafts = report.open_drafts.len(),
                counter_behind = report.counter_behind,
                corrupted = report.corruption.is_some(),
                "audit found inconsistencies; run `emissor audit` for details"
            );
        }
        Ok(orchestrator)
    }

    pub fn identity(&self) -> &LedgerIdentity {
        &self.inner.config.identity
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Set when the ledger was unreadable at open.
    pub fn corruption(&self) -> Option<&CorruptionNotice> {
        self.inner.ledger.corruption()
    }

    // ---- Emission ----

    /// Validate, allocate, build, sign, and record a `Draft`.
    ///
    /// Model and credential problems are reported before a number is
    /// allocated. Failures after allocation consume the number without a
    /// draft; see [`PrepareError::consumed_sequence`].
    pub fn prepare(&self, model: &DocumentModel) -> Result<PreparedSubmission, PrepareError> {
        let inner = &self.inner;
        let identity = &inner.config.identity;

        self.check_model(model)?;
        let credential = inner.credentials.signing_credential()?;
        inner.signer.check_credential(&credential, Utc::now())?;

        let guard = IdentityGuard::acquire(&inner.paths)?;
        let sequence = inner.allocator.allocate_next(&guard)?;

        let canonical = inner
            .builder
            .build(model, sequence, identity.environment)
            .map_err(|source| PrepareError::BuildAfterAllocation { sequence, source })?;
        let signed = inner
            .signer
            .sign(&canonical, &credential)
            .map_err(|source| PrepareError::SignAfterAllocation { sequence, source })?;

        let (total, foreign_total) = model
            .invoice
            .totals()
            .unwrap_or((Money::ZERO, Money::ZERO));
        let entry = LedgerEntry {
            sequence,
            document_id: signed.document_id.clone(),
            status: EntryStatus::Draft,
            client: ClientRef {
                id: model.client.id.clone(),
                name: model.client.name.clone(),
            },
            total,
            foreign_total,
            competence: model.invoice.competence,
            overrides: model.invoice.overrides.clone(),
            digest: signed.digest.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        inner
            .ledger
            .append_draft(&guard, entry.clone())
            .map_err(|source| PrepareError::DraftAfterAllocation { sequence, source })?;
        drop(guard);

        info!(
            seq = %sequence,
            document_id = %entry.document_id,
            client = %entry.client.id,
            phase = %SubmissionPhase::Prepared,
            "draft recorded"
        );
        Ok(PreparedSubmission { entry, signed })
    }

    /// Send a prepared document and record the outcome.
    ///
    /// Runs on a detached task: once started, the ledger update happens even
    /// if the returned future is dropped. Returns `Err` only when the outcome
    /// could not be recorded.
    pub async fn submit(&self, prepared: PreparedSubmission) -> Result<SubmissionOutcome, SubmitError> {
        let sequence = prepared.sequence();
        let this = self.clone();
        tokio::spawn(async move { this.drive(prepared).await })
            .await
            .map_err(|e| SubmitError::Interrupted {
                sequence,
                reason: e.to_string(),
            })?
    }

    /// Resolve a prepared document as withdrawn without sending it.
    pub fn abandon(&self, prepared: PreparedSubmission) -> PipelineResult<LedgerEntry> {
        let guard = IdentityGuard::acquire(&self.inner.paths)?;
        let entry = self.inner.ledger.update_status(
            &guard,
            prepared.sequence(),
            Resolution::Failed(FailureDetail::withdrawn(Utc::now())),
        )?;
        info!(seq = %entry.sequence, "draft withdrawn");
        Ok(entry)
    }

    /// Write the signed document to `<dir>/dry_run_dps_<seq>.xml`.
    pub fn export_signed(&self, prepared: &PreparedSubmission, dir: &Path) -> PipelineResult<PathBuf> {
        let path = dir.join(format!("dry_run_dps_{}.xml", prepared.sequence()));
        fs::create_dir_all(dir).map_err(|source| PipelineError::Export {
            path: path.clone(),
            source: StoreError::Io {
                path: dir.to_path_buf(),
                source,
            },
        })?;
        write_atomic(&path, prepared.signed.as_bytes()).map_err(|source| PipelineError::Export {
            path: path.clone(),
            source,
        })?;
        debug!(seq = %prepared.sequence(), path = %path.display(), "signed document exported");
        Ok(path)
    }

    // ---- Ledger queries ----

    /// Where the issued NFS-e of a confirmed entry was saved, if it was.
    pub fn issued_document(&self, entry: &LedgerEntry) -> Option<PathBuf> {
        let EntryStatus::Confirmed(c) = &entry.status else {
            return None;
        };
        let path = self.issued_path(entry.sequence, &c.access_key);
        path.is_file().then_some(path)
    }

    pub fn list_entries(&self) -> PipelineResult<Vec<LedgerEntry>> {
        Ok(self.inner.ledger.load_all()?)
    }

    pub fn entry(&self, sequence: SequenceNumber) -> PipelineResult<Option<LedgerEntry>> {
        Ok(self.inner.ledger.get(sequence)?)
    }

    /// Latest entry for `client`, used to pre-fill the next emission.
    pub fn last_override(&self, client: &ClientId) -> PipelineResult<Option<LedgerEntry>> {
        Ok(self.inner.ledger.last_override(client)?)
    }

    pub fn audit(&self) -> PipelineResult<AuditReport> {
        let inner = &self.inner;
        let counter = inner.allocator.current(&inner.config.identity)?;
        let skipped = inner.allocator.skipped(&inner.config.identity)?;
        let entries = inner.ledger.load_all()?;
        Ok(AuditReport::compute(
            inner.config.identity.clone(),
            counter,
            &skipped,
            &entries,
            inner.ledger.corruption().cloned(),
        ))
    }

    // ---- Sequence administration ----

    /// Last value handed out, 0 when none.
    pub fn current_sequence(&self) -> PipelineResult<u64> {
        Ok(self.inner.allocator.current(&self.inner.config.identity)?)
    }

    pub fn peek_next_sequence(&self) -> PipelineResult<SequenceNumber> {
        Ok(self.inner.allocator.peek_next(&self.inner.config.identity)?)
    }

    /// Move the counter forward so the next allocation is `value + 1`.
    pub fn advance_sequence_to(&self, value: u64) -> PipelineResult<()> {
        let guard = IdentityGuard::acquire(&self.inner.paths)?;
        self.inner.allocator.advance_to(&guard, value)?;
        info!(identity = %self.inner.config.identity, value, "sequence advanced");
        Ok(())
    }

    // ---- Internals ----

    /// `issued/<access key>.xml`, or `issued/nfse_<seq>.xml` when the key is
    /// not safe as a file name.
    fn issued_path(&self, sequence: SequenceNumber, access_key: &str) -> PathBuf {
        let name = if !access_key.is_empty() && access_key.chars().all(|c| c.is_ascii_alphanumeric()) {
            format!("{access_key}.xml")
        } else {
            format!("nfse_{sequence}.xml")
        };
        self.inner.paths.issued.join(name)
    }

    /// Failures are logged only; the confirmation is already recorded.
    fn save_issued(&self, sequence: SequenceNumber, access_key: &str, encoded: &str) {
        let path = self.issued_path(sequence, access_key);
        let written = decode_document(encoded)
            .map_err(|e| e.to_string())
            .and_then(|xml| {
                fs::create_dir_all(&self.inner.paths.issued).map_err(|e| e.to_string())?;
                write_atomic(&path, &xml).map_err(|e| e.to_string())
            });
        match written {
            Ok(()) => info!(seq = %sequence, path = %path.display(), "issued document saved"),
            Err(error) => warn!(seq = %sequence, %error, "issued document could not be saved"),
        }
    }

    fn check_model(&self, model: &DocumentModel) -> Result<(), BuildError> {
        let inner = &self.inner;
        let mut violations = inner.validator.validate(model);
        if let Err(structural) = inner.builder.check(model) {
            for v in structural.violations {
                if !violations.contains(&v) {
                    violations.push(v);
                }
            }
        }
        let issuer = &inner.config.identity.issuer;
        if &model.issuer.tax_id != issuer {
            violations.push(FieldError::new(
                "issuer.tax_id",
                format!("does not match the ledger issuer {issuer}"),
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            debug!(violations = violations.len(), "model rejected");
            Err(BuildError { violations })
        }
    }

    async fn drive(&self, prepared: PreparedSubmission) -> Result<SubmissionOutcome, SubmitError> {
        let sequence = prepared.sequence();
        let (resolution, issued) = match submission_body(prepared.signed.as_bytes()) {
            Ok(body) => self.exchange(&prepared, body).await,
            Err(e) => (self.unsendable(&e), None),
        };

        let this = self.clone();
        let entry = tokio::task::spawn_blocking(move || {
            let entry = this.record(sequence, resolution)?;
            if let (EntryStatus::Confirmed(c), Some(encoded)) = (&entry.status, issued) {
                this.save_issued(sequence, &c.access_key, &encoded);
            }
            Ok::<_, SubmitError>(entry)
        })
        .await
        .map_err(|e| SubmitError::Interrupted {
            sequence,
            reason: e.to_string(),
        })??;

        Ok(match &entry.status {
            EntryStatus::Confirmed(c) => {
                info!(seq = %sequence, access_key = %c.access_key, attempts = c.attempts, phase = %SubmissionPhase::Confirmed, "submission confirmed");
                SubmissionOutcome::Confirmed(entry)
            }
            _ => {
                warn!(seq = %sequence, phase = %SubmissionPhase::Failed, "submission failed");
                SubmissionOutcome::Failed(entry)
            }
        })
    }

    /// Send the encoded document and turn whatever came back into a resolution,
    /// plus the issued NFS-e payload when the service returned one.
    async fn exchange(&self, prepared: &PreparedSubmission, body: Vec<u8>) -> (Resolution, Option<String>) {
        let inner = &self.inner;
        let sequence = prepared.sequence();
        let endpoint = &inner.config.endpoint;
        let request = Request::post_json(endpoint.submit_url.clone(), body, endpoint.timeout);

        info!(seq = %sequence, endpoint = %request.endpoint, phase = %SubmissionPhase::Submitting, "submitting");
        let result = inner
            .transport
            .call(&request, &inner.config.submission_policy)
            .await;
        if let Err(e) = &result {
            if e.is_no_response() {
                warn!(seq = %sequence, attempts = e.attempts(), phase = %SubmissionPhase::Ambiguous, "no response received");
            }
        }
        self.resolve(prepared, result)
    }

    /// Nothing was sent, so the number is withdrawn rather than left open.
    fn unsendable(&self, err: &WireError) -> Resolution {
        warn!(error = %err, "document could not be encoded");
        Resolution::Failed(FailureDetail {
            kind: FailureKind::Withdrawn,
            message: format!("document could not be encoded for submission: {err}"),
            endpoint: None,
            hint: "nothing was sent; report this as a bug".to_string(),
            attempts: 0,
            failed_at: Utc::now(),
        })
    }

    fn resolve(
        &self,
        prepared: &PreparedSubmission,
        result: Result<Delivered, TransportError>,
    ) -> (Resolution, Option<String>) {
        let config = &self.inner.config;
        let now = Utc::now();

        match result {
            Ok(delivered) => match parse_submission_response(
                &delivered.response.body,
                prepared.document_id(),
                &config.accepted_status_codes,
            ) {
                Ok(accepted) => (
                    Resolution::Confirmed(Confirmation {
                        access_key: accepted.access_key,
                        document_number: accepted.document_number,
                        status_code: accepted.status_code,
                        message: accepted.message,
                        attempts: delivered.attempts,
                        confirmed_at: now,
                    }),
                    accepted.issued_document,
                ),
                Err(e) => (
                    Resolution::Failed(FailureDetail {
                        kind: FailureKind::ProtocolContract,
                        message: e.to_string(),
                        endpoint: Some(config.endpoint.submit_url.clone()),
                        hint: e.hint().to_string(),
                        attempts: delivered.attempts,
                        failed_at: now,
                    }),
                    None,
                ),
            },
            Err(e) => {
                let (kind, message) = match &e {
                    TransportError::NoResponse { .. } => (FailureKind::NoResponse, e.to_string()),
                    TransportError::TimeoutExceeded { .. } => {
                        (FailureKind::TimeoutExceeded, e.to_string())
                    }
                    TransportError::ResponseReceived { status, body, .. } => (
                        FailureKind::ResponseReceived { status: *status },
                        format!("HTTP {status}: {}", rejection_reason(body)),
                    ),
                };
                let failure = FailureDetail {
                    kind,
                    message,
                    endpoint: Some(e.endpoint().to_string()),
                    hint: e.hint().to_string(),
                    attempts: e.attempts(),
                    failed_at: now,
                };
                (Resolution::Failed(failure), None)
            }
        }
    }

    fn record(&self, sequence: SequenceNumber, resolution: Resolution) -> Result<LedgerEntry, SubmitError> {
        let guard = match IdentityGuard::acquire(&self.inner.paths) {
            Ok(guard) => guard,
            Err(source) => {
                return Err(SubmitError::Lock {
                    sequence,
                    outcome: Box::new(resolution),
                    source,
                })
            }
        };
        self.inner
            .ledger
            .update_status(&guard, sequence, resolution.clone())
            .map_err(|source| SubmitError::Ledger {
                sequence,
                outcome: Box::new(resolution),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels() {
        assert_eq!(SubmissionPhase::Ambiguous.to_string(), "ambiguous");
        assert_eq!(SubmissionPhase::Prepared.to_string(), "prepared");
    }
}
