//! Transaction orchestration.
//!
//! [`ScribePipeline::process`] runs one conversation through every stage in order:
//!
//! ```text
//! RECEIVED -> REDACTED -> EXTRACTED -> VALIDATED -> TRANSFORMED -> SCORED -> COMPLETED
//! ```
//!
//! Each stage appends one audit event before the next starts. The first unrecoverable error
//! appends a `failed` event and stops the transaction. Events already written stay in the
//! trail. A completed transaction may later be reviewed by a clinician.
//!
//! Collaborators are injected. The pipeline keeps no per-transaction state between calls, so
//! one instance can serve concurrent callers.

use crate::audit::{AuditEvent, AuditStage, AuditStatus, AuditTrail, JsonlAuditStore};
use crate::confidence::{ConfidenceProfile, ConfidenceScorer};
use crate::config::CoreConfig;
use crate::error::PipelineFailure;
use crate::extraction::{Normalizer, ParseStrategy, SchemaReport};
use crate::provider::{user_message, CompletionProvider, SYSTEM_PROMPT};
use crate::redaction::{RedactionAudit, Redactor, ValidationReport};
use crate::store::{BundleStore, DirectoryBundleStore};
use crate::{ScribeError, ScribeResult};
use fhir::{Bundle, BundleBuilder, BundleValidation, ResourceCounts};
use scribe_types::{CanonicalClinicalRecord, NonEmptyText};
use scribe_uuid::TransactionId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Transaction state
// ============================================================================

/// Lifecycle of one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Received,
    Redacted,
    Extracted,
    Validated,
    Transformed,
    Scored,
    Completed,
    Reviewed,
    Failed,
}

impl TransactionState {
    /// True once the pipeline run has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Reviewed | TransactionState::Failed
        )
    }

    /// Whether a review decision may be recorded in this state.
    pub fn accepts_review(self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Reviewed)
    }

    /// Moves to `next` if the lifecycle allows it.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::InvalidInput`] for a transition the lifecycle does not allow.
    pub fn advance(self, next: TransactionState) -> ScribeResult<Self> {
        use TransactionState::*;

        let allowed = match (self, next) {
            (Received, Redacted)
            | (Redacted, Extracted)
            | (Extracted, Validated)
            | (Validated, Transformed)
            | (Transformed, Scored)
            | (Scored, Completed)
            | (Completed, Reviewed)
            | (Reviewed, Reviewed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(ScribeError::InvalidInput(format!(
                "cannot move transaction from {self} to {next}"
            )))
        }
    }

    /// Derives the state recorded by a transaction's audit events, given in timestamp order.
    ///
    /// Only the latest run counts: a retry under the same id starts over at its `received`
    /// event, so an earlier failure does not shadow it.
    pub fn from_events(events: &[AuditEvent]) -> Option<Self> {
        let run_start = events
            .iter()
            .rposition(|e| e.stage == AuditStage::Received)
            .unwrap_or(0);
        let events = &events[run_start..];
        let has = |stage: AuditStage| events.iter().any(|e| e.stage == stage);

        if has(AuditStage::Failed) {
            return Some(TransactionState::Failed);
        }
        if has(AuditStage::Review) {
            return Some(TransactionState::Reviewed);
        }
        if has(AuditStage::Completed) {
            return Some(TransactionState::Completed);
        }

        events
            .iter()
            .rev()
            .filter(|e| e.status == AuditStatus::Success)
            .find_map(|e| match e.stage {
                AuditStage::Received => Some(TransactionState::Received),
                AuditStage::Redaction => Some(TransactionState::Redacted),
                AuditStage::Extraction => Some(TransactionState::Extracted),
                AuditStage::Validation => Some(TransactionState::Validated),
                AuditStage::Transformation => Some(TransactionState::Transformed),
                AuditStage::Scoring => Some(TransactionState::Scored),
                _ => None,
            })
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Received => "RECEIVED",
            TransactionState::Redacted => "REDACTED",
            TransactionState::Extracted => "EXTRACTED",
            TransactionState::Validated => "VALIDATED",
            TransactionState::Transformed => "TRANSFORMED",
            TransactionState::Scored => "SCORED",
            TransactionState::Completed => "COMPLETED",
            TransactionState::Reviewed => "REVIEWED",
            TransactionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Review decisions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    FlagForEscalation,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::FlagForEscalation => "flag_for_escalation",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = ScribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            "flag_for_escalation" => Ok(ReviewAction::FlagForEscalation),
            other => Err(ScribeError::InvalidInput(format!(
                "unknown review action '{other}', expected approve, reject or flag_for_escalation"
            ))),
        }
    }
}

/// A clinician's decision on a completed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub clinician_id: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ============================================================================
// Outcome
// ============================================================================

/// Everything a completed transaction produced.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutcome {
    pub transaction_id: TransactionId,
    pub state: TransactionState,
    pub masked_text: String,
    pub redaction: RedactionAudit,
    pub phi_validation: ValidationReport,
    pub strategy: ParseStrategy,
    pub schema: SchemaReport,
    pub record: CanonicalClinicalRecord,
    pub bundle: Bundle,
    pub resource_counts: ResourceCounts,
    pub bundle_validation: BundleValidation,
    /// False when the bundle store rejected the write. The bundle is still returned.
    pub persisted: bool,
    pub confidence: ConfidenceProfile,
}

// ============================================================================
// Pipeline
// ============================================================================

/// The stage an error happened in, before it is recorded.
struct StageFailure {
    stage: AuditStage,
    error: ScribeError,
}

fn at<E: Into<ScribeError>>(stage: AuditStage) -> impl FnOnce(E) -> StageFailure {
    move |err| StageFailure {
        stage,
        error: err.into(),
    }
}

/// Runs conversations through redaction, extraction, transformation and scoring.
#[derive(Clone)]
pub struct ScribePipeline {
    redactor: Redactor,
    builder: BundleBuilder,
    scorer: ConfidenceScorer,
    provider: Arc<dyn CompletionProvider>,
    audit: AuditTrail,
    bundles: Arc<dyn BundleStore>,
}

impl ScribePipeline {
    /// Creates a pipeline with the default redaction rules, bundle source tag and threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if the built-in PHI patterns fail to compile.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        audit: AuditTrail,
        bundles: Arc<dyn BundleStore>,
    ) -> ScribeResult<Self> {
        Ok(Self {
            redactor: Redactor::new()?,
            builder: BundleBuilder::default(),
            scorer: ConfidenceScorer::default(),
            provider,
            audit,
            bundles,
        })
    }

    /// Creates a pipeline backed by the file stores named in `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if a store directory cannot be created or read.
    pub fn from_config(
        cfg: &CoreConfig,
        provider: Arc<dyn CompletionProvider>,
    ) -> ScribeResult<Self> {
        let mut audit = AuditTrail::new(Arc::new(JsonlAuditStore::open(cfg.audit_log_dir())?));
        if let Some(mirror) = cfg.mirror_audit_dir() {
            audit = audit.with_secondary(Arc::new(JsonlAuditStore::open(mirror)?));
        }
        let bundles = Arc::new(DirectoryBundleStore::open(cfg.bundle_dir())?);

        Ok(Self::new(provider, audit, bundles)?
            .with_builder(BundleBuilder::new(cfg.source_tag()))
            .with_scorer(ConfidenceScorer::new(cfg.confidence_threshold())))
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_builder(mut self, builder: BundleBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_scorer(mut self, scorer: ConfidenceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn bundles(&self) -> &Arc<dyn BundleStore> {
        &self.bundles
    }

    /// Processes one conversation end to end.
    ///
    /// A caller-supplied `transaction_id` is used verbatim (after trimming); otherwise a
    /// UUID-v4 is generated.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineFailure`] naming the transaction and the failing stage. A `failed`
    /// audit event has been appended when the id was valid.
    pub fn process(
        &self,
        conversation: &str,
        transaction_id: Option<&str>,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let txn = TransactionId::resolve(transaction_id).map_err(|err| PipelineFailure {
            transaction_id: transaction_id.unwrap_or_default().trim().to_string(),
            stage: AuditStage::Received,
            error: err.into(),
        })?;

        let mut state = TransactionState::Received;
        match self.run(&txn, conversation, &mut state) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => Err(self.fail(&txn, state, failure)),
        }
    }

    /// Processes each conversation as an independent transaction, in order.
    pub fn process_batch<'a>(
        &self,
        conversations: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Result<PipelineOutcome, PipelineFailure>> {
        let results: Vec<_> = conversations
            .into_iter()
            .map(|conversation| self.process(conversation, None))
            .collect();

        tracing::info!(
            total = results.len(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            "batch processed"
        );
        results
    }

    /// Current lifecycle state of `transaction_id`, or `None` if it has no events.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Audit`] if the trail cannot be read.
    pub fn transaction_state(
        &self,
        transaction_id: &TransactionId,
    ) -> ScribeResult<Option<TransactionState>> {
        let events = self.audit.query(transaction_id.as_str())?;
        Ok(TransactionState::from_events(&events))
    }

    /// Records a clinician's review decision as a `review` audit event.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::InvalidInput`] unless the transaction has completed, and
    /// [`ScribeError::Audit`] if the event cannot be written.
    pub fn record_review(
        &self,
        transaction_id: &TransactionId,
        decision: &ReviewDecision,
    ) -> ScribeResult<AuditEvent> {
        let state = self.transaction_state(transaction_id)?.ok_or_else(|| {
            ScribeError::InvalidInput(format!("unknown transaction {transaction_id}"))
        })?;

        if !state.accepts_review() {
            return Err(ScribeError::InvalidInput(format!(
                "transaction {transaction_id} is {state}; only completed transactions can be reviewed"
            )));
        }
        state.advance(TransactionState::Reviewed)?;

        let event = self.audit.record(
            transaction_id,
            AuditStage::Review,
            AuditStatus::Success,
            json!({
                "action": decision.action,
                "clinician_id": decision.clinician_id,
                "notes": decision.notes,
            }),
        )?;

        tracing::info!(
            transaction_id = %transaction_id,
            action = %decision.action,
            "review recorded"
        );
        Ok(event)
    }

    fn run(
        &self,
        txn: &TransactionId,
        conversation: &str,
        state: &mut TransactionState,
    ) -> Result<PipelineOutcome, StageFailure> {
        // Received
        self.record(
            txn,
            AuditStage::Received,
            AuditStatus::Success,
            json!({ "input_length": conversation.chars().count() }),
        )?;
        if conversation.trim().is_empty() {
            return Err(StageFailure {
                stage: AuditStage::Received,
                error: ScribeError::InvalidInput("conversation text is empty".into()),
            });
        }

        // Redaction
        let (masked_text, redaction) = self.redactor.deidentify(conversation);
        let phi_validation = self.redactor.validate(&masked_text);
        if !phi_validation.is_safe {
            tracing::warn!(
                transaction_id = %txn,
                risks = phi_validation.remaining_phi_risks.len(),
                "possible PHI remains after redaction"
            );
        }
        self.record(
            txn,
            AuditStage::Redaction,
            AuditStatus::Success,
            json!({
                "original_length": redaction.original_length,
                "masked_length": redaction.masked_length,
                "redactions_by_type": redaction.redactions_by_type,
                "total_redactions": redaction.total_redactions,
                "validation_safe": phi_validation.is_safe,
                "risks": phi_validation.remaining_phi_risks,
            }),
        )?;
        *state = state.advance(TransactionState::Redacted).map_err(at(AuditStage::Redaction))?;

        // Extraction
        let prompt = user_message(&masked_text);
        let prompt_length = prompt.chars().count();
        let completion = match self.provider.complete(SYSTEM_PROMPT, &prompt) {
            Ok(text) => text,
            Err(err) => {
                self.record(
                    txn,
                    AuditStage::Extraction,
                    AuditStatus::Failure,
                    json!({
                        "prompt_length": prompt_length,
                        "response_length": 0,
                        "error": err.to_string(),
                    }),
                )?;
                return Err(at(AuditStage::Extraction)(err));
            }
        };

        let response_length = completion.chars().count();
        let (mut value, strategy) = match Normalizer::parse(&completion) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.record(
                    txn,
                    AuditStage::Extraction,
                    AuditStatus::Failure,
                    json!({
                        "prompt_length": prompt_length,
                        "response_length": response_length,
                        "error": err.to_string(),
                    }),
                )?;
                return Err(at(AuditStage::Extraction)(err));
            }
        };
        self.record(
            txn,
            AuditStage::Extraction,
            AuditStatus::Success,
            json!({
                "prompt_length": prompt_length,
                "response_length": response_length,
                "strategy": strategy,
            }),
        )?;
        *state = state.advance(TransactionState::Extracted).map_err(at(AuditStage::Extraction))?;

        // Validation
        let schema = Normalizer::validate(&mut value);
        let record = if schema.is_valid {
            Normalizer::into_record(value)
        } else {
            Err(ScribeError::Schema {
                errors: schema.errors.clone(),
            })
        };
        let record = match record {
            Ok(record) => {
                self.record(
                    txn,
                    AuditStage::Validation,
                    AuditStatus::Success,
                    json!({
                        "is_valid": true,
                        "errors": schema.errors,
                        "warnings": schema.warnings,
                    }),
                )?;
                record
            }
            Err(err) => {
                let errors = match &err {
                    ScribeError::Schema { errors } => errors.clone(),
                    other => vec![other.to_string()],
                };
                self.record(
                    txn,
                    AuditStage::Validation,
                    AuditStatus::Failure,
                    json!({
                        "is_valid": false,
                        "errors": errors,
                        "warnings": schema.warnings,
                    }),
                )?;
                return Err(at(AuditStage::Validation)(err));
            }
        };
        *state = state.advance(TransactionState::Validated).map_err(at(AuditStage::Validation))?;

        // Transformation
        let (bundle, resource_counts) = self.builder.build(&record, txn, None, None);
        let bundle_validation = bundle.validate();
        if !bundle_validation.is_valid {
            tracing::warn!(
                transaction_id = %txn,
                errors = bundle_validation.errors.len(),
                "bundle failed structural validation"
            );
        }
        let persisted = match self.bundles.upsert(txn, &bundle) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(transaction_id = %txn, error = %err, "bundle store write failed");
                false
            }
        };
        self.record(
            txn,
            AuditStage::Transformation,
            AuditStatus::Success,
            json!({
                "bundle_id": bundle.id,
                "resource_counts": resource_counts,
                "validation_passed": bundle_validation.is_valid,
                "schema_errors": bundle_validation.errors,
                "persisted": persisted,
            }),
        )?;
        *state = state
            .advance(TransactionState::Transformed)
            .map_err(at(AuditStage::Transformation))?;

        // Scoring
        let confidence = self.scorer.score(&record);
        self.record(
            txn,
            AuditStage::Scoring,
            AuditStatus::Success,
            json!({
                "overall": confidence.overall,
                "by_field": confidence.by_field,
                "low_confidence_fields": confidence.low_confidence_fields,
                "requires_human_review": confidence.requires_human_review,
            }),
        )?;
        *state = state.advance(TransactionState::Scored).map_err(at(AuditStage::Scoring))?;

        // Completed
        self.record(
            txn,
            AuditStage::Completed,
            AuditStatus::Success,
            json!({
                "bundle_id": bundle.id,
                "requires_human_review": confidence.requires_human_review,
            }),
        )?;
        *state = state
            .advance(TransactionState::Completed)
            .map_err(at(AuditStage::Completed))?;

        tracing::info!(
            transaction_id = %txn,
            redactions = redaction.total_redactions,
            resources = resource_counts.total(),
            overall = confidence.overall,
            requires_review = confidence.requires_human_review,
            "transaction completed"
        );

        Ok(PipelineOutcome {
            transaction_id: txn.clone(),
            state: *state,
            masked_text,
            redaction,
            phi_validation,
            strategy,
            schema,
            record,
            bundle,
            resource_counts,
            bundle_validation,
            persisted,
            confidence,
        })
    }

    fn record(
        &self,
        txn: &TransactionId,
        stage: AuditStage,
        status: AuditStatus,
        payload: serde_json::Value,
    ) -> Result<(), StageFailure> {
        self.audit
            .record(txn, stage, status, payload)
            .map(|_| ())
            .map_err(at(stage))
    }

    fn fail(
        &self,
        txn: &TransactionId,
        state: TransactionState,
        failure: StageFailure,
    ) -> PipelineFailure {
        let StageFailure { stage, error } = failure;

        if state.advance(TransactionState::Failed).is_ok() {
            let payload = json!({ "stage": stage, "error": error.to_string() });
            if let Err(err) = self
                .audit
                .record(txn, AuditStage::Failed, AuditStatus::Failure, payload)
            {
                tracing::warn!(
                    transaction_id = %txn,
                    error = %err,
                    "failed to record transaction failure"
                );
            }
        }

        tracing::warn!(transaction_id = %txn, stage = %stage, error = %error, "transaction failed");

        PipelineFailure {
            transaction_id: txn.to_string(),
            stage,
            error,
        }
    }
}
