use fhir::ResourceType;
use scribe_core::{
    AuditError, AuditEvent, AuditStage, AuditStatus, AuditStore, AuditTrail, BundleStore,
    CompletionProvider, ConfigLayer, CoreConfig, MemoryAuditStore, MemoryBundleStore,
    ProviderError, ReviewAction, ReviewDecision, ScribeError, ScribePipeline, TransactionState,
};
use scribe_types::NonEmptyText;
use scribe_uuid::TransactionId;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const CONVERSATION: &str = "Patient John Smith, DOB 05/15/1980, MRN 123456789, seen for chest pain. \
Doctor: Any allergies? Patient: Penicillin gives me hives. BP 150/95, HR 88.";

const COMPLETION: &str = r#"Here is the extraction:
```json
{
  "encounter_summary": {
    "chief_complaint": "Chest pain",
    "history_of_present_illness": "Intermittent chest pain for two days."
  },
  "vital_signs_extracted": {
    "blood_pressure": "150/95",
    "temperature": "N/A",
    "heart_rate": "88"
  },
  "clinical_entities": {
    "diagnoses_problems": ["Hypertension", {"name": "Chest pain", "status": "rule-out"}],
    "medication_requests_new_or_changed": [
      {"medication_name": "Lisinopril", "dosage": "10 mg", "route": "oral", "frequency": "daily"}
    ],
    "allergies": [{"name": "Penicillin", "reaction": "Hives", "severity": "moderate"}]
  },
  "assessment_plan_draft": "Start lisinopril, ECG today.",
  "ai_confidence_score": 84,
  "flagged_for_review": false
}
```"#;

/// Returns queued responses in order and remembers every prompt it was sent.
#[derive(Default)]
struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn with(responses: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn replying(text: &str) -> Arc<Self> {
        Self::with(vec![Ok(text.to_string())])
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts").clone()
    }
}

impl CompletionProvider for ScriptedProvider {
    fn complete(&self, _system: &str, user: &str) -> Result<String, ProviderError> {
        self.prompts.lock().expect("prompts").push(user.to_string());
        self.responses
            .lock()
            .expect("responses")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
    }
}

struct FailingAuditStore;

impl AuditStore for FailingAuditStore {
    fn append(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::FileWrite(std::io::Error::other("read-only volume")))
    }

    fn query(&self, _transaction_id: &str) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(Vec::new())
    }

    fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(Vec::new())
    }
}

struct Harness {
    pipeline: ScribePipeline,
    provider: Arc<ScriptedProvider>,
    bundles: Arc<MemoryBundleStore>,
}

fn harness(provider: Arc<ScriptedProvider>) -> Harness {
    let bundles = Arc::new(MemoryBundleStore::new());
    let pipeline = ScribePipeline::new(provider.clone(), AuditTrail::in_memory(), bundles.clone())
        .expect("pipeline");
    Harness {
        pipeline,
        provider,
        bundles,
    }
}

fn stages(pipeline: &ScribePipeline, transaction_id: &str) -> Vec<(AuditStage, AuditStatus)> {
    pipeline
        .audit()
        .query(transaction_id)
        .expect("query")
        .into_iter()
        .map(|e| (e.stage, e.status))
        .collect()
}

fn approve(clinician: &str) -> ReviewDecision {
    ReviewDecision {
        action: ReviewAction::Approve,
        clinician_id: NonEmptyText::new(clinician).expect("clinician"),
        notes: None,
    }
}

#[test]
fn completed_transaction_runs_every_stage() {
    let h = harness(ScriptedProvider::replying(COMPLETION));

    let outcome = h
        .pipeline
        .process(CONVERSATION, Some("txn-001"))
        .expect("completes");

    assert_eq!(outcome.transaction_id.as_str(), "txn-001");
    assert_eq!(outcome.state, TransactionState::Completed);
    assert!(outcome.masked_text.contains("[PATIENT_NAME]"));
    assert!(outcome.masked_text.contains("[MRN]"));
    assert!(outcome.redaction.total_redactions >= 3);

    assert_eq!(outcome.resource_counts.get(ResourceType::Patient), 1);
    assert_eq!(outcome.resource_counts.get(ResourceType::Encounter), 1);
    assert_eq!(outcome.resource_counts.get(ResourceType::Condition), 2);
    assert_eq!(outcome.resource_counts.get(ResourceType::MedicationRequest), 1);
    assert_eq!(outcome.resource_counts.get(ResourceType::AllergyIntolerance), 1);
    assert!(outcome.bundle_validation.is_valid);
    assert!(outcome.persisted);
    assert_eq!(outcome.bundle.meta.transaction_id, "txn-001");

    assert_eq!(outcome.confidence.overall, 84);
    assert!(outcome.schema.is_valid);
    assert_eq!(outcome.record.clinical_entities.medication_requests.len(), 1);

    use AuditStage::*;
    let recorded: Vec<AuditStage> = stages(&h.pipeline, "txn-001")
        .into_iter()
        .map(|(stage, _)| stage)
        .collect();
    assert_eq!(
        recorded,
        vec![Received, Redaction, Extraction, Validation, Transformation, Scoring, Completed]
    );

    let txn = TransactionId::parse("txn-001").expect("id");
    assert_eq!(h.bundles.get(&txn).expect("get"), Some(outcome.bundle));
}

#[test]
fn provider_only_sees_masked_text() {
    let h = harness(ScriptedProvider::replying(COMPLETION));
    h.pipeline.process(CONVERSATION, None).expect("completes");

    let prompts = h.provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("John Smith"));
    assert!(!prompts[0].contains("123456789"));
    assert!(!prompts[0].contains("05/15/1980"));
}

#[test]
fn generated_transaction_ids_are_uuids() {
    let h = harness(ScriptedProvider::replying(COMPLETION));
    let outcome = h.pipeline.process(CONVERSATION, None).expect("completes");
    assert_eq!(outcome.transaction_id.as_str().len(), 36);
    assert_eq!(
        h.pipeline
            .transaction_state(&outcome.transaction_id)
            .expect("state"),
        Some(TransactionState::Completed)
    );
}

#[test]
fn unparsable_completion_fails_at_extraction() {
    let h = harness(ScriptedProvider::replying("I could not find any clinical data."));

    let failure = h
        .pipeline
        .process(CONVERSATION, Some("txn-parse"))
        .expect_err("fails");

    assert_eq!(failure.transaction_id, "txn-parse");
    assert_eq!(failure.stage, AuditStage::Extraction);
    assert!(matches!(failure.error, ScribeError::Parse(_)));
    assert!(failure.to_string().contains("txn-parse"));

    assert_eq!(
        stages(&h.pipeline, "txn-parse"),
        vec![
            (AuditStage::Received, AuditStatus::Success),
            (AuditStage::Redaction, AuditStatus::Success),
            (AuditStage::Extraction, AuditStatus::Failure),
            (AuditStage::Failed, AuditStatus::Failure),
        ]
    );
    assert!(h.bundles.is_empty().expect("empty"));
}

#[test]
fn out_of_range_confidence_fails_at_validation() {
    let completion = r#"{"ai_confidence_score": 0}"#;
    let h = harness(ScriptedProvider::replying(completion));

    let failure = h
        .pipeline
        .process(CONVERSATION, Some("txn-schema"))
        .expect_err("fails");

    assert_eq!(failure.stage, AuditStage::Validation);
    match &failure.error {
        ScribeError::Schema { errors } => {
            assert!(errors.iter().any(|e| e.contains("ai_confidence_score")));
        }
        other => panic!("expected schema error, got {other:?}"),
    }

    let events = h.pipeline.audit().query("txn-schema").expect("query");
    let validation = events
        .iter()
        .find(|e| e.stage == AuditStage::Validation)
        .expect("validation event");
    assert_eq!(validation.status, AuditStatus::Failure);
    assert_eq!(validation.payload["is_valid"], false);
}

#[test]
fn provider_error_fails_at_extraction() {
    let provider = ScriptedProvider::with(vec![Err(ProviderError::Unavailable(
        "connection reset".into(),
    ))]);
    let h = harness(provider);

    let failure = h
        .pipeline
        .process(CONVERSATION, Some("txn-provider"))
        .expect_err("fails");

    assert_eq!(failure.stage, AuditStage::Extraction);
    assert!(matches!(&failure.error, ScribeError::Provider(msg) if msg.contains("connection reset")));
}

#[test]
fn empty_conversation_is_rejected_after_receipt() {
    let h = harness(ScriptedProvider::replying(COMPLETION));

    let failure = h
        .pipeline
        .process("   ", Some("txn-empty"))
        .expect_err("fails");

    assert_eq!(failure.stage, AuditStage::Received);
    assert!(matches!(failure.error, ScribeError::InvalidInput(_)));
    assert!(h.provider.prompts().is_empty());
    assert_eq!(
        stages(&h.pipeline, "txn-empty"),
        vec![
            (AuditStage::Received, AuditStatus::Success),
            (AuditStage::Failed, AuditStatus::Failure),
        ]
    );
}

#[test]
fn invalid_transaction_id_records_nothing() {
    let h = harness(ScriptedProvider::replying(COMPLETION));

    let failure = h
        .pipeline
        .process(CONVERSATION, Some("bad/id"))
        .expect_err("fails");

    assert_eq!(failure.stage, AuditStage::Received);
    assert!(matches!(failure.error, ScribeError::InvalidInput(_)));
    assert!(h.pipeline.audit().report(None).expect("report").contains("Total Events: 0"));
}

#[test]
fn primary_audit_failure_aborts_the_transaction() {
    let provider = ScriptedProvider::replying(COMPLETION);
    let pipeline = ScribePipeline::new(
        provider.clone(),
        AuditTrail::new(Arc::new(FailingAuditStore)),
        Arc::new(MemoryBundleStore::new()),
    )
    .expect("pipeline");

    let failure = pipeline
        .process(CONVERSATION, Some("txn-audit"))
        .expect_err("fails");

    assert_eq!(failure.stage, AuditStage::Received);
    assert!(matches!(failure.error, ScribeError::Audit(_)));
    assert!(provider.prompts().is_empty());
}

#[test]
fn secondary_audit_failure_is_tolerated() {
    let primary = Arc::new(MemoryAuditStore::new());
    let trail = AuditTrail::new(primary.clone()).with_secondary(Arc::new(FailingAuditStore));
    let pipeline = ScribePipeline::new(
        ScriptedProvider::replying(COMPLETION),
        trail,
        Arc::new(MemoryBundleStore::new()),
    )
    .expect("pipeline");

    pipeline
        .process(CONVERSATION, Some("txn-mirror"))
        .expect("completes");
    assert_eq!(primary.query("txn-mirror").expect("query").len(), 7);
}

#[test]
fn review_requires_a_completed_transaction() {
    let h = harness(ScriptedProvider::with(vec![
        Ok(COMPLETION.to_string()),
        Ok("not json".to_string()),
    ]));
    h.pipeline
        .process(CONVERSATION, Some("txn-ok"))
        .expect("completes");
    h.pipeline
        .process(CONVERSATION, Some("txn-bad"))
        .expect_err("fails");

    let ok = TransactionId::parse("txn-ok").expect("id");
    let event = h
        .pipeline
        .record_review(
            &ok,
            &ReviewDecision {
                action: ReviewAction::FlagForEscalation,
                clinician_id: NonEmptyText::new("dr-0042").expect("clinician"),
                notes: Some("Check ECG before approving".into()),
            },
        )
        .expect("review");
    assert_eq!(event.stage, AuditStage::Review);
    assert_eq!(event.payload["action"], "flag_for_escalation");
    assert_eq!(event.payload["clinician_id"], "dr-0042");
    assert_eq!(
        h.pipeline.transaction_state(&ok).expect("state"),
        Some(TransactionState::Reviewed)
    );

    let bad = TransactionId::parse("txn-bad").expect("id");
    let err = h
        .pipeline
        .record_review(&bad, &approve("dr-0042"))
        .expect_err("failed transaction");
    assert!(matches!(err, ScribeError::InvalidInput(msg) if msg.contains("FAILED")));

    let unknown = TransactionId::parse("txn-unknown").expect("id");
    assert!(h.pipeline.record_review(&unknown, &approve("dr-0042")).is_err());
}

#[test]
fn retried_transaction_can_be_reviewed() {
    let h = harness(ScriptedProvider::with(vec![
        Ok("not json".to_string()),
        Ok(COMPLETION.to_string()),
    ]));
    let txn = TransactionId::parse("txn-retry").expect("id");

    h.pipeline
        .process(CONVERSATION, Some("txn-retry"))
        .expect_err("first attempt fails");
    assert_eq!(
        h.pipeline.transaction_state(&txn).expect("state"),
        Some(TransactionState::Failed)
    );

    let outcome = h
        .pipeline
        .process(CONVERSATION, Some("txn-retry"))
        .expect("retry completes");
    assert_eq!(outcome.state, TransactionState::Completed);
    assert_eq!(
        h.pipeline.transaction_state(&txn).expect("state"),
        Some(TransactionState::Completed)
    );

    h.pipeline
        .record_review(&txn, &approve("dr-0042"))
        .expect("review after retry");
    assert_eq!(
        h.pipeline.transaction_state(&txn).expect("state"),
        Some(TransactionState::Reviewed)
    );
}

#[test]
fn batch_runs_independent_transactions() {
    let h = harness(ScriptedProvider::with(vec![
        Ok(COMPLETION.to_string()),
        Ok("{".to_string()),
        Ok(COMPLETION.to_string()),
    ]));

    let results = h
        .pipeline
        .process_batch([CONVERSATION, "Patient reports mild cough.", CONVERSATION]);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());

    let first = results[0].as_ref().expect("first");
    let third = results[2].as_ref().expect("third");
    assert_ne!(first.transaction_id, third.transaction_id);
    assert_eq!(h.bundles.len().expect("len"), 2);
}

#[test]
fn report_covers_one_transaction() {
    let h = harness(ScriptedProvider::with(vec![
        Ok(COMPLETION.to_string()),
        Ok(COMPLETION.to_string()),
    ]));
    h.pipeline
        .process(CONVERSATION, Some("txn-a"))
        .expect("a");
    h.pipeline
        .process(CONVERSATION, Some("txn-b"))
        .expect("b");

    let report = h.pipeline.audit().report(Some("txn-a")).expect("report");
    assert!(report.contains("Transaction ID: txn-a"));
    assert!(!report.contains("txn-b"));
    assert!(report.contains("Total Events: 7\n"));
    assert!(report.contains("--- transformation (1) ---"));
    assert!(report.contains("  - Overall Confidence: 84%"));
}

#[test]
fn file_backed_pipeline_persists_audit_and_bundles() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let layer = ConfigLayer {
        audit_log_dir: Some(dir.path().join("audit")),
        mirror_audit_dir: Some(dir.path().join("mirror")),
        bundle_dir: Some(dir.path().join("bundles")),
        ..ConfigLayer::default()
    };
    let config = CoreConfig::from_layers([layer]).expect("config");

    let pipeline = ScribePipeline::from_config(&config, ScriptedProvider::replying(COMPLETION))
        .expect("pipeline");
    pipeline
        .process(CONVERSATION, Some("txn-file"))
        .expect("completes");

    let audit_log: PathBuf = dir.path().join("audit").join("audit_events.jsonl");
    let mirror_log: PathBuf = dir.path().join("mirror").join("audit_events.jsonl");
    assert_eq!(std::fs::read_to_string(audit_log).expect("audit").lines().count(), 7);
    assert_eq!(std::fs::read_to_string(mirror_log).expect("mirror").lines().count(), 7);
    assert!(dir.path().join("bundles").join("txn-file.json").exists());

    let logged = std::fs::read_to_string(dir.path().join("audit").join("audit_events.jsonl"))
        .expect("audit");
    assert!(!logged.contains("John Smith"));
}
