//! Append-only audit trail.
//!
//! Every pipeline stage appends one immutable [`AuditEvent`] keyed by transaction id. Events
//! are never updated or removed.
//!
//! Durability:
//! - The primary [`AuditStore`] is the only durability boundary. A failed primary append is an
//!   error.
//! - An optional secondary store mirrors events. Its failures are logged and otherwise ignored.
//!
//! Each event carries an `event_id` derived from `(transaction_id, stage, timestamp)`. Stores
//! drop events whose id they have already seen, so retried writes are idempotent.

use crate::constants::AUDIT_LOG_FILENAME;
use crate::error::AuditError;
use chrono::{DateTime, SecondsFormat, Utc};
use scribe_uuid::TransactionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub type AuditResult<T> = std::result::Result<T, AuditError>;

// ============================================================================
// Events
// ============================================================================

/// Pipeline stage an event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Received,
    Redaction,
    Extraction,
    Validation,
    Transformation,
    Scoring,
    Review,
    Completed,
    Failed,
}

impl AuditStage {
    /// All stages in pipeline order.
    pub const ALL: [AuditStage; 9] = [
        AuditStage::Received,
        AuditStage::Redaction,
        AuditStage::Extraction,
        AuditStage::Validation,
        AuditStage::Transformation,
        AuditStage::Scoring,
        AuditStage::Review,
        AuditStage::Completed,
        AuditStage::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditStage::Received => "received",
            AuditStage::Redaction => "redaction",
            AuditStage::Extraction => "extraction",
            AuditStage::Validation => "validation",
            AuditStage::Transformation => "transformation",
            AuditStage::Scoring => "scoring",
            AuditStage::Review => "review",
            AuditStage::Completed => "completed",
            AuditStage::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        })
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: String,
    pub stage: AuditStage,
    pub status: AuditStatus,
    #[serde(default)]
    pub payload: Value,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        transaction_id: &TransactionId,
        stage: AuditStage,
        status: AuditStatus,
        payload: Value,
    ) -> Self {
        Self::at(Utc::now(), transaction_id, stage, status, payload)
    }

    /// Creates an event with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Utc>,
        transaction_id: &TransactionId,
        stage: AuditStage,
        status: AuditStatus,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Self::compute_event_id(transaction_id.as_str(), stage, &timestamp),
            timestamp,
            transaction_id: transaction_id.to_string(),
            stage,
            status,
            payload,
        }
    }

    /// SHA-256 hex digest of `(transaction_id, stage, timestamp)`.
    pub fn compute_event_id(
        transaction_id: &str,
        stage: AuditStage,
        timestamp: &DateTime<Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(transaction_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(stage.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(
            timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Durable event storage.
pub trait AuditStore: Send + Sync {
    /// Appends `event`. Appending an event whose `event_id` is already stored is a no-op.
    fn append(&self, event: &AuditEvent) -> AuditResult<()>;

    /// Returns every event for `transaction_id` in append order.
    fn query(&self, transaction_id: &str) -> AuditResult<Vec<AuditEvent>>;

    /// Returns every stored event in append order.
    fn events(&self) -> AuditResult<Vec<AuditEvent>>;
}

/// In-process store, used in tests and as a throwaway mirror.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        let mut events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        if !events.iter().any(|e| e.event_id == event.event_id) {
            events.push(event.clone());
        }
        Ok(())
    }

    fn query(&self, transaction_id: &str) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(events
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    fn events(&self) -> AuditResult<Vec<AuditEvent>> {
        let events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(events.clone())
    }
}

/// JSON-lines file store: one event per line in `<dir>/audit_events.jsonl`.
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl JsonlAuditStore {
    /// Opens (creating if needed) the log inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the directory cannot be created or an existing log cannot
    /// be read.
    pub fn open(dir: &Path) -> AuditResult<Self> {
        fs::create_dir_all(dir).map_err(AuditError::DirCreation)?;
        let path = dir.join(AUDIT_LOG_FILENAME);

        let seen = read_events(&path)?
            .into_iter()
            .map(|e| e.event_id)
            .collect();

        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        let mut seen = self.seen.lock().map_err(|_| AuditError::LockPoisoned)?;
        if seen.contains(&event.event_id) {
            return Ok(());
        }

        let mut line = serde_json::to_string(event).map_err(AuditError::Serialization)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(AuditError::FileWrite)?;
        file.write_all(line.as_bytes())
            .map_err(AuditError::FileWrite)?;
        file.flush().map_err(AuditError::FileWrite)?;

        seen.insert(event.event_id.clone());
        Ok(())
    }

    fn query(&self, transaction_id: &str) -> AuditResult<Vec<AuditEvent>> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|e| e.transaction_id == transaction_id)
            .collect())
    }

    fn events(&self) -> AuditResult<Vec<AuditEvent>> {
        read_events(&self.path)
    }
}

fn read_events(path: &Path) -> AuditResult<Vec<AuditEvent>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AuditError::FileRead(err)),
    };

    let mut seen = HashSet::new();
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent =
            serde_json::from_str(line).map_err(|source| AuditError::Deserialization {
                line: index + 1,
                source,
            })?;
        if seen.insert(event.event_id.clone()) {
            events.push(event);
        }
    }
    Ok(events)
}

// ============================================================================
// Trail
// ============================================================================

/// Records and reads the audit trail over a primary and an optional mirror store.
#[derive(Clone)]
pub struct AuditTrail {
    primary: Arc<dyn AuditStore>,
    secondary: Option<Arc<dyn AuditStore>>,
}

impl AuditTrail {
    pub fn new(primary: Arc<dyn AuditStore>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn AuditStore>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// A trail backed only by memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAuditStore::new()))
    }

    /// Appends `event` to the primary store, then mirrors it.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] only if the primary append fails.
    pub fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        self.primary.append(event)?;

        if let Some(secondary) = &self.secondary {
            if let Err(err) = secondary.append(event) {
                tracing::warn!(
                    transaction_id = %event.transaction_id,
                    stage = %event.stage,
                    error = %err,
                    "secondary audit store write failed"
                );
            }
        }

        Ok(())
    }

    /// Builds, appends and returns an event stamped now.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the primary append fails.
    pub fn record(
        &self,
        transaction_id: &TransactionId,
        stage: AuditStage,
        status: AuditStatus,
        payload: Value,
    ) -> AuditResult<AuditEvent> {
        let event = AuditEvent::new(transaction_id, stage, status, payload);
        self.append(&event)?;
        Ok(event)
    }

    /// Events for `transaction_id`, ordered by timestamp ascending.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the primary store cannot be read.
    pub fn query(&self, transaction_id: &str) -> AuditResult<Vec<AuditEvent>> {
        let mut events = self.primary.query(transaction_id)?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Renders a human-readable report grouped by stage, optionally for one transaction.
    ///
    /// # Errors
    ///
    /// Returns an [`AuditError`] if the primary store cannot be read.
    pub fn report(&self, transaction_id: Option<&str>) -> AuditResult<String> {
        let mut events = match transaction_id {
            Some(id) => self.primary.query(id)?,
            None => self.primary.events()?,
        };
        events.sort_by_key(|e| e.timestamp);
        Ok(render_report(&events, transaction_id, Utc::now()))
    }
}

fn render_report(
    events: &[AuditEvent],
    transaction_id: Option<&str>,
    generated: DateTime<Utc>,
) -> String {
    let mut report = String::from("=== AUDIT REPORT ===\n");
    report.push_str(&format!(
        "Generated: {}\n",
        generated.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    if let Some(id) = transaction_id {
        report.push_str(&format!("Transaction ID: {id}\n"));
    }
    report.push_str(&format!("Total Events: {}\n", events.len()));

    for stage in AuditStage::ALL {
        let group: Vec<&AuditEvent> = events.iter().filter(|e| e.stage == stage).collect();
        if group.is_empty() {
            continue;
        }

        report.push_str(&format!("\n--- {} ({}) ---\n", stage, group.len()));
        for event in group {
            report.push_str(&format!(
                "Timestamp: {}\n",
                event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
            report.push_str(&format!("Transaction ID: {}\n", event.transaction_id));
            report.push_str(&format!("Status: {}\n", event.status));
            for (label, value) in highlights(event) {
                report.push_str(&format!("  - {label}: {value}\n"));
            }
        }
    }

    report
}

fn highlights(event: &AuditEvent) -> Vec<(&'static str, String)> {
    let field = |key: &str| payload_text(&event.payload, key);

    match event.stage {
        AuditStage::Received => vec![("Input Length", field("input_length"))],
        AuditStage::Redaction => vec![
            ("Redactions", field("redactions_by_type")),
            ("Total Redactions", field("total_redactions")),
            ("Validation Safe", field("validation_safe")),
        ],
        AuditStage::Extraction => match event.status {
            AuditStatus::Success => vec![
                ("Strategy", field("strategy")),
                ("Response Length", field("response_length")),
            ],
            AuditStatus::Failure => vec![("Error", field("error"))],
        },
        AuditStage::Validation => vec![
            ("Valid", field("is_valid")),
            ("Errors", field("errors")),
            ("Warnings", count_text(&event.payload, "warnings")),
        ],
        AuditStage::Transformation => vec![
            ("Validation Passed", field("validation_passed")),
            ("Resources Created", field("resource_counts")),
        ],
        AuditStage::Scoring => vec![
            ("Overall Confidence", format!("{}%", field("overall"))),
            ("Low Confidence Fields", field("low_confidence_fields")),
            ("Requires Review", field("requires_human_review")),
        ],
        AuditStage::Review => vec![
            ("Action", field("action")),
            ("Clinician", field("clinician_id")),
        ],
        AuditStage::Completed => Vec::new(),
        AuditStage::Failed => vec![("Failed Stage", field("stage")), ("Error", field("error"))],
    }
}

fn payload_text(payload: &Value, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "N/A".into(),
        Some(other) => other.to_string(),
    }
}

fn count_text(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map_or_else(|| "0".into(), |items| items.len().to_string())
}
