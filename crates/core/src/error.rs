use crate::audit::AuditStage;

/// Every strategy failure from one normalization attempt.
///
/// Displays the last failure, which is the most permissive strategy's view of the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse completion: {}", last_failure(.failures))]
pub struct ParseError {
    failures: Vec<String>,
}

impl ParseError {
    pub(crate) fn new(failures: Vec<String>) -> Self {
        Self { failures }
    }

    /// All strategy failures, in the order the strategies ran.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn last_failure(&self) -> &str {
        last_failure(&self.failures)
    }
}

fn last_failure(failures: &[String]) -> &str {
    failures
        .last()
        .map(String::as_str)
        .unwrap_or("no parsing strategy was attempted")
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to create audit directory: {0}")]
    DirCreation(std::io::Error),
    #[error("failed to write audit log: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read audit log: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialize audit event: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize audit event at line {line}: {source}")]
    Deserialization {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("audit store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create bundle directory: {0}")]
    DirCreation(std::io::Error),
    #[error("failed to write bundle file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read bundle file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialize bundle: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to parse stored bundle {transaction_id}: {source}")]
    Parse {
        transaction_id: String,
        #[source]
        source: fhir::FhirError,
    },
    #[error("bundle store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ScribeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("schema validation failed: {}", errors.join("; "))]
    Schema { errors: Vec<String> },
    #[error("completion provider failed: {0}")]
    Provider(String),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    #[error("bundle store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),
}

impl From<scribe_uuid::UuidError> for ScribeError {
    fn from(err: scribe_uuid::UuidError) -> Self {
        ScribeError::InvalidInput(err.to_string())
    }
}

pub type ScribeResult<T> = std::result::Result<T, ScribeError>;

/// A transaction that stopped before completing.
///
/// Always names the transaction and the failing stage, so the failure can be traced in the
/// audit trail.
#[derive(Debug, thiserror::Error)]
#[error("transaction {transaction_id} failed at {stage}: {error}")]
pub struct PipelineFailure {
    pub transaction_id: String,
    pub stage: AuditStage,
    #[source]
    pub error: ScribeError,
}
