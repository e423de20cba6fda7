//! # Scribe Core
//!
//! Core logic for the clinical scribe pipeline:
//! - PHI redaction of raw conversation text ([`redaction`])
//! - Tolerant parsing and schema normalization of completion text ([`extraction`])
//! - Heuristic per-field confidence scoring ([`confidence`])
//! - The append-only audit trail and its stores ([`audit`])
//! - Bundle persistence ([`store`])
//! - Orchestration of one transaction across all stages ([`pipeline`])
//!
//! FHIR mapping lives in the `fhir` crate. The completion provider is reached only through the
//! [`CompletionProvider`] trait, so transport and model concerns stay outside this crate.

pub mod audit;
pub mod confidence;
pub mod config;
pub mod constants;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod provider;
pub mod redaction;
pub mod store;

pub use audit::{
    AuditEvent, AuditStage, AuditStatus, AuditStore, AuditTrail, JsonlAuditStore,
    MemoryAuditStore,
};
pub use confidence::{ConfidenceProfile, ConfidenceScorer};
pub use config::{ConfigLayer, CoreConfig};
pub use error::{AuditError, ParseError, PipelineFailure, ScribeError, ScribeResult, StoreError};
pub use extraction::{NormalizedExtraction, Normalizer, ParseStrategy, SchemaReport};
pub use pipeline::{
    PipelineOutcome, ReviewAction, ReviewDecision, ScribePipeline, TransactionState,
};
pub use provider::{CompletionProvider, ProviderError, ReplayProvider};
pub use redaction::{PhiCategory, PhiRisk, RedactionAudit, Redactor, ValidationReport};
pub use store::{BundleStore, DirectoryBundleStore, MemoryBundleStore};
