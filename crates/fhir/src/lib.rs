//! FHIR R4 resource building for the clinical scribe pipeline.
//!
//! This crate maps a [`CanonicalClinicalRecord`](scribe_types::CanonicalClinicalRecord) into a
//! `collection` [`Bundle`] of typed resources:
//! - exactly one Patient and one Encounter
//! - one Condition per diagnosis, one MedicationRequest per medication and one
//!   AllergyIntolerance per allergy, in input order
//!
//! It also provides:
//! - static terminology lookup (ICD-10 / RxNorm / SNOMED CT) for display names
//! - fixed status, route and severity enumerations with generic fallbacks
//! - structural bundle validation over raw JSON, so stored bundles can be checked too
//!
//! Building never fails: unexpected entity shapes degrade to defaults and terminology misses
//! keep the original display text. Only parsing stored bundles can return a [`FhirError`].

pub mod bundle;
pub mod codes;
pub mod datatypes;
pub mod resources;
pub mod terminology;

// Re-export facades
pub use bundle::{Bundle, BundleBuilder, BundleEntry, BundleMeta, BundleValidation};
pub use resources::{Resource, ResourceCounts, ResourceType};
pub use terminology::{TermKind, Terminology, TerminologyMatch};

// Re-export enumerations
pub use codes::{
    AllergySeverity, ConditionClinicalStatus, ConditionVerificationStatus, RouteOfAdministration,
};

/// Default `meta.source` tag written into every bundle.
pub const DEFAULT_SOURCE_TAG: &str = "clinical-scribe-ai";

/// Errors returned by the `fhir` crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
