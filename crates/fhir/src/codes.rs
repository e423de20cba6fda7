//! Fixed enumerations for raw provider values.
//!
//! Every `from_raw` is total: unrecognised input falls back to a generic value instead of
//! failing the build.

use crate::datatypes::{Coding, CONDITION_CLINICAL_SYSTEM, CONDITION_VERIFICATION_SYSTEM};
use crate::datatypes::SNOMED_SYSTEM;

/// FHIR `condition-clinical` code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionClinicalStatus {
    Active,
    Recurrence,
    Relapse,
    Inactive,
    Remission,
    Resolved,
}

impl ConditionClinicalStatus {
    /// Maps a raw diagnosis status. Unknown values are treated as active.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "recurrence" => Self::Recurrence,
            "relapse" => Self::Relapse,
            "inactive" => Self::Inactive,
            "remission" => Self::Remission,
            "resolved" => Self::Resolved,
            _ => Self::Active,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recurrence => "recurrence",
            Self::Relapse => "relapse",
            Self::Inactive => "inactive",
            Self::Remission => "remission",
            Self::Resolved => "resolved",
        }
    }

    pub fn coding(self) -> Coding {
        Coding::new(CONDITION_CLINICAL_SYSTEM, self.code())
    }
}

/// FHIR `condition-ver-status` code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionVerificationStatus {
    /// Extracted by the provider and not yet reviewed by a clinician.
    Provisional,
    /// A condition the clinician is ruling out.
    Differential,
}

impl ConditionVerificationStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "rule-out" | "rule out" | "ruled-out" | "differential" => Self::Differential,
            _ => Self::Provisional,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Differential => "differential",
        }
    }

    pub fn coding(self) -> Coding {
        Coding::new(CONDITION_VERIFICATION_SYSTEM, self.code())
    }
}

/// Route of administration for a medication request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOfAdministration {
    Oral,
    Intravenous,
    Intramuscular,
    Subcutaneous,
    Topical,
    Inhaled,
    Sublingual,
    /// Anything else, carrying the raw value for display.
    Other(String),
}

/// Generic SNOMED CT code used for routes outside the fixed table.
const GENERIC_ROUTE_CODE: &str = "404559004";

impl RouteOfAdministration {
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "oral" | "po" => Self::Oral,
            "iv" | "intravenous" => Self::Intravenous,
            "im" | "intramuscular" => Self::Intramuscular,
            "sc" | "subcutaneous" => Self::Subcutaneous,
            "topical" => Self::Topical,
            "inhaled" | "inhalation" => Self::Inhaled,
            "sublingually" | "sublingual" => Self::Sublingual,
            _ => Self::Other(normalized),
        }
    }

    /// SNOMED CT code for this route.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Oral => "386359008",
            Self::Intravenous => "47625008",
            Self::Intramuscular => "78421000",
            Self::Subcutaneous => "34206005",
            Self::Topical | Self::Inhaled | Self::Other(_) => GENERIC_ROUTE_CODE,
            Self::Sublingual => "37161004",
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Oral => "Oral".into(),
            Self::Intravenous => "Intravenous".into(),
            Self::Intramuscular => "Intramuscular".into(),
            Self::Subcutaneous => "Subcutaneous".into(),
            Self::Topical => "Topical".into(),
            Self::Inhaled => "Inhalation".into(),
            Self::Sublingual => "Sublingual".into(),
            Self::Other(raw) => capitalize(raw),
        }
    }

    pub fn coding(&self) -> Coding {
        Coding::new(SNOMED_SYSTEM, self.code()).with_display(self.display())
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reaction severity for an allergy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllergySeverity {
    Mild,
    Moderate,
    Severe,
    Unknown,
}

impl AllergySeverity {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "mild" => Self::Mild,
            "moderate" => Self::Moderate,
            "severe" => Self::Severe,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Unknown => "unknown",
        }
    }
}
