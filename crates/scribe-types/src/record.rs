//! Canonical clinical record produced by extraction normalization.
//!
//! The record mirrors the JSON contract the completion provider is asked to honour. All six
//! top-level fields are always present once a record exists; the normalizer injects the
//! defaults from [`CanonicalClinicalRecord::default`] before deserializing into this type.
//!
//! Entity lists (diagnoses, medications, allergies) are polymorphic on the wire: each item may be
//! a bare name, a structured record, or something else entirely. They are kept as
//! [`EntityItem`] at this boundary and normalized into one structured shape through
//! [`EntityItem::normalize`] before any downstream logic touches them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Sentinel used by the provider (and the defaults) for "not documented".
pub const NOT_AVAILABLE: &str = "N/A";

/// Confidence score injected when the provider omits `ai_confidence_score`.
pub const DEFAULT_CONFIDENCE_SCORE: u8 = 50;

const DEFAULT_DIAGNOSIS_NAME: &str = "Unknown Condition";
const DEFAULT_DIAGNOSIS_STATUS: &str = "active";
const DEFAULT_MEDICATION_NAME: &str = "Unknown Medication";
const DEFAULT_DOSAGE: &str = "1 unit";
const DEFAULT_ROUTE: &str = "oral";
const DEFAULT_REASON: &str = "Therapeutic use";
const DEFAULT_ALLERGEN_NAME: &str = "Unknown Allergen";
const DEFAULT_REACTION: &str = "Unknown reaction";
const DEFAULT_SEVERITY: &str = "unknown";

/// Returns true when `value` carries real content (not blank, not the `N/A` sentinel).
pub fn is_recorded(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(NOT_AVAILABLE)
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Normalized extraction result for one clinical conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalClinicalRecord {
    pub encounter_summary: EncounterSummary,
    pub vital_signs_extracted: VitalSigns,
    pub clinical_entities: ClinicalEntities,
    pub assessment_plan_draft: String,
    /// Provider-reported confidence, always within `1..=100`.
    pub ai_confidence_score: u8,
    pub flagged_for_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
}

impl Default for CanonicalClinicalRecord {
    fn default() -> Self {
        Self {
            encounter_summary: EncounterSummary::default(),
            vital_signs_extracted: VitalSigns::default(),
            clinical_entities: ClinicalEntities::default(),
            assessment_plan_draft: not_available(),
            ai_confidence_score: DEFAULT_CONFIDENCE_SCORE,
            flagged_for_review: false,
            review_notes: None,
        }
    }
}

/// Chief complaint and history of present illness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterSummary {
    #[serde(default = "not_available")]
    pub chief_complaint: String,
    #[serde(default = "not_available")]
    pub history_of_present_illness: String,
}

impl Default for EncounterSummary {
    fn default() -> Self {
        Self {
            chief_complaint: not_available(),
            history_of_present_illness: not_available(),
        }
    }
}

/// Vital signs as free text (for example `120/80 mmHg`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalSigns {
    #[serde(default = "not_available")]
    pub blood_pressure: String,
    #[serde(default = "not_available")]
    pub temperature: String,
    #[serde(default = "not_available")]
    pub heart_rate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<String>,
}

impl VitalSigns {
    /// Number of vitals the scorer expects to see.
    pub const EXPECTED: usize = 5;

    /// Counts vitals that carry a real value.
    pub fn recorded_count(&self) -> usize {
        [
            Some(self.blood_pressure.as_str()),
            Some(self.temperature.as_str()),
            Some(self.heart_rate.as_str()),
            self.respiratory_rate.as_deref(),
            self.oxygen_saturation.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|v| is_recorded(v))
        .count()
    }
}

impl Default for VitalSigns {
    fn default() -> Self {
        Self {
            blood_pressure: not_available(),
            temperature: not_available(),
            heart_rate: not_available(),
            respiratory_rate: None,
            oxygen_saturation: None,
        }
    }
}

/// Entity lists extracted from the conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalEntities {
    #[serde(default)]
    pub diagnoses_problems: Vec<EntityItem<DiagnosisRecord>>,
    #[serde(default, alias = "medication_requests_new_or_changed")]
    pub medication_requests: Vec<EntityItem<MedicationRecord>>,
    #[serde(default)]
    pub allergies: Vec<EntityItem<AllergyRecord>>,
}

impl ClinicalEntities {
    pub fn diagnoses(&self) -> Vec<Diagnosis> {
        self.diagnoses_problems.iter().map(EntityItem::normalize).collect()
    }

    pub fn medications(&self) -> Vec<Medication> {
        self.medication_requests.iter().map(EntityItem::normalize).collect()
    }

    pub fn allergies(&self) -> Vec<Allergy> {
        self.allergies.iter().map(EntityItem::normalize).collect()
    }
}

/// One entity as the provider returned it.
///
/// Variant order matters for untagged deserialization: a JSON string is a bare name, any object
/// is a record, and anything else is kept verbatim so it can degrade to the default structured
/// form instead of failing the whole record. Record fields are read leniently, so one odd field
/// never discards the others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityItem<T> {
    Name(String),
    Record(T),
    Unrecognised(Value),
}

impl<T: EntityRecord> EntityItem<T> {
    /// Expands this item into its canonical structured form using type-specific defaults.
    pub fn normalize(&self) -> T::Normalized {
        match self {
            EntityItem::Name(name) => T::from_name(name),
            EntityItem::Record(record) => record.to_normalized(),
            EntityItem::Unrecognised(_) => T::fallback(),
        }
    }
}

/// Wire-side record shape for one kind of clinical entity.
pub trait EntityRecord {
    type Normalized;

    /// Structured form of a bare name.
    fn from_name(name: &str) -> Self::Normalized;

    /// Structured form of a (possibly partial) record.
    fn to_normalized(&self) -> Self::Normalized;

    /// Structured form used when the item has an unexpected shape.
    fn fallback() -> Self::Normalized;
}

/// Reads an optional text field, keeping numbers and booleans as text and dropping anything
/// else.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn field_or(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn optional_field(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Diagnoses
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// high / medium / low
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub name: String,
    pub status: String,
    pub confidence: Option<String>,
}

impl EntityRecord for DiagnosisRecord {
    type Normalized = Diagnosis;

    fn from_name(name: &str) -> Diagnosis {
        Diagnosis {
            name: name.to_string(),
            status: DEFAULT_DIAGNOSIS_STATUS.to_string(),
            confidence: None,
        }
    }

    fn to_normalized(&self) -> Diagnosis {
        Diagnosis {
            name: field_or(&self.name, DEFAULT_DIAGNOSIS_NAME),
            status: field_or(&self.status, DEFAULT_DIAGNOSIS_STATUS).to_lowercase(),
            confidence: optional_field(&self.confidence).map(|c| c.to_lowercase()),
        }
    }

    fn fallback() -> Diagnosis {
        Self::from_name(DEFAULT_DIAGNOSIS_NAME)
    }
}

// ============================================================================
// Medications
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationRecord {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub medication_name: Option<String>,
    /// Alternate key for the medication name; `medication_name` wins when both are present.
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub route: String,
    pub reason: String,
    pub frequency: Option<String>,
}

impl EntityRecord for MedicationRecord {
    type Normalized = Medication;

    fn from_name(name: &str) -> Medication {
        Medication {
            name: name.to_string(),
            dosage: DEFAULT_DOSAGE.to_string(),
            route: DEFAULT_ROUTE.to_string(),
            reason: DEFAULT_REASON.to_string(),
            frequency: None,
        }
    }

    fn to_normalized(&self) -> Medication {
        Medication {
            name: optional_field(&self.medication_name)
                .or_else(|| optional_field(&self.name))
                .unwrap_or_else(|| DEFAULT_MEDICATION_NAME.to_string()),
            dosage: field_or(&self.dosage, DEFAULT_DOSAGE),
            route: field_or(&self.route, DEFAULT_ROUTE).to_lowercase(),
            reason: field_or(&self.reason, DEFAULT_REASON),
            frequency: optional_field(&self.frequency),
        }
    }

    fn fallback() -> Medication {
        Self::from_name(DEFAULT_MEDICATION_NAME)
    }
}

// ============================================================================
// Allergies
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllergyRecord {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Allergy {
    pub name: String,
    pub reaction: String,
    pub severity: String,
}

impl EntityRecord for AllergyRecord {
    type Normalized = Allergy;

    fn from_name(name: &str) -> Allergy {
        Allergy {
            name: name.to_string(),
            reaction: DEFAULT_REACTION.to_string(),
            severity: DEFAULT_SEVERITY.to_string(),
        }
    }

    fn to_normalized(&self) -> Allergy {
        Allergy {
            name: field_or(&self.name, DEFAULT_ALLERGEN_NAME),
            reaction: field_or(&self.reaction, DEFAULT_REACTION),
            severity: field_or(&self.severity, DEFAULT_SEVERITY).to_lowercase(),
        }
    }

    fn fallback() -> Allergy {
        Self::from_name(DEFAULT_ALLERGEN_NAME)
    }
}
