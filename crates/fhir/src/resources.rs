//! Typed FHIR resources carried in a scribe bundle.
//!
//! Five resource types are supported. Each has a fixed required-field shape; optional content
//! is omitted from the wire form rather than serialised as `null`.
//!
//! Constructors take already-normalized entities from `scribe_types`, so they cannot fail.
//! Terminology misses fall back to the generic codes exposed by [`TermKind::fallback_code`].

use crate::codes::{
    AllergySeverity, ConditionClinicalStatus, ConditionVerificationStatus, RouteOfAdministration,
};
use crate::datatypes::{
    CodeableConcept, Coding, HumanName, Period, Reference, ResourceMeta, ACT_CODE_SYSTEM,
    ALLERGY_CLINICAL_SYSTEM, ALLERGY_VERIFICATION_SYSTEM, ICD10_SYSTEM, RXNORM_SYSTEM,
    SNOMED_SYSTEM,
};
use crate::terminology::{TermKind, Terminology};
use scribe_types::{is_recorded, Allergy, Diagnosis, Medication};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder used wherever a patient name would appear.
pub const PATIENT_NAME_PLACEHOLDER: &str = "[PATIENT_NAME]";

const ENCOUNTER_TYPE_CODE: &str = "185347001";
const ENCOUNTER_TYPE_DISPLAY: &str = "Encounter for problem";
const ENCOUNTER_TYPE_TEXT: &str = "Clinical Encounter";
const NOT_DOCUMENTED: &str = "Not documented";

// ============================================================================
// Resource type and counts
// ============================================================================

/// The resource types a scribe bundle may contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Encounter,
    Condition,
    MedicationRequest,
    AllergyIntolerance,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Patient,
        ResourceType::Encounter,
        ResourceType::Condition,
        ResourceType::MedicationRequest,
        ResourceType::AllergyIntolerance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Encounter => "Encounter",
            ResourceType::Condition => "Condition",
            ResourceType::MedicationRequest => "MedicationRequest",
            ResourceType::AllergyIntolerance => "AllergyIntolerance",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of resources of each type in one bundle.
///
/// Every type is present as a key, with zero for types the bundle does not contain. A fresh
/// value is computed per build, so concurrent builds never share a tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceCounts(BTreeMap<ResourceType, usize>);

impl Default for ResourceCounts {
    fn default() -> Self {
        Self(ResourceType::ALL.iter().map(|t| (*t, 0)).collect())
    }
}

impl ResourceCounts {
    /// Tallies the given resources.
    pub fn tally<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let mut counts = Self::default();
        for resource in resources {
            *counts.0.entry(resource.resource_type()).or_insert(0) += 1;
        }
        counts
    }

    pub fn get(&self, resource_type: ResourceType) -> usize {
        self.0.get(&resource_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceType, usize)> + '_ {
        self.0.iter().map(|(t, n)| (*t, *n))
    }
}

// ============================================================================
// Resource envelope
// ============================================================================

/// One resource, tagged on the wire by `resourceType`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(PatientResource),
    Encounter(EncounterResource),
    Condition(ConditionResource),
    MedicationRequest(MedicationRequestResource),
    AllergyIntolerance(AllergyIntoleranceResource),
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Patient(_) => ResourceType::Patient,
            Resource::Encounter(_) => ResourceType::Encounter,
            Resource::Condition(_) => ResourceType::Condition,
            Resource::MedicationRequest(_) => ResourceType::MedicationRequest,
            Resource::AllergyIntolerance(_) => ResourceType::AllergyIntolerance,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Resource::Patient(r) => &r.id,
            Resource::Encounter(r) => &r.id,
            Resource::Condition(r) => &r.id,
            Resource::MedicationRequest(r) => &r.id,
            Resource::AllergyIntolerance(r) => &r.id,
        }
    }
}

// ============================================================================
// Patient
// ============================================================================

/// De-identified patient. Only the name placeholder and an unknown gender are recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientResource {
    pub id: String,
    pub name: Vec<HumanName>,
    pub gender: String,
    pub meta: ResourceMeta,
}

impl PatientResource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: vec![HumanName {
                use_type: Some("usual".into()),
                text: Some(PATIENT_NAME_PLACEHOLDER.into()),
            }],
            gender: "unknown".into(),
            meta: ResourceMeta::base_profile(ResourceType::Patient.as_str()),
        }
    }
}

// ============================================================================
// Encounter
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterResource {
    pub id: String,
    pub status: String,
    pub class: Coding,
    #[serde(rename = "type")]
    pub encounter_type: Vec<CodeableConcept>,
    pub subject: Reference,
    pub period: Period,
    pub reason_code: Vec<CodeableConcept>,
    pub meta: ResourceMeta,
}

impl EncounterResource {
    /// Builds a finished ambulatory encounter.
    ///
    /// The reason is the chief complaint when one was recorded, otherwise "Not documented".
    pub fn new(id: &str, patient_id: &str, chief_complaint: &str, start: &str) -> Self {
        let reason = if is_recorded(chief_complaint) {
            chief_complaint
        } else {
            NOT_DOCUMENTED
        };

        Self {
            id: id.to_string(),
            status: "finished".into(),
            class: Coding::new(ACT_CODE_SYSTEM, "AMB").with_display("Ambulatory"),
            encounter_type: vec![CodeableConcept::from_coding(
                Coding::new(SNOMED_SYSTEM, ENCOUNTER_TYPE_CODE)
                    .with_display(ENCOUNTER_TYPE_DISPLAY),
            )
            .with_text(ENCOUNTER_TYPE_TEXT)],
            subject: Reference::to(ResourceType::Patient.as_str(), patient_id)
                .with_display(PATIENT_NAME_PLACEHOLDER),
            period: Period {
                start: start.to_string(),
                end: None,
            },
            reason_code: vec![CodeableConcept::from_text(reason)],
            meta: ResourceMeta::base_profile(ResourceType::Encounter.as_str()),
        }
    }
}

// ============================================================================
// Condition
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResource {
    pub id: String,
    pub clinical_status: CodeableConcept,
    pub verification_status: CodeableConcept,
    pub code: CodeableConcept,
    pub subject: Reference,
    pub encounter: Reference,
    pub recorded_date: String,
    pub meta: ResourceMeta,
}

impl ConditionResource {
    pub fn new(
        id: &str,
        patient_id: &str,
        encounter_id: &str,
        diagnosis: &Diagnosis,
        recorded: &str,
    ) -> Self {
        let clinical = ConditionClinicalStatus::from_raw(&diagnosis.status);
        let verification = ConditionVerificationStatus::from_raw(&diagnosis.status);

        Self {
            id: id.to_string(),
            clinical_status: CodeableConcept::from_coding(clinical.coding()),
            verification_status: CodeableConcept::from_coding(verification.coding()),
            code: coded_concept(&diagnosis.name, TermKind::Condition, ICD10_SYSTEM),
            subject: Reference::to(ResourceType::Patient.as_str(), patient_id),
            encounter: Reference::to(ResourceType::Encounter.as_str(), encounter_id),
            recorded_date: recorded.to_string(),
            meta: ResourceMeta::base_profile(ResourceType::Condition.as_str()),
        }
    }
}

// ============================================================================
// MedicationRequest
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequestResource {
    pub id: String,
    pub status: String,
    pub intent: String,
    pub medication_codeable_concept: CodeableConcept,
    pub subject: Reference,
    pub encounter: Reference,
    pub authored_on: String,
    pub dosage_instruction: Vec<Dosage>,
    pub reason_code: Vec<CodeableConcept>,
    pub meta: ResourceMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dosage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    pub route: CodeableConcept,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub code: CodeableConcept,
}

impl MedicationRequestResource {
    pub fn new(
        id: &str,
        patient_id: &str,
        encounter_id: &str,
        medication: &Medication,
        authored: &str,
    ) -> Self {
        let route = RouteOfAdministration::from_raw(&medication.route);

        Self {
            id: id.to_string(),
            status: "active".into(),
            intent: "order".into(),
            medication_codeable_concept: coded_concept(
                &medication.name,
                TermKind::Medication,
                RXNORM_SYSTEM,
            ),
            subject: Reference::to(ResourceType::Patient.as_str(), patient_id),
            encounter: Reference::to(ResourceType::Encounter.as_str(), encounter_id),
            authored_on: authored.to_string(),
            dosage_instruction: vec![Dosage {
                text: medication.dosage.clone(),
                timing: medication.frequency.as_ref().map(|f| Timing {
                    code: CodeableConcept::from_text(f.clone()),
                }),
                route: CodeableConcept::from_coding(route.coding()),
            }],
            reason_code: vec![CodeableConcept::from_text(medication.reason.clone())],
            meta: ResourceMeta::base_profile(ResourceType::MedicationRequest.as_str()),
        }
    }
}

// ============================================================================
// AllergyIntolerance
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllergyIntoleranceResource {
    pub id: String,
    pub patient: Reference,
    pub clinical_status: CodeableConcept,
    pub verification_status: CodeableConcept,
    pub code: CodeableConcept,
    pub reaction: Vec<AllergyReaction>,
    pub meta: ResourceMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllergyReaction {
    pub manifestation: Vec<CodeableConcept>,
    pub severity: String,
}

impl AllergyIntoleranceResource {
    pub fn new(id: &str, patient_id: &str, allergy: &Allergy) -> Self {
        let mut allergen = Coding::default().with_display(allergy.name.clone());
        allergen.system = Some(SNOMED_SYSTEM.to_string());

        Self {
            id: id.to_string(),
            patient: Reference::to(ResourceType::Patient.as_str(), patient_id),
            clinical_status: CodeableConcept::from_coding(Coding::new(
                ALLERGY_CLINICAL_SYSTEM,
                "active",
            )),
            verification_status: CodeableConcept::from_coding(Coding::new(
                ALLERGY_VERIFICATION_SYSTEM,
                "unconfirmed",
            )),
            code: CodeableConcept::from_coding(allergen).with_text(allergy.name.clone()),
            reaction: vec![AllergyReaction {
                manifestation: vec![CodeableConcept::from_text(allergy.reaction.clone())],
                severity: AllergySeverity::from_raw(&allergy.severity).code().to_string(),
            }],
            meta: ResourceMeta::base_profile(ResourceType::AllergyIntolerance.as_str()),
        }
    }
}

/// Code for a display name: the primary-system coding (or its fallback code), plus a SNOMED CT
/// coding when the term is known.
fn coded_concept(display: &str, kind: TermKind, primary_system: &str) -> CodeableConcept {
    let lookup = Terminology::lookup(display, kind);
    let primary_code = lookup
        .code(kind.primary_system_key())
        .unwrap_or(kind.fallback_code());

    let mut concept = CodeableConcept::from_coding(
        Coding::new(primary_system, primary_code).with_display(display),
    )
    .with_text(display);

    if let Some(snomed) = lookup.code("snomed") {
        concept
            .coding
            .push(Coding::new(SNOMED_SYSTEM, snomed).with_display(display));
    }

    concept
}
