//! Bundle envelope, builder and structural validation.
//!
//! Responsibilities:
//! - Map a canonical record into a `collection` bundle in fixed resource order
//! - Return a freshly computed [`ResourceCounts`] with every build
//! - Validate bundle structure over raw JSON, so stored or foreign bundles can be checked
//!
//! Notes:
//! - Building never fails. Validation problems are reported, never raised.
//! - Patient and Encounter ids may be supplied for reuse across related builds; every other id
//!   is generated per build.

use crate::resources::{
    AllergyIntoleranceResource, ConditionResource, EncounterResource,
    MedicationRequestResource, PatientResource, Resource, ResourceCounts,
};
use crate::{FhirError, FhirResult, DEFAULT_SOURCE_TAG};
use chrono::{DateTime, SecondsFormat, Utc};
use scribe_types::CanonicalClinicalRecord;
use scribe_uuid::{ResourceId, TransactionId, Uuid};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";
pub const COLLECTION_TYPE: &str = "collection";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,
    pub id: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub timestamp: DateTime<Utc>,
    pub entry: Vec<BundleEntry>,
    pub meta: BundleMeta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub full_url: String,
    pub resource: Resource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub source: String,
    pub transaction_id: String,
}

/// Outcome of structural bundle validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl BundleValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

impl Bundle {
    /// Parses a stored bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] with the failing path when the JSON does not match
    /// the bundle shape, or [`FhirError::InvalidInput`] when it is not a `Bundle`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let bundle = match serde_path_to_error::deserialize::<_, Bundle>(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "Bundle schema mismatch at {path}: {source}"
                )));
            }
        };

        if bundle.resource_type != BUNDLE_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                bundle.resource_type
            )));
        }

        Ok(bundle)
    }

    /// Validates this bundle's structure.
    pub fn validate(&self) -> BundleValidation {
        match serde_json::to_value(self) {
            Ok(value) => Self::validate_value(&value),
            Err(err) => BundleValidation::from_errors(vec![format!(
                "Bundle could not be serialised: {err}"
            )]),
        }
    }

    /// Validates an arbitrary JSON value as a scribe bundle.
    ///
    /// Checks `resourceType == "Bundle"`, `type == "collection"`, a non-empty `entry` array, and
    /// that every entry's resource has both a `resourceType` and an `id`.
    pub fn validate_value(bundle: &Value) -> BundleValidation {
        let mut errors = Vec::new();

        let Some(object) = bundle.as_object() else {
            return BundleValidation::from_errors(vec!["Bundle must be a JSON object".into()]);
        };

        for field in ["resourceType", "type", "entry"] {
            if !object.contains_key(field) {
                errors.push(format!("Missing required field: {field}"));
            }
        }

        if let Some(resource_type) = object.get("resourceType") {
            if resource_type.as_str() != Some(BUNDLE_RESOURCE_TYPE) {
                errors.push("resourceType must be 'Bundle'".into());
            }
        }

        if let Some(bundle_type) = object.get("type") {
            if bundle_type.as_str() != Some(COLLECTION_TYPE) {
                errors.push("Bundle type must be 'collection'".into());
            }
        }

        match object.get("entry") {
            Some(Value::Array(entries)) if entries.is_empty() => {
                errors.push("Bundle must contain at least one entry".into());
            }
            Some(Value::Array(entries)) => {
                for (i, entry) in entries.iter().enumerate() {
                    let resource = entry.get("resource");
                    let resource_type = resource
                        .and_then(|r| r.get("resourceType"))
                        .and_then(Value::as_str);

                    match resource_type {
                        None => errors.push(format!("Entry {i} missing resourceType")),
                        Some(rt) => {
                            let has_id = resource
                                .and_then(|r| r.get("id"))
                                .is_some_and(|id| !id.is_null());
                            if !has_id {
                                errors.push(format!("Entry {i} ({rt}) missing id"));
                            }
                        }
                    }
                }
            }
            Some(_) => errors.push("Bundle entry must be an array".into()),
            None => {}
        }

        BundleValidation::from_errors(errors)
    }

    /// Counts the resources in this bundle by type.
    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts::tally(self.entry.iter().map(|e| &e.resource))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds scribe bundles from canonical records.
///
/// Holds only configuration. Every call to [`BundleBuilder::build`] starts from fresh state.
#[derive(Clone, Debug)]
pub struct BundleBuilder {
    source_tag: String,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TAG)
    }
}

impl BundleBuilder {
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
        }
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Maps `record` into a bundle.
    ///
    /// Order is fixed: Patient, Encounter, then one Condition per diagnosis, one
    /// MedicationRequest per medication and one AllergyIntolerance per allergy, each in input
    /// order. Blank supplied ids are ignored and a fresh id is generated instead.
    pub fn build(
        &self,
        record: &CanonicalClinicalRecord,
        transaction_id: &TransactionId,
        patient_id: Option<&str>,
        encounter_id: Option<&str>,
    ) -> (Bundle, ResourceCounts) {
        let now = Utc::now();
        let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);

        let patient_id = supplied_or_generated(patient_id);
        let encounter_id = supplied_or_generated(encounter_id);
        let entities = &record.clinical_entities;

        let mut resources = vec![
            Resource::Patient(PatientResource::new(&patient_id)),
            Resource::Encounter(EncounterResource::new(
                &encounter_id,
                &patient_id,
                &record.encounter_summary.chief_complaint,
                &stamp,
            )),
        ];

        resources.extend(entities.diagnoses().iter().map(|dx| {
            Resource::Condition(ConditionResource::new(
                &ResourceId::new().to_string(),
                &patient_id,
                &encounter_id,
                dx,
                &stamp,
            ))
        }));

        resources.extend(entities.medications().iter().map(|med| {
            Resource::MedicationRequest(MedicationRequestResource::new(
                &ResourceId::new().to_string(),
                &patient_id,
                &encounter_id,
                med,
                &stamp,
            ))
        }));

        resources.extend(entities.allergies().iter().map(|allergy| {
            Resource::AllergyIntolerance(AllergyIntoleranceResource::new(
                &ResourceId::new().to_string(),
                &patient_id,
                allergy,
            ))
        }));

        let counts = ResourceCounts::tally(&resources);

        let bundle = Bundle {
            resource_type: BUNDLE_RESOURCE_TYPE.into(),
            id: ResourceId::new().to_string(),
            bundle_type: COLLECTION_TYPE.into(),
            timestamp: now,
            entry: resources
                .into_iter()
                .map(|resource| BundleEntry {
                    full_url: full_url(&resource),
                    resource,
                })
                .collect(),
            meta: BundleMeta {
                source: self.source_tag.clone(),
                transaction_id: transaction_id.to_string(),
            },
        };

        tracing::debug!(
            transaction_id = %transaction_id,
            bundle_id = %bundle.id,
            entries = bundle.entry.len(),
            "built FHIR bundle"
        );

        (bundle, counts)
    }
}

/// `urn:uuid:` for UUID ids; a relative `Type/id` reference for caller-supplied ids that are
/// not UUIDs.
fn full_url(resource: &Resource) -> String {
    match Uuid::parse_str(resource.id()) {
        Ok(uuid) => format!("urn:uuid:{}", uuid.hyphenated()),
        Err(_) => format!("{}/{}", resource.resource_type(), resource.id()),
    }
}

fn supplied_or_generated(supplied: Option<&str>) -> String {
    supplied
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ResourceId::new().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceType;
    use scribe_types::{ClinicalEntities, EntityItem, MedicationRecord};
    use serde_json::json;

    fn txn() -> TransactionId {
        TransactionId::parse("txn-test").expect("valid id")
    }

    fn record_with(entities: serde_json::Value) -> CanonicalClinicalRecord {
        CanonicalClinicalRecord {
            clinical_entities: serde_json::from_value(entities).expect("entities"),
            ..CanonicalClinicalRecord::default()
        }
    }

    #[test]
    fn bare_string_diagnoses_become_active_conditions() {
        let record = record_with(json!({"diagnoses_problems": ["Diabetes", "Hypertension"]}));
        let (bundle, counts) = BundleBuilder::default().build(&record, &txn(), None, None);

        assert_eq!(counts.get(ResourceType::Condition), 2);

        let statuses: Vec<_> = bundle
            .entry
            .iter()
            .filter_map(|e| match &e.resource {
                Resource::Condition(c) => c.clinical_status.coding[0].code.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec!["active".to_string(), "active".to_string()]);
    }

    #[test]
    fn empty_entities_still_yield_valid_two_entry_bundle() {
        let (bundle, counts) =
            BundleBuilder::default().build(&CanonicalClinicalRecord::default(), &txn(), None, None);

        assert_eq!(bundle.entry.len(), 2);
        assert_eq!(counts.get(ResourceType::Patient), 1);
        assert_eq!(counts.get(ResourceType::Encounter), 1);

        let validation = bundle.validate();
        assert!(validation.is_valid, "{:?}", validation.errors);
    }

    #[test]
    fn counts_match_list_lengths_for_mixed_shapes() {
        let record = CanonicalClinicalRecord {
            clinical_entities: ClinicalEntities {
                diagnoses_problems: vec![EntityItem::Name("Cough".into())],
                medication_requests: vec![
                    EntityItem::Name("Aspirin".into()),
                    EntityItem::Record(MedicationRecord {
                        medication_name: Some("Metformin".into()),
                        ..MedicationRecord::default()
                    }),
                    EntityItem::Unrecognised(json!(12)),
                ],
                allergies: vec![EntityItem::Name("Latex".into())],
            },
            ..CanonicalClinicalRecord::default()
        };

        let (bundle, counts) = BundleBuilder::default().build(&record, &txn(), None, None);

        assert_eq!(counts.get(ResourceType::Condition), 1);
        assert_eq!(counts.get(ResourceType::MedicationRequest), 3);
        assert_eq!(counts.get(ResourceType::AllergyIntolerance), 1);
        assert_eq!(counts, bundle.resource_counts());

        let order: Vec<_> = bundle.entry.iter().map(|e| e.resource.resource_type()).collect();
        assert_eq!(order[0], ResourceType::Patient);
        assert_eq!(order[1], ResourceType::Encounter);
        assert_eq!(order[2], ResourceType::Condition);
        assert_eq!(order[6], ResourceType::AllergyIntolerance);
    }

    #[test]
    fn supplied_ids_are_reused_and_envelope_is_filled() {
        let builder = BundleBuilder::new("unit-test");
        let (bundle, _) = builder.build(
            &CanonicalClinicalRecord::default(),
            &txn(),
            Some("patient-1"),
            Some("  "),
        );

        assert_eq!(bundle.entry[0].resource.id(), "patient-1");
        assert_eq!(bundle.entry[0].full_url, "Patient/patient-1");
        assert_ne!(bundle.entry[1].resource.id(), "");
        assert_eq!(
            bundle.entry[1].full_url,
            format!("urn:uuid:{}", bundle.entry[1].resource.id())
        );
        assert_eq!(bundle.meta.source, "unit-test");
        assert_eq!(bundle.meta.transaction_id, "txn-test");

        let json = serde_json::to_value(&bundle).expect("json");
        assert_eq!(json["resourceType"], "Bundle");
        assert_eq!(json["type"], "collection");
        assert_eq!(json["meta"]["transactionId"], "txn-test");
    }

    #[test]
    fn validation_reports_structural_problems() {
        let report = Bundle::validate_value(&json!({
            "resourceType": "Observation",
            "type": "batch",
            "entry": [
                {"resource": {"id": "x"}},
                {"resource": {"resourceType": "Condition"}}
            ]
        }));

        assert!(!report.is_valid);
        assert!(report.errors.contains(&"resourceType must be 'Bundle'".to_string()));
        assert!(report.errors.contains(&"Bundle type must be 'collection'".to_string()));
        assert!(report.errors.contains(&"Entry 0 missing resourceType".to_string()));
        assert!(report.errors.contains(&"Entry 1 (Condition) missing id".to_string()));
    }

    #[test]
    fn validation_rejects_missing_and_empty_entries() {
        let missing = Bundle::validate_value(&json!({"resourceType": "Bundle", "type": "collection"}));
        assert_eq!(missing.errors, vec!["Missing required field: entry".to_string()]);

        let empty = Bundle::validate_value(
            &json!({"resourceType": "Bundle", "type": "collection", "entry": []}),
        );
        assert!(!empty.is_valid);
    }

    #[test]
    fn parse_round_trips_built_bundle() {
        let record = record_with(json!({"allergies": [{"name": "Sulfa", "severity": "mild"}]}));
        let (bundle, _) = BundleBuilder::default().build(&record, &txn(), None, None);
        let text = serde_json::to_string(&bundle).expect("json");

        let parsed = Bundle::parse(&text).expect("parse");
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn parse_reports_failing_path() {
        let err = Bundle::parse(r#"{"resourceType":"Bundle","id":"b","type":"collection","timestamp":"2026-01-01T00:00:00Z","entry":[{"fullUrl":"u","resource":{"resourceType":"Patient"}}],"meta":{"source":"s","transactionId":"t"}}"#)
            .expect_err("missing patient fields");
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("entry[0]"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
