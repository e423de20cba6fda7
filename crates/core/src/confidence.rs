//! Heuristic per-field confidence scoring.
//!
//! Scores are fixed functions of field presence. The scorer never looks at clinical content
//! beyond whether a field was recorded.

use crate::constants::DEFAULT_CONFIDENCE_THRESHOLD;
use scribe_types::{is_recorded, CanonicalClinicalRecord, VitalSigns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHIEF_COMPLAINT: &str = "chief_complaint";
pub const VITAL_SIGNS: &str = "vital_signs";
pub const DIAGNOSES: &str = "diagnoses";
pub const MEDICATIONS: &str = "medications";
pub const ALLERGIES: &str = "allergies";
pub const ASSESSMENT_PLAN: &str = "assessment_plan";

/// Confidence derived from one canonical record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceProfile {
    /// The provider's own confidence score.
    pub overall: u8,
    /// Field group -> score in `0..=100`.
    pub by_field: BTreeMap<String, u8>,
    /// Field groups scoring below the threshold, in scoring order.
    pub low_confidence_fields: Vec<String>,
    /// True when any field is low-confidence or the provider flagged the record.
    pub requires_human_review: bool,
}

/// Scores records against a fixed threshold.
#[derive(Clone, Copy, Debug)]
pub struct ConfidenceScorer {
    threshold: u8,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ConfidenceScorer {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn score(&self, record: &CanonicalClinicalRecord) -> ConfidenceProfile {
        let entities = &record.clinical_entities;

        let scores: [(&str, u8); 6] = [
            (
                CHIEF_COMPLAINT,
                presence(is_recorded(&record.encounter_summary.chief_complaint), 90, 30),
            ),
            (VITAL_SIGNS, vitals_score(&record.vital_signs_extracted)),
            (
                DIAGNOSES,
                presence(!entities.diagnoses_problems.is_empty(), 85, 20),
            ),
            (
                MEDICATIONS,
                presence(!entities.medication_requests.is_empty(), 85, 20),
            ),
            (ALLERGIES, presence(!entities.allergies.is_empty(), 80, 50)),
            (
                ASSESSMENT_PLAN,
                presence(is_recorded(&record.assessment_plan_draft), 75, 30),
            ),
        ];

        let low_confidence_fields: Vec<String> = scores
            .iter()
            .filter(|(_, score)| *score < self.threshold)
            .map(|(name, _)| name.to_string())
            .collect();

        ConfidenceProfile {
            overall: record.ai_confidence_score,
            by_field: scores
                .iter()
                .map(|(name, score)| (name.to_string(), *score))
                .collect(),
            requires_human_review: !low_confidence_fields.is_empty() || record.flagged_for_review,
            low_confidence_fields,
        }
    }
}

fn presence(present: bool, when_present: u8, when_absent: u8) -> u8 {
    if present {
        when_present
    } else {
        when_absent
    }
}

fn vitals_score(vitals: &VitalSigns) -> u8 {
    let ratio = vitals.recorded_count() * 100 / VitalSigns::EXPECTED;
    u8::try_from(ratio.min(100)).unwrap_or(100)
}
