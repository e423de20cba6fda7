//! Static terminology lookup for condition and medication display names.
//!
//! Lookups are case-insensitive after trimming. A miss is not an error: it returns
//! `found = false`, an empty code set, and the caller's display text exactly as given.

use serde::Serialize;
use std::collections::BTreeMap;

/// Which table to consult.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermKind {
    Condition,
    Medication,
}

impl TermKind {
    /// Key of the primary (non-SNOMED) code system in [`TerminologyMatch::codes`].
    pub fn primary_system_key(self) -> &'static str {
        match self {
            TermKind::Condition => "icd10",
            TermKind::Medication => "rxnorm",
        }
    }

    /// Code used in resources when the lookup misses.
    pub fn fallback_code(self) -> &'static str {
        match self {
            TermKind::Condition => "R99",
            TermKind::Medication => "999999",
        }
    }

    fn table(self) -> &'static [TermEntry] {
        match self {
            TermKind::Condition => CONDITION_TERMS,
            TermKind::Medication => MEDICATION_TERMS,
        }
    }
}

struct TermEntry {
    term: &'static str,
    primary: &'static str,
    snomed: &'static str,
}

const fn term(term: &'static str, primary: &'static str, snomed: &'static str) -> TermEntry {
    TermEntry {
        term,
        primary,
        snomed,
    }
}

/// Condition display name -> (ICD-10, SNOMED CT).
const CONDITION_TERMS: &[TermEntry] = &[
    term("high blood pressure", "I10", "59621000"),
    term("hypertension", "I10", "59621000"),
    term("diabetes", "E11.9", "44054006"),
    term("type 2 diabetes", "E11.9", "44054006"),
    term("heart failure", "I50", "84114007"),
    term("pneumonia", "J18.9", "233604007"),
    term("upper respiratory infection", "J06.9", "54150009"),
    term("anxiety", "F41.9", "48694002"),
    term("headache", "R51.9", "25064002"),
    term("chest pain", "R07.9", "29650007"),
    term("cough", "R05.9", "13645005"),
    term("fatigue", "R53.83", "84216000"),
    term("shortness of breath", "R06.02", "25064002"),
    term("neuropathy", "G89.29", "386033004"),
    term("edema", "R60.9", "267038008"),
];

/// Medication display name -> (RxNorm, SNOMED CT).
const MEDICATION_TERMS: &[TermEntry] = &[
    term("aspirin", "1191", "387458008"),
    term("metformin", "6809", "372567009"),
    term("lisinopril", "21600", "386876001"),
    term("amlodipine", "17767", "386929003"),
    term("atorvastatin", "83367", "412263009"),
    term("sertraline", "36437", "372588000"),
    term("albuterol", "435", "372897005"),
    term("hydrochlorothiazide", "5487", "366333007"),
    term("atenolol", "733", "372495000"),
    term("acetaminophen", "161", "372348007"),
    term("ibuprofen", "5640", "373025003"),
    term("amoxicillin", "2230", "372687004"),
    term("glipizide", "4821", "386228008"),
    term("insulin", "5856", "325072002"),
];

/// Result of a terminology lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TerminologyMatch {
    pub found: bool,
    /// Code system key (`icd10`, `rxnorm`, `snomed`) -> code. Empty on a miss.
    pub codes: BTreeMap<&'static str, &'static str>,
    /// The display text exactly as supplied by the caller.
    pub display: String,
}

impl TerminologyMatch {
    pub fn code(&self, system_key: &str) -> Option<&'static str> {
        self.codes.get(system_key).copied()
    }
}

/// Terminology lookup operations.
///
/// This is a zero-sized type used for namespacing lookups over the static tables.
pub struct Terminology;

impl Terminology {
    /// Looks up `display` in the table for `kind`.
    pub fn lookup(display: &str, kind: TermKind) -> TerminologyMatch {
        let needle = display.trim().to_lowercase();

        match kind.table().iter().find(|entry| entry.term == needle) {
            Some(entry) => TerminologyMatch {
                found: true,
                codes: BTreeMap::from([
                    (kind.primary_system_key(), entry.primary),
                    ("snomed", entry.snomed),
                ]),
                display: display.to_string(),
            },
            None => TerminologyMatch {
                found: false,
                codes: BTreeMap::new(),
                display: display.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_after_trimming() {
        let hit = Terminology::lookup("  Type 2 DIABETES ", TermKind::Condition);
        assert!(hit.found);
        assert_eq!(hit.code("icd10"), Some("E11.9"));
        assert_eq!(hit.code("snomed"), Some("44054006"));
        assert_eq!(hit.display, "  Type 2 DIABETES ");
    }

    #[test]
    fn medication_table_uses_rxnorm() {
        let hit = Terminology::lookup("Metformin", TermKind::Medication);
        assert!(hit.found);
        assert_eq!(hit.code("rxnorm"), Some("6809"));
        assert_eq!(hit.code("icd10"), None);
    }

    #[test]
    fn tables_are_separate() {
        assert!(!Terminology::lookup("aspirin", TermKind::Condition).found);
        assert!(!Terminology::lookup("hypertension", TermKind::Medication).found);
    }

    #[test]
    fn miss_preserves_display_and_returns_no_codes() {
        let miss = Terminology::lookup("Gout flare", TermKind::Condition);
        assert!(!miss.found);
        assert!(miss.codes.is_empty());
        assert_eq!(miss.display, "Gout flare");
    }
}
