//! PHI redaction.
//!
//! Identifier categories are declarative data ([`PhiCategory`]) applied in a fixed order. Each
//! category is matched case-insensitively against the text produced by the categories before
//! it, and every match is replaced by the category's placeholder.
//!
//! [`Redactor::validate`] is a separate advisory pass: it reports residual risk in masked text
//! but never rewrites it.

use crate::{ScribeError, ScribeResult};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One category of protected health information.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhiCategory {
    pub name: &'static str,
    pub pattern: &'static str,
    pub placeholder: &'static str,
}

/// The fixed category set, in application order.
pub const PHI_CATEGORIES: &[PhiCategory] = &[
    PhiCategory {
        name: "names",
        pattern: r"\b([A-Z][a-z]+ (?:[A-Z][a-z]+ )?(?:Smith|Johnson|Williams|Brown|Jones|Garcia|Miller|Davis|Rodriguez|Martinez|Hernandez|Lopez|Gonzalez|Wilson|Anderson|Thomas|Taylor|Moore|Jackson|Martin|Lee|Perez|Thompson|White|Harris|Sanchez|Clark|Ramirez|Lewis|Robinson|Young|Strokes|King|Wright|Long|Chavez))\b",
        placeholder: "[PATIENT_NAME]",
    },
    PhiCategory {
        name: "dates",
        pattern: r"\b((?:January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2}(?:st|nd|rd|th)?(?:\s+\d{4})?|\d{1,2}/\d{1,2}/\d{2,4})\b",
        placeholder: "[DATE]",
    },
    PhiCategory {
        name: "mrn",
        pattern: r"\b(MRN|Record|ID)[\s:]*(\d{6,10})\b",
        placeholder: "[MRN]",
    },
    PhiCategory {
        name: "ssn",
        pattern: r"\b(\d{3}-\d{2}-\d{4})\b",
        placeholder: "[SSN]",
    },
    PhiCategory {
        name: "phone",
        pattern: r"(\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4})",
        placeholder: "[PHONE]",
    },
    PhiCategory {
        name: "email",
        pattern: r"\b([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})\b",
        placeholder: "[EMAIL]",
    },
    PhiCategory {
        name: "address_patterns",
        pattern: r"\b(\d+\s+(?:North|South|East|West|N|S|E|W)\s+[A-Za-z\s]+(?:Street|St|Avenue|Ave|Road|Rd|Drive|Dr|Lane|Ln|Boulevard|Blvd|Court|Ct|Circle|Cir|Trail|Trl))\b",
        placeholder: "[ADDRESS]",
    },
    PhiCategory {
        name: "age_specific",
        pattern: r"\b(\d{1,3}[\s-]?(?:years?|yo|y\.o\.)[\s-]old)\b",
        placeholder: "[AGE]",
    },
];

/// Residual-risk checks run by [`Redactor::validate`]. Case-sensitive.
const RISK_CHECKS: &[(&str, &str)] = &[
    ("potential_names", r"\b[A-Z][a-z]+ [A-Z][a-z]+\b"),
    ("potential_dates", r"\b\d{1,2}/\d{1,2}/\d{4}\b"),
    ("potential_numbers", r"\b\d{6,10}\b"),
];

const MAX_RISK_EXAMPLES: usize = 3;

/// Summary of one redaction pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionAudit {
    /// Length of the input in characters.
    pub original_length: usize,
    /// Length of the masked text in characters.
    pub masked_length: usize,
    /// Matches per category. Categories with no matches are absent.
    pub redactions_by_type: BTreeMap<String, usize>,
    pub total_redactions: usize,
}

/// One kind of residual risk found in masked text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiRisk {
    #[serde(rename = "type")]
    pub risk_type: String,
    pub count: usize,
    /// Up to three matched strings.
    pub examples: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_safe: bool,
    pub remaining_phi_risks: Vec<PhiRisk>,
}

#[derive(Clone, Debug)]
struct CompiledCategory {
    category: PhiCategory,
    regex: Regex,
}

#[derive(Clone, Debug)]
struct RiskCheck {
    name: &'static str,
    regex: Regex,
    outside_placeholders: bool,
}

/// Pattern-based PHI masking.
///
/// Patterns are compiled once on construction. The redactor holds no per-call state, so one
/// instance can be shared across threads.
#[derive(Clone, Debug)]
pub struct Redactor {
    categories: Vec<CompiledCategory>,
    checks: Vec<RiskCheck>,
}

impl Redactor {
    /// Creates a redactor over [`PHI_CATEGORIES`].
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if a pattern fails to compile.
    pub fn new() -> ScribeResult<Self> {
        Self::with_categories(PHI_CATEGORIES)
    }

    /// Creates a redactor over a custom category list, applied in slice order.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if a pattern fails to compile.
    pub fn with_categories(categories: &[PhiCategory]) -> ScribeResult<Self> {
        let categories = categories
            .iter()
            .map(|category| {
                RegexBuilder::new(category.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| CompiledCategory {
                        category: *category,
                        regex,
                    })
                    .map_err(|e| {
                        ScribeError::Config(format!(
                            "invalid pattern for PHI category '{}': {e}",
                            category.name
                        ))
                    })
            })
            .collect::<ScribeResult<Vec<_>>>()?;

        let checks = RISK_CHECKS
            .iter()
            .map(|&(name, pattern)| {
                Regex::new(pattern)
                    .map(|regex| RiskCheck {
                        name,
                        regex,
                        outside_placeholders: name == "potential_numbers",
                    })
                    .map_err(|e| {
                        ScribeError::Config(format!("invalid pattern for check '{name}': {e}"))
                    })
            })
            .collect::<ScribeResult<Vec<_>>>()?;

        Ok(Self { categories, checks })
    }

    /// Masks every category in order. Never fails.
    pub fn deidentify(&self, text: &str) -> (String, RedactionAudit) {
        let mut masked = text.to_string();
        let mut redactions_by_type = BTreeMap::new();

        for compiled in &self.categories {
            let count = compiled.regex.find_iter(&masked).count();
            if count == 0 {
                continue;
            }

            masked = compiled
                .regex
                .replace_all(&masked, NoExpand(compiled.category.placeholder))
                .into_owned();
            redactions_by_type.insert(compiled.category.name.to_string(), count);
        }

        let audit = RedactionAudit {
            original_length: text.chars().count(),
            masked_length: masked.chars().count(),
            total_redactions: redactions_by_type.values().sum(),
            redactions_by_type,
        };

        tracing::debug!(
            original_length = audit.original_length,
            total_redactions = audit.total_redactions,
            "deidentified text"
        );

        (masked, audit)
    }

    /// Reports residual PHI risk in already-masked text without changing it.
    pub fn validate(&self, masked_text: &str) -> ValidationReport {
        let mut risks = Vec::new();

        for check in &self.checks {
            let matches: Vec<&str> = check
                .regex
                .find_iter(masked_text)
                .filter(|m| {
                    !check.outside_placeholders || !placeholder_follows(masked_text, m.end())
                })
                .map(|m| m.as_str())
                .collect();

            if matches.is_empty() {
                continue;
            }

            risks.push(PhiRisk {
                risk_type: check.name.to_string(),
                count: matches.len(),
                examples: matches
                    .iter()
                    .take(MAX_RISK_EXAMPLES)
                    .map(|m| m.to_string())
                    .collect(),
            });
        }

        ValidationReport {
            is_safe: risks.is_empty(),
            remaining_phi_risks: risks,
        }
    }
}

/// True when a `[` appears later on the same line as `offset`.
fn placeholder_follows(text: &str, offset: usize) -> bool {
    text[offset..]
        .split('\n')
        .next()
        .is_some_and(|rest| rest.contains('['))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor() -> Redactor {
        Redactor::new().expect("built-in patterns compile")
    }

    #[test]
    fn masks_name_date_and_mrn() {
        let (masked, audit) = redactor().deidentify(
            "Patient John Smith, DOB 05/15/1980, MRN 123456789, seen for chest pain.",
        );

        assert!(masked.contains("[PATIENT_NAME]"));
        assert!(masked.contains("[DATE]"));
        assert!(masked.contains("[MRN]"));
        assert!(!masked.contains("Smith"));
        assert!(!masked.contains("123456789"));
        assert!(masked.ends_with("seen for chest pain."));

        assert!(audit.redactions_by_type["names"] >= 1);
        assert!(audit.redactions_by_type["dates"] >= 1);
        assert!(audit.redactions_by_type["mrn"] >= 1);
        assert_eq!(
            audit.total_redactions,
            audit.redactions_by_type.values().sum::<usize>()
        );
    }

    #[test]
    fn text_without_phi_is_unchanged() {
        let text = "Patient reports a dry cough for three days.";
        let (masked, audit) = redactor().deidentify(text);
        assert_eq!(masked, text);
        assert_eq!(audit.total_redactions, 0);
        assert!(audit.redactions_by_type.is_empty());
        assert_eq!(audit.original_length, audit.masked_length);
    }

    #[test]
    fn empty_input_yields_no_redactions() {
        let (masked, audit) = redactor().deidentify("");
        assert_eq!(masked, "");
        assert_eq!(audit, RedactionAudit::default());
    }

    #[test]
    fn masks_contact_details_and_age() {
        let (masked, audit) = redactor().deidentify(
            "Call (555) 123-4567 or mail jo.doe@example.org. SSN 123-45-6789. A 45-year-old seen at 12 North Oak Street.",
        );

        assert!(masked.contains("[PHONE]"));
        assert!(masked.contains("[EMAIL]"));
        assert!(masked.contains("[SSN]"));
        assert!(masked.contains("[AGE]"));
        assert!(masked.contains("[ADDRESS]"));
        assert_eq!(audit.redactions_by_type["ssn"], 1);
        assert!(!audit.redactions_by_type.contains_key("phone_numbers"));
    }

    #[test]
    fn every_match_is_replaced_when_a_category_repeats() {
        let (masked, audit) =
            redactor().deidentify("Seen 01/02/2020, follow-up 03/04/2021 and 05/06/2022.");
        assert_eq!(audit.redactions_by_type["dates"], 3);
        assert_eq!(masked.matches("[DATE]").count(), 3);
    }

    #[test]
    fn redacting_twice_adds_nothing() {
        let r = redactor();
        let (once, _) = r.deidentify("Mary Jones, MRN: 9876543, email mj@clinic.com");
        let (twice, audit) = r.deidentify(&once);
        assert_eq!(once, twice);
        assert_eq!(audit.total_redactions, 0);
    }

    #[test]
    fn validate_reports_residual_risk_with_capped_examples() {
        let report = redactor().validate(
            "Seen by Alice Cooper and Bob Dylan with Carl Sagan and Dana Scully on 1/2/2024.",
        );

        assert!(!report.is_safe);
        let names = &report.remaining_phi_risks[0];
        assert_eq!(names.risk_type, "potential_names");
        assert_eq!(names.count, 4);
        assert_eq!(names.examples.len(), 3);
        assert_eq!(report.remaining_phi_risks[1].risk_type, "potential_dates");
    }

    #[test]
    fn numbers_before_a_placeholder_on_the_same_line_are_ignored() {
        let r = redactor();
        assert!(r.validate("Ref 1234567 see [MRN]").is_safe);

        let report = r.validate("Ref 1234567\nsee [MRN]");
        assert_eq!(report.remaining_phi_risks[0].risk_type, "potential_numbers");
        assert_eq!(report.remaining_phi_risks[0].examples, vec!["1234567".to_string()]);
    }

    #[test]
    fn clean_masked_text_is_safe() {
        let report = redactor().validate("[PATIENT_NAME] reports chest pain since [DATE].");
        assert!(report.is_safe);
        assert!(report.remaining_phi_risks.is_empty());
    }

    #[test]
    fn custom_category_lists_apply_in_order() {
        let custom = [PhiCategory {
            name: "ward",
            pattern: r"\bward \d+\b",
            placeholder: "[WARD]",
        }];
        let r = Redactor::with_categories(&custom).expect("compiles");
        let (masked, audit) = r.deidentify("Moved to Ward 7 overnight.");
        assert_eq!(masked, "Moved to [WARD] overnight.");
        assert_eq!(audit.redactions_by_type["ward"], 1);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let bad = [PhiCategory {
            name: "broken",
            pattern: "(",
            placeholder: "[X]",
        }];
        assert!(matches!(
            Redactor::with_categories(&bad),
            Err(ScribeError::Config(_))
        ));
    }
}
