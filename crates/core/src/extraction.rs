//! Extraction normalization.
//!
//! Turns untrusted completion text into a [`CanonicalClinicalRecord`] in three steps:
//!
//! 1. [`Normalizer::parse`] runs the [`ParseStrategy`] list in order and keeps the first
//!    success. Every failure is kept for diagnostics.
//! 2. [`Normalizer::validate`] injects defaults for missing fields, coerces stray scalars to
//!    text and checks container shapes. Only shape mismatches and a bad confidence score are
//!    hard errors.
//! 3. [`Normalizer::into_record`] deserializes the validated value.
//!
//! [`Normalizer::normalize`] runs all three.

use crate::error::ParseError;
use crate::{ScribeError, ScribeResult};
use scribe_types::{CanonicalClinicalRecord, DEFAULT_CONFIDENCE_SCORE, NOT_AVAILABLE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

const ENCOUNTER_SUMMARY: &str = "encounter_summary";
const VITAL_SIGNS: &str = "vital_signs_extracted";
const CLINICAL_ENTITIES: &str = "clinical_entities";
const ASSESSMENT_PLAN: &str = "assessment_plan_draft";
const CONFIDENCE_SCORE: &str = "ai_confidence_score";
const FLAGGED_FOR_REVIEW: &str = "flagged_for_review";
const REVIEW_NOTES: &str = "review_notes";

const SUMMARY_FIELDS: &[&str] = &["chief_complaint", "history_of_present_illness"];
const REQUIRED_VITALS: &[&str] = &["blood_pressure", "temperature", "heart_rate"];
const OPTIONAL_VITALS: &[&str] = &["respiratory_rate", "oxygen_saturation"];

const MEDICATIONS: &str = "medication_requests";
const MEDICATIONS_ALIAS: &str = "medication_requests_new_or_changed";
const ENTITY_LISTS: &[&str] = &["diagnoses_problems", MEDICATIONS, "allergies"];

// ============================================================================
// Parsing
// ============================================================================

/// One way of turning completion text into JSON. Applied in [`ParseStrategy::ORDER`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    /// Strip a fenced code block (if any) and parse.
    Direct,
    /// Parse the span from the first `{` to the last `}`.
    OuterBraces,
    /// Escape raw line breaks inside string literals and parse again.
    EscapedLineBreaks,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 3] = [
        ParseStrategy::Direct,
        ParseStrategy::OuterBraces,
        ParseStrategy::EscapedLineBreaks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParseStrategy::Direct => "direct",
            ParseStrategy::OuterBraces => "outer_braces",
            ParseStrategy::EscapedLineBreaks => "escaped_line_breaks",
        }
    }

    /// Derives this strategy's candidate from the previous strategy's candidate.
    fn candidate(self, previous: &str) -> Result<String, String> {
        match self {
            ParseStrategy::Direct => Ok(strip_code_fence(previous).to_string()),
            ParseStrategy::OuterBraces => {
                match (previous.find('{'), previous.rfind('}')) {
                    (Some(start), Some(end)) if end > start => {
                        Ok(previous[start..=end].to_string())
                    }
                    _ => Err("no JSON object delimiters found".into()),
                }
            }
            ParseStrategy::EscapedLineBreaks => Ok(escape_line_breaks_in_strings(previous)),
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Removes a surrounding ```` ```json ```` (or bare ```` ``` ````) fence.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };

    body.split("```").next().unwrap_or(body).trim()
}

/// Escapes `\n` and `\r` that appear inside JSON string literals.
fn escape_line_breaks_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        match c {
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '"' if !escaped => {
                in_string = !in_string;
                out.push(c);
            }
            _ => out.push(c),
        }
        escaped = in_string && c == '\\' && !escaped;
    }

    out
}

// ============================================================================
// Schema report
// ============================================================================

/// Outcome of schema validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SchemaReport {
    /// Errors followed by warnings.
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .cloned()
            .collect()
    }
}

/// Result of a successful normalization.
#[derive(Clone, Debug)]
pub struct NormalizedExtraction {
    pub record: CanonicalClinicalRecord,
    pub strategy: ParseStrategy,
    pub report: SchemaReport,
}

// ============================================================================
// Normalizer
// ============================================================================

/// Extraction normalization operations.
///
/// This is a zero-sized type used for namespacing. It holds no state between calls.
pub struct Normalizer;

impl Normalizer {
    /// Parses completion text with the first strategy that succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] carrying every strategy failure if the text is blank or no
    /// strategy yields JSON.
    pub fn parse(text: &str) -> Result<(Value, ParseStrategy), ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::new(vec!["completion text is empty".into()]));
        }

        let mut failures = Vec::new();
        let mut current = text.to_string();

        for strategy in ParseStrategy::ORDER {
            let candidate = match strategy.candidate(&current) {
                Ok(candidate) => candidate,
                Err(reason) => {
                    tracing::debug!(strategy = %strategy, "parse strategy skipped");
                    failures.push(format!("{strategy}: {reason}"));
                    continue;
                }
            };

            match serde_json::from_str::<Value>(&candidate) {
                Ok(value) => return Ok((value, strategy)),
                Err(err) => {
                    tracing::debug!(strategy = %strategy, "parse strategy failed");
                    failures.push(format!("{strategy}: {err}"));
                    current = candidate;
                }
            }
        }

        Err(ParseError::new(failures))
    }

    /// Applies defaults and coercions to `value` in place and reports what was changed.
    ///
    /// Missing top-level fields and sub-fields are defaulted with a warning. A non-boolean
    /// `flagged_for_review` becomes `false` silently. Hard errors are raised only for
    /// containers of the wrong shape and an `ai_confidence_score` outside `1..=100`.
    pub fn validate(value: &mut Value) -> SchemaReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let Some(output) = value.as_object_mut() else {
            return SchemaReport {
                is_valid: false,
                errors: vec!["completion must be a JSON object".into()],
                warnings,
            };
        };

        for (field, default) in default_fields() {
            if !output.contains_key(field) {
                output.insert(field.to_string(), default);
                warnings.push(format!("Missing field '{field}': using default value"));
            }
        }

        match output.get_mut(ENCOUNTER_SUMMARY) {
            Some(Value::Object(summary)) => {
                fill_text_fields(summary, ENCOUNTER_SUMMARY, SUMMARY_FIELDS, &mut warnings);
            }
            _ => errors.push(format!("{ENCOUNTER_SUMMARY} must be an object")),
        }

        match output.get_mut(VITAL_SIGNS) {
            Some(Value::Object(vitals)) => {
                fill_text_fields(vitals, VITAL_SIGNS, REQUIRED_VITALS, &mut warnings);
                for field in OPTIONAL_VITALS {
                    if let Some(v) = vitals.get_mut(*field) {
                        coerce_text(v, &format!("{VITAL_SIGNS}.{field}"), &mut warnings);
                    }
                }
            }
            _ => errors.push(format!("{VITAL_SIGNS} must be an object")),
        }

        match output.get_mut(CLINICAL_ENTITIES) {
            Some(Value::Object(entities)) => {
                check_entity_lists(entities, &mut errors, &mut warnings);
            }
            _ => errors.push(format!("{CLINICAL_ENTITIES} must be an object")),
        }

        if let Some(plan) = output.get_mut(ASSESSMENT_PLAN) {
            coerce_text(plan, ASSESSMENT_PLAN, &mut warnings);
        }

        let score_ok = output
            .get(CONFIDENCE_SCORE)
            .and_then(Value::as_i64)
            .is_some_and(|score| (1..=100).contains(&score));
        if !score_ok {
            errors.push(format!(
                "{CONFIDENCE_SCORE} must be an integer between 1 and 100"
            ));
        }

        if !output.get(FLAGGED_FOR_REVIEW).is_some_and(Value::is_boolean) {
            output.insert(FLAGGED_FOR_REVIEW.into(), Value::Bool(false));
        }

        match output.get_mut(REVIEW_NOTES) {
            Some(Value::Null) => {
                output.remove(REVIEW_NOTES);
            }
            Some(notes) => coerce_text(notes, REVIEW_NOTES, &mut warnings),
            None => {}
        }

        SchemaReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Deserializes a validated value into a record.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Schema`] if the value still does not fit the record shape.
    pub fn into_record(value: Value) -> ScribeResult<CanonicalClinicalRecord> {
        serde_json::from_value(value).map_err(|err| ScribeError::Schema {
            errors: vec![format!("record does not match the canonical schema: {err}")],
        })
    }

    /// Parses, validates and deserializes completion text.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Parse`] when no strategy parses the text and
    /// [`ScribeError::Schema`] when validation finds hard errors.
    pub fn normalize(text: &str) -> ScribeResult<NormalizedExtraction> {
        let (mut value, strategy) = Self::parse(text)?;
        let report = Self::validate(&mut value);

        if !report.is_valid {
            return Err(ScribeError::Schema {
                errors: report.errors,
            });
        }

        let record = Self::into_record(value)?;
        Ok(NormalizedExtraction {
            record,
            strategy,
            report,
        })
    }
}

fn default_fields() -> [(&'static str, Value); 6] {
    [
        (
            ENCOUNTER_SUMMARY,
            json!({
                "chief_complaint": NOT_AVAILABLE,
                "history_of_present_illness": NOT_AVAILABLE,
            }),
        ),
        (
            VITAL_SIGNS,
            json!({
                "blood_pressure": NOT_AVAILABLE,
                "temperature": NOT_AVAILABLE,
                "heart_rate": NOT_AVAILABLE,
            }),
        ),
        (
            CLINICAL_ENTITIES,
            json!({
                "diagnoses_problems": [],
                MEDICATIONS: [],
                "allergies": [],
            }),
        ),
        (ASSESSMENT_PLAN, json!(NOT_AVAILABLE)),
        (CONFIDENCE_SCORE, json!(DEFAULT_CONFIDENCE_SCORE)),
        (FLAGGED_FOR_REVIEW, json!(false)),
    ]
}

fn fill_text_fields(
    object: &mut Map<String, Value>,
    parent: &str,
    fields: &[&str],
    warnings: &mut Vec<String>,
) {
    for field in fields {
        match object.get_mut(*field) {
            Some(v) => coerce_text(v, &format!("{parent}.{field}"), warnings),
            None => {
                object.insert(field.to_string(), Value::String(NOT_AVAILABLE.into()));
                warnings.push(format!("Missing field '{parent}.{field}': using N/A"));
            }
        }
    }
}

fn check_entity_lists(
    entities: &mut Map<String, Value>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if let Some(alias) = entities.remove(MEDICATIONS_ALIAS) {
        if entities.contains_key(MEDICATIONS) {
            warnings.push(format!(
                "Both '{MEDICATIONS}' and '{MEDICATIONS_ALIAS}' present: ignoring '{MEDICATIONS_ALIAS}'"
            ));
        } else {
            entities.insert(MEDICATIONS.into(), alias);
        }
    }

    for list in ENTITY_LISTS {
        match entities.get(*list) {
            Some(Value::Array(_)) => {}
            None | Some(Value::Null) => {
                entities.insert(list.to_string(), Value::Array(Vec::new()));
                warnings.push(format!(
                    "Missing field '{CLINICAL_ENTITIES}.{list}': using empty list"
                ));
            }
            Some(_) => errors.push(format!("{list} must be an array")),
        }
    }
}

/// Turns a non-string scalar into text, recording a warning.
fn coerce_text(value: &mut Value, path: &str, warnings: &mut Vec<String>) {
    let text = match &*value {
        Value::String(_) => return,
        Value::Null => NOT_AVAILABLE.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };

    warnings.push(format!("Coerced '{path}' to text"));
    *value = Value::String(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_output() -> Value {
        json!({
            "encounter_summary": {
                "chief_complaint": "Chest pain",
                "history_of_present_illness": "Two days of intermittent chest pain."
            },
            "vital_signs_extracted": {
                "blood_pressure": "140/90 mmHg",
                "temperature": "98.6 F",
                "heart_rate": "88 bpm"
            },
            "clinical_entities": {
                "diagnoses_problems": ["Chest pain"],
                "medication_requests": [{"medication_name": "Aspirin", "dosage": "81mg"}],
                "allergies": []
            },
            "assessment_plan_draft": "Rule out ACS.",
            "ai_confidence_score": 82,
            "flagged_for_review": false
        })
    }

    #[test]
    fn fenced_json_parses_like_bare_json() {
        let bare = full_output().to_string();
        let fenced = format!("Here you go:\n```json\n{bare}\n```\nThanks");

        let (from_fence, strategy) = Normalizer::parse(&fenced).expect("fenced");
        let (from_bare, _) = Normalizer::parse(&bare).expect("bare");

        assert_eq!(strategy, ParseStrategy::Direct);
        assert_eq!(from_fence, from_bare);
    }

    #[test]
    fn prose_around_object_uses_outer_braces() {
        let text = format!("Sure! {} Let me know.", full_output());
        let (value, strategy) = Normalizer::parse(&text).expect("parse");
        assert_eq!(strategy, ParseStrategy::OuterBraces);
        assert_eq!(value["ai_confidence_score"], 82);
    }

    #[test]
    fn raw_line_breaks_in_strings_are_escaped() {
        let text = "{\"assessment_plan_draft\": \"Line one\nLine two\", \"ai_confidence_score\": 70}";
        let (value, strategy) = Normalizer::parse(text).expect("parse");
        assert_eq!(strategy, ParseStrategy::EscapedLineBreaks);
        assert_eq!(value["assessment_plan_draft"], "Line one\nLine two");
    }

    #[test]
    fn unparsable_text_reports_every_failure() {
        let err = Normalizer::parse("no json here").expect_err("should fail");
        assert_eq!(err.failures().len(), 3);
        assert!(err.failures()[1].contains("no JSON object delimiters"));
        assert!(err.to_string().starts_with("failed to parse completion: escaped_line_breaks"));
    }

    #[test]
    fn empty_text_fails_without_running_strategies() {
        let err = Normalizer::parse("   ").expect_err("empty");
        assert_eq!(err.failures(), ["completion text is empty".to_string()]);
    }

    #[test]
    fn missing_top_level_fields_are_defaulted_with_warnings() {
        let mut value = json!({"assessment_plan_draft": "Follow up."});
        let report = Normalizer::validate(&mut value);

        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(
            report
                .warnings
                .iter()
                .filter(|w| w.ends_with("using default value"))
                .count(),
            5
        );
        assert!(report
            .warnings
            .contains(&"Missing field 'ai_confidence_score': using default value".to_string()));

        let record = Normalizer::into_record(value).expect("record");
        assert_eq!(record.ai_confidence_score, 50);
        assert_eq!(record.encounter_summary.chief_complaint, "N/A");
        assert!(!record.flagged_for_review);
    }

    #[test]
    fn shape_mismatches_are_hard_errors() {
        let mut value = full_output();
        value["encounter_summary"] = json!("chest pain");
        value["clinical_entities"]["allergies"] = json!("none");
        let report = Normalizer::validate(&mut value);

        assert!(!report.is_valid);
        assert!(report
            .errors
            .contains(&"encounter_summary must be an object".to_string()));
        assert!(report.errors.contains(&"allergies must be an array".to_string()));
    }

    #[test]
    fn confidence_score_must_be_integer_in_range() {
        for bad in [json!(0), json!(101), json!(75.5), json!("80")] {
            let mut value = full_output();
            value["ai_confidence_score"] = bad;
            let report = Normalizer::validate(&mut value);
            assert!(!report.is_valid);
        }
    }

    #[test]
    fn non_boolean_flag_becomes_false_silently() {
        let mut value = full_output();
        value["flagged_for_review"] = json!("yes");
        let report = Normalizer::validate(&mut value);

        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
        assert_eq!(value["flagged_for_review"], false);
    }

    #[test]
    fn scalars_are_coerced_and_subfields_defaulted() {
        let mut value = full_output();
        value["vital_signs_extracted"] = json!({"blood_pressure": null, "heart_rate": 72});
        let report = Normalizer::validate(&mut value);

        assert!(report.is_valid);
        assert_eq!(value["vital_signs_extracted"]["heart_rate"], "72");
        assert_eq!(value["vital_signs_extracted"]["blood_pressure"], "N/A");
        assert_eq!(value["vital_signs_extracted"]["temperature"], "N/A");
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn structured_plan_is_coerced_to_json_text() {
        let mut value = full_output();
        value["assessment_plan_draft"] = json!(["ECG", "troponin"]);
        let report = Normalizer::validate(&mut value);

        assert!(report.is_valid);
        assert_eq!(value["assessment_plan_draft"], r#"["ECG","troponin"]"#);
        assert_eq!(
            report.warnings,
            vec!["Coerced 'assessment_plan_draft' to text".to_string()]
        );
    }

    #[test]
    fn medication_alias_is_accepted() {
        let mut value = full_output();
        let meds = value["clinical_entities"]
            .as_object_mut()
            .and_then(|e| e.remove("medication_requests"))
            .expect("meds");
        value["clinical_entities"]["medication_requests_new_or_changed"] = meds;

        let report = Normalizer::validate(&mut value);
        assert!(report.is_valid);
        let record = Normalizer::into_record(value).expect("record");
        assert_eq!(record.clinical_entities.medications()[0].name, "Aspirin");
    }

    #[test]
    fn messages_list_errors_before_warnings() {
        let mut value = json!({"encounter_summary": []});
        let report = Normalizer::validate(&mut value);
        let messages = report.messages();
        assert_eq!(messages[0], "encounter_summary must be an object");
        assert!(messages.len() > report.errors.len());
    }

    #[test]
    fn top_level_array_is_rejected() {
        let err = Normalizer::normalize("[1, 2, 3]").expect_err("array");
        assert!(matches!(err, ScribeError::Schema { .. }));
    }

    #[test]
    fn normalize_returns_record_and_strategy() {
        let text = format!("```\n{}\n```", full_output());
        let normalized = Normalizer::normalize(&text).expect("normalize");
        assert_eq!(normalized.strategy, ParseStrategy::Direct);
        assert_eq!(normalized.record.ai_confidence_score, 82);
        assert!(normalized.report.warnings.is_empty());
    }
}
