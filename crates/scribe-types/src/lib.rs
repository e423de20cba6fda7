//! # Scribe Types
//!
//! Value types shared by every stage of the clinical scribe pipeline.
//!
//! - [`NonEmptyText`]: trimmed, guaranteed non-blank text
//! - [`CanonicalClinicalRecord`]: the normalized extraction result handed from the
//!   normalizer to the FHIR builder and the confidence scorer
//! - Polymorphic entity items ([`EntityItem`]) and their normalized forms
//!   ([`Diagnosis`], [`Medication`], [`Allergy`])

pub mod record;

pub use record::{
    is_recorded, Allergy, AllergyRecord, CanonicalClinicalRecord, ClinicalEntities, Diagnosis,
    DiagnosisRecord, EncounterSummary, EntityItem, EntityRecord, Medication, MedicationRecord,
    VitalSigns, DEFAULT_CONFIDENCE_SCORE, NOT_AVAILABLE,
};

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}
