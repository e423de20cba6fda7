//! Text-completion provider seam.
//!
//! The pipeline hands the masked conversation to a [`CompletionProvider`] and treats whatever
//! comes back as untrusted text. Network transport, model choice and retries belong to the
//! implementation, not to the core.

use crate::ScribeError;

/// Instruction sent with every request. Carries the six-field output contract.
pub const SYSTEM_PROMPT: &str = "Extract clinical data from de-identified conversation. Output MUST be valid JSON.

Rules:
- NEVER include patient names/dates/identifiers
- Only extract explicitly stated facts
- Use 'N/A' for missing fields
- Return JSON object with: encounter_summary, vital_signs_extracted, clinical_entities, assessment_plan_draft, ai_confidence_score, flagged_for_review";

/// Wraps the masked conversation in the extraction request.
pub fn user_message(masked_conversation: &str) -> String {
    format!(
        "Extract JSON from this clinical conversation (de-identified):

{masked_conversation}

Return JSON with:
- encounter_summary: {{chief_complaint, history_of_present_illness}}
- vital_signs_extracted: {{blood_pressure, temperature, heart_rate, respiratory_rate, oxygen_saturation}}
- clinical_entities: {{diagnoses_problems[], medication_requests[], allergies[]}}
- assessment_plan_draft: string
- ai_confidence_score: 1-100
- flagged_for_review: boolean

Only extract stated facts."
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

impl From<ProviderError> for ScribeError {
    fn from(err: ProviderError) -> Self {
        ScribeError::Provider(err.to_string())
    }
}

/// Produces free-form completion text for a system instruction and user payload.
pub trait CompletionProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if no text could be obtained.
    fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

/// Returns one prerecorded completion for every request.
#[derive(Clone, Debug)]
pub struct ReplayProvider {
    completion: String,
}

impl ReplayProvider {
    pub fn new(completion: impl Into<String>) -> Self {
        Self {
            completion: completion.into(),
        }
    }
}

impl CompletionProvider for ReplayProvider {
    fn complete(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
        Ok(self.completion.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_embeds_masked_text() {
        let message = user_message("[PATIENT_NAME] reports chest pain.");
        assert!(message.contains("[PATIENT_NAME] reports chest pain."));
        assert!(message.contains("clinical_entities: {diagnoses_problems[]"));
    }

    #[test]
    fn system_prompt_names_every_top_level_field() {
        for field in [
            "encounter_summary",
            "vital_signs_extracted",
            "clinical_entities",
            "assessment_plan_draft",
            "ai_confidence_score",
            "flagged_for_review",
        ] {
            assert!(SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn replay_provider_ignores_the_request() {
        let provider = ReplayProvider::new("{}");
        assert_eq!(provider.complete("a", "b").expect("complete"), "{}");
    }

    #[test]
    fn provider_errors_become_scribe_errors() {
        let err: ScribeError = ProviderError::Unavailable("timeout".into()).into();
        assert!(matches!(err, ScribeError::Provider(msg) if msg.contains("timeout")));
    }
}
