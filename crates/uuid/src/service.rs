//! Internal implementation of the identifier types.

use crate::{UuidError, UuidResult};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Upper bound on caller-supplied transaction ids.
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// Correlation key for one pipeline transaction.
///
/// Once constructed the value is trimmed, non-empty, bounded in length and free of control
/// characters and path separators.
///
/// # Construction
/// - [`TransactionId::generate`] allocates a new UUID-v4 (hyphenated form).
/// - [`TransactionId::parse`] validates a caller-supplied opaque value.
/// - [`TransactionId::resolve`] picks between the two.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generates a new transaction id from a random UUID-v4.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validates a caller-supplied transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if the trimmed input is empty, longer than
    /// [`MAX_TRANSACTION_ID_LEN`], or contains control characters or path separators.
    pub fn parse(input: &str) -> UuidResult<Self> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(UuidError::InvalidInput(
                "transaction id cannot be empty".into(),
            ));
        }

        if trimmed.len() > MAX_TRANSACTION_ID_LEN {
            return Err(UuidError::InvalidInput(format!(
                "transaction id exceeds maximum length of {} characters",
                MAX_TRANSACTION_ID_LEN
            )));
        }

        if trimmed
            .chars()
            .any(|c| c.is_control() || c == '/' || c == '\\')
        {
            return Err(UuidError::InvalidInput(format!(
                "transaction id contains invalid characters: '{}'",
                trimmed.escape_debug()
            )));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Uses the caller's id when supplied, otherwise generates one.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if a supplied id fails [`TransactionId::parse`].
    pub fn resolve(supplied: Option<&str>) -> UuidResult<Self> {
        match supplied {
            Some(raw) => Self::parse(raw),
            None => Ok(Self::generate()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransactionId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionId::parse(s)
    }
}

impl AsRef<str> for TransactionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TransactionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TransactionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TransactionId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier for one FHIR resource or bundle.
///
/// Always a random UUID-v4, displayed in hyphenated lowercase form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(Uuid);

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceId {
    /// Generates a new random resource id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the `urn:uuid:` form used for bundle entry full URLs.
    pub fn urn(&self) -> String {
        format!("urn:uuid:{}", self.0.hyphenated())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
