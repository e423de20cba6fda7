//! Identifier utilities for the scribe pipeline.
//!
//! Two kinds of identifier flow through a transaction:
//!
//! - [`TransactionId`]: the correlation key spanning every pipeline stage and audit event for
//!   one conversation. Callers may supply their own opaque value; otherwise a UUID-v4 is
//!   generated.
//! - [`ResourceId`]: a freshly generated UUID-v4 identifying one FHIR resource or bundle. These
//!   render in hyphenated form so they can be embedded directly in `urn:uuid:` full URLs.
//!
//! ## Transaction id rules
//! - Leading/trailing whitespace is trimmed
//! - Must be non-empty and at most [`MAX_TRANSACTION_ID_LEN`] bytes
//! - Must not contain control characters (the id is written into JSON-lines logs and file
//!   names)
//! - `/` and `\` are rejected so the id can name a file inside a store directory

mod service;

// Re-export public types
pub use service::{ResourceId, TransactionId, Uuid, MAX_TRANSACTION_ID_LEN};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
