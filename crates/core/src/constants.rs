//! Constants used throughout the scribe core crate.
//!
//! Default locations and limits live here so configuration, stores and the CLI agree on them.

/// Default directory for the primary JSON-lines audit log.
pub const DEFAULT_AUDIT_LOG_DIR: &str = "audit_logs";

/// Default directory for persisted FHIR bundles.
pub const DEFAULT_BUNDLE_DIR: &str = "fhir_bundles";

/// Score below which a field group is considered low-confidence.
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 70;

/// Filename of the audit log inside an audit directory.
pub const AUDIT_LOG_FILENAME: &str = "audit_events.jsonl";

/// Extension of persisted bundle files.
pub const BUNDLE_FILE_EXTENSION: &str = "json";

/// Environment variable names read once at startup.
pub const ENV_AUDIT_DIR: &str = "SCRIBE_AUDIT_DIR";
pub const ENV_AUDIT_MIRROR_DIR: &str = "SCRIBE_AUDIT_MIRROR_DIR";
pub const ENV_BUNDLE_DIR: &str = "SCRIBE_BUNDLE_DIR";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "SCRIBE_CONFIDENCE_THRESHOLD";
pub const ENV_SOURCE_TAG: &str = "SCRIBE_SOURCE_TAG";
