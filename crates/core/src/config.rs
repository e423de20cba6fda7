//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Nothing in the pipeline reads environment variables while a
//! transaction is running.
//!
//! Configuration is assembled from [`ConfigLayer`]s in precedence order: command-line flags,
//! then environment values, then an optional YAML file, then built-in defaults.

use crate::constants::{
    DEFAULT_AUDIT_LOG_DIR, DEFAULT_BUNDLE_DIR, DEFAULT_CONFIDENCE_THRESHOLD, ENV_AUDIT_DIR,
    ENV_AUDIT_MIRROR_DIR, ENV_BUNDLE_DIR, ENV_CONFIDENCE_THRESHOLD, ENV_SOURCE_TAG,
};
use crate::{ScribeError, ScribeResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    audit_log_dir: PathBuf,
    mirror_audit_dir: Option<PathBuf>,
    bundle_dir: PathBuf,
    confidence_threshold: u8,
    source_tag: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            audit_log_dir: PathBuf::from(DEFAULT_AUDIT_LOG_DIR),
            mirror_audit_dir: None,
            bundle_dir: PathBuf::from(DEFAULT_BUNDLE_DIR),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            source_tag: fhir::DEFAULT_SOURCE_TAG.to_string(),
        }
    }
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if a directory is empty, the threshold is outside
    /// `1..=100` or the source tag is blank.
    pub fn new(
        audit_log_dir: PathBuf,
        mirror_audit_dir: Option<PathBuf>,
        bundle_dir: PathBuf,
        confidence_threshold: u8,
        source_tag: String,
    ) -> ScribeResult<Self> {
        if audit_log_dir.as_os_str().is_empty() {
            return Err(ScribeError::Config("audit_log_dir cannot be empty".into()));
        }
        if bundle_dir.as_os_str().is_empty() {
            return Err(ScribeError::Config("bundle_dir cannot be empty".into()));
        }
        if mirror_audit_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ScribeError::Config(
                "mirror_audit_dir cannot be empty when set".into(),
            ));
        }
        if mirror_audit_dir.as_ref() == Some(&audit_log_dir) {
            return Err(ScribeError::Config(
                "mirror_audit_dir must differ from audit_log_dir".into(),
            ));
        }
        validate_threshold(confidence_threshold)?;
        if source_tag.trim().is_empty() {
            return Err(ScribeError::Config("source_tag cannot be empty".into()));
        }

        Ok(Self {
            audit_log_dir,
            mirror_audit_dir,
            bundle_dir,
            confidence_threshold,
            source_tag: source_tag.trim().to_string(),
        })
    }

    /// Merges `layers` (highest precedence first) over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if the merged values fail [`CoreConfig::new`].
    pub fn from_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> ScribeResult<Self> {
        let merged = layers
            .into_iter()
            .fold(ConfigLayer::default(), |higher, lower| higher.or(lower));
        let defaults = Self::default();

        Self::new(
            merged.audit_log_dir.unwrap_or(defaults.audit_log_dir),
            merged.mirror_audit_dir.or(defaults.mirror_audit_dir),
            merged.bundle_dir.unwrap_or(defaults.bundle_dir),
            merged
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            merged.source_tag.unwrap_or(defaults.source_tag),
        )
    }

    pub fn audit_log_dir(&self) -> &Path {
        &self.audit_log_dir
    }

    pub fn mirror_audit_dir(&self) -> Option<&Path> {
        self.mirror_audit_dir.as_deref()
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    pub fn confidence_threshold(&self) -> u8 {
        self.confidence_threshold
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }
}

/// One source of configuration values. Unset fields defer to lower layers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub audit_log_dir: Option<PathBuf>,
    #[serde(default)]
    pub mirror_audit_dir: Option<PathBuf>,
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
    #[serde(default)]
    pub confidence_threshold: Option<u8>,
    #[serde(default)]
    pub source_tag: Option<String>,
}

impl ConfigLayer {
    /// Reads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if the file cannot be read or does not match the
    /// configuration keys.
    pub fn from_yaml_file(path: &Path) -> ScribeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScribeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses YAML configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] on unknown keys or mistyped values.
    pub fn from_yaml_str(text: &str) -> ScribeResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| ScribeError::Config(format!("invalid configuration file: {e}")))
    }

    /// Builds a layer from environment-style values supplied by `lookup`.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if the threshold value is not a number in `1..=100`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> ScribeResult<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            audit_log_dir: value(ENV_AUDIT_DIR).map(PathBuf::from),
            mirror_audit_dir: value(ENV_AUDIT_MIRROR_DIR).map(PathBuf::from),
            bundle_dir: value(ENV_BUNDLE_DIR).map(PathBuf::from),
            confidence_threshold: confidence_threshold_from_env_value(value(
                ENV_CONFIDENCE_THRESHOLD,
            ))?,
            source_tag: value(ENV_SOURCE_TAG),
        })
    }

    fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            audit_log_dir: self.audit_log_dir.or(lower.audit_log_dir),
            mirror_audit_dir: self.mirror_audit_dir.or(lower.mirror_audit_dir),
            bundle_dir: self.bundle_dir.or(lower.bundle_dir),
            confidence_threshold: self.confidence_threshold.or(lower.confidence_threshold),
            source_tag: self.source_tag.or(lower.source_tag),
        }
    }
}

/// Parse the confidence threshold from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `None`.
pub fn confidence_threshold_from_env_value(value: Option<String>) -> ScribeResult<Option<u8>> {
    let Some(raw) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let threshold = raw.parse::<u8>().map_err(|_| {
        ScribeError::Config(format!(
            "{ENV_CONFIDENCE_THRESHOLD} must be an integer between 1 and 100, got '{raw}'"
        ))
    })?;
    validate_threshold(threshold)?;
    Ok(Some(threshold))
}

fn validate_threshold(threshold: u8) -> ScribeResult<()> {
    if (1..=100).contains(&threshold) {
        Ok(())
    } else {
        Err(ScribeError::Config(format!(
            "confidence_threshold must be between 1 and 100, got {threshold}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_used_without_layers() {
        let cfg = CoreConfig::from_layers(Vec::new()).expect("defaults");
        assert_eq!(cfg.audit_log_dir(), Path::new("audit_logs"));
        assert_eq!(cfg.bundle_dir(), Path::new("fhir_bundles"));
        assert_eq!(cfg.confidence_threshold(), 70);
        assert_eq!(cfg.source_tag(), "clinical-scribe-ai");
        assert!(cfg.mirror_audit_dir().is_none());
    }

    #[test]
    fn higher_layers_win() {
        let cli = ConfigLayer {
            confidence_threshold: Some(80),
            ..ConfigLayer::default()
        };
        let env_layer =
            ConfigLayer::from_env(env(&[(ENV_CONFIDENCE_THRESHOLD, "60"), (ENV_BUNDLE_DIR, "b")]))
                .expect("env");
        let file = ConfigLayer::from_yaml_str("bundle_dir: from-file\naudit_log_dir: logs\n")
            .expect("yaml");

        let cfg = CoreConfig::from_layers([cli, env_layer, file]).expect("config");
        assert_eq!(cfg.confidence_threshold(), 80);
        assert_eq!(cfg.bundle_dir(), Path::new("b"));
        assert_eq!(cfg.audit_log_dir(), Path::new("logs"));
    }

    #[test]
    fn blank_env_values_are_unset() {
        let layer = ConfigLayer::from_env(env(&[(ENV_AUDIT_DIR, "   ")])).expect("env");
        assert_eq!(layer, ConfigLayer::default());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        assert!(confidence_threshold_from_env_value(Some("0".into())).is_err());
        assert!(confidence_threshold_from_env_value(Some("101".into())).is_err());
        assert!(confidence_threshold_from_env_value(Some("high".into())).is_err());
        assert_eq!(
            confidence_threshold_from_env_value(Some(" 75 ".into())).expect("valid"),
            Some(75)
        );
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        let err = ConfigLayer::from_yaml_str("audit_dir: x\n").expect_err("unknown key");
        assert!(matches!(err, ScribeError::Config(_)));
    }

    #[test]
    fn yaml_file_is_read() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("scribe.yaml");
        std::fs::write(&path, "confidence_threshold: 65\nsource_tag: ward-7\n").expect("write");

        let layer = ConfigLayer::from_yaml_file(&path).expect("layer");
        let cfg = CoreConfig::from_layers([layer]).expect("config");
        assert_eq!(cfg.confidence_threshold(), 65);
        assert_eq!(cfg.source_tag(), "ward-7");
    }

    #[test]
    fn mirror_must_differ_from_primary() {
        let err = CoreConfig::new(
            PathBuf::from("a"),
            Some(PathBuf::from("a")),
            PathBuf::from("b"),
            70,
            "tag".into(),
        )
        .expect_err("same dir");
        assert!(matches!(err, ScribeError::Config(_)));
    }
}
