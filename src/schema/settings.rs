/// Render settings: caller configuration and document-level overrides.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Language version this implementation understands. Documents declaring a
/// different `version` still render, with a warning.
pub const LANGUAGE_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Cleanup toggles and metadata a document (or caller) may override.
///
/// Every field is optional: a layer only overrides the keys it sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub whitespace: Option<bool>,
    pub punctuation: Option<bool>,
    pub capitalization: Option<bool>,
    pub articles: Option<bool>,
    pub version: Option<String>,
}

impl DocumentSettings {
    /// Overlay `other` on top of `self`, key by key.
    pub fn layer(&mut self, other: &DocumentSettings) {
        if other.whitespace.is_some() {
            self.whitespace = other.whitespace;
        }
        if other.punctuation.is_some() {
            self.punctuation = other.punctuation;
        }
        if other.capitalization.is_some() {
            self.capitalization = other.capitalization;
        }
        if other.articles.is_some() {
            self.articles = other.articles;
        }
        if other.version.is_some() {
            self.version = other.version.clone();
        }
    }

    /// Resolve against the built-in defaults.
    pub fn resolve(&self) -> CleanupSettings {
        let defaults = CleanupSettings::default();
        CleanupSettings {
            whitespace: self.whitespace.unwrap_or(defaults.whitespace),
            punctuation: self.punctuation.unwrap_or(defaults.punctuation),
            capitalization: self.capitalization.unwrap_or(defaults.capitalization),
            articles: self.articles.unwrap_or(defaults.articles),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == DocumentSettings::default()
    }
}

/// Fully resolved cleanup passes to run on the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSettings {
    pub whitespace: bool,
    pub punctuation: bool,
    pub capitalization: bool,
    pub articles: bool,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            whitespace: true,
            punctuation: true,
            capitalization: true,
            articles: true,
        }
    }
}

/// Settings supplied by the caller of a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub random_seed: Option<u64>,
    pub allow_script_execution: bool,
    /// Directory includes are resolved against. Defaults to `.`.
    pub working_directory: Option<PathBuf>,
    /// Caller-level cleanup overrides; they win over document settings.
    pub overrides: DocumentSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            random_seed: None,
            allow_script_execution: true,
            working_directory: None,
            overrides: DocumentSettings::default(),
        }
    }
}

impl RenderSettings {
    /// Load render settings from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<RenderSettings, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse render settings from a RON string.
    pub fn parse_ron(input: &str) -> Result<RenderSettings, SettingsError> {
        Ok(ron::from_str(input)?)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_scripts(mut self, allowed: bool) -> Self {
        self.allow_script_execution = allowed;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_overrides(mut self, overrides: DocumentSettings) -> Self {
        self.overrides = overrides;
        self
    }

    /// The directory includes resolve against.
    pub fn base_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_only_overrides_present_keys() {
        let mut base = DocumentSettings {
            whitespace: Some(false),
            punctuation: Some(false),
            ..Default::default()
        };
        base.layer(&DocumentSettings {
            punctuation: Some(true),
            version: Some("2.0".to_string()),
            ..Default::default()
        });
        assert_eq!(base.whitespace, Some(false));
        assert_eq!(base.punctuation, Some(true));
        assert_eq!(base.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn resolve_uses_defaults() {
        let resolved = DocumentSettings {
            capitalization: Some(false),
            ..Default::default()
        }
        .resolve();
        assert!(resolved.whitespace);
        assert!(resolved.punctuation);
        assert!(!resolved.capitalization);
        assert!(resolved.articles);
    }

    #[test]
    fn parse_partial_ron() {
        let settings = RenderSettings::parse_ron(
            "(random_seed: Some(7), overrides: (whitespace: Some(false)))",
        )
        .unwrap();
        assert_eq!(settings.random_seed, Some(7));
        assert!(settings.allow_script_execution);
        assert_eq!(settings.overrides.whitespace, Some(false));
    }

    #[test]
    fn parse_invalid_ron_is_error() {
        assert!(RenderSettings::parse_ron("(random_seed: \"nope\")").is_err());
    }

    #[test]
    fn base_directory_defaults_to_current() {
        let settings = RenderSettings::default();
        assert_eq!(settings.base_directory(), PathBuf::from("."));
        let settings = settings.with_working_directory("docs");
        assert_eq!(settings.base_directory(), PathBuf::from("docs"));
    }
}
