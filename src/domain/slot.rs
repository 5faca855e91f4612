//! Slot keys and the file naming convention derived from them.

use std::fmt;

use super::{artifact::ArtifactFormat, error::DomainError};

const MAX_KEY_LEN: usize = 128;

/// Identifies one artifact slot. Requests without a key address `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    Default,
    Named(String),
}

impl SlotKey {
    /// Validate an optional path segment into a key.
    pub fn parse(raw: Option<&str>) -> Result<Self, DomainError> {
        match raw {
            None => Ok(SlotKey::Default),
            Some(value) => Self::named(value),
        }
    }

    /// Keys end up in file names, so only `[A-Za-z0-9_-]` is accepted.
    pub fn named(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::validation("slot key must not be empty"));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(DomainError::validation(format!(
                "slot key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        if let Some(invalid) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(DomainError::validation(format!(
                "slot key contains unsupported character `{invalid}`"
            )));
        }
        Ok(SlotKey::Named(raw.to_string()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SlotKey::Default => None,
            SlotKey::Named(key) => Some(key.as_str()),
        }
    }

    /// `{key}-{base}.{ext}`, or `{base}.{ext}` for the default slot.
    pub fn file_name(&self, base_name: &str, format: ArtifactFormat) -> String {
        let ext = format.extension();
        match self {
            SlotKey::Default => format!("{base_name}.{ext}"),
            SlotKey::Named(key) => format!("{key}-{base_name}.{ext}"),
        }
    }

    /// Inverse of [`SlotKey::file_name`]; `None` for files that do not follow the convention.
    pub fn from_file_name(file_name: &str, base_name: &str, format: ArtifactFormat) -> Option<Self> {
        let ext = format.extension();
        if file_name == format!("{base_name}.{ext}") {
            return Some(SlotKey::Default);
        }
        let key = file_name.strip_suffix(&format!("-{base_name}.{ext}"))?;
        Self::named(key).ok()
    }

    /// Public read path for this slot.
    pub fn artifact_path(&self) -> String {
        match self {
            SlotKey::Default => "/artifact".to_string(),
            SlotKey::Named(key) => format!("/artifact/{key}"),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Default => f.write_str("(default)"),
            SlotKey::Named(key) => f.write_str(key),
        }
    }
}
