use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::pipeline::processing::normalize::fold;

/// One reviewer decision: labels normalizing to `alias` are the same item as
/// the identity currently labelled `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub target: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Manually curated alias list, loaded from TOML:
///
/// ```toml
/// [[alias]]
/// alias = "bar soap"
/// target = "soap bar"
/// note = "renamed in 2021 catalog"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(default, rename = "alias")]
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn new(entries: Vec<AliasEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| AliasEntry { alias: fold(&e.alias), target: fold(&e.target), note: e.note })
            .collect();
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: AliasTable = toml::from_str(content)?;
        if let Some(bad) = raw.entries.iter().find(|e| fold(&e.alias).is_empty() || fold(&e.target).is_empty()) {
            return Err(ConfigError::Invalid(format!("alias entry has an empty side: {:?}", bad)));
        }
        Ok(Self::new(raw.entries))
    }

    /// First entry whose alias equals the normalized name.
    pub fn lookup(&self, normalized_name: &str) -> Option<&AliasEntry> {
        self.entries.iter().find(|e| e.alias == normalized_name)
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
