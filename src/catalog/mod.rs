//! Searchable catalog behind the resources page and the tools catalog.
//!
//! Entries are declared in TOML (the built-in set is compiled in from
//! `data/catalog.toml`) and filtered with a case-insensitive substring match
//! over title, description and tags. Declaration order is preserved so the
//! page reads the way the catalog file is written.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::MAX_SEARCH_QUERY_LENGTH;

const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.toml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Catalog entry {index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },

    #[error("Search query exceeds maximum length of {0} characters")]
    QueryTooLong(usize),

    #[error("Unknown catalog section: {0}")]
    UnknownSection(String),
}

/// Which page an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Resources,
    Tools,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Resources => "resources",
            Section::Tools => "tools",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Section::Resources => "Resources",
            Section::Tools => "Tools",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resources" => Ok(Section::Resources),
            "tools" => Ok(Section::Tools),
            _ => Err(CatalogError::UnknownSection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub section: Section,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl CatalogEntry {
    /// `needle` must already be lowercase.
    fn matches_text(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }

    fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == tag)
    }
}

/// Filters applied by [`Catalog::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub section: Option<Section>,
    pub text: String,
    pub tag: Option<String>,
}

impl SearchQuery {
    pub fn new(section: Section, text: impl Into<String>) -> Self {
        Self {
            section: Some(section),
            text: text.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    entry: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            entries = catalog.entries.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;

        for (index, entry) in file.entry.iter().enumerate() {
            if entry.title.trim().is_empty() {
                return Err(CatalogError::EmptyField {
                    index,
                    field: "title",
                });
            }
            if entry.url.trim().is_empty() {
                return Err(CatalogError::EmptyField { index, field: "url" });
            }
        }

        Ok(Self { entries: file.entry })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Returns matching entries in declaration order.
    ///
    /// - `section`, when set, restricts the search to one page
    /// - `text` is trimmed and matched case-insensitively against title,
    ///   description and tags; empty text matches everything
    /// - `tag`, when set, must equal one of the entry's tags (case-insensitive)
    ///
    /// # Errors
    ///
    /// [`CatalogError::QueryTooLong`] if `text` exceeds the search length limit.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<&CatalogEntry>, CatalogError> {
        if query.text.chars().count() > MAX_SEARCH_QUERY_LENGTH {
            return Err(CatalogError::QueryTooLong(MAX_SEARCH_QUERY_LENGTH));
        }

        let needle = query.text.trim().to_lowercase();
        let tag = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty());

        Ok(self
            .entries
            .iter()
            .filter(|e| query.section.is_none_or(|s| e.section == s))
            .filter(|e| tag.is_none_or(|t| e.has_tag(t)))
            .filter(|e| needle.is_empty() || e.matches_text(&needle))
            .collect())
    }

    /// Distinct tags in a section, sorted, for the filter chips.
    pub fn tags(&self, section: Section) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.section == section)
            .flat_map(|e| e.tags.iter().map(String::as_str))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
