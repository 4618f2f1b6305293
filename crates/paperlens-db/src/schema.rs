//! Document schema.
//!
//! One record per paper, keyed by `hash_id`. The nested bodies mirror the
//! parsed paper JSON; the derived fields (`sections_embeddings`,
//! `sections_translation`) are written by the annotation core only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec;
use crate::error::Result;

pub const TABLE_DOCUMENTS: &str = "documents";

// =============================================================================
// Sections
// =============================================================================

/// A titled span of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub text: String,
}

/// Ordered mapping from section title to concatenated section text.
///
/// Titles are unique; insertion order is document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionMap(Vec<Section>);

impl SectionMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.0.iter().find(|s| s.title == title).map(|s| s.text.as_str())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.0.iter().any(|s| s.title == title)
    }

    /// Set the text for `title`, keeping its original position if present.
    pub fn insert(&mut self, title: impl Into<String>, text: impl Into<String>) {
        let title = title.into();
        let text = text.into();
        match self.0.iter_mut().find(|s| s.title == title) {
            Some(section) => section.text = text,
            None => self.0.push(Section { title, text }),
        }
    }

    /// Append text to `title`, creating the section at the end if absent.
    pub fn append(&mut self, title: impl Into<String>, text: &str) {
        let title = title.into();
        match self.0.iter_mut().find(|s| s.title == title) {
            Some(section) => section.text.push_str(text),
            None => self.0.push(Section { title, text: text.to_string() }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|s| (s.title.as_str(), s.text.as_str()))
    }

    pub fn titles(&self) -> Vec<String> {
        self.0.iter().map(|s| s.title.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total character count across all sections.
    pub fn total_chars(&self) -> usize {
        self.0.iter().map(|s| s.text.chars().count()).sum()
    }
}

impl<T: Into<String>, U: Into<String>> FromIterator<(T, U)> for SectionMap {
    fn from_iter<I: IntoIterator<Item = (T, U)>>(iter: I) -> Self {
        let mut map = SectionMap::new();
        for (title, text) in iter {
            map.insert(title, text);
        }
        map
    }
}

/// Citation span inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub start: usize,
    pub end: usize,
    pub ref_id: Option<String>,
}

/// Parsed body of a paper (`raw` as ingested, `clean` after preprocessing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    #[serde(default)]
    pub authors: Vec<serde_json::Value>,
    #[serde(default)]
    pub sections: SectionMap,
    #[serde(default)]
    pub citations: BTreeMap<String, Vec<Citation>>,
    #[serde(default)]
    pub bib_entries: serde_json::Value,
    #[serde(default)]
    pub ref_entries: serde_json::Value,
}

impl DocumentBody {
    pub fn with_sections(sections: SectionMap) -> Self {
        Self { sections, ..Default::default() }
    }
}

/// Which body an operation reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceField {
    #[default]
    Raw,
    Clean,
}

impl SourceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceField::Raw => "raw",
            SourceField::Clean => "clean",
        }
    }
}

// =============================================================================
// Derived fields
// =============================================================================

/// One section's stored embedding for one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    /// Base64 of the versioned binary encoding (see [`crate::codec`]).
    pub vector: String,
    pub num_elements: usize,
}

impl StoredVector {
    pub fn encode(values: &[f32], num_elements: usize) -> Self {
        Self {
            vector: codec::encode_to_string(values),
            num_elements,
        }
    }

    pub fn decode(&self) -> Result<Vec<f32>> {
        codec::decode_from_str(&self.vector)
    }
}

/// Section title → stored vector, `None` when the algorithm produced nothing.
pub type SectionVectors = BTreeMap<String, Option<StoredVector>>;

/// Algorithm name → per-section vectors.
pub type SectionEmbeddings = BTreeMap<String, SectionVectors>;

/// Canonical label assigned to a raw section title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTranslation {
    pub label: String,
    pub confidence: f64,
}

/// Raw section title → canonical label.
pub type TranslationTable = BTreeMap<String, SectionTranslation>;

// =============================================================================
// Document
// =============================================================================

/// A paper record.
///
/// Every field but `hash_id` is optional: a projected read leaves unselected
/// fields as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub hash_id: String,
    pub cord_uid: Option<String>,
    pub doi: Option<String>,
    pub publish_time: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub raw: Option<DocumentBody>,
    pub clean: Option<DocumentBody>,
    pub sections_order: Option<Vec<String>>,
    pub sections_embeddings: Option<SectionEmbeddings>,
    pub sections_translation: Option<TranslationTable>,
}

impl Document {
    pub fn new(hash_id: impl Into<String>) -> Self {
        Self { hash_id: hash_id.into(), ..Default::default() }
    }

    pub fn body(&self, source: SourceField) -> Option<&DocumentBody> {
        match source {
            SourceField::Raw => self.raw.as_ref(),
            SourceField::Clean => self.clean.as_ref(),
        }
    }

    pub fn body_mut(&mut self, source: SourceField) -> &mut Option<DocumentBody> {
        match source {
            SourceField::Raw => &mut self.raw,
            SourceField::Clean => &mut self.clean,
        }
    }

    /// Whether vectors for `method` have been stored.
    pub fn has_embedding(&self, method: &str) -> bool {
        self.sections_embeddings
            .as_ref()
            .map(|e| e.contains_key(method))
            .unwrap_or(false)
    }

    /// Whether a non-empty translation table has been stored.
    pub fn has_translation(&self) -> bool {
        self.sections_translation
            .as_ref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// Build a new record from an ingested paper, with empty derived fields.
    pub fn from_raw(raw: RawDocument) -> Self {
        Self {
            hash_id: raw.hash_id,
            cord_uid: raw.cord_uid,
            doi: raw.doi,
            publish_time: raw.publish_time,
            source: raw.source,
            title: raw.title,
            url: raw.url,
            raw: Some(DocumentBody {
                authors: raw.authors,
                sections: raw.sections,
                citations: raw.citations,
                bib_entries: raw.bib_entries,
                ref_entries: raw.ref_entries,
            }),
            clean: Some(DocumentBody::default()),
            sections_order: Some(raw.sections_order),
            sections_embeddings: Some(SectionEmbeddings::new()),
            sections_translation: Some(TranslationTable::new()),
        }
    }
}

/// A parsed paper as handed over by the ingestion path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    pub hash_id: String,
    pub cord_uid: Option<String>,
    pub doi: Option<String>,
    pub publish_time: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Vec<serde_json::Value>,
    #[serde(default)]
    pub sections: SectionMap,
    #[serde(default)]
    pub sections_order: Vec<String>,
    #[serde(default)]
    pub citations: BTreeMap<String, Vec<Citation>>,
    #[serde(default)]
    pub bib_entries: serde_json::Value,
    #[serde(default)]
    pub ref_entries: serde_json::Value,
}

/// Reject keys that would collide with the store's field-path syntax.
pub fn validate_field_key(key: &str) -> Result<()> {
    if key.contains('.') || key.contains('$') {
        return Err(crate::error::DbError::InvalidFieldKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_map_keeps_order_and_unique_titles() {
        let mut map = SectionMap::new();
        map.insert("Abstract", "a");
        map.insert("Methods", "m");
        map.insert("Abstract", "b");
        assert_eq!(map.titles(), vec!["Abstract", "Methods"]);
        assert_eq!(map.get("Abstract"), Some("b"));
    }

    #[test]
    fn test_section_map_append() {
        let mut map = SectionMap::new();
        map.append("Results", "first. ");
        map.append("Results", "second.");
        assert_eq!(map.get("Results"), Some("first. second."));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_section_map_serializes_as_ordered_list() {
        let map: SectionMap = vec![("Z", "last"), ("A", "first")].into_iter().collect();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json[0]["title"], "Z");
        let back: SectionMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_from_raw_initializes_derived_fields() {
        let raw = RawDocument {
            hash_id: "abc".to_string(),
            sections: vec![("Abstract", "We present")].into_iter().collect(),
            sections_order: vec!["Abstract".to_string()],
            ..Default::default()
        };
        let doc = Document::from_raw(raw);
        assert_eq!(doc.sections_embeddings, Some(SectionEmbeddings::new()));
        assert!(!doc.has_translation());
        assert!(!doc.has_embedding("m1"));
        assert_eq!(doc.body(SourceField::Raw).unwrap().sections.len(), 1);
    }

    #[test]
    fn test_validate_field_key() {
        assert!(validate_field_key("word2vec").is_ok());
        assert!(validate_field_key("a.b").is_err());
        assert!(validate_field_key("$set").is_err());
    }
}
