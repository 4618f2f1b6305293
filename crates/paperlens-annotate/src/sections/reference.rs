//! Reference definitions for section labels.
//!
//! Label order is significant: it fixes the order of every distribution
//! and breaks argmax ties.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AnnotateError, Result};
use crate::sections::title::normalize_title;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDefinition {
    pub label: String,
    /// Curated section titles that identify this label.
    pub keywords: Vec<String>,
    pub prior: f64,
    /// Likelihood of this label over equal-width bins of normalized
    /// document position.
    pub position_curve: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionReference {
    pub labels: Vec<LabelDefinition>,
}

fn def(label: &str, keywords: &[&str], prior: f64, position_curve: [f64; 10]) -> LabelDefinition {
    LabelDefinition {
        label: label.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        prior,
        position_curve: position_curve.to_vec(),
    }
}

impl Default for SectionReference {
    fn default() -> Self {
        Self {
            labels: vec![
                def(
                    "abstract",
                    &["abstract", "summary", "background", "synopsis"],
                    0.08,
                    [0.60, 0.20, 0.05, 0.03, 0.02, 0.02, 0.02, 0.02, 0.02, 0.02],
                ),
                def(
                    "introduction",
                    &["introduction", "overview", "motivation", "rationale"],
                    0.12,
                    [0.30, 0.35, 0.15, 0.06, 0.04, 0.03, 0.03, 0.02, 0.01, 0.01],
                ),
                def(
                    "methods",
                    &[
                        "methods",
                        "materials and methods",
                        "methodology",
                        "experimental procedures",
                        "study design",
                        "statistical analysis",
                    ],
                    0.22,
                    [0.02, 0.10, 0.22, 0.22, 0.16, 0.11, 0.07, 0.05, 0.03, 0.02],
                ),
                def(
                    "results",
                    &["results", "findings", "experimental results", "outcomes"],
                    0.22,
                    [0.01, 0.03, 0.08, 0.14, 0.18, 0.18, 0.15, 0.12, 0.08, 0.03],
                ),
                def(
                    "discussion",
                    &["discussion", "results and discussion", "limitations", "interpretation"],
                    0.18,
                    [0.01, 0.01, 0.03, 0.06, 0.10, 0.14, 0.18, 0.20, 0.17, 0.10],
                ),
                def(
                    "conclusions",
                    &["conclusions", "conclusion", "concluding remarks", "future work"],
                    0.08,
                    [0.01, 0.01, 0.01, 0.02, 0.03, 0.05, 0.10, 0.17, 0.27, 0.33],
                ),
                def(
                    "acknowledgements",
                    &["acknowledgements", "acknowledgments", "funding", "competing interests"],
                    0.04,
                    [0.005, 0.005, 0.005, 0.005, 0.01, 0.02, 0.05, 0.10, 0.30, 0.50],
                ),
                def(
                    "references",
                    &["references", "bibliography", "literature cited", "works cited"],
                    0.06,
                    [0.005, 0.005, 0.005, 0.005, 0.01, 0.02, 0.04, 0.10, 0.30, 0.51],
                ),
            ],
        }
    }
}

impl SectionReference {
    /// Load definitions from a JSON file shaped like the defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnnotateError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let reference: Self = serde_json::from_str(content)
            .map_err(|e| AnnotateError::Config(format!("section reference: {}", e)))?;
        reference.validate()?;
        Ok(reference)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(AnnotateError::Config(reason));

        if self.labels.len() < 2 {
            return invalid("at least two labels are required".to_string());
        }
        let bins = self.bins();
        if bins == 0 {
            return invalid("position curves must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for def in &self.labels {
            if !seen.insert(def.label.as_str()) {
                return invalid(format!("duplicate label {}", def.label));
            }
            if def.keywords.is_empty() {
                return invalid(format!("label {} has no keywords", def.label));
            }
            if let Some(k) = def.keywords.iter().find(|k| normalize_title(k).is_none()) {
                return invalid(format!(
                    "label {} keyword {:?} is empty once normalized",
                    def.label, k
                ));
            }
            if def.position_curve.len() != bins {
                return invalid(format!(
                    "label {} has {} position bins, expected {}",
                    def.label,
                    def.position_curve.len(),
                    bins
                ));
            }
            let values = std::iter::once(&def.prior).chain(&def.position_curve);
            if values.into_iter().any(|v| !v.is_finite() || *v < 0.0) {
                return invalid(format!(
                    "label {} has a negative or non-finite probability",
                    def.label
                ));
            }
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        self.labels.first().map(|d| d.position_curve.len()).unwrap_or(0)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|d| d.label.clone()).collect()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|d| d.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_and_ordered() {
        let reference = SectionReference::default();
        reference.validate().unwrap();
        assert_eq!(reference.bins(), 10);
        assert_eq!(
            reference.label_names(),
            vec![
                "abstract",
                "introduction",
                "methods",
                "results",
                "discussion",
                "conclusions",
                "acknowledgements",
                "references"
            ]
        );
        assert_eq!(reference.index_of("results"), Some(3));
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.json");
        let json = serde_json::to_string(&SectionReference::default()).unwrap();
        std::fs::write(&path, json).unwrap();
        assert_eq!(SectionReference::from_path(&path).unwrap(), SectionReference::default());
    }

    #[test]
    fn test_rejects_mismatched_bins() {
        let json = r#"{"labels": [
            {"label": "a", "keywords": ["a"], "prior": 0.5, "position_curve": [0.5, 0.5]},
            {"label": "b", "keywords": ["b"], "prior": 0.5, "position_curve": [1.0]}
        ]}"#;
        assert!(matches!(SectionReference::from_json(json), Err(AnnotateError::Config(_))));
    }

    #[test]
    fn test_rejects_duplicates_and_negative_values() {
        let mut reference = SectionReference::default();
        reference.labels[1].label = "abstract".to_string();
        assert!(reference.validate().is_err());

        let mut reference = SectionReference::default();
        reference.labels[0].position_curve[3] = -0.1;
        assert!(reference.validate().is_err());
    }

    #[test]
    fn test_rejects_keywords_without_words() {
        let mut reference = SectionReference::default();
        reference.labels[2].keywords.push("2.1".to_string());
        assert!(matches!(reference.validate(), Err(AnnotateError::Config(_))));
    }
}
