//! Algorithm module contract.
//!
//! An embedding method turns a document's sections into per-section
//! vectors and reduces stored section vectors back to one document vector.
//! Methods declare how they want to be scheduled; the dispatcher picks an
//! [`crate::strategy::ExecutionStrategy`] from that declaration alone.

use std::collections::BTreeMap;
use std::fmt;

use paperlens_db::{SectionMap, SectionVectors, StoredVector, TranslationTable};
use serde::{Deserialize, Serialize};

use crate::error::{AnnotateError, Result};

/// One section's vector plus the element count it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionVector {
    pub vector: Vec<f32>,
    pub num_elements: usize,
}

/// Section title → vector, `None` when the method produced nothing.
pub type ComputedSections = BTreeMap<String, Option<SectionVector>>;

/// Concurrency backend a method asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionBackend {
    /// Declared as `none`: run in a plain loop on one worker.
    #[serde(rename = "none")]
    Sequential,
    /// Pure compute; each worker owns an isolated instance.
    CpuProcess,
    /// Device-resident model; one isolated instance per device-pinned worker.
    Accelerator,
    /// Anything else; shared instance on a thread pool.
    Other,
}

impl ExecutionBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionBackend::Sequential => "none",
            ExecutionBackend::CpuProcess => "cpu-process",
            ExecutionBackend::Accelerator => "accelerator",
            ExecutionBackend::Other => "other",
        }
    }
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an isolated worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    pub index: usize,
    /// Accelerator ordinal for affinity pools.
    pub device: Option<usize>,
}

pub trait EmbeddingMethod: Send + Sync {
    /// One-time setup such as loading weights. The registry calls this at
    /// most once per registration; isolated workers call it on their own
    /// instance.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn compute_per_document_vectors(&self, sections: &SectionMap) -> Result<ComputedSections>;

    fn aggregate_document_vector(&self, sections: &ComputedSections) -> Option<Vec<f32>>;

    /// Aggregate only the sections whose title, or translated label when a
    /// table is given, equals `section`.
    fn aggregate_section_vector(
        &self,
        sections: &ComputedSections,
        section: &str,
        translation: Option<&TranslationTable>,
    ) -> Option<Vec<f32>> {
        let subset: ComputedSections = sections
            .iter()
            .filter(|(title, _)| match translation {
                Some(table) => table.get(*title).map(|t| t.label == section).unwrap_or(false),
                None => title.as_str() == section,
            })
            .map(|(title, v)| (title.clone(), v.clone()))
            .collect();
        if subset.is_empty() {
            return None;
        }
        self.aggregate_document_vector(&subset)
    }

    fn declared_worker_count(&self) -> Option<usize> {
        None
    }

    fn declared_backend(&self) -> Option<ExecutionBackend> {
        None
    }

    /// A fresh, uninitialized instance for an isolated worker. Needed by
    /// methods declaring `cpu-process` or `accelerator`.
    fn isolated_instance(&self, slot: WorkerSlot) -> Result<Box<dyn EmbeddingMethod>> {
        Err(AnnotateError::Worker(format!(
            "method cannot run in isolated worker {}",
            slot.index
        )))
    }
}

/// Mean of the present vectors weighted by `num_elements`. Falls back to an
/// unweighted mean when every weight is zero; vectors whose length differs
/// from the first one are ignored.
pub fn weighted_mean(sections: &ComputedSections) -> Option<Vec<f32>> {
    let present: Vec<&SectionVector> = sections.values().flatten().collect();
    let dim = present.first()?.vector.len();
    let present: Vec<&SectionVector> =
        present.into_iter().filter(|v| v.vector.len() == dim).collect();

    let total: usize = present.iter().map(|v| v.num_elements).sum();
    let mut acc = vec![0f64; dim];
    for v in &present {
        let w = if total == 0 { 1.0 } else { v.num_elements as f64 };
        for (a, x) in acc.iter_mut().zip(&v.vector) {
            *a += w * *x as f64;
        }
    }
    let denom = if total == 0 { present.len() as f64 } else { total as f64 };
    Some(acc.into_iter().map(|a| (a / denom) as f32).collect())
}

/// Encode computed vectors for storage.
pub fn encode_sections(sections: &ComputedSections) -> SectionVectors {
    sections
        .iter()
        .map(|(title, v)| {
            (
                title.clone(),
                v.as_ref().map(|v| StoredVector::encode(&v.vector, v.num_elements)),
            )
        })
        .collect()
}

/// Decode stored vectors.
pub fn decode_sections(stored: &SectionVectors) -> Result<ComputedSections> {
    stored
        .iter()
        .map(|(title, v)| -> Result<(String, Option<SectionVector>)> {
            let decoded = match v {
                Some(sv) => Some(SectionVector {
                    vector: sv.decode()?,
                    num_elements: sv.num_elements,
                }),
                None => None,
            };
            Ok((title.clone(), decoded))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperlens_db::SectionTranslation;

    fn sv(vector: Vec<f32>, n: usize) -> Option<SectionVector> {
        Some(SectionVector { vector, num_elements: n })
    }

    struct MeanOnly;

    impl EmbeddingMethod for MeanOnly {
        fn compute_per_document_vectors(&self, _: &SectionMap) -> Result<ComputedSections> {
            Ok(ComputedSections::new())
        }

        fn aggregate_document_vector(&self, sections: &ComputedSections) -> Option<Vec<f32>> {
            weighted_mean(sections)
        }
    }

    #[test]
    fn test_weighted_mean_by_element_count() {
        let mut sections = ComputedSections::new();
        sections.insert("a".into(), sv(vec![1.0, 0.0], 3));
        sections.insert("b".into(), sv(vec![0.0, 1.0], 1));
        sections.insert("c".into(), None);
        assert_eq!(weighted_mean(&sections), Some(vec![0.75, 0.25]));
    }

    #[test]
    fn test_weighted_mean_all_null_is_none() {
        let mut sections = ComputedSections::new();
        sections.insert("a".into(), None);
        assert_eq!(weighted_mean(&sections), None);
        assert_eq!(weighted_mean(&ComputedSections::new()), None);
    }

    #[test]
    fn test_weighted_mean_zero_weights_uses_plain_mean() {
        let mut sections = ComputedSections::new();
        sections.insert("a".into(), sv(vec![2.0], 0));
        sections.insert("b".into(), sv(vec![4.0], 0));
        assert_eq!(weighted_mean(&sections), Some(vec![3.0]));
    }

    #[test]
    fn test_aggregate_section_vector_with_translation() {
        let mut sections = ComputedSections::new();
        sections.insert("2. Methods".into(), sv(vec![1.0, 0.0], 1));
        sections.insert("Data".into(), sv(vec![0.0, 1.0], 1));
        sections.insert("Results".into(), sv(vec![5.0, 5.0], 1));
        let mut table = TranslationTable::new();
        for title in ["2. Methods", "Data"] {
            table.insert(
                title.to_string(),
                SectionTranslation { label: "methods".into(), confidence: 0.9 },
            );
        }

        let method = MeanOnly;
        assert_eq!(
            method.aggregate_section_vector(&sections, "methods", Some(&table)),
            Some(vec![0.5, 0.5])
        );
        assert_eq!(method.aggregate_section_vector(&sections, "methods", None), None);
        assert_eq!(
            method.aggregate_section_vector(&sections, "Results", None),
            Some(vec![5.0, 5.0])
        );
    }

    #[test]
    fn test_encode_decode_sections() {
        let mut sections = ComputedSections::new();
        sections.insert("a".into(), sv(vec![0.5, -1.5], 7));
        sections.insert("b".into(), None);
        let stored = encode_sections(&sections);
        assert_eq!(stored["a"].as_ref().map(|v| v.num_elements), Some(7));
        assert_eq!(decode_sections(&stored).unwrap(), sections);
    }

    #[test]
    fn test_default_isolated_instance_is_worker_error() {
        let err = MeanOnly.isolated_instance(WorkerSlot { index: 2, device: None }).err();
        assert!(matches!(err, Some(AnnotateError::Worker(_))));
    }
}
