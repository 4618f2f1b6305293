//! Per-section label assignment.
//!
//! Each titled section walks a small state machine:
//! title match, then text fallback, then position reweighting, ending
//! either labeled or skipped. A document's table is written only after
//! every section has settled.

use std::sync::Arc;

use futures::TryStreamExt;
use paperlens_db::{
    DocumentRepository, Filter, Projection, SectionMap, SectionTranslation, SourceField,
    TranslationTable,
};
use paperlens_embed::{EmbedError, TextClassifier, TextEmbedder};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{AnnotateError, Result};
use crate::sections::position::PositionModel;
use crate::sections::reference::SectionReference;
use crate::sections::title::normalize_title;

/// Where a section is in the classification pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionState {
    NeedsTitleMatch,
    NeedsTextFallback,
    /// Carries a distribution in reference label order.
    NeedsPositionReweight(Vec<f64>),
    Labeled(SectionTranslation),
    Skipped,
}

impl SectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Labeled(_) | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionOutcome {
    pub title: String,
    pub state: SectionState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationReport {
    pub total: usize,
    pub labeled_documents: usize,
    pub labeled_sections: usize,
    pub skipped_sections: usize,
}

/// Hybrid section classifier.
///
/// Holds the label reference, keyword embeddings and positional model,
/// all computed once in [`SectionClassificationEngine::prepare`] and
/// read-only afterwards.
pub struct SectionClassificationEngine {
    reference: SectionReference,
    positions: PositionModel,
    /// Keyword vectors per label, in reference order.
    keywords: Vec<Vec<Vec<f32>>>,
    embedder: Arc<dyn TextEmbedder>,
    classifier: Arc<dyn TextClassifier>,
    threshold: f32,
}

impl SectionClassificationEngine {
    pub async fn prepare(
        reference: SectionReference,
        embedder: Arc<dyn TextEmbedder>,
        classifier: Arc<dyn TextClassifier>,
        threshold: f32,
    ) -> Result<Self> {
        reference.validate()?;

        let flat: Vec<String> = reference
            .labels
            .iter()
            .flat_map(|def| def.keywords.iter())
            .map(|k| normalize_title(k).unwrap_or_else(|| k.to_lowercase()))
            .collect();
        let mut vectors = embedder.embed(&flat).await?.into_iter();
        if vectors.len() != flat.len() {
            return Err(EmbedError::CountMismatch {
                expected: flat.len(),
                actual: vectors.len(),
            }
            .into());
        }
        let keywords: Vec<Vec<Vec<f32>>> = reference
            .labels
            .iter()
            .map(|def| vectors.by_ref().take(def.keywords.len()).collect::<Vec<_>>())
            .collect();

        info!(
            labels = reference.labels.len(),
            keywords = flat.len(),
            threshold,
            "Section classifier prepared"
        );

        Ok(Self {
            positions: PositionModel::new(&reference),
            reference,
            keywords,
            embedder,
            classifier,
            threshold,
        })
    }

    pub fn reference(&self) -> &SectionReference {
        &self.reference
    }

    /// Best `(label index, cosine)` for a section title, if it clears the
    /// acceptance threshold.
    pub async fn title_match(&self, title: &str) -> Result<Option<(usize, f32)>> {
        let Some(normalized) = normalize_title(title) else {
            return Ok(None);
        };
        let vector = self.embedder.embed_one(&normalized).await?;

        let mut best: Option<(usize, f32)> = None;
        for (label, candidates) in self.keywords.iter().enumerate() {
            for candidate in candidates {
                let score = cosine(&vector, candidate);
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((label, score));
                }
            }
        }
        Ok(best.filter(|(_, score)| *score > self.threshold))
    }

    /// Winner gets `score`, the rest share `1 - score` evenly.
    pub fn pseudo_distribution(&self, winner: usize, score: f32) -> Vec<f64> {
        let n = self.reference.labels.len();
        let score = f64::from(score).clamp(0.0, 1.0);
        let rest = if n > 1 { (1.0 - score) / (n - 1) as f64 } else { 0.0 };
        (0..n).map(|i| if i == winner { score } else { rest }).collect()
    }

    async fn text_fallback(&self, text: &str) -> Result<Vec<f64>> {
        let scores = self.classifier.predict(&text.to_lowercase()).await?;
        let mut dist = vec![0f64; self.reference.labels.len()];
        for (label, p) in scores {
            let index = self
                .reference
                .index_of(&label)
                .ok_or_else(|| EmbedError::UnknownLabel(label.clone()))?;
            dist[index] = f64::from(p);
        }
        Ok(dist)
    }

    /// Multiply by positional likelihood and renormalize. Falls back to a
    /// uniform distribution when no mass is left.
    pub fn reweight(&self, dist: &[f64], start: f64, end: f64) -> Vec<f64> {
        let weighted: Vec<f64> = dist
            .iter()
            .enumerate()
            .map(|(i, p)| p * self.positions.median_likelihood(i, start, end))
            .collect();
        let z: f64 = weighted.iter().sum();
        if z > 0.0 && z.is_finite() {
            weighted.into_iter().map(|p| (p / z).clamp(0.0, 1.0)).collect()
        } else {
            let n = dist.len().max(1) as f64;
            vec![1.0 / n; dist.len()]
        }
    }

    /// Argmax with ties going to the earlier label.
    pub fn select_label(&self, dist: &[f64]) -> Option<SectionTranslation> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in dist.iter().enumerate() {
            if best.map(|(_, b)| *p > b).unwrap_or(true) {
                best = Some((i, *p));
            }
        }
        best.map(|(i, p)| SectionTranslation {
            label: self.reference.labels[i].label.clone(),
            confidence: p.clamp(0.0, 1.0),
        })
    }

    /// Run one section to a terminal state.
    pub async fn classify_section(
        &self,
        title: &str,
        text: &str,
        span: (f64, f64),
    ) -> Result<SectionOutcome> {
        let mut state = if title.is_empty() {
            SectionState::Skipped
        } else {
            SectionState::NeedsTitleMatch
        };

        while !state.is_terminal() {
            state = match state {
                SectionState::NeedsTitleMatch => match self.title_match(title).await? {
                    Some((winner, score)) => {
                        SectionState::NeedsPositionReweight(self.pseudo_distribution(winner, score))
                    }
                    None if normalize_title(title).is_none() => SectionState::Skipped,
                    None => SectionState::NeedsTextFallback,
                },
                SectionState::NeedsTextFallback if text.is_empty() => SectionState::Skipped,
                SectionState::NeedsTextFallback => {
                    SectionState::NeedsPositionReweight(self.text_fallback(text).await?)
                }
                SectionState::NeedsPositionReweight(dist) => {
                    let dist = self.reweight(&dist, span.0, span.1);
                    match self.select_label(&dist) {
                        Some(translation) => SectionState::Labeled(translation),
                        None => SectionState::Skipped,
                    }
                }
                terminal => terminal,
            };
        }

        Ok(SectionOutcome { title: title.to_string(), state })
    }

    /// Classify every section of one document, in order.
    pub async fn classify_sections(&self, sections: &SectionMap) -> Result<Vec<SectionOutcome>> {
        let spans = section_spans(sections);
        let mut outcomes = Vec::with_capacity(sections.len());
        for ((title, text), span) in sections.iter().zip(spans) {
            outcomes.push(self.classify_section(title, text, span).await?);
        }
        Ok(outcomes)
    }

    /// Label the sections of every document still lacking a table (or all
    /// documents when `force`), writing one table per document.
    ///
    /// The first failure aborts the run; the failing document keeps its
    /// previous table.
    #[instrument(skip(self, documents, source), fields(source = %source.as_str()))]
    pub async fn classify_documents(
        &self,
        documents: &DocumentRepository,
        source: SourceField,
        force: bool,
    ) -> Result<ClassificationReport> {
        let filter = if force { Filter::all() } else { Filter::missing_translation() };
        let projection = Projection::new().with_source(source);
        let mut stream = documents.find(&filter, &projection).await?;

        let mut report = ClassificationReport::default();
        while let Some(doc) = stream.try_next().await? {
            report.total += 1;
            let Some(body) = doc.body(source) else {
                debug!(hash_id = %doc.hash_id, "No section body, skipping");
                continue;
            };

            let mut table = TranslationTable::new();
            for outcome in self.classify_sections(&body.sections).await? {
                match outcome.state {
                    SectionState::Labeled(translation) => {
                        table.insert(outcome.title, translation);
                    }
                    _ => report.skipped_sections += 1,
                }
            }

            report.labeled_sections += table.len();
            if !table.is_empty() {
                report.labeled_documents += 1;
            }
            documents
                .set_sections_translation(&doc.hash_id, table)
                .await
                .map_err(AnnotateError::from)?;
        }

        info!(
            total = report.total,
            labeled_documents = report.labeled_documents,
            labeled_sections = report.labeled_sections,
            skipped_sections = report.skipped_sections,
            "Section classification complete"
        );
        Ok(report)
    }
}

/// Normalized `(start, end)` of each section by cumulative character
/// offset. All spans are `(0, 0)` when the document has no text.
pub fn section_spans(sections: &SectionMap) -> Vec<(f64, f64)> {
    let total = sections.total_chars();
    if total == 0 {
        return vec![(0.0, 0.0); sections.len()];
    }
    let total = total as f64;
    let mut offset = 0usize;
    sections
        .iter()
        .map(|(_, text)| {
            let start = offset;
            offset += text.chars().count();
            (start as f64 / total, offset as f64 / total)
        })
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
