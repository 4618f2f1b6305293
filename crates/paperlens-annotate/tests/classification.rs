//! Section classification over the in-memory store.

use std::sync::Arc;

use paperlens_annotate::{
    AnnotateError, AnnotationContext, SectionClassificationEngine, SectionReference,
};
use paperlens_config::Config;
use paperlens_db::{MemoryStore, SectionTranslation, SourceField, TranslationTable};
use paperlens_test_utils::{seeded_store, DocumentBuilder, MockClassifier, MockEmbedder};

const LABELS: [&str; 8] = [
    "abstract",
    "introduction",
    "methods",
    "results",
    "discussion",
    "conclusions",
    "acknowledgements",
    "references",
];

async fn engine(classifier: Arc<MockClassifier>) -> SectionClassificationEngine {
    SectionClassificationEngine::prepare(
        SectionReference::default(),
        Arc::new(MockEmbedder::default()),
        classifier,
        0.9,
    )
    .await
    .unwrap()
}

fn paper(id: &str) -> DocumentBuilder {
    DocumentBuilder::new(id)
        .section("", "preamble")
        .section("1. Introduction", "intro text")
        .section("Cohort characteristics", "We Measured Things")
        .section("Conclusions", "we conclude")
}

async fn context(store: Arc<MemoryStore>) -> AnnotationContext {
    AnnotationContext::new(store, Config::default())
}

#[tokio::test]
async fn test_every_keyword_matches_its_own_label() {
    let engine = engine(Arc::new(MockClassifier::new(&LABELS))).await;
    let reference = SectionReference::default();
    for (index, def) in reference.labels.iter().enumerate() {
        for keyword in &def.keywords {
            let (label, score) = engine.title_match(keyword).await.unwrap().unwrap();
            assert_eq!(label, index, "keyword {}", keyword);
            assert!(score >= 0.9);
            let dist = engine.pseudo_distribution(label, score);
            assert!(dist[index] >= 0.9);
        }
    }
}

#[tokio::test]
async fn test_classify_documents_writes_one_table_per_document() {
    let store = seeded_store(vec![paper("a").build()]).await;
    let ctx = context(store.clone()).await;
    let classifier = Arc::new(MockClassifier::new(&LABELS).with("we measured", "results", 0.8));
    let engine = engine(classifier.clone()).await;

    let report = engine
        .classify_documents(ctx.documents(), SourceField::Raw, false)
        .await
        .unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.labeled_documents, 1);
    assert_eq!(report.labeled_sections, 3);
    assert_eq!(report.skipped_sections, 1);

    let table = store.get("a").await.unwrap().sections_translation.unwrap();
    let labels: Vec<(&str, &str)> =
        table.iter().map(|(k, v)| (k.as_str(), v.label.as_str())).collect();
    assert_eq!(
        labels,
        vec![
            ("1. Introduction", "introduction"),
            ("Cohort characteristics", "results"),
            ("Conclusions", "conclusions"),
        ]
    );
    assert!(table.values().all(|t| (0.0..=1.0).contains(&t.confidence)));
    assert!(table["Conclusions"].confidence >= 0.9);

    // Only the unmatched title reached the fallback, lower-cased.
    assert_eq!(classifier.inputs(), vec!["we measured things".to_string()]);
}

#[tokio::test]
async fn test_classified_documents_are_not_revisited() {
    let store = seeded_store(vec![paper("a").build(), paper("b").build()]).await;
    let ctx = context(store).await;
    let engine = engine(Arc::new(MockClassifier::new(&LABELS))).await;

    let first = engine.classify_documents(ctx.documents(), SourceField::Raw, false).await.unwrap();
    assert_eq!(first.total, 2);
    let second = engine.classify_documents(ctx.documents(), SourceField::Raw, false).await.unwrap();
    assert_eq!(second.total, 0);
}

#[tokio::test]
async fn test_force_replaces_the_whole_table() {
    let store = seeded_store(vec![paper("a").build()]).await;
    let ctx = context(store.clone()).await;
    let stale: TranslationTable = [(
        "Old heading".to_string(),
        SectionTranslation { label: "references".to_string(), confidence: 0.5 },
    )]
    .into_iter()
    .collect();
    ctx.documents().set_sections_translation("a", stale).await.unwrap();

    let engine = engine(Arc::new(MockClassifier::new(&LABELS))).await;
    let report = engine.classify_documents(ctx.documents(), SourceField::Raw, true).await.unwrap();
    assert_eq!(report.total, 1);

    let table = store.get("a").await.unwrap().sections_translation.unwrap();
    assert!(!table.contains_key("Old heading"));
    assert!(table.contains_key("Conclusions"));
}

#[tokio::test]
async fn test_untitled_section_is_skipped() {
    let raw = DocumentBuilder::new("a")
        .section("", "abstract text")
        .section("Methods", "method text")
        .build();
    let store = seeded_store(vec![raw]).await;
    let ctx = context(store.clone()).await;
    let engine = engine(Arc::new(MockClassifier::new(&LABELS))).await;

    engine.classify_documents(ctx.documents(), SourceField::Raw, false).await.unwrap();

    let table = store.get("a").await.unwrap().sections_translation.unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table["Methods"].label, "methods");
}

#[tokio::test]
async fn test_document_without_text_is_still_classified_by_title() {
    let raw = DocumentBuilder::new("a")
        .section("Methods", "")
        .section("Cohort characteristics", "")
        .build();
    let store = seeded_store(vec![raw]).await;
    let ctx = context(store.clone()).await;
    let classifier = Arc::new(MockClassifier::new(&LABELS));
    let engine = engine(classifier.clone()).await;

    let report = engine.classify_documents(ctx.documents(), SourceField::Raw, false).await.unwrap();
    assert_eq!(report.labeled_sections, 1);
    assert_eq!(report.skipped_sections, 1);
    assert!(classifier.inputs().is_empty());

    let table = store.get("a").await.unwrap().sections_translation.unwrap();
    assert_eq!(table["Methods"].label, "methods");
}

#[tokio::test]
async fn test_classifier_failure_aborts_without_writing() {
    let store = seeded_store(vec![paper("a").build()]).await;
    let ctx = context(store.clone()).await;
    let engine = engine(Arc::new(MockClassifier::new(&LABELS).failing())).await;

    let err = engine
        .classify_documents(ctx.documents(), SourceField::Raw, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AnnotateError::ModelInference(_)));

    let doc = store.get("a").await.unwrap();
    assert!(!doc.has_translation());
}

#[tokio::test]
async fn test_translated_view_uses_labels() {
    let store = seeded_store(vec![paper("a").build()]).await;
    let ctx = context(store).await;
    let classifier = MockClassifier::new(&LABELS).with("we measured", "results", 0.8);
    let engine = engine(Arc::new(classifier)).await;
    engine.classify_documents(ctx.documents(), SourceField::Raw, false).await.unwrap();

    let docs = ctx.documents().list_raw_documents(None, true).await.unwrap();
    let sections = &docs[0].raw.as_ref().unwrap().sections;
    assert_eq!(sections.titles(), vec!["introduction", "results", "conclusions"]);
    assert_eq!(sections.get("results"), Some("We Measured Things"));

    let untranslated = ctx.documents().list_raw_documents(None, false).await.unwrap();
    assert_eq!(untranslated[0].raw.as_ref().unwrap().sections.len(), 4);
}
