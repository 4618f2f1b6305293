//! Annotate the configured corpus: compute section vectors for one method,
//! then label sections if a fallback classifier is configured.
//!
//! ```text
//! PAPERLENS_CONFIG=paperlens.toml cargo run --example annotate_corpus -- hashed-bow
//! ```

use paperlens_annotate::{AnnotationContext, DispatchProgress};
use paperlens_config::Config;
use paperlens_db::SourceField;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paperlens=debug,info")),
        )
        .init();

    let method = std::env::args().nth(1).unwrap_or_else(|| "hashed-bow".to_string());
    let force = std::env::args().any(|a| a == "--force");

    let config = Config::load()?;
    let ctx = AnnotationContext::open(config).await?;
    ctx.register_builtin_methods()?;
    info!("Registered methods: {:?}", ctx.registry().list_names());

    let (tx, mut rx) = broadcast::channel::<DispatchProgress>(64);
    let progress = tokio::spawn(async move {
        while let Ok(p) = rx.recv().await {
            println!("  {} {}/{}", p.method, p.processed, p.total);
        }
    });

    let report = ctx
        .dispatcher()
        .with_progress(tx)
        .compute_vectors(&method, SourceField::Raw, force)
        .await?;
    progress.await?;

    println!(
        "{}: {} documents via {}, {} written, {} unchanged, {} failed",
        report.method,
        report.total,
        report.strategy,
        report.written,
        report.unchanged,
        report.failed.len()
    );
    for failed in &report.failed {
        println!("  {} -> {}", failed.hash_id, failed.error);
    }

    if ctx.config().classifier.model_path.is_some() {
        let engine = ctx.classification_engine().await?;
        let report = engine
            .classify_documents(ctx.documents(), SourceField::Raw, force)
            .await?;
        println!(
            "sections: {} documents, {} labeled, {} sections labeled, {} skipped",
            report.total, report.labeled_documents, report.labeled_sections, report.skipped_sections
        );
    } else {
        warn!("classifier.model_path not set, skipping section classification");
    }

    let stats = ctx.stats().await?;
    println!("corpus: {} documents, {} translated", stats.documents, stats.translated);
    for (name, count) in &stats.embeddings {
        println!("  {}: {}", name, count);
    }

    Ok(())
}
