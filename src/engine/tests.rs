use super::*;
use crate::database::queries::ChunkQueries;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed-vector embedder for exercising embedding persistence
struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        Some(vec![0.5, 0.5, 0.5])
    }
}

async fn bare_engine() -> Result<(TempDir, NotebookEngine)> {
    build_engine(None).await
}

async fn build_engine(
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<(TempDir, NotebookEngine)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let mut config = Config::default();
    config.base_dir = Some(temp_dir.path().to_path_buf());

    let engine = NotebookEngine::from_parts(config, database, embedder, None, None, None);
    Ok((temp_dir, engine))
}

fn guide_content() -> String {
    "The Louvre is the most visited museum in the world. ".repeat(20)
}

#[tokio::test]
async fn create_and_list_notebooks() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;

    let notebook = engine.create_notebook("trip-notes", "alice").await?;
    assert_eq!(notebook.name, "trip-notes");
    assert_eq!(notebook.owner, "alice");
    engine.create_notebook("work", "bob").await?;

    assert_eq!(engine.list_notebooks(None).await?.len(), 2);
    assert_eq!(engine.list_notebooks(Some("alice")).await?.len(), 1);

    let result = engine.create_notebook("  ", "alice").await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    Ok(())
}

#[tokio::test]
async fn add_source_creates_missing_notebook() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;

    // Explicit create-or-fetch: the notebook id did not exist before
    let source = engine
        .add_source("nb-auto", SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;
    assert_eq!(source.notebook_id, "nb-auto");

    let notebooks = engine.list_notebooks(None).await?;
    assert_eq!(notebooks.len(), 1);
    assert_eq!(notebooks[0].id, "nb-auto");

    // Second source reuses the same notebook
    engine
        .add_source("nb-auto", SourceType::Text, "Notes", &guide_content(), None, None, None)
        .await?;
    assert_eq!(engine.list_notebooks(None).await?.len(), 1);
    assert_eq!(engine.list_sources("nb-auto").await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn add_source_chunks_immediately() -> Result<()> {
    let (_temp_dir, engine) = build_engine(Some(Arc::new(ConstantEmbedder))).await?;

    let source = engine
        .add_source("nb", SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;

    let count = ChunkQueries::count_for_source(engine.database.pool(), source.id).await?;
    assert!(count > 0);

    let chunks = ChunkQueries::list_for_source(engine.database.pool(), source.id).await?;
    assert!(chunks.iter().all(|c| c.embedding.is_some()));

    Ok(())
}

#[tokio::test]
async fn add_source_validation() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;

    let result = engine
        .add_source("nb", SourceType::Text, "Guide", "   ", None, None, None)
        .await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    let result = engine
        .add_source("nb", SourceType::Text, "", "content here", None, None, None)
        .await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    // Media payloads are only legal on visual types
    let result = engine
        .add_source(
            "nb",
            SourceType::Text,
            "Guide",
            "content here",
            None,
            Some(vec![1, 2, 3]),
            Some("image/png".to_string()),
        )
        .await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    let oversized = "x".repeat(2_000_001);
    let result = engine
        .add_source("nb", SourceType::Text, "Guide", &oversized, None, None, None)
        .await;
    assert!(matches!(result, Err(NotebookError::ContentTooLarge { .. })));

    Ok(())
}

#[tokio::test]
async fn source_selection_and_deletion() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    let source = engine
        .add_source(&notebook.id, SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;

    engine.set_source_selected(source.id, false).await?;
    let sources = engine.list_sources(&notebook.id).await?;
    assert!(!sources[0].selected);

    let result = engine.set_source_selected(9999, true).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    engine.delete_source(&notebook.id, source.id).await?;
    assert!(engine.list_sources(&notebook.id).await?.is_empty());

    let result = engine.delete_source(&notebook.id, source.id).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn list_sources_requires_notebook() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let result = engine.list_sources("missing").await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn refresh_rejects_non_refreshable_types() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    let text = engine
        .add_source(&notebook.id, SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;

    let result = engine.refresh_source(&notebook.id, text.id).await;
    assert!(matches!(result, Err(NotebookError::Unsupported(_))));

    let result = engine.refresh_source(&notebook.id, 9999).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn refresh_requires_url() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    let site = engine
        .add_source(&notebook.id, SourceType::Website, "Site", &guide_content(), None, None, None)
        .await?;

    let result = engine.refresh_source(&notebook.id, site.id).await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    Ok(())
}

#[tokio::test]
async fn reindex_counts_sources() -> Result<()> {
    let (_temp_dir, engine) = build_engine(Some(Arc::new(ConstantEmbedder))).await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    engine
        .add_source(&notebook.id, SourceType::Text, "A", &guide_content(), None, None, None)
        .await?;
    engine
        .add_source(&notebook.id, SourceType::Text, "B", &guide_content(), None, None, None)
        .await?;

    let reindexed = engine.reindex_sources(&notebook.id).await?;
    assert_eq!(reindexed, 2);

    let result = engine.reindex_sources("missing").await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn feedback_promotes_and_demotes() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let (notebook_id, _) = {
        let notebook = engine.create_notebook("nb", "alice").await?;
        let source = engine
            .add_source(&notebook.id, SourceType::Text, "Guide", &guide_content(), None, None, None)
            .await?;
        (notebook.id, source.id)
    };

    let outcome = engine.query(&notebook_id, "What is the best museum?", None).await?;

    let promoted = engine.submit_feedback(outcome.query_id, true).await?;
    assert_eq!(promoted.helpful, Some(true));
    assert_eq!(promoted.provenance, Provenance::Promoted);

    let cached = engine.list_cached_answers(&notebook_id).await?;
    assert_eq!(cached.len(), 1);

    let demoted = engine.submit_feedback(outcome.query_id, false).await?;
    assert_eq!(demoted.helpful, Some(false));
    // Demotion does not retag provenance
    assert_eq!(demoted.provenance, Provenance::Promoted);
    assert!(engine.list_cached_answers(&notebook_id).await?.is_empty());

    let result = engine.submit_feedback(9999, true).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn update_answer_applies_correction() -> Result<()> {
    let (_temp_dir, engine) = build_engine(Some(Arc::new(ConstantEmbedder))).await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    let source = engine
        .add_source(&notebook.id, SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;

    let outcome = engine.query(&notebook.id, "What is the best museum?", None).await?;

    let corrected = engine
        .update_answer(outcome.query_id, "The Louvre, according to our guide.", Some(&[source.id]))
        .await?;

    assert_eq!(corrected.answer, "The Louvre, according to our guide.");
    assert_eq!(corrected.helpful, Some(true));
    assert_eq!(corrected.provenance, Provenance::UserEdited);
    assert_eq!(corrected.source_key, source.id.to_string());
    assert!(corrected.question_embedding.is_some());

    let result = engine.update_answer(outcome.query_id, "  ", None).await;
    assert!(matches!(result, Err(NotebookError::Validation(_))));

    let result = engine.update_answer(9999, "answer", None).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn delete_notebook_cascades() -> Result<()> {
    let (_temp_dir, engine) = bare_engine().await?;
    let notebook = engine.create_notebook("nb", "alice").await?;
    let source = engine
        .add_source(&notebook.id, SourceType::Text, "Guide", &guide_content(), None, None, None)
        .await?;
    let outcome = engine.query(&notebook.id, "What is the best museum?", None).await?;

    engine.delete_notebook(&notebook.id).await?;

    assert!(engine.list_notebooks(None).await?.is_empty());
    assert!(
        SourceQueries::get_by_id(engine.database.pool(), source.id)
            .await?
            .is_none()
    );
    assert!(
        AnswerQueries::get_by_id(engine.database.pool(), outcome.query_id)
            .await?
            .is_none()
    );

    let result = engine.delete_notebook(&notebook.id).await;
    assert!(matches!(result, Err(NotebookError::NotFound(_))));

    Ok(())
}
