//! End-to-end engine tests over a scratch database, with no external
//! providers configured.

use anyhow::Result;
use notebook_qa::config::Config;
use notebook_qa::database::queries::AnswerQueries;
use notebook_qa::database::{Database, Provenance, SourceType};
use notebook_qa::engine::{AnswerTier, NotebookEngine};
use tempfile::TempDir;

async fn offline_engine() -> Result<(TempDir, NotebookEngine)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let mut config = Config::default();
    config.base_dir = Some(temp_dir.path().to_path_buf());
    config.embedding.enabled = false;

    let engine = NotebookEngine::from_parts(config, database, None, None, None, None);
    Ok((temp_dir, engine))
}

fn paris_guide() -> String {
    let mut content = String::new();
    while content.len() < 2_000 {
        content.push_str(
            "The Louvre is the most visited museum in the world, home to the Mona Lisa. \
             The Musee d'Orsay holds the finest impressionist collection in Paris. ",
        );
    }
    content
}

#[tokio::test]
async fn trip_notes_scenario() -> Result<()> {
    let (_temp_dir, engine) = offline_engine().await?;

    let notebook = engine.create_notebook("trip-notes", "traveler").await?;
    let source = engine
        .add_source(
            &notebook.id,
            SourceType::Text,
            "Paris Guide",
            &paris_guide(),
            None,
            None,
            None,
        )
        .await?;
    assert!(source.content.len() >= 2_000);

    // No generation provider: the mock tier answers, naming the source count
    let first = engine.query(&notebook.id, "What is the best museum?", None).await?;
    assert!(!first.from_cache);
    assert_eq!(first.tier, AnswerTier::Mock);
    assert!(first.answer.contains("1 source(s)"));

    engine.submit_feedback(first.query_id, true).await?;

    // Exact same question again: served from cache, usage counted once
    let second = engine.query(&notebook.id, "What is the best museum?", None).await?;
    assert!(second.from_cache);
    assert_eq!(second.tier, AnswerTier::Cache);
    assert_eq!(second.query_id, first.query_id);
    assert_eq!(second.confidence, Some(0.95));

    let stored = AnswerQueries::get_by_id(engine.database().pool(), first.query_id)
        .await?
        .expect("answer exists");
    assert_eq!(stored.usage_count, 1);
    assert_eq!(stored.provenance, Provenance::Promoted);

    Ok(())
}

#[tokio::test]
async fn query_never_errors_without_providers() -> Result<()> {
    let (_temp_dir, engine) = offline_engine().await?;
    let notebook = engine.create_notebook("empty-notebook", "traveler").await?;

    // Even an empty notebook gets a terminal mock answer, not an error
    let outcome = engine.query(&notebook.id, "Anything at all?", None).await?;
    assert_eq!(outcome.tier, AnswerTier::Mock);
    assert!(outcome.answer.contains("0 source(s)"));
    assert_eq!(outcome.confidence, None);

    Ok(())
}

#[tokio::test]
async fn corrected_answer_is_served_from_cache() -> Result<()> {
    let (_temp_dir, engine) = offline_engine().await?;

    let notebook = engine.create_notebook("trip-notes", "traveler").await?;
    let source = engine
        .add_source(
            &notebook.id,
            SourceType::Text,
            "Paris Guide",
            &paris_guide(),
            None,
            None,
            None,
        )
        .await?;

    let first = engine.query(&notebook.id, "What is the best museum?", None).await?;

    // The user replaces the placeholder with a real answer
    engine
        .update_answer(first.query_id, "The Louvre, according to the guide.", Some(&[source.id]))
        .await?;

    let second = engine
        .query(&notebook.id, "What is the best museum?", Some(&[source.id]))
        .await?;
    assert!(second.from_cache);
    assert_eq!(second.answer, "The Louvre, according to the guide.");

    let stored = AnswerQueries::get_by_id(engine.database().pool(), first.query_id)
        .await?
        .expect("answer exists");
    assert_eq!(stored.provenance, Provenance::UserEdited);

    Ok(())
}

#[tokio::test]
async fn full_source_lifecycle() -> Result<()> {
    let (_temp_dir, engine) = offline_engine().await?;

    let notebook = engine.create_notebook("lifecycle", "traveler").await?;
    let guide = engine
        .add_source(&notebook.id, SourceType::Text, "Guide", &paris_guide(), None, None, None)
        .await?;
    let notes = engine
        .add_source(&notebook.id, SourceType::Text, "Notes", &paris_guide(), None, None, None)
        .await?;

    assert_eq!(engine.list_sources(&notebook.id).await?.len(), 2);

    engine.set_source_selected(notes.id, false).await?;
    let sources = engine.list_sources(&notebook.id).await?;
    let notes_row = sources.iter().find(|s| s.id == notes.id).expect("notes source exists");
    assert!(!notes_row.selected);

    assert_eq!(engine.reindex_sources(&notebook.id).await?, 2);

    engine.delete_source(&notebook.id, guide.id).await?;
    assert_eq!(engine.list_sources(&notebook.id).await?.len(), 1);

    engine.delete_notebook(&notebook.id).await?;
    assert!(engine.list_notebooks(None).await?.is_empty());

    Ok(())
}
