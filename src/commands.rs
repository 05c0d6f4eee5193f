use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::database::SourceType;
use crate::engine::NotebookEngine;

async fn build_engine() -> Result<NotebookEngine> {
    let config = Config::load()?;
    NotebookEngine::new(config)
        .await
        .context("Failed to initialize engine")
}

/// Create a notebook and print its id
#[inline]
pub async fn create_notebook(name: String, owner: String) -> Result<()> {
    let engine = build_engine().await?;
    let notebook = engine.create_notebook(&name, &owner).await?;

    println!("Created notebook: {} (ID: {})", notebook.name, notebook.id);
    Ok(())
}

/// List notebooks, optionally filtered by owner
#[inline]
pub async fn list_notebooks(owner: Option<String>) -> Result<()> {
    let engine = build_engine().await?;
    let notebooks = engine.list_notebooks(owner.as_deref()).await?;

    if notebooks.is_empty() {
        println!("No notebooks yet. Use 'notebook-qa notebook create <name>' to add one.");
        return Ok(());
    }

    println!("Notebooks ({} total):", notebooks.len());
    for notebook in &notebooks {
        println!("  {} (ID: {}, owner: {})", notebook.name, notebook.id, notebook.owner);
        let sources = engine.list_sources(&notebook.id).await?;
        println!("    Sources: {}", sources.len());
    }

    Ok(())
}

/// Delete a notebook and everything it owns
#[inline]
pub async fn delete_notebook(notebook_id: String) -> Result<()> {
    let engine = build_engine().await?;
    engine.delete_notebook(&notebook_id).await?;

    println!("Deleted notebook {}", notebook_id);
    Ok(())
}

/// Add a source from literal content or a file
#[inline]
pub async fn add_source(
    notebook_id: String,
    source_type: SourceType,
    name: String,
    content: Option<String>,
    file: Option<std::path::PathBuf>,
    url: Option<String>,
) -> Result<()> {
    let content = match (content, file) {
        (Some(content), None) => content,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => anyhow::bail!("Provide exactly one of --content or --file"),
    };

    let engine = build_engine().await?;
    let source = engine
        .add_source(&notebook_id, source_type, &name, &content, url.as_deref(), None, None)
        .await?;

    println!("Added source: {} (ID: {})", source.name, source.id);
    println!("  Type: {}", source.source_type);
    println!("  Content length: {} chars", source.content.len());
    Ok(())
}

/// List a notebook's sources with their selection flags
#[inline]
pub async fn list_sources(notebook_id: String) -> Result<()> {
    let engine = build_engine().await?;
    let sources = engine.list_sources(&notebook_id).await?;

    if sources.is_empty() {
        println!("No sources in notebook {}.", notebook_id);
        return Ok(());
    }

    println!("Sources in {} ({} total):", notebook_id, sources.len());
    for source in &sources {
        let marker = if source.selected { "[x]" } else { "[ ]" };
        println!("  {} {} (ID: {}, type: {})", marker, source.name, source.id, source.source_type);
        if let Some(url) = &source.url {
            println!("      URL: {}", url);
        }
    }

    Ok(())
}

#[inline]
pub async fn select_source(source_id: i64, selected: bool) -> Result<()> {
    let engine = build_engine().await?;
    engine.set_source_selected(source_id, selected).await?;

    println!(
        "Source {} is now {}",
        source_id,
        if selected { "selected" } else { "deselected" }
    );
    Ok(())
}

#[inline]
pub async fn delete_source(notebook_id: String, source_id: i64) -> Result<()> {
    let engine = build_engine().await?;
    engine.delete_source(&notebook_id, source_id).await?;

    println!("Deleted source {}", source_id);
    Ok(())
}

/// Re-fetch an externally-refreshable source and reindex it
#[inline]
pub async fn refresh_source(notebook_id: String, source_id: i64) -> Result<()> {
    let engine = build_engine().await?;
    let source = engine.refresh_source(&notebook_id, source_id).await?;

    println!("Refreshed source: {} (ID: {})", source.name, source.id);
    println!("  Content length: {} chars", source.content.len());
    Ok(())
}

/// Ask a question against a notebook's selected sources
#[inline]
pub async fn run_query(
    notebook_id: String,
    question: String,
    source_ids: Option<Vec<i64>>,
) -> Result<()> {
    let engine = build_engine().await?;
    let outcome = engine
        .query(&notebook_id, &question, source_ids.as_deref())
        .await?;

    info!("Query {} answered by tier {}", outcome.query_id, outcome.tier);

    println!("{}", outcome.answer);
    println!();
    println!("  Query ID: {}", outcome.query_id);
    println!("  Tier: {}", outcome.tier);
    println!("  From cache: {}", outcome.from_cache);
    if let Some(confidence) = outcome.confidence {
        println!("  Confidence: {:.2}", confidence);
    }
    if !outcome.citations.is_empty() {
        println!("  Citations:");
        for citation in &outcome.citations {
            println!("    - {}", citation);
        }
    }

    Ok(())
}

/// Mark a cached answer helpful or unhelpful
#[inline]
pub async fn submit_feedback(query_id: i64, helpful: bool) -> Result<()> {
    let engine = build_engine().await?;
    let answer = engine.submit_feedback(query_id, helpful).await?;

    if helpful {
        println!("Answer {} promoted for reuse (provenance: {})", answer.id, answer.provenance);
    } else {
        println!("Answer {} excluded from future reuse", answer.id);
    }
    Ok(())
}

/// Overwrite an answer with a correction
#[inline]
pub async fn edit_answer(
    query_id: i64,
    new_answer: String,
    source_ids: Option<Vec<i64>>,
) -> Result<()> {
    let engine = build_engine().await?;
    let answer = engine
        .update_answer(query_id, &new_answer, source_ids.as_deref())
        .await?;

    println!("Answer {} updated (provenance: {})", answer.id, answer.provenance);
    Ok(())
}

/// List promoted answers, most used first
#[inline]
pub async fn list_answers(notebook_id: String) -> Result<()> {
    let engine = build_engine().await?;
    let answers = engine.list_cached_answers(&notebook_id).await?;

    if answers.is_empty() {
        println!("No promoted answers in notebook {}.", notebook_id);
        return Ok(());
    }

    println!("Promoted answers ({} total):", answers.len());
    for answer in &answers {
        println!("  [{}] {} (used {}x, {})", answer.id, answer.question, answer.usage_count, answer.provenance);
    }

    Ok(())
}

/// Rebuild chunks and embeddings for a notebook
#[inline]
pub async fn reindex(notebook_id: String) -> Result<()> {
    let engine = build_engine().await?;
    let count = engine.reindex_sources(&notebook_id).await?;

    engine.database().optimize().await?;

    println!("Reindexed {} source(s)", count);
    Ok(())
}
