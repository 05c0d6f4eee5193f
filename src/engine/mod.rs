#[cfg(test)]
mod tests;

pub mod query;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::queries::{AnswerQueries, NotebookQueries, SourceQueries};
use crate::database::{
    Database, NewSource, Notebook, Provenance, QueryAnswer, Source, SourceType, source_set_key,
};
use crate::embeddings::{EmbeddingProvider, OllamaEmbeddings, encode_embedding};
use crate::generation::{
    GenerationProvider, HttpLiveSearch, HttpManagedStore, LiveSearchProvider, ManagedStoreProvider,
    OpenAiChatClient,
};
use crate::retrieval::ChunkIndex;
use crate::{NotebookError, Result};

pub use query::{AnswerTier, QueryOutcome};

/// Upper bound on any single external provider call, so a hung provider
/// cannot wedge a request even when its client timeout misbehaves
const PROVIDER_CALL_GUARD: Duration = Duration::from_secs(120);

const DEFAULT_NOTEBOOK_NAME: &str = "Untitled Notebook";
const DEFAULT_OWNER: &str = "local";

/// Transport-agnostic facade over the query engine.
///
/// Holds the persisted store and the configured external providers; each
/// operation is independent and request-scoped.
pub struct NotebookEngine {
    database: Database,
    chunk_index: ChunkIndex,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
    managed_store: Option<Arc<dyn ManagedStoreProvider>>,
    live_search: Option<Arc<dyn LiveSearchProvider>>,
    config: Config,
    http: reqwest::Client,
}

impl NotebookEngine {
    /// Build an engine from configuration, wiring up the HTTP providers that
    /// are enabled
    #[inline]
    pub async fn new(config: Config) -> Result<Self> {
        let config_dir = config.config_dir_path()?;
        let database = Database::initialize_from_config_dir(&config_dir).await?;

        let embedder: Option<Arc<dyn EmbeddingProvider>> = if config.embedding.enabled {
            Some(Arc::new(OllamaEmbeddings::new(&config.embedding)?))
        } else {
            None
        };
        let generator: Option<Arc<dyn GenerationProvider>> = if config.generation.enabled {
            Some(Arc::new(OpenAiChatClient::new(&config.generation)?))
        } else {
            None
        };
        let managed_store: Option<Arc<dyn ManagedStoreProvider>> = if config.managed_store.enabled {
            Some(Arc::new(HttpManagedStore::new(&config.managed_store)?))
        } else {
            None
        };
        let live_search: Option<Arc<dyn LiveSearchProvider>> = if config.live_search.enabled {
            Some(Arc::new(HttpLiveSearch::new(&config.live_search)?))
        } else {
            None
        };

        info!(
            "Engine providers: embedding={}, generation={}, managed_store={}, live_search={}",
            embedder.is_some(),
            generator.is_some(),
            managed_store.is_some(),
            live_search.is_some()
        );

        Ok(Self::from_parts(
            config,
            database,
            embedder,
            generator,
            managed_store,
            live_search,
        ))
    }

    /// Assemble an engine from explicit parts; used by tests and embedders
    /// of the library that bring their own providers
    #[inline]
    pub fn from_parts(
        config: Config,
        database: Database,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        generator: Option<Arc<dyn GenerationProvider>>,
        managed_store: Option<Arc<dyn ManagedStoreProvider>>,
        live_search: Option<Arc<dyn LiveSearchProvider>>,
    ) -> Self {
        let chunk_index = ChunkIndex::new(
            database.pool().clone(),
            embedder.clone(),
            config.chunking.clone(),
        );

        Self {
            database,
            chunk_index,
            embedder,
            generator,
            managed_store,
            live_search,
            config,
            http: reqwest::Client::new(),
        }
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    // Notebook operations

    #[inline]
    pub async fn create_notebook(&self, name: &str, owner: &str) -> Result<Notebook> {
        if name.trim().is_empty() {
            return Err(NotebookError::Validation(
                "Notebook name cannot be empty".to_string(),
            ));
        }

        Ok(NotebookQueries::create(self.database.pool(), name, owner).await?)
    }

    #[inline]
    pub async fn list_notebooks(&self, owner: Option<&str>) -> Result<Vec<Notebook>> {
        Ok(NotebookQueries::list(self.database.pool(), owner).await?)
    }

    /// Delete a notebook and everything it owns
    #[inline]
    pub async fn delete_notebook(&self, notebook_id: &str) -> Result<()> {
        if !NotebookQueries::delete(self.database.pool(), notebook_id).await? {
            return Err(NotebookError::NotFound(format!(
                "Notebook {notebook_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn require_notebook(&self, notebook_id: &str) -> Result<Notebook> {
        NotebookQueries::get_by_id(self.database.pool(), notebook_id)
            .await?
            .ok_or_else(|| NotebookError::NotFound(format!("Notebook {notebook_id} does not exist")))
    }

    // Source operations

    /// Add a source to a notebook, creating the notebook first if it does
    /// not exist yet (explicit create-or-fetch upsert), then chunk and embed
    /// the content immediately.
    #[inline]
    #[allow(clippy::too_many_arguments)]
    pub async fn add_source(
        &self,
        notebook_id: &str,
        source_type: SourceType,
        name: &str,
        content: &str,
        url: Option<&str>,
        media_data: Option<Vec<u8>>,
        media_type: Option<String>,
    ) -> Result<Source> {
        if name.trim().is_empty() {
            return Err(NotebookError::Validation(
                "Source name cannot be empty".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(NotebookError::Validation(
                "Source content cannot be empty".to_string(),
            ));
        }

        let limit = self.config.limits.max_content_bytes;
        if content.len() > limit {
            return Err(NotebookError::ContentTooLarge {
                actual: content.len(),
                limit,
            });
        }
        if let Some(data) = &media_data {
            if data.len() > limit {
                return Err(NotebookError::ContentTooLarge {
                    actual: data.len(),
                    limit,
                });
            }
            if !source_type.is_visual() {
                return Err(NotebookError::Validation(format!(
                    "Source type {source_type} cannot carry a media payload"
                )));
            }
        }

        let notebook = NotebookQueries::upsert(
            self.database.pool(),
            notebook_id,
            DEFAULT_NOTEBOOK_NAME,
            DEFAULT_OWNER,
        )
        .await?;

        let source = SourceQueries::create(
            self.database.pool(),
            NewSource {
                notebook_id: notebook.id,
                source_type,
                name: name.to_string(),
                content: content.to_string(),
                media_data,
                media_type,
                url: url.map(str::to_string),
            },
        )
        .await?;

        // Content is final at this point, so chunks can be built right away
        let chunks = self.chunk_index.index_source(&source).await?;
        debug!("Added source {} with {} chunks", source.id, chunks);

        Ok(source)
    }

    #[inline]
    pub async fn list_sources(&self, notebook_id: &str) -> Result<Vec<Source>> {
        self.require_notebook(notebook_id).await?;
        Ok(SourceQueries::list_by_notebook(self.database.pool(), notebook_id).await?)
    }

    #[inline]
    pub async fn set_source_selected(&self, source_id: i64, selected: bool) -> Result<()> {
        if !SourceQueries::set_selected(self.database.pool(), source_id, selected).await? {
            return Err(NotebookError::NotFound(format!(
                "Source {source_id} does not exist"
            )));
        }
        Ok(())
    }

    #[inline]
    pub async fn delete_source(&self, notebook_id: &str, source_id: i64) -> Result<()> {
        if !SourceQueries::delete(self.database.pool(), notebook_id, source_id).await? {
            return Err(NotebookError::NotFound(format!(
                "Source {source_id} does not exist in notebook {notebook_id}"
            )));
        }
        Ok(())
    }

    /// Re-fetch an externally-refreshable source and reindex it wholesale
    #[inline]
    pub async fn refresh_source(&self, notebook_id: &str, source_id: i64) -> Result<Source> {
        let source = SourceQueries::get_in_notebook(self.database.pool(), notebook_id, source_id)
            .await?
            .ok_or_else(|| {
                NotebookError::NotFound(format!(
                    "Source {source_id} does not exist in notebook {notebook_id}"
                ))
            })?;

        if !source.source_type.is_refreshable() {
            return Err(NotebookError::Unsupported(format!(
                "Source type {} cannot be refreshed",
                source.source_type
            )));
        }
        let url = source.url.as_deref().ok_or_else(|| {
            NotebookError::Validation(format!("Source {source_id} has no retrieval URL"))
        })?;

        info!("Refreshing source {} from {}", source_id, url);

        let content = self
            .fetch_url_text(url)
            .await
            .map_err(|e| NotebookError::ProviderUnavailable(format!("Refresh failed: {e}")))?;

        let limit = self.config.limits.max_content_bytes;
        if content.len() > limit {
            return Err(NotebookError::ContentTooLarge {
                actual: content.len(),
                limit,
            });
        }
        if content.trim().is_empty() {
            return Err(NotebookError::Validation(format!(
                "Refreshed content for source {source_id} is empty"
            )));
        }

        SourceQueries::update_content(self.database.pool(), source_id, &content).await?;
        let updated = SourceQueries::get_by_id(self.database.pool(), source_id)
            .await?
            .ok_or_else(|| NotebookError::NotFound(format!("Source {source_id} disappeared")))?;

        self.chunk_index.index_source(&updated).await?;

        Ok(updated)
    }

    async fn fetch_url_text(&self, url: &str) -> anyhow::Result<String> {
        let response = tokio::time::timeout(PROVIDER_CALL_GUARD, async {
            self.http.get(url).send().await?.error_for_status()?.text().await
        })
        .await
        .map_err(|_| anyhow::anyhow!("Timed out fetching {url}"))??;

        Ok(response)
    }

    /// Rebuild chunks and embeddings for every source in the notebook
    #[inline]
    pub async fn reindex_sources(&self, notebook_id: &str) -> Result<usize> {
        self.require_notebook(notebook_id).await?;

        let sources = SourceQueries::list_by_notebook(self.database.pool(), notebook_id).await?;
        let mut reindexed = 0;

        for source in &sources {
            match self.chunk_index.index_source(source).await {
                Ok(_) => reindexed += 1,
                Err(e) => {
                    // Keep going; a single bad source must not block the rest
                    warn!("Failed to reindex source {}: {}", source.id, e);
                }
            }
        }

        info!("Reindexed {}/{} sources in notebook {}", reindexed, sources.len(), notebook_id);
        Ok(reindexed)
    }

    // Answer cache & feedback loop

    /// Helpful answers for a notebook, most-used first
    #[inline]
    pub async fn list_cached_answers(&self, notebook_id: &str) -> Result<Vec<QueryAnswer>> {
        self.require_notebook(notebook_id).await?;
        Ok(AnswerQueries::list_helpful(self.database.pool(), notebook_id, None, 100).await?)
    }

    /// Record user feedback on a cached answer.
    ///
    /// Positive feedback promotes the entry into cache-hit and few-shot
    /// eligibility; negative feedback excludes it permanently.
    #[inline]
    pub async fn submit_feedback(&self, query_id: i64, helpful: bool) -> Result<QueryAnswer> {
        let provenance = helpful.then_some(Provenance::Promoted);

        AnswerQueries::set_feedback(self.database.pool(), query_id, helpful, provenance)
            .await?
            .ok_or_else(|| {
                NotebookError::NotFound(format!("Query answer {query_id} does not exist"))
            })
    }

    /// Overwrite an answer with a user-supplied correction.
    ///
    /// The question embedding is regenerated, the entry is forced helpful
    /// with user-edited provenance, and the source-set key is rebound when a
    /// new selection is supplied.
    #[inline]
    pub async fn update_answer(
        &self,
        query_id: i64,
        new_answer: &str,
        source_ids: Option<&[i64]>,
    ) -> Result<QueryAnswer> {
        if new_answer.trim().is_empty() {
            return Err(NotebookError::Validation(
                "Corrected answer cannot be empty".to_string(),
            ));
        }

        let existing = AnswerQueries::get_by_id(self.database.pool(), query_id)
            .await?
            .ok_or_else(|| {
                NotebookError::NotFound(format!("Query answer {query_id} does not exist"))
            })?;

        let embedding = self.embed_guarded(&existing.question).await.map(|v| encode_embedding(&v));
        let key = source_ids.map(source_set_key);

        AnswerQueries::apply_correction(
            self.database.pool(),
            query_id,
            new_answer,
            embedding.as_deref(),
            key.as_deref(),
        )
        .await?
        .ok_or_else(|| NotebookError::NotFound(format!("Query answer {query_id} does not exist")))
    }

    /// Embed with the call guard applied; any failure degrades to `None`
    async fn embed_guarded(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match tokio::time::timeout(PROVIDER_CALL_GUARD, embedder.embed(text)).await {
            Ok(embedding) => embedding,
            Err(_) => {
                warn!("Embedding call timed out");
                None
            }
        }
    }
}
