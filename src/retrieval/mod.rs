
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::chunker::{ChunkerConfig, chunk};
use crate::database::queries::ChunkQueries;
use crate::database::{DbPool, NewChunk, Source};
use crate::embeddings::{EmbeddingProvider, decode_embedding, encode_embedding};

pub const DEFAULT_TOP_K: usize = 5;

/// Cosine similarity over equal-length vectors.
///
/// Mismatched lengths and zero-norm vectors score 0.0 rather than erroring;
/// a missing or malformed embedding simply ranks last.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A ranked search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub source_name: String,
    pub content: String,
    pub similarity: f32,
}

/// Persists chunks with their embeddings per source and ranks them by
/// similarity, scoped to a caller-supplied source set
#[derive(Clone)]
pub struct ChunkIndex {
    pool: DbPool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    chunker: ChunkerConfig,
}

impl ChunkIndex {
    #[inline]
    pub fn new(
        pool: DbPool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            pool,
            embedder,
            chunker,
        }
    }

    /// Chunk a source's content and build the rows to persist.
    ///
    /// A failed embedding leaves the chunk with a null vector; it is excluded
    /// from ranked search but still serves keyword fallback.
    async fn build_chunks(&self, source: &Source) -> Vec<NewChunk> {
        let mut rows = Vec::new();

        for (index, content) in chunk(&source.content, &self.chunker).enumerate() {
            let embedding = match &self.embedder {
                Some(embedder) => embedder.embed(&content).await.map(|v| encode_embedding(&v)),
                None => None,
            };

            rows.push(NewChunk {
                source_id: source.id,
                chunk_index: index as i64,
                content,
                embedding,
            });
        }

        rows
    }

    /// Reindex a source wholesale: delete all existing chunks, then recreate
    #[inline]
    pub async fn index_source(&self, source: &Source) -> Result<usize> {
        let rows = self.build_chunks(source).await;
        let count = ChunkQueries::replace_for_source(&self.pool, source.id, &rows).await?;

        debug!("Indexed source {} ({}) into {} chunks", source.id, source.name, count);
        Ok(count)
    }

    /// Backfill chunks for any source in the set that has none.
    ///
    /// Queries must not assume chunks pre-exist: content may have been
    /// ingested before indexing ran. The insert is guarded by a chunk-count
    /// check in the same transaction, so concurrent backfills cannot
    /// duplicate rows.
    #[inline]
    pub async fn ensure_indexed(&self, sources: &[Source]) -> Result<()> {
        for source in sources {
            if ChunkQueries::count_for_source(&self.pool, source.id).await? > 0 {
                continue;
            }

            debug!("Source {} has no chunks, backfilling before search", source.id);
            let rows = self.build_chunks(source).await;
            if !ChunkQueries::insert_if_absent(&self.pool, source.id, &rows).await? {
                debug!("Source {} was backfilled concurrently", source.id);
            }
        }

        Ok(())
    }

    /// Rank chunks from the given sources against a query embedding and
    /// return the top `top_k`, backfilling missing chunks first
    #[inline]
    pub async fn search(
        &self,
        sources: &[Source],
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_indexed(sources).await?;

        let source_ids: Vec<i64> = sources.iter().map(|s| s.id).collect();
        let chunks = ChunkQueries::list_for_sources(&self.pool, &source_ids).await?;

        let mut scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let embedding = decode_embedding(chunk.embedding.as_deref()?);
                let similarity = cosine_similarity(query_embedding, &embedding);
                Some(ScoredChunk {
                    source_name: chunk.source_name,
                    content: chunk.content,
                    similarity,
                })
            })
            .collect();

        if scored.is_empty() {
            warn!("No embedded chunks available for ranked search");
            return Ok(Vec::new());
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        Ok(scored)
    }
}
