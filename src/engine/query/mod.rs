
use std::collections::HashSet;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::chunker::sanitize;
use crate::database::queries::{AnswerQueries, SourceQueries};
use crate::database::{NewQueryAnswer, Notebook, Provenance, QueryAnswer, Source, source_set_key};
use crate::embeddings::{decode_embedding, encode_embedding};
use crate::generation::{GeneratedAnswer, GenerationRequest, ImagePart};
use crate::retrieval::cosine_similarity;
use crate::{NotebookError, Result};

use super::{NotebookEngine, PROVIDER_CALL_GUARD};

/// Accept a cached answer when its question embedding scores above this
const CACHE_SIMILARITY_THRESHOLD: f32 = 0.85;
/// Word-overlap acceptance ratio, used only when no embeddings exist at all
const WORD_OVERLAP_THRESHOLD: f64 = 0.70;
/// Minimum similarity for a prior answer to qualify as a few-shot example
const FEW_SHOT_SIMILARITY_THRESHOLD: f32 = 0.40;
const FEW_SHOT_LIMIT: usize = 3;
const CACHE_CANDIDATE_LIMIT: i64 = 20;
const CHUNK_TOP_K: usize = 6;
/// Chunk search yielding less context than this falls back to raw excerpts
const MIN_CHUNK_CONTEXT_CHARS: usize = 100;
const RAW_EXCERPT_CHARS: usize = 5_000;
/// Context below this triggers live-search augmentation when available
const HYBRID_CONTEXT_THRESHOLD: usize = 500;
const MAX_IMAGES_PER_CALL: usize = 10;
const INLINE_SOURCE_CHAR_CAP: usize = 8_000;

const CONFIDENCE_CACHE: f64 = 0.95;
const CONFIDENCE_MANAGED_STORE: f64 = 0.95;
const CONFIDENCE_INLINE: f64 = 0.90;
const CONFIDENCE_HYBRID: f64 = 0.85;
const CONFIDENCE_LOCAL_CHUNKS: f64 = 0.75;

/// Lexical cues that a question needs current information
const CURRENT_INFO_TERMS: &[&str] = &[
    "today", "yesterday", "tonight", "right now", "this week", "this month", "this year",
    "latest", "current", "currently", "recent", "breaking", "news", "price", "prices", "stock",
    "stocks", "market", "weather", "forecast", "score", "schedule",
];

/// Which state of the fallback machine produced the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerTier {
    Cache,
    ManagedStore,
    Inline,
    Visual,
    LocalChunks,
    Hybrid,
    Mock,
}

impl std::fmt::Display for AnswerTier {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            AnswerTier::Cache => write!(f, "cache"),
            AnswerTier::ManagedStore => write!(f, "managed-store"),
            AnswerTier::Inline => write!(f, "inline"),
            AnswerTier::Visual => write!(f, "visual"),
            AnswerTier::LocalChunks => write!(f, "local-chunks"),
            AnswerTier::Hybrid => write!(f, "hybrid"),
            AnswerTier::Mock => write!(f, "mock"),
        }
    }
}

/// Result of one query request.
///
/// The tier discriminant says which strategy answered; callers pattern-match
/// on it instead of probing optional fields.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub answer: String,
    pub query_id: i64,
    pub from_cache: bool,
    pub confidence: Option<f64>,
    pub citations: Vec<String>,
    pub sources_used: Vec<i64>,
    pub tier: AnswerTier,
}

impl NotebookEngine {
    /// Answer a question against a notebook's selected sources.
    ///
    /// Walks the generation tiers strictly in order: answer cache, managed
    /// retrieval store, inline multi-document generation (visual variant when
    /// image sources are selected), local chunk-similarity generation with
    /// optional live-search blending, and finally the mock tier, which always
    /// answers. A provider failure inside a tier is treated as "tier
    /// declined" and never surfaces to the caller.
    #[inline]
    pub async fn query(
        &self,
        notebook_id: &str,
        question: &str,
        source_ids: Option<&[i64]>,
    ) -> Result<QueryOutcome> {
        if question.trim().is_empty() {
            return Err(NotebookError::Validation(
                "Question cannot be empty".to_string(),
            ));
        }

        let notebook = self.require_notebook(notebook_id).await?;
        let selected = self.resolve_selection(notebook_id, source_ids).await?;
        let selected_ids: Vec<i64> = selected.iter().map(|s| s.id).collect();
        let source_key = source_set_key(&selected_ids);

        let question_embedding = self.embed_guarded(question).await;
        debug!(
            "Query against notebook {} with {} selected sources (key {:?}), embedding: {}",
            notebook_id,
            selected.len(),
            source_key,
            question_embedding.is_some()
        );

        if let Some(hit) = self
            .check_cache(notebook_id, question, question_embedding.as_deref(), &source_key, &selected_ids)
            .await?
        {
            info!("Cache hit for question in notebook {}", notebook_id);
            return Ok(hit);
        }

        if let Some(outcome) = self
            .try_managed_store(&notebook, question, question_embedding.as_deref(), &source_key, &selected_ids)
            .await?
        {
            return Ok(outcome);
        }

        if let Some(outcome) = self
            .try_inline(&notebook, question, question_embedding.as_deref(), &source_key, &selected)
            .await?
        {
            return Ok(outcome);
        }

        if let Some(outcome) = self
            .try_local_chunks(&notebook, question, question_embedding.as_deref(), &source_key, &selected)
            .await?
        {
            return Ok(outcome);
        }

        self.mock_answer(&notebook, question, question_embedding.as_deref(), &source_key, &selected_ids)
            .await
    }

    /// Resolve the caller's selection, defaulting to sources flagged as
    /// selected in the notebook
    async fn resolve_selection(
        &self,
        notebook_id: &str,
        source_ids: Option<&[i64]>,
    ) -> Result<Vec<Source>> {
        match source_ids {
            Some([]) => Err(NotebookError::Validation(
                "Source selection cannot be empty".to_string(),
            )),
            Some(ids) => {
                let sources = SourceQueries::list_by_ids(self.database.pool(), ids).await?;
                let in_notebook: Vec<Source> = sources
                    .into_iter()
                    .filter(|s| s.notebook_id == notebook_id)
                    .collect();

                let unique_requested = ids.iter().unique().count();
                if in_notebook.len() != unique_requested {
                    return Err(NotebookError::NotFound(format!(
                        "One or more selected sources do not exist in notebook {notebook_id}"
                    )));
                }

                Ok(in_notebook)
            }
            None => Ok(SourceQueries::list_selected(self.database.pool(), notebook_id).await?),
        }
    }

    /// Tier 1: reuse a previously helpful answer for the same source set.
    ///
    /// Embedding-scored candidates always take precedence; word overlap is
    /// consulted only when no embedding signal exists on either side.
    async fn check_cache(
        &self,
        notebook_id: &str,
        question: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
        selected_ids: &[i64],
    ) -> Result<Option<QueryOutcome>> {
        let candidates = AnswerQueries::list_helpful(
            self.database.pool(),
            notebook_id,
            Some(source_key),
            CACHE_CANDIDATE_LIMIT,
        )
        .await?;

        if candidates.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(&QueryAnswer, f32)> = None;
        let mut embedding_scored = false;

        if let Some(query_vector) = question_embedding {
            for candidate in &candidates {
                let Some(candidate_vector) = self.ensure_answer_embedding(candidate).await? else {
                    continue;
                };
                embedding_scored = true;

                let similarity = cosine_similarity(query_vector, &candidate_vector);
                if best.is_none_or(|(_, s)| similarity > s) {
                    best = Some((candidate, similarity));
                }
            }
        }

        if embedding_scored {
            if let Some((candidate, similarity)) = best {
                if similarity > CACHE_SIMILARITY_THRESHOLD {
                    debug!("Cache candidate {} accepted at similarity {:.3}", candidate.id, similarity);
                    return Ok(Some(self.cache_hit(candidate, selected_ids).await?));
                }
            }
            return Ok(None);
        }

        // No semantic signal on either side; lexical overlap is the last resort
        for candidate in &candidates {
            let overlap = word_overlap(question, &candidate.question);
            if overlap > WORD_OVERLAP_THRESHOLD {
                debug!("Cache candidate {} accepted at word overlap {:.3}", candidate.id, overlap);
                return Ok(Some(self.cache_hit(candidate, selected_ids).await?));
            }
        }

        Ok(None)
    }

    async fn cache_hit(&self, candidate: &QueryAnswer, selected_ids: &[i64]) -> Result<QueryOutcome> {
        AnswerQueries::increment_usage(self.database.pool(), candidate.id).await?;

        Ok(QueryOutcome {
            answer: candidate.answer.clone(),
            query_id: candidate.id,
            from_cache: true,
            confidence: Some(CONFIDENCE_CACHE),
            citations: Vec::new(),
            sources_used: selected_ids.to_vec(),
            tier: AnswerTier::Cache,
        })
    }

    /// Return a candidate's question embedding, generating and persisting it
    /// lazily when absent
    async fn ensure_answer_embedding(&self, answer: &QueryAnswer) -> Result<Option<Vec<f32>>> {
        if let Some(bytes) = &answer.question_embedding {
            return Ok(Some(decode_embedding(bytes)));
        }

        let Some(vector) = self.embed_guarded(&answer.question).await else {
            return Ok(None);
        };

        AnswerQueries::set_question_embedding(
            self.database.pool(),
            answer.id,
            &encode_embedding(&vector),
        )
        .await?;

        Ok(Some(vector))
    }

    /// Tier 2: provider-hosted retrieval store bound to this notebook
    async fn try_managed_store(
        &self,
        notebook: &Notebook,
        question: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
        selected_ids: &[i64],
    ) -> Result<Option<QueryOutcome>> {
        let (Some(store), Some(handle)) = (&self.managed_store, &notebook.store_handle) else {
            return Ok(None);
        };

        let generated =
            match tokio::time::timeout(PROVIDER_CALL_GUARD, store.query(handle, question)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(error)) => {
                    warn!("Managed store declined: {}", error);
                    return Ok(None);
                }
                Err(_) => {
                    warn!("Managed store call timed out");
                    return Ok(None);
                }
            };

        if generated.is_empty() {
            return Ok(None);
        }

        let record = self
            .record_answer(&notebook.id, question, &generated.text, question_embedding, Provenance::ManagedStore, source_key)
            .await?;

        Ok(Some(QueryOutcome {
            answer: generated.text,
            query_id: record.id,
            from_cache: false,
            confidence: Some(CONFIDENCE_MANAGED_STORE),
            citations: generated.citations,
            sources_used: selected_ids.to_vec(),
            tier: AnswerTier::ManagedStore,
        }))
    }

    /// Tier 3: inline multi-document prompt, switching to the multimodal
    /// variant when any selected source carries a visual payload
    async fn try_inline(
        &self,
        notebook: &Notebook,
        question: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
        selected: &[Source],
    ) -> Result<Option<QueryOutcome>> {
        let Some(generator) = &self.generator else {
            return Ok(None);
        };
        if selected.is_empty() {
            return Ok(None);
        }

        let few_shots = self
            .few_shot_examples(&notebook.id, question_embedding, source_key)
            .await?;

        let prompt = build_inline_prompt(question, selected, &few_shots);

        let images: Vec<ImagePart> = selected
            .iter()
            .filter(|s| s.source_type.is_visual())
            .filter_map(|s| {
                Some(ImagePart {
                    media_type: s
                        .media_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    data: s.media_data.clone()?,
                })
            })
            .take(MAX_IMAGES_PER_CALL)
            .collect();

        let tier = if images.is_empty() {
            AnswerTier::Inline
        } else {
            AnswerTier::Visual
        };
        let provenance = if images.is_empty() {
            Provenance::Inline
        } else {
            Provenance::Visual
        };

        let request = GenerationRequest { prompt, images };
        let generated =
            match tokio::time::timeout(PROVIDER_CALL_GUARD, generator.generate(&request)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(error)) => {
                    warn!("Inline generation declined: {}", error);
                    return Ok(None);
                }
                Err(_) => {
                    warn!("Inline generation timed out");
                    return Ok(None);
                }
            };

        if generated.is_empty() {
            return Ok(None);
        }

        let record = self
            .record_answer(&notebook.id, question, &generated.text, question_embedding, provenance, source_key)
            .await?;

        Ok(Some(QueryOutcome {
            answer: generated.text,
            query_id: record.id,
            from_cache: false,
            confidence: Some(CONFIDENCE_INLINE),
            citations: generated.citations,
            sources_used: selected.iter().map(|s| s.id).collect(),
            tier,
        }))
    }

    /// Tier 4: compact chunk-grounded generation, retried after the inline
    /// tier declined, optionally blended with live search
    async fn try_local_chunks(
        &self,
        notebook: &Notebook,
        question: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
        selected: &[Source],
    ) -> Result<Option<QueryOutcome>> {
        let Some(generator) = &self.generator else {
            return Ok(None);
        };
        if selected.is_empty() {
            return Ok(None);
        }

        let mut context = String::new();
        if let Some(query_vector) = question_embedding {
            let chunks = self
                .chunk_index
                .search(selected, query_vector, CHUNK_TOP_K)
                .await?;
            context = chunks
                .iter()
                .map(|c| format!("From {}: {}", c.source_name, c.content))
                .join("\n\n");
        }

        // Insufficient ranked context falls back to raw per-source excerpts
        if context.chars().count() < MIN_CHUNK_CONTEXT_CHARS {
            context = selected
                .iter()
                .map(|s| {
                    format!(
                        "From {}: {}",
                        s.name,
                        truncate_chars(&sanitize(&s.content), RAW_EXCERPT_CHARS)
                    )
                })
                .join("\n\n");
        }

        let wants_live = context.chars().count() < HYBRID_CONTEXT_THRESHOLD
            || is_current_info_question(question);
        let live = if wants_live {
            self.live_search_guarded(question, &notebook.name).await
        } else {
            None
        };

        let mut prompt = format!(
            "Answer the question using only the context excerpts below. \
             If the context does not contain the answer, say so.\n\nContext:\n{context}\n"
        );
        if let Some(live_answer) = &live {
            prompt.push_str(&format!("\nLive search results:\n{}\n", live_answer.text));
        }
        prompt.push_str(&format!("\nQuestion: {question}"));

        let request = GenerationRequest::text(prompt);
        let generated =
            match tokio::time::timeout(PROVIDER_CALL_GUARD, generator.generate(&request)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(error)) => {
                    warn!("Chunk-grounded generation declined: {}", error);
                    return Ok(None);
                }
                Err(_) => {
                    warn!("Chunk-grounded generation timed out");
                    return Ok(None);
                }
            };

        if generated.is_empty() {
            return Ok(None);
        }

        let (provenance, tier, confidence) = if live.is_some() {
            (Provenance::Hybrid, AnswerTier::Hybrid, CONFIDENCE_HYBRID)
        } else {
            (Provenance::Query, AnswerTier::LocalChunks, CONFIDENCE_LOCAL_CHUNKS)
        };

        let mut citations = generated.citations.clone();
        if let Some(live_answer) = live {
            citations.extend(live_answer.citations);
        }

        let record = self
            .record_answer(&notebook.id, question, &generated.text, question_embedding, provenance, source_key)
            .await?;

        Ok(Some(QueryOutcome {
            answer: generated.text,
            query_id: record.id,
            from_cache: false,
            confidence: Some(confidence),
            citations,
            sources_used: selected.iter().map(|s| s.id).collect(),
            tier,
        }))
    }

    async fn live_search_guarded(&self, question: &str, hint: &str) -> Option<GeneratedAnswer> {
        let live_search = self.live_search.as_ref()?;

        match tokio::time::timeout(PROVIDER_CALL_GUARD, live_search.search(question, Some(hint)))
            .await
        {
            Ok(Ok(answer)) if !answer.is_empty() => Some(answer),
            Ok(Ok(_)) => None,
            Ok(Err(error)) => {
                warn!("Live search declined: {}", error);
                None
            }
            Err(_) => {
                warn!("Live search timed out");
                None
            }
        }
    }

    /// Tier 5: terminal placeholder naming the notebook's source count.
    ///
    /// Always reachable and never errors; the answer is persisted like any
    /// other tier so positive feedback can still promote it.
    async fn mock_answer(
        &self,
        notebook: &Notebook,
        question: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
        selected_ids: &[i64],
    ) -> Result<QueryOutcome> {
        let count = SourceQueries::count_by_notebook(self.database.pool(), &notebook.id).await?;

        let answer = format!(
            "This notebook contains {count} source(s), but no generation provider was available \
             to answer. Configure a generation provider to get grounded answers."
        );

        let record = self
            .record_answer(&notebook.id, question, &answer, question_embedding, Provenance::Mock, source_key)
            .await?;

        Ok(QueryOutcome {
            answer,
            query_id: record.id,
            from_cache: false,
            confidence: None,
            citations: Vec::new(),
            sources_used: selected_ids.to_vec(),
            tier: AnswerTier::Mock,
        })
    }

    /// Prior helpful answers similar enough to steer a new generation,
    /// preferring ones grounded in the same source selection, then the most
    /// used
    async fn few_shot_examples(
        &self,
        notebook_id: &str,
        question_embedding: Option<&[f32]>,
        source_key: &str,
    ) -> Result<Vec<QueryAnswer>> {
        let Some(query_vector) = question_embedding else {
            return Ok(Vec::new());
        };

        let candidates = AnswerQueries::list_helpful(
            self.database.pool(),
            notebook_id,
            None,
            CACHE_CANDIDATE_LIMIT,
        )
        .await?;

        let mut scored: Vec<(QueryAnswer, f32)> = Vec::new();
        for candidate in candidates {
            let Some(candidate_vector) = self.ensure_answer_embedding(&candidate).await? else {
                continue;
            };
            let similarity = cosine_similarity(query_vector, &candidate_vector);
            if similarity > FEW_SHOT_SIMILARITY_THRESHOLD {
                scored.push((candidate, similarity));
            }
        }

        scored.sort_by(|(a, sim_a), (b, sim_b)| {
            let key_a = a.source_key == source_key;
            let key_b = b.source_key == source_key;
            key_b
                .cmp(&key_a)
                .then(b.usage_count.cmp(&a.usage_count))
                .then(sim_b.partial_cmp(sim_a).unwrap_or(std::cmp::Ordering::Equal))
        });
        scored.truncate(FEW_SHOT_LIMIT);

        Ok(scored.into_iter().map(|(answer, _)| answer).collect())
    }

    /// Persist a freshly generated answer with null feedback
    async fn record_answer(
        &self,
        notebook_id: &str,
        question: &str,
        answer: &str,
        question_embedding: Option<&[f32]>,
        provenance: Provenance,
        source_key: &str,
    ) -> Result<QueryAnswer> {
        Ok(AnswerQueries::create(
            self.database.pool(),
            NewQueryAnswer {
                notebook_id: notebook_id.to_string(),
                question: question.to_string(),
                answer: answer.to_string(),
                question_embedding: question_embedding.map(encode_embedding),
                provenance,
                source_key: source_key.to_string(),
            },
        )
        .await?)
    }
}

fn build_inline_prompt(question: &str, selected: &[Source], few_shots: &[QueryAnswer]) -> String {
    let mut prompt = String::from(
        "You are answering a question about the user's notebook. \
         Use only the sources below; cite source names where relevant.\n",
    );

    if !few_shots.is_empty() {
        prompt.push_str("\nPreviously confirmed answers for similar questions:\n");
        for example in few_shots {
            prompt.push_str(&format!("Q: {}\nA: {}\n", example.question, example.answer));
        }
    }

    prompt.push_str("\nSources:\n");
    for source in selected {
        prompt.push_str(&format!(
            "## {}\n{}\n",
            source.name,
            truncate_chars(&sanitize(&source.content), INLINE_SOURCE_CHAR_CAP)
        ));
    }

    prompt.push_str(&format!("\nQuestion: {question}"));
    prompt
}

/// Jaccard overlap of lowercase words longer than three characters
fn word_overlap(a: &str, b: &str) -> f64 {
    let words = |text: &str| -> HashSet<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| w.chars().count() > 3)
            .collect()
    };

    let set_a = words(a);
    let set_b = words(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}

fn is_current_info_question(question: &str) -> bool {
    let lower = question.to_lowercase();
    CURRENT_INFO_TERMS.iter().any(|term| lower.contains(term))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
