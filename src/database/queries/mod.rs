
use anyhow::{Context, Result};
use chrono::Utc;
use itertools::Itertools;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    Chunk, NewChunk, NewQueryAnswer, NewSource, Notebook, Provenance, QueryAnswer, Source,
    SourceChunk,
};

const NOTEBOOK_COLUMNS: &str = "id, name, owner, store_handle, created_date";
const SOURCE_COLUMNS: &str = "id, notebook_id, source_type, name, content, media_data, \
                              media_type, url, selected, created_date";
const ANSWER_COLUMNS: &str = "id, notebook_id, question, answer, question_embedding, \
                              provenance, helpful, usage_count, source_key, created_date";

pub struct NotebookQueries;

impl NotebookQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, name: &str, owner: &str) -> Result<Notebook> {
        let id = Uuid::new_v4().to_string();
        Self::upsert(pool, &id, name, owner).await
    }

    /// Create-or-fetch by id.
    ///
    /// Idempotent: if the notebook already exists it is returned unchanged;
    /// otherwise a row is created with the supplied name and owner.
    #[inline]
    pub async fn upsert(pool: &SqlitePool, id: &str, name: &str, owner: &str) -> Result<Notebook> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO notebooks (id, name, owner, created_date) VALUES (?, ?, ?, ?) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(name)
        .bind(owner)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert notebook")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted notebook"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Notebook>> {
        let notebook = sqlx::query_as::<_, Notebook>(&format!(
            "SELECT {NOTEBOOK_COLUMNS} FROM notebooks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get notebook by id")?;

        Ok(notebook)
    }

    #[inline]
    pub async fn list(pool: &SqlitePool, owner: Option<&str>) -> Result<Vec<Notebook>> {
        let notebooks = match owner {
            Some(owner) => {
                sqlx::query_as::<_, Notebook>(&format!(
                    "SELECT {NOTEBOOK_COLUMNS} FROM notebooks WHERE owner = ? \
                     ORDER BY created_date DESC"
                ))
                .bind(owner)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Notebook>(&format!(
                    "SELECT {NOTEBOOK_COLUMNS} FROM notebooks ORDER BY created_date DESC"
                ))
                .fetch_all(pool)
                .await
            }
        }
        .context("Failed to list notebooks")?;

        Ok(notebooks)
    }

    #[inline]
    pub async fn set_store_handle(
        pool: &SqlitePool,
        id: &str,
        store_handle: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE notebooks SET store_handle = ? WHERE id = ?")
            .bind(store_handle)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to set notebook store handle")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a notebook; sources, chunks, and cached answers cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notebooks WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete notebook")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct SourceQueries;

impl SourceQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_source: NewSource) -> Result<Source> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO sources (notebook_id, source_type, name, content, media_data, \
             media_type, url, selected, created_date) VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, ?)",
        )
        .bind(&new_source.notebook_id)
        .bind(&new_source.source_type)
        .bind(&new_source.name)
        .bind(&new_source.content)
        .bind(&new_source.media_data)
        .bind(&new_source.media_type)
        .bind(&new_source.url)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create source")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created source"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get source by id")?;

        Ok(source)
    }

    #[inline]
    pub async fn get_in_notebook(
        pool: &SqlitePool,
        notebook_id: &str,
        id: i64,
    ) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ? AND notebook_id = ?"
        ))
        .bind(id)
        .bind(notebook_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get source in notebook")?;

        Ok(source)
    }

    #[inline]
    pub async fn list_by_notebook(pool: &SqlitePool, notebook_id: &str) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE notebook_id = ? ORDER BY id"
        ))
        .bind(notebook_id)
        .fetch_all(pool)
        .await
        .context("Failed to list sources")?;

        Ok(sources)
    }

    #[inline]
    pub async fn list_selected(pool: &SqlitePool, notebook_id: &str) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE notebook_id = ? AND selected = TRUE \
             ORDER BY id"
        ))
        .bind(notebook_id)
        .fetch_all(pool)
        .await
        .context("Failed to list selected sources")?;

        Ok(sources)
    }

    #[inline]
    pub async fn list_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Source>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").join(", ");
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id IN ({placeholders}) ORDER BY id"
        );
        let mut query = sqlx::query_as::<_, Source>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let sources = query
            .fetch_all(pool)
            .await
            .context("Failed to list sources by ids")?;

        Ok(sources)
    }

    #[inline]
    pub async fn count_by_notebook(pool: &SqlitePool, notebook_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources WHERE notebook_id = ?")
            .bind(notebook_id)
            .fetch_one(pool)
            .await
            .context("Failed to count sources")?;

        Ok(count.0)
    }

    #[inline]
    pub async fn set_selected(pool: &SqlitePool, id: i64, selected: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE sources SET selected = ? WHERE id = ?")
            .bind(selected)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update source selection")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn update_content(pool: &SqlitePool, id: i64, content: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sources SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update source content")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, notebook_id: &str, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ? AND notebook_id = ?")
            .bind(id)
            .bind(notebook_id)
            .execute(pool)
            .await
            .context("Failed to delete source")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Replace all chunks for a source in one transaction.
    ///
    /// Reindexing is always wholesale delete-then-recreate, never a partial
    /// patch.
    #[inline]
    pub async fn replace_for_source(
        pool: &SqlitePool,
        source_id: i64,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete existing chunks")?;

        let now = Utc::now().naive_utc();
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (source_id, chunk_index, content, embedding, created_date) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.embedding)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert chunk")?;
        }

        tx.commit().await.context("Failed to commit chunk replace")?;

        debug!("Replaced chunks for source {source_id}: {} rows", chunks.len());
        Ok(chunks.len())
    }

    /// Insert chunks only if the source still has none.
    ///
    /// The count check runs inside the same transaction as the inserts, so
    /// two concurrent lazy backfills cannot duplicate chunks; the loser
    /// observes a non-zero count and backs off.
    #[inline]
    pub async fn insert_if_absent(
        pool: &SqlitePool,
        source_id: i64,
        chunks: &[NewChunk],
    ) -> Result<bool> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let existing: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to count existing chunks")?;

        if existing.0 > 0 {
            debug!("Source {source_id} already has {} chunks, skipping backfill", existing.0);
            return Ok(false);
        }

        let now = Utc::now().naive_utc();
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (source_id, chunk_index, content, embedding, created_date) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.embedding)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert chunk")?;
        }

        tx.commit()
            .await
            .context("Failed to commit chunk backfill")?;

        Ok(true)
    }

    #[inline]
    pub async fn count_for_source(pool: &SqlitePool, source_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        Ok(count.0)
    }

    #[inline]
    pub async fn list_for_source(pool: &SqlitePool, source_id: i64) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT id, source_id, chunk_index, content, embedding, created_date \
             FROM chunks WHERE source_id = ? ORDER BY chunk_index",
        )
        .bind(source_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for source")?;

        Ok(chunks)
    }

    /// Fetch all chunks belonging to a set of sources, joined with the source
    /// name for result attribution
    #[inline]
    pub async fn list_for_sources(pool: &SqlitePool, source_ids: &[i64]) -> Result<Vec<SourceChunk>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = source_ids.iter().map(|_| "?").join(", ");
        let sql = format!(
            "SELECT c.id, c.source_id, s.name AS source_name, c.chunk_index, c.content, \
             c.embedding \
             FROM chunks c JOIN sources s ON s.id = c.source_id \
             WHERE c.source_id IN ({placeholders}) \
             ORDER BY c.source_id, c.chunk_index"
        );
        let mut query = sqlx::query_as::<_, SourceChunk>(&sql);
        for id in source_ids {
            query = query.bind(id);
        }

        let chunks = query
            .fetch_all(pool)
            .await
            .context("Failed to list chunks for sources")?;

        Ok(chunks)
    }
}

pub struct AnswerQueries;

impl AnswerQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_answer: NewQueryAnswer) -> Result<QueryAnswer> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO query_answers (notebook_id, question, answer, question_embedding, \
             provenance, helpful, usage_count, source_key, created_date) \
             VALUES (?, ?, ?, ?, ?, NULL, 0, ?, ?)",
        )
        .bind(&new_answer.notebook_id)
        .bind(&new_answer.question)
        .bind(&new_answer.answer)
        .bind(&new_answer.question_embedding)
        .bind(&new_answer.provenance)
        .bind(&new_answer.source_key)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create query answer")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created query answer"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<QueryAnswer>> {
        let answer = sqlx::query_as::<_, QueryAnswer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM query_answers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get query answer by id")?;

        Ok(answer)
    }

    /// Helpful answers for a notebook, most-used first.
    ///
    /// When a source key is supplied, only answers grounded in exactly that
    /// selection are returned.
    #[inline]
    pub async fn list_helpful(
        pool: &SqlitePool,
        notebook_id: &str,
        source_key: Option<&str>,
        limit: i64,
    ) -> Result<Vec<QueryAnswer>> {
        let answers = match source_key {
            Some(key) => {
                sqlx::query_as::<_, QueryAnswer>(&format!(
                    "SELECT {ANSWER_COLUMNS} FROM query_answers \
                     WHERE notebook_id = ? AND helpful = TRUE AND source_key = ? \
                     ORDER BY usage_count DESC, created_date DESC LIMIT ?"
                ))
                .bind(notebook_id)
                .bind(key)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, QueryAnswer>(&format!(
                    "SELECT {ANSWER_COLUMNS} FROM query_answers \
                     WHERE notebook_id = ? AND helpful = TRUE \
                     ORDER BY usage_count DESC, created_date DESC LIMIT ?"
                ))
                .bind(notebook_id)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
        .context("Failed to list helpful answers")?;

        Ok(answers)
    }

    #[inline]
    pub async fn set_question_embedding(
        pool: &SqlitePool,
        id: i64,
        embedding: &[u8],
    ) -> Result<()> {
        sqlx::query("UPDATE query_answers SET question_embedding = ? WHERE id = ?")
            .bind(embedding)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to persist question embedding")?;

        Ok(())
    }

    #[inline]
    pub async fn increment_usage(pool: &SqlitePool, id: i64) -> Result<()> {
        sqlx::query("UPDATE query_answers SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to increment usage count")?;

        Ok(())
    }

    #[inline]
    pub async fn set_feedback(
        pool: &SqlitePool,
        id: i64,
        helpful: bool,
        provenance: Option<Provenance>,
    ) -> Result<Option<QueryAnswer>> {
        let result = match provenance {
            Some(provenance) => {
                sqlx::query("UPDATE query_answers SET helpful = ?, provenance = ? WHERE id = ?")
                    .bind(helpful)
                    .bind(provenance)
                    .bind(id)
                    .execute(pool)
                    .await
            }
            None => {
                sqlx::query("UPDATE query_answers SET helpful = ? WHERE id = ?")
                    .bind(helpful)
                    .bind(id)
                    .execute(pool)
                    .await
            }
        }
        .context("Failed to record feedback")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::get_by_id(pool, id).await
    }

    /// Overwrite an answer with a user-supplied correction.
    ///
    /// Forces `helpful = true` and `user-edited` provenance; the source key
    /// is rebound only when a new one is supplied.
    #[inline]
    pub async fn apply_correction(
        pool: &SqlitePool,
        id: i64,
        answer: &str,
        question_embedding: Option<&[u8]>,
        source_key: Option<&str>,
    ) -> Result<Option<QueryAnswer>> {
        let mut sql = String::from(
            "UPDATE query_answers SET answer = ?, helpful = TRUE, provenance = 'user-edited'",
        );
        if question_embedding.is_some() {
            sql.push_str(", question_embedding = ?");
        }
        if source_key.is_some() {
            sql.push_str(", source_key = ?");
        }
        sql.push_str(" WHERE id = ?");

        let mut query = sqlx::query(&sql).bind(answer);
        if let Some(embedding) = question_embedding {
            query = query.bind(embedding);
        }
        if let Some(key) = source_key {
            query = query.bind(key);
        }

        let result = query
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to apply answer correction")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::get_by_id(pool, id).await
    }
}
