
use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// A named collection of sources owned by a user.
///
/// Notebook ids are caller-suppliable UUIDs so that create-or-fetch is an
/// explicit upsert rather than a hidden side effect of source ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Handle of a provider-hosted managed retrieval store, when one exists
    pub store_handle: Option<String>,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Text,
    File,
    Website,
    VideoTranscript,
    Image,
    Drive,
}

impl SourceType {
    /// Visual types carry a binary media payload alongside extracted text
    #[inline]
    pub fn is_visual(&self) -> bool {
        matches!(*self, SourceType::Image)
    }

    /// Whether the source can be re-fetched from its retrieval URL
    #[inline]
    pub fn is_refreshable(&self) -> bool {
        matches!(*self, SourceType::Website | SourceType::Drive)
    }
}

impl std::fmt::Display for SourceType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SourceType::Text => write!(f, "text"),
            SourceType::File => write!(f, "file"),
            SourceType::Website => write!(f, "website"),
            SourceType::VideoTranscript => write!(f, "video-transcript"),
            SourceType::Image => write!(f, "image"),
            SourceType::Drive => write!(f, "drive"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(SourceType::Text),
            "file" => Ok(SourceType::File),
            "website" => Ok(SourceType::Website),
            "video-transcript" => Ok(SourceType::VideoTranscript),
            "image" => Ok(SourceType::Image),
            "drive" => Ok(SourceType::Drive),
            other => Err(format!("Unknown source type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: i64,
    pub notebook_id: String,
    pub source_type: SourceType,
    pub name: String,
    /// Raw extracted text content; length is always knowable
    pub content: String,
    /// Binary payload, present only for visual types
    pub media_data: Option<Vec<u8>>,
    pub media_type: Option<String>,
    /// Retrieval URL for externally refreshable sources
    pub url: Option<String>,
    /// Default inclusion in queries
    pub selected: bool,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSource {
    pub notebook_id: String,
    pub source_type: SourceType,
    pub name: String,
    pub content: String,
    pub media_data: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub url: Option<String>,
}

/// A bounded, overlapping text window derived from a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub id: i64,
    pub source_id: i64,
    pub chunk_index: i64,
    pub content: String,
    /// Little-endian f32 bytes; null when embedding generation failed
    pub embedding: Option<Vec<u8>>,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    pub source_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
}

/// A chunk joined with the name of its owning source, as returned by search
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SourceChunk {
    pub id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Option<Vec<u8>>,
}

/// Which strategy produced a cached answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    ManagedStore,
    Inline,
    Visual,
    Query,
    Hybrid,
    Mock,
    /// Promoted to cache-hit eligibility by positive feedback
    Promoted,
    /// Overwritten with a user-supplied correction; highest trust
    UserEdited,
}

impl std::fmt::Display for Provenance {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Provenance::ManagedStore => write!(f, "managed-store"),
            Provenance::Inline => write!(f, "inline"),
            Provenance::Visual => write!(f, "visual"),
            Provenance::Query => write!(f, "query"),
            Provenance::Hybrid => write!(f, "hybrid"),
            Provenance::Mock => write!(f, "mock"),
            Provenance::Promoted => write!(f, "promoted"),
            Provenance::UserEdited => write!(f, "user-edited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QueryAnswer {
    pub id: i64,
    pub notebook_id: String,
    pub question: String,
    pub answer: String,
    /// Embedding of the question; computed lazily and may stay null
    pub question_embedding: Option<Vec<u8>>,
    pub provenance: Provenance,
    /// Null until feedback arrives
    pub helpful: Option<bool>,
    /// Incremented on every cache hit
    pub usage_count: i64,
    /// Canonical identifier of the source selection the answer was grounded in
    pub source_key: String,
    pub created_date: NaiveDateTime,
}

impl QueryAnswer {
    /// Only helpful answers are eligible as cache hits or few-shot examples
    #[inline]
    pub fn is_cache_eligible(&self) -> bool {
        self.helpful == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueryAnswer {
    pub notebook_id: String,
    pub question: String,
    pub answer: String,
    pub question_embedding: Option<Vec<u8>>,
    pub provenance: Provenance,
    pub source_key: String,
}

/// Canonicalize a source selection into a sort-joined key.
///
/// Distinct selections always produce distinct keys, so cached answers never
/// leak across source sets.
#[inline]
pub fn source_set_key(source_ids: &[i64]) -> String {
    source_ids
        .iter()
        .copied()
        .sorted_unstable()
        .dedup()
        .map(|id| id.to_string())
        .join(",")
}
