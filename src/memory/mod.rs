//! Translation memory: accepted translations stored with an embedding of
//! their source text, searched by vector similarity to pin terminology
//! references into new jobs.

pub mod elastic;
pub mod embedding;
pub mod feedback;
pub mod lookup;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use elastic::ElasticStore;
pub use embedding::OpenAiEmbedder;
pub use feedback::{save_feedback, FeedbackInput};
pub use lookup::{lookup_references, render_references};

/// Tag of records created from user feedback
pub const MEMORY_TAG: &str = "memory";

/// Field holding the source-text embedding
pub const VECTOR_FIELD: &str = "source_vector";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub source: String,
    pub target: String,
    pub source_lang: String,
    pub target_lang: String,
    pub data_tag: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_vector: Vec<f32>,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        source_vector: Vec<f32>,
    ) -> Self {
        let source = source.into();
        let source_lang = source_lang.into();
        let target_lang = target_lang.into();
        Self {
            uid: record_id(&source, &source_lang, &target_lang),
            target: target.into(),
            data_tag: MEMORY_TAG.to_string(),
            source_vector,
            created_at: Some(Utc::now()),
            source,
            source_lang,
            target_lang,
        }
    }
}

/// Stable identifier of a memory record: lowercase hex SHA-256 of the
/// lower-cased `source_text + source_lang + target_lang`.
pub fn record_id(source_text: &str, source_lang: &str, target_lang: &str) -> String {
    let key = format!("{}{}{}", source_text, source_lang, target_lang).to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// One `should` clause of a memory search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchClause {
    /// Every term of `query` must match some field
    MultiMatch { query: String },
    /// Cosine similarity of `vector` against stored source vectors, restricted
    /// to records tagged `data_tag`; `should` clauses boost exact matches
    VectorSimilarity {
        data_tag: String,
        vector: Vec<f32>,
        should: Vec<SearchClause>,
    },
}

impl SearchClause {
    /// Elasticsearch query DSL for this clause
    pub fn to_query(&self) -> Value {
        match self {
            Self::MultiMatch { query } => json!({
                "multi_match": {
                    "query": query,
                    "minimum_should_match": "100%"
                }
            }),
            Self::VectorSimilarity { data_tag, vector, should } => json!({
                "script_score": {
                    "query": {
                        "bool": {
                            "must": [{ "match": { "data_tag": data_tag } }],
                            "should": should.iter().map(SearchClause::to_query).collect::<Vec<_>>()
                        }
                    },
                    "script": {
                        "source": format!("cosineSimilarity(params.query_vector, '{}') + 1.0", VECTOR_FIELD),
                        "params": { "query_vector": vector }
                    }
                }
            }),
        }
    }
}

/// How a store write is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One bulk request for all records
    Batch,
    /// One index request per record
    Single,
}

/// Text embedding backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Search and write access to the translation memory
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Records matching at least one of `should`, best first, at most `top_k`
    async fn search(&self, should: &[SearchClause], top_k: usize) -> Result<Vec<MemoryRecord>>;

    /// Insert or overwrite `records` by uid
    async fn upsert(&self, records: &[MemoryRecord], mode: WriteMode, cancel: &CancellationToken) -> Result<()>;
}
