use tracing::debug;

use super::{Embedder, MemoryRecord, MemoryStore, SearchClause, MEMORY_TAG};
use crate::error::{Result, TranslatorError};

/// Find stored translations similar to `text`.
///
/// The source text is embedded and scored by cosine similarity against the
/// memory; `terms` add exact-match clauses that boost records mentioning them.
pub async fn lookup_references(
    embedder: &dyn Embedder,
    store: &dyn MemoryStore,
    text: &str,
    terms: &[String],
    top_k: usize,
) -> Result<Vec<MemoryRecord>> {
    let vector = embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TranslatorError::Store("Embedding service returned no vector".to_string()))?;

    let clause = SearchClause::VectorSimilarity {
        data_tag: MEMORY_TAG.to_string(),
        vector,
        should: terms
            .iter()
            .filter(|term| !term.trim().is_empty())
            .map(|term| SearchClause::MultiMatch { query: term.clone() })
            .collect(),
    };

    let records = store.search(&[clause], top_k).await?;
    debug!("Found {} reference record(s)", records.len());
    Ok(records)
}

/// Reference block pinned into the translation instruction, one `source => target` per line
pub fn render_references(records: &[MemoryRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    Some(
        records
            .iter()
            .map(|record| format!("{} => {}", record.source, record.target))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
