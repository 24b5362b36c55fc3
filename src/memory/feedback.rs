use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Embedder, MemoryRecord, MemoryStore, WriteMode};
use crate::error::{Result, TranslatorError};

/// Accepted translations submitted by a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackInput {
    Single { source: String, translation: String },
    /// Parallel lists; `sources[i]` was translated as `translations[i]`
    Batch { sources: Vec<String>, translations: Vec<String> },
}

impl FeedbackInput {
    /// Build from parallel lists, collapsing a one-element pair to [`FeedbackInput::Single`]
    pub fn from_lists(mut sources: Vec<String>, mut translations: Vec<String>) -> Result<Self> {
        if sources.len() != translations.len() {
            return Err(TranslatorError::Validation(format!(
                "Got {} source text(s) but {} translation(s)",
                sources.len(),
                translations.len()
            )));
        }
        match (sources.pop(), translations.pop()) {
            (Some(source), Some(translation)) if sources.is_empty() => Ok(Self::Single { source, translation }),
            (Some(source), Some(translation)) => {
                sources.push(source);
                translations.push(translation);
                Ok(Self::Batch { sources, translations })
            }
            _ => Err(TranslatorError::Validation("No feedback to save".to_string())),
        }
    }

    fn into_pairs(self) -> Result<Vec<(String, String)>> {
        match self {
            Self::Single { source, translation } => Ok(vec![(source, translation)]),
            Self::Batch { sources, translations } => {
                if sources.len() != translations.len() {
                    return Err(TranslatorError::Validation(format!(
                        "Got {} source text(s) but {} translation(s)",
                        sources.len(),
                        translations.len()
                    )));
                }
                Ok(sources.into_iter().zip(translations).collect())
            }
        }
    }
}

/// Embed the sources, store one record per pair and return their uids.
///
/// Records are keyed by content, so saving the same source and language pair
/// again overwrites the earlier translation.
pub async fn save_feedback(
    embedder: &dyn Embedder,
    store: &dyn MemoryStore,
    input: FeedbackInput,
    source_lang: &str,
    target_lang: &str,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let pairs = input.into_pairs()?;
    if pairs.iter().any(|(source, _)| source.trim().is_empty()) {
        return Err(TranslatorError::Validation("Feedback source text is required".to_string()));
    }

    let sources: Vec<String> = pairs.iter().map(|(source, _)| source.clone()).collect();
    let vectors = embedder.embed(&sources).await?;
    if vectors.len() != pairs.len() {
        return Err(TranslatorError::Store(format!(
            "Got {} embeddings for {} source text(s)",
            vectors.len(),
            pairs.len()
        )));
    }

    let records: Vec<MemoryRecord> = pairs
        .into_iter()
        .zip(vectors)
        .map(|((source, translation), vector)| MemoryRecord::new(source, translation, source_lang, target_lang, vector))
        .collect();

    store.upsert(&records, WriteMode::Batch, cancel).await?;

    let uids: Vec<String> = records.into_iter().map(|record| record.uid).collect();
    info!("Save success, insert_uid: {:?}", uids);
    Ok(uids)
}
