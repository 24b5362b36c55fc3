use tracing::debug;

use super::recursive::breakdown;
use super::sentence::split_sentences;
use crate::error::Result;
use crate::tokenizer::TokenCounter;

/// A request-sized slice of the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    /// Token count measured when the chunk was formed
    pub tokens: usize,
}

/// Greedily pack consecutive sentences into blocks of about `chunk_budget` tokens.
///
/// A block is emitted as soon as it reaches the budget. A sentence that would
/// push a non-empty block over the budget closes that block first, so no
/// block exceeds the budget unless a single sentence already does. Whatever
/// remains after the last sentence becomes a final, possibly small block.
pub fn accumulate(sentences: &[String], chunk_budget: usize, counter: &dyn TokenCounter) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_tokens = 0;

    for sentence in sentences {
        let candidate = format!("{}{}", buffer, sentence);
        let candidate_tokens = counter.count(&candidate);

        if candidate_tokens > chunk_budget && !buffer.is_empty() {
            chunks.push(TextChunk {
                text: std::mem::take(&mut buffer),
                tokens: buffer_tokens,
            });
            buffer = sentence.clone();
            buffer_tokens = counter.count(&buffer);
        } else {
            buffer = candidate;
            buffer_tokens = candidate_tokens;
        }

        if buffer_tokens >= chunk_budget {
            chunks.push(TextChunk {
                text: std::mem::take(&mut buffer),
                tokens: buffer_tokens,
            });
            buffer_tokens = 0;
        }
    }

    if !buffer.is_empty() {
        chunks.push(TextChunk {
            text: buffer,
            tokens: buffer_tokens,
        });
    }

    chunks
}

/// Cut `text` into chunks for translation requests.
///
/// Text that already fits the budget is returned untouched as one chunk.
/// Longer text is split into sentences; any sentence over the budget is
/// broken down further before the sentences are packed with [`accumulate`].
pub fn chunk_text(text: &str, chunk_budget: usize, counter: &dyn TokenCounter) -> Result<Vec<TextChunk>> {
    let total = counter.count(text);
    if total <= chunk_budget {
        return Ok(vec![TextChunk {
            text: text.to_string(),
            tokens: total,
        }]);
    }

    let mut units = Vec::new();
    for sentence in split_sentences(text) {
        if counter.count(&sentence) > chunk_budget {
            debug!("Sentence of {} chars exceeds chunk budget {}, breaking it down", sentence.len(), chunk_budget);
            units.extend(breakdown(&sentence, chunk_budget, counter)?);
        } else {
            units.push(sentence);
        }
    }

    let chunks = accumulate(&units, chunk_budget, counter);
    debug!("Packed {} tokens into {} chunks (budget {})", total, chunks.len(), chunk_budget);
    Ok(chunks)
}
