use uuid::Uuid;

use crate::config::ModelProfile;
use crate::error::{Result, TranslatorError};
use crate::tokenizer::ModelFamily;

/// Share of the model budget a single chunk of source text may use
pub const CHUNK_BUDGET_DIVISOR: usize = 4;

/// One translation request, resolved against its model profile
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub id: Uuid,
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Engine key from the config (`gpt35`, `gpt4-8k`, ...)
    pub engine: String,
    /// Model or deployment name sent to the completion service
    pub model: String,
    pub family: ModelFamily,
    pub model_budget: usize,
    pub chunk_budget: usize,
}

impl TranslationJob {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        engine: &str,
        profile: &ModelProfile,
    ) -> Result<Self> {
        let model_budget = profile.max_tokens;
        let chunk_budget = model_budget / CHUNK_BUDGET_DIVISOR;
        if chunk_budget == 0 || chunk_budget >= model_budget {
            return Err(TranslatorError::Config(format!(
                "Engine '{}' has a token budget of {}, too small to hold a chunk",
                engine, model_budget
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            engine: engine.to_string(),
            model: profile.deployment_name(engine).to_string(),
            family: profile.resolve_family(engine)?,
            model_budget,
            chunk_budget,
        })
    }

    /// Override the chunk budget, keeping it below the model budget
    pub fn with_chunk_budget(mut self, chunk_budget: usize) -> Result<Self> {
        if chunk_budget == 0 || chunk_budget >= self.model_budget {
            return Err(TranslatorError::Config(format!(
                "Chunk budget {} must be positive and below the model budget {}",
                chunk_budget, self.model_budget
            )));
        }
        self.chunk_budget = chunk_budget;
        Ok(self)
    }
}
