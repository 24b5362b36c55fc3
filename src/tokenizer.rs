//! Token accounting for chat-completion models.
//!
//! Text is counted through the [`TokenCounter`] trait so the segmentation code
//! can run against the real BPE in production and against a deterministic
//! counter in tests. Message lists are counted with the per-message framing
//! overhead of the model family the request targets.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use crate::conversation::ConversationMessage;
use crate::error::{Result, TranslatorError};

/// Tokens every reply is primed with (`<|start|>assistant<|message|>`)
const REPLY_PRIMING_TOKENS: i64 = 3;

/// Counts model tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` BPE shared by the gpt-3.5 and gpt-4 families
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| TranslatorError::Tokenizer(format!("Failed to load cl100k_base: {}", e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Chat message framing rules. Each family has its own overhead constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "gpt-3.5-turbo-0301")]
    Gpt35Turbo0301,
    #[serde(rename = "gpt-4-0314")]
    Gpt4_0314,
}

impl ModelFamily {
    /// Resolve a model or engine identifier to its accounting family.
    pub fn from_model(model: &str) -> Result<Self> {
        match model {
            "gpt35" | "gpt-3.5-turbo" | "gpt-35-turbo" | "gpt-3.5-turbo-0301" => Ok(Self::Gpt35Turbo0301),
            "gpt4-8k" | "gpt4-32k" | "gpt-4" | "gpt-4-32k" | "gpt-4-0314" => Ok(Self::Gpt4_0314),
            other => Err(TranslatorError::Config(format!(
                "Message token accounting is not implemented for model '{}'",
                other
            ))),
        }
    }

    /// Every message follows `<|start|>{role/name}\n{content}<|end|>\n`
    pub fn tokens_per_message(self) -> i64 {
        match self {
            Self::Gpt35Turbo0301 => 4,
            Self::Gpt4_0314 => 3,
        }
    }

    /// On gpt-3.5 the role is omitted when a name is present
    pub fn tokens_per_name(self) -> i64 {
        match self {
            Self::Gpt35Turbo0301 => -1,
            Self::Gpt4_0314 => 1,
        }
    }
}

/// Count the tokens a message list consumes when sent to a model of `family`.
pub fn count_messages(counter: &dyn TokenCounter, messages: &[ConversationMessage], family: ModelFamily) -> usize {
    let mut total: i64 = 0;
    for message in messages {
        total += family.tokens_per_message();
        total += counter.count(message.role.as_str()) as i64;
        total += counter.count(&message.content) as i64;
        if let Some(name) = &message.name {
            total += counter.count(name) as i64;
            total += family.tokens_per_name();
        }
    }
    total += REPLY_PRIMING_TOKENS;
    total.max(0) as usize
}
