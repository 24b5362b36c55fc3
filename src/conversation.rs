//! Rolling conversation sent to the completion service.
//!
//! The first two messages (system preamble and translation instruction) are
//! pinned. Everything after them is dialogue history that gets evicted
//! oldest-first whenever the window would not fit the model budget.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TranslatorError};
use crate::tokenizer::{count_messages, ModelFamily, TokenCounter};

/// Number of leading messages that are never evicted
pub const PINNED_MESSAGES: usize = 2;

/// Synthetic user turn asking the model to resume a truncated answer
pub const CONTINUE_PROMPT: &str = "Well translated, but the output does not end, please continue the output.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationWindow {
    messages: Vec<ConversationMessage>,
}

impl ConversationWindow {
    /// Seed the pinned preamble for a `source_lang` → `target_lang` job.
    /// `reference` is terminology material rendered into the instruction message.
    pub fn new(source_lang: &str, target_lang: &str, reference: Option<&str>) -> Self {
        let system = ConversationMessage::new(Role::System, system_prompt(source_lang, target_lang));
        let instruction = match reference.filter(|r| !r.trim().is_empty()) {
            Some(reference) => format!(
                "Here are some standard terminology-translation references that can be used to improve your translation: ```\n{}\n```\nPlease translate this sentence into {}: ",
                reference, target_lang
            ),
            None => format!("Please translate this sentence into {}: ", target_lang),
        };

        Self {
            messages: vec![system, ConversationMessage::new(Role::User, instruction)],
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ConversationMessage::new(role, content));
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn token_count(&self, counter: &dyn TokenCounter, family: ModelFamily) -> usize {
        count_messages(counter, &self.messages, family)
    }

    /// Evict history right after the pinned messages until the window is below `budget`.
    ///
    /// The last `protected` messages (the turn in progress) are never evicted.
    /// Returns the token count after eviction. Fails with
    /// [`TranslatorError::ContextOverflow`] when the pinned and protected
    /// messages alone do not fit.
    pub fn enforce_budget(
        &mut self,
        counter: &dyn TokenCounter,
        family: ModelFamily,
        budget: usize,
        protected: usize,
    ) -> Result<usize> {
        let mut tokens = self.token_count(counter, family);
        while tokens >= budget && self.messages.len() > PINNED_MESSAGES + protected {
            let evicted = self.messages.remove(PINNED_MESSAGES);
            debug!("Evicted {} message ({} chars) to fit budget {}", evicted.role.as_str(), evicted.content.len(), budget);
            tokens = self.token_count(counter, family);
        }

        if tokens >= budget {
            return Err(TranslatorError::ContextOverflow { tokens, budget });
        }
        Ok(tokens)
    }
}

fn system_prompt(source_lang: &str, target_lang: &str) -> String {
    let response_format = serde_json::json!({ "result": "" });
    format!(
        "I want you to act as a translator, spell corrector and improver, you are good at translating any languages to and from each other. \
         Now, I give you a {source} sentence, please translate this sentence into {target}, and answer with the corrected and improved version. \
         I want you to translate with prettier and more elegant high-level {target} words and sentences, but make them more professional. \
         You should only respond in JSON format as described below \nResponse Format: \n ```{format}``` \n\
         Ensure the response is a single JSON object that a strict JSON parser accepts",
        source = source_lang,
        target = target_lang,
        format = response_format
    )
}
