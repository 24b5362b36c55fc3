use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Text exceeds the token budget of {limit}: {excerpt}")]
    BudgetOverflow { limit: usize, excerpt: String },

    #[error("Pinned conversation needs {tokens} tokens, model budget is {budget}")]
    ContextOverflow { tokens: usize, budget: usize },

    #[error("Completion service error: {0}")]
    Transport(String),

    #[error("No structured result in reply: {0}")]
    Extraction(String),

    #[error("Model kept truncating its output after {0} continuation turns")]
    ContinuationLimit(usize),

    #[error("Completion request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Translation job cancelled")]
    Cancelled,

    #[error("Memory store error: {0}")]
    Store(String),
}

impl TranslatorError {
    /// Builds a [`TranslatorError::BudgetOverflow`] with a short excerpt of the offending text.
    pub fn budget_overflow(limit: usize, text: &str) -> Self {
        let excerpt: String = text.chars().take(80).collect();
        Self::BudgetOverflow { limit, excerpt }
    }
}

pub type Result<T> = std::result::Result<T, TranslatorError>;
