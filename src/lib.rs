//! gpt-translator - long-text translation through chat completion models
//!
//! Text of any length is cut into token-budgeted chunks and translated over a
//! rolling conversation that stays inside the model's context window. Replies
//! cut off by the length limit are continued, and the structured result is
//! extracted from whatever the model answered.

pub mod cli;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod memory;
pub mod segment;
pub mod tokenizer;
pub mod translate;
pub mod workflow;
