//! Token-budgeted text segmentation.
//!
//! - `sentence`: punctuation-based sentence splitting
//! - `recursive`: line / sentence / character fallback splitting under a hard limit
//! - `accumulate`: greedy packing of sentences into request-sized chunks

pub mod accumulate;
pub mod recursive;
pub mod sentence;

pub use accumulate::{accumulate, chunk_text, TextChunk};
pub use recursive::{breakdown, segment};
pub use sentence::split_sentences;
