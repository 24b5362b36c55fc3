// Translation pipeline
//
// A `TranslationJob` resolves a request against its model profile; the
// `Orchestrator` chunks the text and drives the completion service until
// every chunk has been translated.

pub mod job;
pub mod orchestrator;

pub use job::{TranslationJob, CHUNK_BUDGET_DIVISOR};
pub use orchestrator::{Orchestrator, OrchestratorSettings, TranslationResult};
