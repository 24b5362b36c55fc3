use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::job::TranslationJob;
use crate::completion::{CompletionReply, CompletionService, SamplingParams};
use crate::config::TranslateConfig;
use crate::conversation::{ConversationWindow, Role, CONTINUE_PROMPT};
use crate::error::{Result, TranslatorError};
use crate::extract::extract_or_raw;
use crate::segment::{chunk_text, TextChunk};
use crate::tokenizer::TokenCounter;

/// Request-level knobs taken from the `[translate]` config section
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub temperature: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_continuations: usize,
    pub request_timeout: Duration,
}

impl From<&TranslateConfig> for OrchestratorSettings {
    fn from(config: &TranslateConfig) -> Self {
        Self {
            temperature: config.temperature,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            max_continuations: config.max_continuations,
            request_timeout: config.request_timeout(),
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub text: String,
    pub chunks: usize,
    pub requests: usize,
}

/// Drives a job chunk by chunk through the completion service.
///
/// One conversation window is kept per job, so earlier chunks and their
/// translations stay in context until eviction pushes them out.
pub struct Orchestrator {
    service: Arc<dyn CompletionService>,
    counter: Arc<dyn TokenCounter>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn CompletionService>, counter: Arc<dyn TokenCounter>, settings: OrchestratorSettings) -> Self {
        Self {
            service,
            counter,
            settings,
        }
    }

    /// Translate `job`, with optional terminology `reference` pinned in the instruction.
    pub async fn translate(
        &self,
        job: &TranslationJob,
        reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TranslationResult> {
        let span = info_span!("job", id = %job.id, engine = %job.engine);
        self.run(job, reference, cancel).instrument(span).await
    }

    async fn run(&self, job: &TranslationJob, reference: Option<&str>, cancel: &CancellationToken) -> Result<TranslationResult> {
        let chunks = chunk_text(&job.text, job.chunk_budget, self.counter.as_ref())?;
        info!(
            "Translating {} → {} in {} chunk(s) (chunk budget {}, model budget {})",
            job.source_lang,
            job.target_lang,
            chunks.len(),
            job.chunk_budget,
            job.model_budget
        );

        let mut window = ConversationWindow::new(&job.source_lang, &job.target_lang, reference);
        let mut translated = String::new();
        let mut requests = 0;

        for (idx, chunk) in chunks.iter().enumerate() {
            info!("┌─ Translating chunk {}/{} ({} tokens) ────────", idx + 1, chunks.len(), chunk.tokens);
            debug!("│ Source: {}", chunk.text);

            match self.translate_chunk(&mut window, job, chunk, cancel, &mut requests).await {
                Ok(text) => {
                    debug!("│ Target: {}", text);
                    info!("│ Done: {} chars", text.chars().count());
                    info!("└─────────────────────────────────────");
                    translated.push_str(&text);
                }
                Err(e) => {
                    warn!("│ Failed: {}", e);
                    warn!("└─────────────────────────────────────");
                    return Err(e);
                }
            }
        }

        info!("Job finished: {} chunk(s), {} request(s)", chunks.len(), requests);
        Ok(TranslationResult {
            text: translated,
            chunks: chunks.len(),
            requests,
        })
    }

    /// Request until the service stops on its own, then extract the translation
    /// from the concatenated reply bodies.
    async fn translate_chunk(
        &self,
        window: &mut ConversationWindow,
        job: &TranslationJob,
        chunk: &TextChunk,
        cancel: &CancellationToken,
        requests: &mut usize,
    ) -> Result<String> {
        window.append(Role::User, format!("```{}```", chunk.text));

        let mut reply_text = String::new();
        let mut continuations = 0;
        loop {
            // The chunk message plus an assistant/continue pair per continuation
            let turn = 1 + 2 * continuations;
            let reply = self.request(window, job, turn, cancel).await?;
            *requests += 1;

            window.append(Role::Assistant, reply.content.clone());
            reply_text.push_str(&reply.content);

            if !reply.stop.is_truncated() {
                break;
            }
            if continuations >= self.settings.max_continuations {
                return Err(TranslatorError::ContinuationLimit(continuations));
            }
            continuations += 1;
            info!("│ Reply truncated, continuing (turn {})", continuations);
            window.append(Role::User, CONTINUE_PROMPT);
        }

        Ok(extract_or_raw(&reply_text, &job.target_lang))
    }

    async fn request(
        &self,
        window: &mut ConversationWindow,
        job: &TranslationJob,
        turn: usize,
        cancel: &CancellationToken,
    ) -> Result<CompletionReply> {
        if cancel.is_cancelled() {
            return Err(TranslatorError::Cancelled);
        }

        let tokens = window.enforce_budget(self.counter.as_ref(), job.family, job.model_budget, turn)?;
        debug!("│ Sending {} messages ({} tokens)", window.len(), tokens);

        let params = SamplingParams {
            temperature: self.settings.temperature,
            frequency_penalty: self.settings.frequency_penalty,
            presence_penalty: self.settings.presence_penalty,
            max_tokens: job.model_budget,
        };
        let pending = self.service.complete(window.messages(), &job.model, &params);

        tokio::select! {
            _ = cancel.cancelled() => Err(TranslatorError::Cancelled),
            outcome = tokio::time::timeout(self.settings.request_timeout, pending) => match outcome {
                Ok(reply) => reply,
                Err(_) => Err(TranslatorError::Timeout(self.settings.request_timeout.as_secs())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{MockCompletionService, StopSignal};
    use crate::config::ModelProfile;
    use crate::conversation::ConversationMessage;
    use crate::tokenizer::tests::CharCounter;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every conversation it was sent
    #[derive(Default)]
    struct ScriptedService {
        replies: Mutex<VecDeque<CompletionReply>>,
        seen: Mutex<Vec<Vec<ConversationMessage>>>,
    }

    impl ScriptedService {
        fn new(replies: Vec<CompletionReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::default(),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(&self, messages: &[ConversationMessage], _model: &str, _params: &SamplingParams) -> Result<CompletionReply> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TranslatorError::Transport("script exhausted".to_string()))
        }
    }

    /// Answers every request with the fenced text of the latest user message
    struct EchoService;

    #[async_trait]
    impl CompletionService for EchoService {
        async fn complete(&self, messages: &[ConversationMessage], _model: &str, _params: &SamplingParams) -> Result<CompletionReply> {
            let last = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.as_str()).unwrap_or("");
            let text = last.trim_start_matches("```").trim_end_matches("```");
            tokio::task::yield_now().await;
            Ok(CompletionReply::new(serde_json::json!({ "result": text }).to_string(), StopSignal::Stop))
        }
    }

    /// Never answers within any reasonable time
    struct SlowService;

    #[async_trait]
    impl CompletionService for SlowService {
        async fn complete(&self, _messages: &[ConversationMessage], _model: &str, _params: &SamplingParams) -> Result<CompletionReply> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(CompletionReply::new("late", StopSignal::Stop))
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            temperature: 0.5,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_continuations: 8,
            request_timeout: Duration::from_secs(5),
        }
    }

    const FAMILY: crate::tokenizer::ModelFamily = crate::tokenizer::ModelFamily::Gpt4_0314;

    fn orchestrator(service: Arc<dyn CompletionService>, settings: OrchestratorSettings) -> Orchestrator {
        Orchestrator::new(service, Arc::new(CharCounter), settings)
    }

    /// A job with a generous model budget and an exact chunk budget
    fn job(text: &str, chunk_budget: usize) -> TranslationJob {
        job_with_budget(text, 100_000, chunk_budget)
    }

    fn job_with_budget(text: &str, model_budget: usize, chunk_budget: usize) -> TranslationJob {
        let profile = ModelProfile {
            max_tokens: model_budget,
            family: None,
            deployment: None,
        };
        TranslationJob::new(text, "English", "Chinese", "gpt4-8k", &profile)
            .unwrap()
            .with_chunk_budget(chunk_budget)
            .unwrap()
    }

    #[test]
    fn test_settings_follow_translate_config() {
        let config = crate::config::Config::default();
        let settings = OrchestratorSettings::from(&config.translate);
        assert_eq!(settings.temperature, 0.5);
        assert_eq!(settings.frequency_penalty, 0.0);
        assert_eq!(settings.max_continuations, 8);
        assert_eq!(settings.request_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_truncated_replies_are_continued_and_concatenated() {
        let service = Arc::new(ScriptedService::new(vec![
            CompletionReply::new(r#"{"result": "one "#, StopSignal::Length),
            CompletionReply::new("two ", StopSignal::Length),
            CompletionReply::new("three ", StopSignal::Length),
            CompletionReply::new(r#"four"}"#, StopSignal::Stop),
        ]));
        let orchestrator = orchestrator(service.clone(), settings());

        let result = orchestrator
            .translate(&job("Short text.", 100), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.text, "one two three four");
        assert_eq!(result.requests, 4);
        assert_eq!(service.calls(), 4);

        // Each continuation carries the partial answer and the continue prompt
        let seen = service.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second[second.len() - 2].role, Role::Assistant);
        assert_eq!(second[second.len() - 2].content, r#"{"result": "one "#);
        assert_eq!(second[second.len() - 1].content, CONTINUE_PROMPT);
    }

    #[tokio::test]
    async fn test_other_stop_reasons_end_the_turn() {
        let service = Arc::new(ScriptedService::new(vec![CompletionReply::new(
            r#"{"result": "filtered"}"#,
            StopSignal::Other("content_filter".to_string()),
        )]));
        let result = orchestrator(service.clone(), settings())
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.text, "filtered");
        assert_eq!(result.requests, 1);
    }

    #[tokio::test]
    async fn test_continuation_cap() {
        let replies = (0..10).map(|_| CompletionReply::new("more", StopSignal::Length)).collect();
        let service = Arc::new(ScriptedService::new(replies));
        let mut capped = settings();
        capped.max_continuations = 2;

        let err = orchestrator(service.clone(), capped)
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TranslatorError::ContinuationLimit(2)));
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn test_short_text_takes_one_request() {
        let text = "No period at the end, and a decimal like 2.5 here!";
        let service = Arc::new(ScriptedService::new(vec![CompletionReply::new(
            r#"{"result": "译文"}"#,
            StopSignal::Stop,
        )]));

        let result = orchestrator(service.clone(), settings())
            .translate(&job(text, 100), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.chunks, 1);
        assert_eq!(result.requests, 1);
        assert_eq!(result.text, "译文");

        let seen = service.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].content, format!("```{}```", text));
    }

    #[tokio::test]
    async fn test_long_text_is_chunked_in_order() {
        let sentence = "This sentence has exactly 35 chars.";
        let text = sentence.repeat(10);
        let service = Arc::new(EchoService);

        let result = orchestrator(service, settings())
            .translate(&job(&text, 100), None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.chunks >= 4);
        assert_eq!(result.requests, result.chunks);
        assert_eq!(result.text, text);
    }

    #[tokio::test]
    async fn test_reference_is_pinned_in_instruction() {
        let service = Arc::new(ScriptedService::new(vec![CompletionReply::new(r#"{"result": "ok"}"#, StopSignal::Stop)]));
        orchestrator(service.clone(), settings())
            .translate(&job("Microglia.", 100), Some("microglia: 小胶质细胞"), &CancellationToken::new())
            .await
            .unwrap();

        let seen = service.seen.lock().unwrap();
        assert!(seen[0][1].content.contains("microglia: 小胶质细胞"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let mut mock = MockCompletionService::new();
        mock.expect_complete()
            .times(1)
            .returning(|_, _, _| Err(TranslatorError::Transport("connection refused".to_string())));

        let err = orchestrator(Arc::new(mock), settings())
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TranslatorError::Transport(_)));
    }

    #[tokio::test]
    async fn test_model_and_params_are_forwarded() {
        let mut mock = MockCompletionService::new();
        mock.expect_complete()
            .withf(|messages, model, params| {
                messages.len() == 3 && model == "gpt4-8k" && params.max_tokens == 100_000 && params.temperature == 0.5
            })
            .times(1)
            .returning(|_, _, _| Ok(CompletionReply::new(r#"{"result": "ok"}"#, StopSignal::Stop)));

        let result = orchestrator(Arc::new(mock), settings())
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades_to_raw_text() {
        let service = Arc::new(ScriptedService::new(vec![CompletionReply::new("纯文本译文", StopSignal::Stop)]));
        let result = orchestrator(service, settings())
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.text, "纯文本译文");
    }

    #[tokio::test]
    async fn test_cancelled_job_sends_nothing() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(service.clone(), settings())
            .translate(&job("Text.", 100), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslatorError::Cancelled));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_request() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator(Arc::new(SlowService), settings())
            .translate(&job("Text.", 100), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslatorError::Cancelled));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mut quick = settings();
        quick.request_timeout = Duration::from_millis(20);

        let err = orchestrator(Arc::new(SlowService), quick)
            .translate(&job("Text.", 100), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TranslatorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_are_independent() {
        let orchestrator = Arc::new(orchestrator(Arc::new(EchoService), settings()));
        let texts = ["First job text.", "第二个任务的文本。", "Third one, a bit longer than the others."];

        let mut handles = Vec::new();
        for text in texts {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .translate(&job(text, 100), None, &CancellationToken::new())
                    .await
            }));
        }

        for (handle, text) in handles.into_iter().zip(texts) {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.text, text);
        }
    }

    #[tokio::test]
    async fn test_chunk_that_cannot_fit_beside_reference_is_an_overflow() {
        let reference = "microglia => 小胶质细胞\n".repeat(35);
        let text = "Microglia are the resident immune cells of the central nervous system.";
        let pinned = ConversationWindow::new("English", "Chinese", Some(reference.as_str())).token_count(&CharCounter, FAMILY);

        // The chunk passes its own budget but not beside the pinned reference
        let model_budget = pinned + 40;
        let service = Arc::new(ScriptedService::new(vec![CompletionReply::new(
            r#"{"result": "nothing to translate"}"#,
            StopSignal::Stop,
        )]));

        let err = orchestrator(service.clone(), settings())
            .translate(&job_with_budget(text, model_budget, 100), Some(reference.as_str()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TranslatorError::ContextOverflow { .. }));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn test_continuation_keeps_its_own_turn_and_evicts_older_chunks() {
        let first = "First chunk of the text.";
        let second = "Second chunk of the text.";
        let text = format!("{}{}", first, second);
        let pinned = ConversationWindow::new("English", "Chinese", None).token_count(&CharCounter, FAMILY);

        // Room for one chunk turn plus its continuation, not for the previous chunk too
        let model_budget = pinned + 180;
        let service = Arc::new(ScriptedService::new(vec![
            CompletionReply::new(r#"{"result": "第一块"}"#, StopSignal::Stop),
            CompletionReply::new(r#"{"result": "第二"#, StopSignal::Length),
            CompletionReply::new(r#"块"}"#, StopSignal::Stop),
        ]));

        let result = orchestrator(service.clone(), settings())
            .translate(&job_with_budget(&text, model_budget, 30), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.text, "第一块第二块");

        let seen = service.seen.lock().unwrap();
        let continued = &seen[2];
        let contents: Vec<&str> = continued.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&format!("```{}```", second).as_str()));
        assert!(contents.contains(&r#"{"result": "第二"#));
        assert_eq!(contents.last(), Some(&CONTINUE_PROMPT));
        assert!(!contents.contains(&format!("```{}```", first).as_str()));
    }
}
