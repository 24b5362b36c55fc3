use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::completion::{CompletionFactory, CompletionService};
use crate::config::Config;
use crate::error::{Result, TranslatorError};
use crate::memory::{
    lookup_references, render_references, save_feedback, ElasticStore, Embedder, FeedbackInput, MemoryStore,
    OpenAiEmbedder,
};
use crate::segment::{chunk_text, TextChunk};
use crate::tokenizer::{TiktokenCounter, TokenCounter};
use crate::translate::{Orchestrator, OrchestratorSettings, TranslationJob, TranslationResult};

/// File extensions picked up in directory mode
const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// A translation request as it arrives from the caller
#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Engine key; the configured default when absent
    pub engine: Option<String>,
    /// Look up terminology before translating; the configured default when absent
    pub search_terms: Option<bool>,
    /// Terms that must match exactly in the terminology lookup
    pub terms: Vec<String>,
}

/// Payload of a successful translation
#[derive(Debug, Clone, Serialize)]
pub struct TranslateResponse {
    pub text: String,
    pub translated: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(skip)]
    pub stats: TranslationResult,
}

pub struct Workflow {
    config: Config,
    counter: Arc<dyn TokenCounter>,
    orchestrator: Orchestrator,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn MemoryStore>,
}

impl Workflow {
    /// Build the production services described by `config`
    pub fn new(config: Config) -> Result<Self> {
        let counter: Arc<dyn TokenCounter> = Arc::new(TiktokenCounter::new()?);
        let completion = CompletionFactory::create_service(&config.translate)?;
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::from_config(&config)?);
        let store: Arc<dyn MemoryStore> = Arc::new(ElasticStore::from_config(&config.memory)?);
        Ok(Self::with_services(config, counter, completion, embedder, store))
    }

    pub fn with_services(
        config: Config,
        counter: Arc<dyn TokenCounter>,
        completion: Arc<dyn CompletionService>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn MemoryStore>,
    ) -> Self {
        let orchestrator = Orchestrator::new(completion, counter.clone(), OrchestratorSettings::from(&config.translate));
        Self {
            config,
            counter,
            orchestrator,
            embedder,
            store,
        }
    }

    fn validate_languages(&self, source_lang: &str, target_lang: &str) -> Result<()> {
        for (field, language) in [("source_lang", source_lang), ("target_lang", target_lang)] {
            if !self.config.is_supported_language(language) {
                return Err(TranslatorError::Validation(format!(
                    "{} must be one of {:?}",
                    field, self.config.supported_languages
                )));
            }
        }
        Ok(())
    }

    /// Resolve `request` into a job for its engine
    pub fn build_job(&self, request: &TranslateRequest) -> Result<TranslationJob> {
        if request.text.trim().is_empty() {
            return Err(TranslatorError::Validation("text is required".to_string()));
        }
        self.validate_languages(&request.source_lang, &request.target_lang)?;

        let engine = request.engine.as_deref().unwrap_or(&self.config.translate.default_engine);
        let profile = self.config.model(engine)?;
        TranslationJob::new(&request.text, &request.source_lang, &request.target_lang, engine, profile)
    }

    /// Translate one piece of text end to end
    pub async fn translate_text(&self, request: &TranslateRequest, cancel: &CancellationToken) -> Result<TranslateResponse> {
        let job = self.build_job(request)?;
        info!("Translation job {} ({} chars, engine {})", job.id, job.text.chars().count(), job.engine);

        let reference = if request.search_terms.unwrap_or(self.config.memory.search_terms) {
            self.reference_for(&job.text, &request.terms).await
        } else {
            None
        };

        let stats = self.orchestrator.translate(&job, reference.as_deref(), cancel).await?;
        Ok(TranslateResponse {
            text: request.text.clone(),
            translated: stats.text.clone(),
            source_lang: job.source_lang,
            target_lang: job.target_lang,
            stats,
        })
    }

    /// Terminology block for `text`; lookup failures only cost the references
    async fn reference_for(&self, text: &str, terms: &[String]) -> Option<String> {
        match lookup_references(
            self.embedder.as_ref(),
            self.store.as_ref(),
            text,
            terms,
            self.config.memory.top_k,
        )
        .await
        {
            Ok(records) => render_references(&records),
            Err(e) => {
                warn!("Terminology lookup failed, translating without references: {}", e);
                None
            }
        }
    }

    /// Translate a file and write the result next to it or to `output`
    pub async fn translate_file<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Option<PathBuf>,
        template: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let input_path = input_path.as_ref();
        if !input_path.is_file() {
            return Err(TranslatorError::Validation(format!("{} is not a file", input_path.display())));
        }

        let request = TranslateRequest {
            text: fs::read_to_string(input_path).await?,
            ..template.clone()
        };
        let response = self.translate_text(&request, cancel).await?;

        let output_path = output_path.unwrap_or_else(|| translated_path(input_path, &request.target_lang));
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&output_path, &response.translated).await?;
        info!("Wrote {}", output_path.display());
        Ok(output_path)
    }

    /// Translate every text file under `input_dir`, running up to
    /// `max_concurrent_jobs` files at once. Failed files are logged and skipped.
    pub async fn translate_directory<P: AsRef<Path>>(
        self: Arc<Self>,
        input_dir: P,
        output_dir: Option<PathBuf>,
        template: TranslateRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(TranslatorError::Validation(format!("{} is not a directory", input_dir.display())));
        }

        let files = find_text_files(input_dir);
        info!("Found {} text files to translate", files.len());

        let permits = Arc::new(Semaphore::new(self.config.translate.max_concurrent_jobs.max(1)));
        let mut tasks = JoinSet::new();

        for file in files {
            let output_path = output_dir.as_ref().map(|dir| {
                let relative = file.strip_prefix(input_dir).unwrap_or(file.as_path());
                translated_path(&dir.join(relative), &template.target_lang)
            });
            let workflow = self.clone();
            let template = template.clone();
            let cancel = cancel.clone();
            let permits = permits.clone();

            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| TranslatorError::Validation(format!("Job queue closed: {}", e)))?;
                let written = workflow.translate_file(&file, output_path, &template, &cancel).await;
                if let Err(e) = &written {
                    warn!("Failed to translate {}: {}", file.display(), e);
                }
                written
            });
        }

        let mut written = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(path)) => written.push(path),
                Ok(Err(TranslatorError::Cancelled)) => return Err(TranslatorError::Cancelled),
                Ok(Err(_)) => {}
                Err(e) => warn!("Translation task panicked: {}", e),
            }
        }

        written.sort();
        info!("Translated {} file(s)", written.len());
        Ok(written)
    }

    /// Store accepted translations in the memory
    pub async fn save_feedback(
        &self,
        input: FeedbackInput,
        source_lang: &str,
        target_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.validate_languages(source_lang, target_lang)?;
        save_feedback(self.embedder.as_ref(), self.store.as_ref(), input, source_lang, target_lang, cancel).await
    }

    /// Chunk plan of `text` for `engine`, without calling any service
    pub fn plan_chunks(&self, text: &str, engine: Option<&str>) -> Result<Vec<TextChunk>> {
        plan_chunks(&self.config, self.counter.as_ref(), text, engine)
    }
}

/// Chunk plan of `text` under the chunk budget of `engine`
pub fn plan_chunks(config: &Config, counter: &dyn TokenCounter, text: &str, engine: Option<&str>) -> Result<Vec<TextChunk>> {
    let engine = engine.unwrap_or(&config.translate.default_engine);
    let job = TranslationJob::new(text, "", "", engine, config.model(engine)?)?;
    chunk_text(text, job.chunk_budget, counter)
}

fn find_text_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `notes.md` translated to Chinese becomes `notes.chinese.md`
fn translated_path(path: &Path, target_lang: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, target_lang.to_lowercase(), ext.to_string_lossy()),
        None => format!("{}.{}", stem, target_lang.to_lowercase()),
    };
    path.with_file_name(file_name)
}
