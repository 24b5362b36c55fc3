//! gpt-translator - long-text translation through chat completion models
//!
//! Command line entry point: loads the configuration, sets up logging and
//! prints every result as a `{code, message, data}` JSON envelope.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gpt_translator::cli::{Args, Commands};
use gpt_translator::config::Config;
use gpt_translator::error::TranslatorError;
use gpt_translator::memory::FeedbackInput;
use gpt_translator::tokenizer::TiktokenCounter;
use gpt_translator::workflow::{plan_chunks, TranslateRequest, Workflow};

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    code: u16,
    message: String,
    data: T,
}

fn print_envelope<T: Serialize>(code: u16, message: &str, data: T) -> Result<()> {
    let envelope = Envelope {
        code,
        message: message.to_string(),
        data,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

/// Print the failure envelope and hand the error back for the exit status
fn report_failure(action: &str, error: TranslatorError) -> anyhow::Error {
    let code = match error {
        TranslatorError::Validation(_) | TranslatorError::Config(_) => 400,
        _ => 500,
    };
    let message = format!("{} went wrong, DETAIL: ```{}```", action, error);
    if let Err(e) = print_envelope(code, &message, json!({})) {
        warn!("Failed to print response: {}", e);
    }
    error.into()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    // Ctrl-C stops in-flight jobs; no further requests are sent
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running jobs");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Commands::Translate {
            text,
            input,
            input_dir,
            source_lang,
            target_lang,
            engine,
            search_terms,
            terms,
            output,
        } => {
            let workflow = Arc::new(Workflow::new(config).map_err(|e| report_failure("Translate", e))?);
            let template = TranslateRequest {
                text: String::new(),
                source_lang,
                target_lang,
                engine,
                search_terms: search_terms.then_some(true),
                terms,
            };

            if let Some(input_dir) = input_dir {
                let written = workflow
                    .translate_directory(&input_dir, output, template, cancel)
                    .await
                    .map_err(|e| report_failure("Translate", e))?;
                print_envelope(200, "success", json!({ "files": written }))?;
            } else {
                let text = match (text, input) {
                    (Some(text), _) => text,
                    (None, Some(input)) => {
                        info!("Translating file: {}", input.display());
                        tokio::fs::read_to_string(&input).await?
                    }
                    (None, None) => String::new(),
                };
                let request = TranslateRequest { text, ..template };
                let response = workflow
                    .translate_text(&request, &cancel)
                    .await
                    .map_err(|e| report_failure("Translate", e))?;

                if let Some(output) = output {
                    tokio::fs::write(&output, &response.translated).await?;
                    info!("Wrote {}", output.display());
                }
                info!(
                    "Translated {} chunk(s) with {} request(s)",
                    response.stats.chunks, response.stats.requests
                );
                print_envelope(200, "success", &response)?;
            }
        }
        Commands::Feedback {
            sources,
            translations,
            source_lang,
            target_lang,
        } => {
            let input = FeedbackInput::from_lists(sources, translations).map_err(|e| report_failure("Save", e))?;
            let workflow = Workflow::new(config).map_err(|e| report_failure("Save", e))?;
            let uids = workflow
                .save_feedback(input, &source_lang, &target_lang, &cancel)
                .await
                .map_err(|e| report_failure("Save", e))?;
            print_envelope(200, "save success", json!({ "insert_uid": uids }))?;
        }
        Commands::Languages => {
            print_envelope(
                200,
                "success",
                json!({ "supported_languages": config.supported_languages }),
            )?;
        }
        Commands::Segment { input, engine } => {
            let text = tokio::fs::read_to_string(&input).await?;
            let counter = TiktokenCounter::new()?;
            let chunks = plan_chunks(&config, &counter, &text, engine.as_deref())?;

            let plan: Vec<Value> = chunks
                .iter()
                .enumerate()
                .map(|(idx, chunk)| {
                    let preview: String = chunk.text.chars().take(60).collect();
                    json!({ "index": idx + 1, "tokens": chunk.tokens, "preview": preview })
                })
                .collect();
            print_envelope(200, "success", json!({ "chunks": plan }))?;
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists, use --force to overwrite", output.display());
            }
            Config::default().save_to_file(&output)?;
            info!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let app_dir = std::env::current_dir()?.join(".gpt-translator");
    let log_dir = app_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "gpt-translator.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);

    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so stdout stays valid JSON
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("gpt-translator.log").display()
    );

    Ok(())
}
