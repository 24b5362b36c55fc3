use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate text, a file, or every text file in a directory
    #[command(group(ArgGroup::new("source").required(true).args(["text", "input", "input_dir"])))]
    Translate {
        /// Text to translate
        #[arg(long)]
        text: Option<String>,

        /// Input text file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory of .txt/.md files to translate
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Language of the input
        #[arg(short, long, default_value = "English")]
        source_lang: String,

        /// Language to translate into
        #[arg(short, long, default_value = "Chinese")]
        target_lang: String,

        /// Engine from the [models] config section
        #[arg(short, long)]
        engine: Option<String>,

        /// Look up terminology in the translation memory first
        #[arg(long)]
        search_terms: bool,

        /// Term that must match exactly in the terminology lookup (repeatable)
        #[arg(long = "term")]
        terms: Vec<String>,

        /// Output file, or output directory with --input-dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Save accepted translations to the translation memory
    Feedback {
        /// Source text (repeatable, paired with --translation in order)
        #[arg(long = "source", required = true)]
        sources: Vec<String>,

        /// Accepted translation (repeatable)
        #[arg(long = "translation", required = true)]
        translations: Vec<String>,

        #[arg(short, long, default_value = "English")]
        source_lang: String,

        #[arg(short, long, default_value = "Chinese")]
        target_lang: String,
    },

    /// List supported languages
    Languages,

    /// Show how a file would be chunked, without calling any service
    Segment {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Engine whose budget is used
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_translate_requires_a_source() {
        assert!(Args::try_parse_from(["gpt-translator", "translate"]).is_err());
        assert!(Args::try_parse_from(["gpt-translator", "translate", "--text", "a", "--input", "b.txt"]).is_err());
    }

    #[test]
    fn test_translate_args() {
        let args = Args::try_parse_from([
            "gpt-translator",
            "translate",
            "--text",
            "Hello.",
            "--engine",
            "gpt4-8k",
            "--term",
            "microglia",
            "--term",
            "astrocyte",
        ])
        .unwrap();

        match args.command {
            Commands::Translate { text, source_lang, target_lang, engine, terms, search_terms, .. } => {
                assert_eq!(text.as_deref(), Some("Hello."));
                assert_eq!(source_lang, "English");
                assert_eq!(target_lang, "Chinese");
                assert_eq!(engine.as_deref(), Some("gpt4-8k"));
                assert_eq!(terms, vec!["microglia", "astrocyte"]);
                assert!(!search_terms);
            }
            _ => panic!("expected translate"),
        }
    }

    #[test]
    fn test_feedback_collects_parallel_lists() {
        let args = Args::try_parse_from([
            "gpt-translator",
            "feedback",
            "--source",
            "a",
            "--translation",
            "甲",
            "--source",
            "b",
            "--translation",
            "乙",
        ])
        .unwrap();

        match args.command {
            Commands::Feedback { sources, translations, .. } => {
                assert_eq!(sources, vec!["a", "b"]);
                assert_eq!(translations, vec!["甲", "乙"]);
            }
            _ => panic!("expected feedback"),
        }
    }
}
