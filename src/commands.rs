//! # Command-line interface
//!
//! Parsed with `clap`'s derive API. Global flags override the matching
//! `config.yaml` values for one run.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ParleyConfig;
use crate::transcript::ExportFormat;

/// Chat with an OpenAI compatible model from the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Path to config.yaml (defaults to the platform config directory).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output: -v info, -vv debug, -vvv trace.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Model name sent to the API.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Sampling temperature, 0.0 to 2.0.
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Maximum tokens in a reply.
    #[arg(long = "max-tokens", global = true)]
    pub max_tokens: Option<u32>,

    /// Personality to chat with.
    #[arg(short, long, global = true)]
    pub personality: Option<String>,

    /// Named session to store the conversation in (and resume it from).
    #[arg(short, long, global = true)]
    pub session: Option<String>,

    /// Wait for the whole reply instead of streaming it.
    #[arg(long = "no-stream", global = true)]
    pub no_stream: bool,
}

impl GlobalArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut ParleyConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = Some(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_response_tokens = max_tokens;
        }
        if let Some(personality) = &self.personality {
            config.personality = personality.clone();
        }
        if let Some(session) = &self.session {
            config.session_name = Some(session.clone());
        }
        if self.no_stream {
            config.should_stream = false;
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config.yaml and the built-in personalities.
    Init {
        /// Overwrite an existing config.yaml.
        #[arg(long)]
        force: bool,
    },

    /// Ask one question and print the answer.
    #[clap(name = "ask", alias = "a")]
    Ask { question: Vec<String> },

    /// Start an interactive chat.
    #[clap(name = "interactive", alias = "i")]
    Interactive,

    /// Add text documents to the session's knowledge base.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Export a stored session's transcript.
    Export {
        #[arg(short, long, default_value = "text", value_parser = parse_format)]
        format: ExportFormat,

        /// File or directory to write to (defaults to the working directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Append a JSON transcript to a stored session.
    Import { file: PathBuf },

    /// List available personalities.
    Personalities,

    /// List stored sessions.
    Sessions {
        /// Delete the named session, its messages and its documents.
        #[arg(long, value_name = "NAME")]
        delete: Option<String>,
    },

    /// Clear a stored session's messages.
    Clear {
        /// Also remove the session's indexed documents.
        #[arg(long)]
        documents: bool,
    },
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse().map_err(|e: crate::error::ParleyError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = Cli::parse_from([
            "parley",
            "ask",
            "--model",
            "gpt-4o-mini",
            "--temperature",
            "0.3",
            "-p",
            "tutor",
            "--no-stream",
            "what",
            "is",
            "rust",
        ]);
        let mut config = ParleyConfig::default();
        cli.global.apply(&mut config);

        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, Some(0.3));
        assert_eq!(config.personality, "tutor");
        assert!(!config.should_stream);
        match cli.command {
            Commands::Ask { question } => assert_eq!(question.join(" "), "what is rust"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_export_format_flag() {
        let cli = Cli::parse_from(["parley", "-s", "work", "export", "--format", "json"]);
        assert_eq!(cli.global.session.as_deref(), Some("work"));
        assert!(matches!(
            cli.command,
            Commands::Export {
                format: ExportFormat::Json,
                output: None
            }
        ));
        assert!(Cli::try_parse_from(["parley", "export", "--format", "pdf"]).is_err());
    }

    #[test]
    fn test_interactive_alias() {
        let cli = Cli::parse_from(["parley", "i"]);
        assert!(matches!(cli.command, Commands::Interactive));
    }

    #[test]
    fn test_init_force_flag() {
        let cli = Cli::parse_from(["parley", "init", "--force"]);
        assert!(matches!(cli.command, Commands::Init { force: true }));
        assert!(cli.global.session.is_none());
    }
}
