//! CLI command definitions.
//!
//! Each subcommand is a different front-end onto the same diagnostic pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use kdiag_core::{DiagnosticPipeline, FormatMode, InMemoryThreadStore};
use kdiag_llm::{build_pipeline, Credentials, ProviderSettings};

pub mod ask;
pub mod chat;
pub mod handle;

/// KDijagnostika - automotive diagnostic assistant
#[derive(Parser)]
#[command(name = "kdiag")]
#[command(version, about = "KDijagnostika - automotive diagnostic assistant")]
#[command(long_about = r#"
KDijagnostika answers automotive troubleshooting questions in two steps:
a web-search model gathers current technical information, then a general
model turns it into a structured diagnosis for technicians.

COMMANDS:
  ask     → Ask one question and print the diagnosis
  handle  → Answer a JSON request ({"question", "threadId"}) with a JSON response
  chat    → Interactive session with streamed answers

CREDENTIALS:
  PERPLEXITY_API_KEY  web search model
  OPENAI_API_KEY      formatting model

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Workspace holding `.kdiag/settings.json`
    #[arg(short, long, global = true, env = "KDIAG_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Override the search model
    #[arg(long, global = true)]
    pub search_model: Option<String>,

    /// Override the formatting model
    #[arg(long, global = true)]
    pub chat_model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a single diagnostic question
    Ask(ask::AskArgs),

    /// Process a JSON request from a file or stdin
    Handle(handle::HandleArgs),

    /// Start an interactive diagnostic chat
    Chat(chat::ChatArgs),
}

/// A failure whose message has already been written to stdout.
///
/// Only decides the exit code; `main` does not print it again.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AlreadyReported(pub String);

/// Settings, credentials and the checkpoint store shared by all commands.
pub struct AppContext {
    pub settings: ProviderSettings,
    pub credentials: Credentials,
    pub store: Arc<InMemoryThreadStore>,
}

impl AppContext {
    /// Resolve settings for this invocation.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut settings = ProviderSettings::load(&cli.workspace)
            .with_context(|| format!("Failed to load settings from {}", cli.workspace.display()))?;

        if let Some(model) = &cli.search_model {
            settings.search.model = model.clone();
        }
        if let Some(model) = &cli.chat_model {
            settings.chat.model = model.clone();
        }

        let credentials = Credentials::from_env();
        debug!(?credentials, search_model = %settings.search.model, chat_model = %settings.chat.model, "Resolved provider settings");

        Ok(Self {
            settings,
            credentials,
            store: Arc::new(InMemoryThreadStore::new()),
        })
    }

    /// Pipeline wired to the configured providers and this context's store.
    pub fn pipeline(&self, mode: FormatMode) -> Arc<DiagnosticPipeline> {
        let pipeline = build_pipeline(&self.settings, &self.credentials)
            .with_store(self.store.clone())
            .with_format_mode(mode);
        Arc::new(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reads_workspace_settings_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let settings_dir = dir.path().join(".kdiag");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(
            settings_dir.join("settings.json"),
            r#"{"search": {"maxTokens": 900}, "chat": {"model": "gpt-4o"}}"#,
        )
        .unwrap();

        let workspace = dir.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "kdiag",
            "--workspace",
            workspace.as_str(),
            "--search-model",
            "sonar-pro",
            "ask",
            "Engine",
            "overheats",
        ])
        .unwrap();

        let ctx = AppContext::load(&cli).unwrap();
        assert_eq!(ctx.settings.search.max_tokens, 900);
        assert_eq!(ctx.settings.search.model, "sonar-pro");
        assert_eq!(ctx.settings.chat.model, "gpt-4o");
        assert!(ctx.store.is_empty());
    }

    #[test]
    fn test_malformed_settings_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings_dir = dir.path().join(".kdiag");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(settings_dir.join("settings.json"), "{ not json").unwrap();

        let workspace = dir.path().to_string_lossy().to_string();
        let cli =
            Cli::try_parse_from(["kdiag", "-w", workspace.as_str(), "handle"]).unwrap();
        assert!(AppContext::load(&cli).is_err());
    }

    #[test]
    fn test_ask_requires_a_question() {
        assert!(Cli::try_parse_from(["kdiag", "ask"]).is_err());
    }
}
