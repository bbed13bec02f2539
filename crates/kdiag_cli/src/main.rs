//! KDijagnostika CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error (including upstream provider failures)
//! - 2: Invalid arguments or empty question

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{AlreadyReported, AppContext, Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let ctx = match AppContext::load(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            return ExitCode::from(ExitCodes::INVALID_ARGS);
        }
    };

    let result = match cli.command {
        Commands::Ask(args) => commands::ask::execute(args, &ctx).await,
        Commands::Handle(args) => commands::handle::execute(args, &ctx).await,
        Commands::Chat(args) => commands::chat::execute(args, &ctx).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            if e.downcast_ref::<AlreadyReported>().is_none() {
                eprintln!("❌ Error: {:#}", e);
            }
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Logs go to stderr so answers and JSON on stdout stay clean.
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "kdiag=debug"
    } else if quiet {
        "kdiag=warn"
    } else {
        "kdiag=info"
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let msg = e.to_string().to_lowercase();

    if msg.contains("no question provided") || msg.contains("invalid request") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_failures_keep_their_exit_code() {
        let empty = anyhow::Error::new(AlreadyReported("No question provided".into()));
        assert_eq!(categorize_error(&empty), ExitCodes::INVALID_ARGS);

        let upstream = anyhow::Error::new(AlreadyReported("Processing failed: timeout".into()));
        assert_eq!(categorize_error(&upstream), ExitCodes::GENERAL_ERROR);
    }
}
