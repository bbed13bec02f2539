//! Ask command - answer a single question.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use tracing::info;

use kdiag_core::{DiagnosticRequest, DiagnosticResponse, FormatMode, RequestHandler};

use super::{AlreadyReported, AppContext};

#[derive(Args)]
pub struct AskArgs {
    /// The diagnostic question
    #[arg(required = true, num_args = 1..)]
    question: Vec<String>,

    /// Conversation thread id for checkpoints
    #[arg(short, long)]
    thread: Option<String>,

    /// Print the raw JSON response
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: AskArgs, ctx: &AppContext) -> Result<()> {
    let question = args.question.join(" ");
    info!("Answering question ({} chars)", question.len());

    let mut request = DiagnosticRequest::new(question);
    request.thread_id = args.thread;

    let handler = RequestHandler::new(ctx.pipeline(FormatMode::Blocking));
    let response = handler.handle(request).await;

    print_response(response, args.json, &mut std::io::stdout())
}

/// Write the response. Failures come back as errors so the exit code reflects them.
fn print_response<W: Write>(response: DiagnosticResponse, json: bool, out: &mut W) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?;
        return match response {
            DiagnosticResponse::Success { .. } => Ok(()),
            DiagnosticResponse::Failure { error } => Err(AlreadyReported(error).into()),
        };
    }

    match response {
        DiagnosticResponse::Success {
            search_result,
            final_answer,
        } => {
            writeln!(out, "🌐 Web Search Results:\n")?;
            writeln!(out, "{}\n", search_result)?;
            writeln!(out, "🔧 Professional Diagnosis:\n")?;
            writeln!(out, "{}", final_answer)?;
            Ok(())
        }
        DiagnosticResponse::Failure { error } => anyhow::bail!("{}", error),
    }
}
