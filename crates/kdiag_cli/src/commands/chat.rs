//! Chat command - interactive session with streamed answers.
//!
//! The search result is printed as soon as it arrives; the diagnosis is
//! printed fragment by fragment while the formatting model streams it.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use kdiag_core::{
    DiagError, DiagnosticPipeline, DiagnosticResponse, FormatMode, PipelineStage, SessionState,
    ThreadStore, TranscriptEntry,
};

use super::AppContext;

const HELP: &str = "Commands: /new (start over), /history, /checkpoints, /quit";

#[derive(Args)]
pub struct ChatArgs {
    /// Resume an existing thread id instead of starting a new one
    #[arg(short, long)]
    thread: Option<String>,
}

pub async fn execute(args: ChatArgs, ctx: &AppContext) -> Result<()> {
    let pipeline = ctx.pipeline(FormatMode::Streaming);
    let mut session = match args.thread {
        Some(thread_id) => SessionState::with_thread(thread_id),
        None => SessionState::new(),
    };

    let mut out = std::io::stdout();
    writeln!(out, "🚗 KDijagnostika - describe the problem you are seeing.")?;
    writeln!(out, "{}", HELP)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(out, "\n> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/new" => {
                session.new_chat();
                debug!(thread_id = session.thread_id(), "Started new chat");
                writeln!(out, "Started a new conversation.")?;
            }
            "/history" => print_history(&session, &mut out)?,
            "/checkpoints" => print_checkpoints(ctx.store.as_ref(), &session, &mut out)?,
            cmd if cmd.starts_with('/') => writeln!(out, "Unknown command {}. {}", cmd, HELP)?,
            question => {
                run_turn(&pipeline, &mut session, question, &mut out).await?;
            }
        }
    }

    Ok(())
}

/// Answer one question on the session's thread, writing output as it streams.
///
/// Both sides of the exchange are appended to the transcript. A failure at
/// any point records only the error; a partial diagnosis is never kept.
pub async fn run_turn<W: Write>(
    pipeline: &DiagnosticPipeline,
    session: &mut SessionState,
    question: &str,
    out: &mut W,
) -> Result<DiagnosticResponse> {
    session.push(TranscriptEntry::user(question));

    if question.trim().is_empty() {
        return report_failure(session, out, &DiagError::EmptyQuestion);
    }

    let thread_id = session.thread_id().to_string();
    let mut events = Box::pin(pipeline.stream(question, Some(&thread_id)));
    let mut finished = None;

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => return report_failure(session, out, &e),
        };

        match event.stage {
            PipelineStage::Searched => {
                writeln!(out, "\n🌐 Web Search Results:\n")?;
                writeln!(out, "{}", event.output.as_deref().unwrap_or_default())?;
            }
            PipelineStage::Formatted => {
                writeln!(out, "\n🔧 Professional Diagnosis:\n")?;
                let state = match event.output {
                    Some(answer) => {
                        writeln!(out, "{}", answer)?;
                        event.state
                    }
                    None => {
                        let mut fragments = match pipeline.stream_answer(&event.state).await {
                            Ok(fragments) => fragments,
                            Err(e) => return report_failure(session, out, &e),
                        };
                        let mut answer = String::new();
                        while let Some(fragment) = fragments.next().await {
                            match fragment {
                                Ok(text) => {
                                    write!(out, "{}", text)?;
                                    out.flush()?;
                                    answer.push_str(&text);
                                }
                                Err(e) => {
                                    writeln!(out)?;
                                    return report_failure(session, out, &e);
                                }
                            }
                        }
                        writeln!(out)?;
                        pipeline.complete_streamed(event.state, answer, Some(&thread_id))
                    }
                };
                finished = Some(state);
            }
            PipelineStage::Init => {}
        }
    }

    let Some(state) = finished else {
        // The event stream ended without reaching the format stage.
        return report_failure(session, out, &DiagError::upstream("pipeline ended early"));
    };

    session.push(TranscriptEntry::diagnosis(
        state.search_result.clone(),
        state.final_answer.clone(),
    ));
    Ok(DiagnosticResponse::Success {
        search_result: state.search_result,
        final_answer: state.final_answer,
    })
}

fn report_failure<W: Write>(
    session: &mut SessionState,
    out: &mut W,
    err: &DiagError,
) -> Result<DiagnosticResponse> {
    warn!(thread_id = session.thread_id(), error = %err, "Chat turn failed");
    let response = DiagnosticResponse::from_error(err);
    let message = response.error().unwrap_or_default().to_string();
    writeln!(out, "❌ {}", message)?;
    session.push(TranscriptEntry::error(message));
    Ok(response)
}

fn print_history<W: Write>(session: &SessionState, out: &mut W) -> Result<()> {
    if session.is_empty() {
        writeln!(out, "No messages yet.")?;
        return Ok(());
    }
    for entry in session.transcript() {
        writeln!(
            out,
            "[{}] {:?}:\n{}\n",
            entry.created_at.format("%H:%M:%S"),
            entry.role,
            entry.content.to_markdown()
        )?;
    }
    Ok(())
}

fn print_checkpoints<W: Write>(
    store: &dyn ThreadStore,
    session: &SessionState,
    out: &mut W,
) -> Result<()> {
    let history = store.history(session.thread_id());
    writeln!(out, "Thread {} has {} checkpoint(s).", session.thread_id(), history.len())?;
    for checkpoint in history {
        writeln!(
            out,
            "  #{} {} at {}",
            checkpoint.step,
            checkpoint.stage,
            checkpoint.created_at.to_rfc3339()
        )?;
    }
    Ok(())
}
