//! Handle command - JSON request in, JSON response out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncReadExt;

use kdiag_core::{FormatMode, RequestHandler};

use super::AppContext;

#[derive(Args)]
pub struct HandleArgs {
    /// Request file; reads stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
}

pub async fn execute(args: HandleArgs, ctx: &AppContext) -> Result<()> {
    let body = match &args.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request from {}", path.display()))?,
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("Failed to read request from stdin")?;
            body
        }
    };

    let handler = RequestHandler::new(ctx.pipeline(FormatMode::Blocking));
    let response = handler.handle_json(&body).await?;
    println!("{}", response);
    Ok(())
}
