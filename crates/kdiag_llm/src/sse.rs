//! Server-Sent Events line parser.
//!
//! Buffers raw bytes from a chunked response, splits on `\n`, and yields the
//! payload of every `data:` line. Comments, blank lines and the `[DONE]`
//! marker are dropped. A transport error is yielded once and ends the stream.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tracing::warn;

use crate::error::LlmError;

/// Turn a byte stream into a stream of SSE `data:` payloads.
pub fn data_lines<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let reader = LineReader {
        stream: Box::pin(byte_stream),
        buffer: Vec::with_capacity(8192),
        done: false,
    };

    futures::stream::unfold(reader, |mut reader| async move {
        if reader.done {
            return None;
        }

        loop {
            if let Some(pos) = reader.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                match std::str::from_utf8(&line) {
                    Ok(text) => {
                        if let Some(data) = extract_data(text) {
                            return Some((Ok(data), reader));
                        }
                    }
                    Err(_) => warn!("Skipping non UTF-8 SSE line"),
                }
                continue;
            }

            match reader.stream.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    warn!("SSE stream read error: {}", e);
                    reader.done = true;
                    return Some((Err(LlmError::Stream(e.to_string())), reader));
                }
                None => {
                    // Last line without a trailing newline.
                    reader.done = true;
                    let rest = std::mem::take(&mut reader.buffer);
                    let data = std::str::from_utf8(&rest).ok().and_then(extract_data)?;
                    return Some((Ok(data), reader));
                }
            }
        }
    })
}

struct LineReader<B, E> {
    stream: std::pin::Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>,
    buffer: Vec<u8>,
    done: bool,
}

/// Payload of a `data:` line, or `None` for anything to skip.
fn extract_data(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}
