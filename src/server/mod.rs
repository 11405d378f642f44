//! Stdio mode - runs when invoked as `cursor-stream [INPUT]`
//!
//! Reads newline-delimited JSON and writes it back as a single JSON array,
//! pulling input only as fast as the output accepts it.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::Stream;
use serde::de::IgnoredAny;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use crate::config::BridgeConfig;
use crate::error::SourceError;
use crate::streaming::{
    Completion, Item, OutputChannel, StreamBridge, StreamSource, WriterChannel,
};

/// How input lines become items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineMode {
    /// Parse each line as JSON and re-encode it.
    #[default]
    Parse,
    /// Forward each line unchanged as an already-encoded item. Lines must
    /// still be valid JSON.
    Raw,
}

/// Stream NDJSON from `reader` to `writer` as one JSON array.
///
/// A malformed line fails the stream; everything written before it stays
/// written and no closing bracket follows.
pub async fn stream_ndjson<R, W>(
    reader: R,
    writer: W,
    config: &BridgeConfig,
    mode: LineMode,
) -> Result<Completion>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let bridge = StreamBridge::<serde_json::Value>::json(config.clone())?;

    let (channel, writer_task) = WriterChannel::spawn(writer);
    let channel = Arc::new(channel);

    let source = StreamSource::new(ndjson_items(reader, mode));
    let handle = bridge.start("stdio", source, channel.clone())?;
    let outcome = handle.finished().await;

    // Keep-alive leaves the channel open; flush and shut down either way
    channel.close();
    writer_task
        .await
        .context("Output writer task panicked")?
        .context("Failed to shut down output")?;

    Ok(outcome?)
}

/// Lines of `reader` as items, skipping blank lines.
pub fn ndjson_items<R>(
    reader: R,
    mode: LineMode,
) -> impl Stream<Item = std::result::Result<Item<serde_json::Value>, SourceError>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = BufReader::new(reader).lines();
    futures::stream::unfold((lines, 0usize), move |(mut lines, mut line_no)| async move {
        loop {
            line_no += 1;
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some((Err(Box::new(e) as SourceError), (lines, line_no))),
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let item: std::result::Result<Item<serde_json::Value>, SourceError> = match mode {
                // Validated only; the line text is forwarded unchanged
                LineMode::Raw => serde_json::from_str::<IgnoredAny>(trimmed)
                    .map(|_| Item::Encoded(Bytes::from(trimmed.to_string())))
                    .map_err(|e| format!("line {}: {}", line_no, e).into()),
                LineMode::Parse => serde_json::from_str(trimmed)
                    .map(Item::Value)
                    .map_err(|e| format!("line {}: {}", line_no, e).into()),
            };
            return Some((item, (lines, line_no)));
        }
    })
}
