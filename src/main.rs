use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncRead;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cursor_stream::server::stream_ndjson;
use cursor_stream::Completion;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the array
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let config = cli.bridge_config()?;
    tracing::debug!(?config, "starting");

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &cli.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    match stream_ndjson(reader, tokio::io::stdout(), &config, cli.line_mode()).await? {
        Completion::Finished(summary) => {
            tracing::info!(
                items = summary.items,
                writes = summary.writes,
                bytes = summary.bytes,
                "done"
            );
        }
        Completion::Aborted(summary) => {
            tracing::info!(items = summary.items, "output closed early");
        }
    }

    Ok(())
}
