use clap::Parser;
use cursor_stream::server::LineMode;
use cursor_stream::BridgeConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cursor-stream")]
#[command(about = "Stream newline-delimited JSON as one JSON array, batch by batch", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Input file of newline-delimited JSON (reads stdin when omitted)
    pub input: Option<PathBuf>,

    /// Items requested and flushed per batch
    #[arg(short, long, env = "CURSOR_STREAM_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Put every item on its own line
    #[arg(short, long)]
    pub pretty: bool,

    /// Forward lines as-is instead of parsing and re-encoding them
    #[arg(long)]
    pub raw: bool,

    /// TOML configuration file
    #[arg(short, long, env = "CURSOR_STREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Configuration file values with command-line overrides applied.
    pub fn bridge_config(&self) -> cursor_stream::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.pretty {
            config.pretty_print_newlines = true;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn line_mode(&self) -> LineMode {
        if self.raw {
            LineMode::Raw
        } else {
            LineMode::Parse
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}
