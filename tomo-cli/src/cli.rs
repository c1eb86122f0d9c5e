use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "tomo", author, version, about, long_about = None)]
pub struct Args {
    /// Media URL on the cache server
    pub url: String,

    /// Measure against this server IP instead of the resolved address
    /// (can be repeated; one session per IP)
    #[arg(long = "ip", value_name = "IP")]
    pub ips: Vec<String>,

    /// Download budget per session in seconds; non-positive uses the
    /// configured maximum
    #[arg(short, long, value_name = "SECONDS", allow_negative_numbers = true)]
    pub time_budget: Option<f64>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "TOMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Extra request header, e.g. "Cookie: PREF=f1=50000000"
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Seconds of media buffered before playback starts
    #[arg(long, value_name = "SECONDS")]
    pub initial_buffer: Option<f64>,

    /// Playback stalls below this many buffered seconds
    #[arg(long, value_name = "SECONDS")]
    pub min_playout_buffer: Option<f64>,

    /// A stalled playback resumes above this many buffered seconds
    #[arg(long, value_name = "SECONDS")]
    pub min_playout_restart: Option<f64>,

    /// Retries after the first request on transport errors and 5xx answers
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Request the media starting at this byte offset
    #[arg(long, value_name = "BYTES")]
    pub range_start: Option<u64>,

    /// Redirects to follow before reporting the last one
    #[arg(long, default_value_t = 10)]
    pub max_redirects: u32,

    /// Verify TLS certificates
    #[arg(long)]
    pub strict_tls: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable debug logging, including per-block progress
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable report
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}
