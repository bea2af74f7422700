use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tvprobe_engine::VariantPolicy;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Probe and classify live TV playlists",
    long_about = "Reads an extended M3U playlist, probes every channel address and sorts it into\n\
                  playable, low_quality, encrypted, ended_playlist, duplicate or not_valid.\n\
                  \n\
                  Nested HLS playlists are followed down to a media segment, whose first bytes\n\
                  are checked for MPEG-TS or fragmented MP4 framing. Results are written as CSV\n\
                  or JSON, one row per channel, in input order."
)]
pub struct CliArgs {
    /// Extended M3U file listing the channels to probe
    #[arg(required = true, help = "Path to the M3U playlist to probe")]
    pub input: PathBuf,

    /// Output file for the results
    #[arg(
        short,
        long,
        help = "File to write results to (default: standard output)"
    )]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// Maximum number of channels to probe
    #[arg(short, long, help = "Probe at most this many channels from the playlist")]
    pub limit: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Hide the progress bar
    #[arg(long, help = "Do not draw a progress bar")]
    pub no_progress: bool,

    /// Number of channels probed at once
    #[arg(short, long, default_value = "8", help = "Number of channels probed at the same time")]
    pub concurrency: usize,

    /// Wall-clock budget per channel in seconds
    #[arg(
        short,
        long,
        default_value = "30",
        help = "Time budget per channel in seconds, covering every request made for it"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "8",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "12",
        help = "Read timeout in seconds (maximum wait for headers or the next body chunk)"
    )]
    pub read_timeout: u64,

    /// Bytes sampled from each segment
    #[arg(long, default_value = "262144", help = "Bytes read from each media segment")]
    pub byte_budget: usize,

    /// Bytes read from each playlist
    #[arg(long, default_value = "1048576", help = "Maximum bytes read from a playlist")]
    pub manifest_limit: usize,

    /// Maximum playlist nesting depth
    #[arg(long, default_value = "5", help = "Maximum depth of nested playlists")]
    pub max_depth: usize,

    /// Retries on transport failures
    #[arg(
        long,
        default_value = "2",
        help = "Retries after connection, DNS or timeout failures (received statuses are never retried)"
    )]
    pub retries: u32,

    /// Delay between retries in milliseconds
    #[arg(long, default_value = "500", help = "Delay between retries in milliseconds")]
    pub retry_delay_ms: u64,

    /// Minimum acceptable bitrate in kbps
    #[arg(
        long,
        default_value = "200",
        help = "Streams measured below this rate (kbps) are classified low_quality"
    )]
    pub min_bitrate: f64,

    /// Segments tried per playlist before giving up
    #[arg(long, default_value = "3", help = "Segments tried per playlist until one validates")]
    pub max_segment_probes: usize,

    /// Variant chosen from master playlists
    #[arg(long, value_enum, default_value_t = VariantPolicy::Last)]
    pub variant: VariantPolicy,

    /// User agents tried in order
    #[arg(
        short = 'A',
        long = "user-agent",
        help = "User agent to send; repeat to rotate through several when an origin blocks one"
    )]
    pub user_agents: Vec<String>,

    /// Referer header
    #[arg(long, help = "Referer to send (default: origin of each channel address)")]
    pub referer: Option<String>,

    /// Custom HTTP headers
    #[arg(
        short = 'H',
        long = "header",
        help = "Add custom HTTP header (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    /// Disable ranged segment requests
    #[arg(long, help = "Do not send a Range header when sampling segments")]
    pub no_range: bool,

    /// Do not follow redirects
    #[arg(long, help = "Treat redirects as the final response")]
    pub no_redirects: bool,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5, all)
    #[arg(
        long,
        default_value = "all",
        help = "Proxy type (http, https, socks5, all)",
        value_parser = ["http", "https", "socks5", "all"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Disable all proxy settings
    #[arg(
        long,
        help = "Disable all proxy settings, including system proxy"
    )]
    pub no_proxy: bool,

    /// Accept invalid TLS certificates
    #[arg(long, help = "Accept invalid TLS certificates (many IPTV origins use self-signed ones)")]
    pub insecure: bool,

    /// Flag channels whose playlists start identically
    #[arg(long, help = "Mark channels serving the same playlist as duplicates")]
    pub dedupe: bool,

    /// Lines compared for duplicate detection
    #[arg(
        long,
        default_value = "8",
        help = "Non-empty playlist lines compared when --dedupe is set"
    )]
    pub dedupe_lines: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Comma-separated values with a header row
    #[default]
    Csv,
    /// Pretty-printed JSON array
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
