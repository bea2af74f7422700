use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::proxy::ProxyConfig;

/// Agents tried in order when an origin refuses the previous one.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "VLC/3.0.18 LibVLC/3.0.18",
    "VLC/3.0.16 LibVLC/3.0.16",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36",
];

/// Which variant of a master playlist to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum VariantPolicy {
    /// Last declared variant; most manifests list qualities in ascending order.
    #[default]
    Last,
    /// First declared variant.
    First,
    /// Variant with the highest declared BANDWIDTH.
    HighestBandwidth,
    /// Variant with the lowest declared BANDWIDTH.
    LowestBandwidth,
}

/// Configurable options for probing a batch of addresses
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Number of addresses probed at the same time
    pub concurrency: usize,

    /// Hard wall-clock budget for one address, from start to verdict
    pub item_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time waiting for response headers or the next chunk)
    pub read_timeout: Duration,

    /// Maximum number of bytes read from a media segment
    pub byte_budget: usize,

    /// Maximum number of bytes read from a playlist
    pub manifest_byte_limit: usize,

    /// Maximum playlist nesting depth
    pub max_depth: usize,

    /// Extra attempts after a transport failure
    pub retry_count: u32,

    /// Fixed delay between transport retries
    pub retry_delay: Duration,

    /// Transfer rate under which a stream is rated low quality
    pub min_bitrate_kbps: f64,

    /// Segments tried from one media playlist before giving up on validation
    pub max_segment_probes: usize,

    /// Variant selection for master playlists
    pub variant_policy: VariantPolicy,

    /// User agents, tried in order on blocked responses
    pub user_agents: Vec<String>,

    /// Fixed referer; when unset the address origin is used
    pub referer: Option<String>,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Whether segment probes ask for a byte range
    pub send_range: bool,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Mark addresses whose playlists start identically as duplicates
    pub dedupe: bool,

    /// Number of non-empty playlist lines hashed for duplicate detection
    pub dedupe_prefix_lines: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            item_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(12),
            byte_budget: 256 * 1024,
            manifest_byte_limit: 1024 * 1024,
            max_depth: 5,
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
            min_bitrate_kbps: 200.0,
            max_segment_probes: 3,
            variant_policy: VariantPolicy::default(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            referer: None,
            headers: ProbeConfig::get_default_headers(),
            send_range: true,
            follow_redirects: true,
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            dedupe: false,
            dedupe_prefix_lines: 8,
        }
    }
}

impl ProbeConfig {
    pub fn builder() -> crate::builder::ProbeConfigBuilder {
        crate::builder::ProbeConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        // Shoutcast/Icecast origins answer differently without it
        default_headers.insert(
            HeaderName::from_static("icy-metadata"),
            HeaderValue::from_static("1"),
        );
        default_headers
    }

    /// User agents to try, never empty.
    pub fn user_agent_candidates(&self) -> Vec<String> {
        if self.user_agents.is_empty() {
            vec![DEFAULT_USER_AGENTS[0].to_string()]
        } else {
            self.user_agents.clone()
        }
    }
}
