//! # Builder for ProbeConfig
//!
//! Fluent construction of [`ProbeConfig`] values, the same way the CLI
//! assembles them from flags.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tvprobe_engine::{ProbeConfig, VariantPolicy};
//!
//! let config = ProbeConfig::builder()
//!     .with_concurrency(16)
//!     .with_item_timeout(Duration::from_secs(20))
//!     .with_variant_policy(VariantPolicy::HighestBandwidth)
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .build();
//!
//! assert_eq!(config.concurrency, 16);
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{ProbeConfig, VariantPolicy, proxy::ProxyConfig};

/// Builder for creating ProbeConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct ProbeConfigBuilder {
    /// Internal config being built
    config: ProbeConfig,
}

impl ProbeConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ProbeConfig::default(),
        }
    }

    /// Set the worker pool size, at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    /// Set the wall-clock budget for one address
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.config.item_timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (maximum time between receiving data chunks)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set how many bytes a segment probe reads
    pub fn with_byte_budget(mut self, bytes: usize) -> Self {
        self.config.byte_budget = bytes.max(1);
        self
    }

    /// Set how many bytes of a playlist are read
    pub fn with_manifest_byte_limit(mut self, bytes: usize) -> Self {
        self.config.manifest_byte_limit = bytes.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the number of extra attempts after a transport failure
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.config.retry_count = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn with_min_bitrate_kbps(mut self, kbps: f64) -> Self {
        self.config.min_bitrate_kbps = kbps;
        self
    }

    pub fn with_max_segment_probes(mut self, count: usize) -> Self {
        self.config.max_segment_probes = count.max(1);
        self
    }

    pub fn with_variant_policy(mut self, policy: VariantPolicy) -> Self {
        self.config.variant_policy = policy;
        self
    }

    /// Replace the user agent list
    pub fn with_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.user_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Use a single user agent
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.with_user_agents([user_agent.into()])
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.config.referer = Some(referer.into());
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge HTTP headers over the defaults; later values win
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_range_requests(mut self, enabled: bool) -> Self {
        self.config.send_range = enabled;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        // Only set system proxy if no explicit proxy is configured
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Set whether to accept invalid certificates
    ///
    /// # Warning
    /// This is unsafe and should only be used for testing or in controlled environments.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    /// Enable playlist-prefix duplicate detection
    pub fn with_dedupe(mut self, enabled: bool, prefix_lines: usize) -> Self {
        self.config.dedupe = enabled;
        self.config.dedupe_prefix_lines = prefix_lines.max(1);
        self
    }

    /// Build the ProbeConfig instance
    pub fn build(self) -> ProbeConfig {
        self.config
    }
}

impl Default for ProbeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
