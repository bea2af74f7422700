// Segment Prober: bounded-size fetches of playlists and media with retry logic.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_TYPE, RANGE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::ProbeConfig;
use crate::client::create_client;
use crate::error::ProbeError;
use crate::manifest;

/// Bytes rendered in hex previews
const PREVIEW_HEX_BYTES: usize = 64;

/// Statuses origins use to turn away unwanted clients.
const BLOCKED_STATUSES: [StatusCode; 5] = [
    StatusCode::UNAUTHORIZED,
    StatusCode::FORBIDDEN,
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::NOT_ACCEPTABLE,
    StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
];

/// What is being fetched; decides the byte limit and whether a range is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Manifest,
    Segment,
}

/// Outcome of one probe, including retries.
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub target: Url,
    /// Address after redirects, when a response arrived
    pub final_url: Option<Url>,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub bytes_read: usize,
    /// The bytes read, never more than the budget for this kind of probe
    pub preview: Bytes,
    pub content_type: Option<String>,
    pub error: Option<ProbeError>,
    /// Transport attempts used, at least one
    pub attempts: u32,
    pub user_agent: String,
}

impl ProbeAttempt {
    fn failed(target: &Url, error: ProbeError, elapsed: Duration, attempts: u32, ua: &str) -> Self {
        Self {
            target: target.clone(),
            final_url: None,
            status: error.status().map(|s| s.as_u16()),
            elapsed,
            bytes_read: 0,
            preview: Bytes::new(),
            content_type: None,
            error: Some(error),
            attempts,
            user_agent: ua.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Address the content actually came from.
    pub fn effective_url(&self) -> &Url {
        self.final_url.as_ref().unwrap_or(&self.target)
    }

    /// Transfer rate over the whole fetch, in kbps.
    pub fn bitrate_kbps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (self.bytes_read > 0 && secs > 0.0).then(|| self.bytes_read as f64 * 8.0 / 1000.0 / secs)
    }

    pub fn preview_hex(&self) -> String {
        hex::encode(&self.preview[..self.preview.len().min(PREVIEW_HEX_BYTES)])
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.preview)
    }

    /// Whether the body is a playlist, judged by its first bytes or the content type.
    pub fn looks_like_manifest(&self) -> bool {
        if manifest::looks_like_manifest(&self.preview) {
            return true;
        }
        self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("mpegurl") && !self.preview.is_empty() && !crate::validator::is_valid_media(&self.preview)
        })
    }

    fn is_blocked(&self) -> bool {
        matches!(&self.error, Some(ProbeError::Protocol { status }) if BLOCKED_STATUSES.contains(status))
    }
}

/// HTTP prober bound to one address: one client, one referer, one active user agent.
#[derive(Debug, Clone)]
pub struct SegmentProber {
    client: Client,
    config: Arc<ProbeConfig>,
    user_agent: String,
    referer: Option<String>,
}

impl SegmentProber {
    pub fn new(client: Client, config: Arc<ProbeConfig>, referer: Option<String>) -> Self {
        let user_agent = config.user_agent_candidates().remove(0);
        Self {
            client,
            config,
            user_agent,
            referer,
        }
    }

    /// Build a prober with a fresh client for `address`.
    ///
    /// Unless a referer is configured, the origin of the address is sent.
    pub fn for_address(config: Arc<ProbeConfig>, address: &Url) -> Result<Self, ProbeError> {
        let client = create_client(&config)?;
        let referer = config.referer.clone().or_else(|| origin_referer(address));
        Ok(Self::new(client, config, referer))
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe `url`, switching to the next configured user agent whenever the
    /// origin answers with a blocking status. The agent that got through is
    /// kept for later probes.
    pub async fn probe_with_rotation(&mut self, url: &Url, kind: ProbeKind) -> ProbeAttempt {
        let candidates = self.config.user_agent_candidates();
        let mut last = None;

        for (i, agent) in candidates.iter().enumerate() {
            self.user_agent = agent.clone();
            let attempt = self.probe(url, kind).await;
            if !attempt.is_blocked() || i + 1 == candidates.len() {
                return attempt;
            }
            debug!(url = %url, user_agent = %agent, status = ?attempt.status, "Blocked, rotating user agent");
            last = Some(attempt);
        }

        // candidates is never empty
        last.unwrap_or_else(|| {
            ProbeAttempt::failed(
                url,
                ProbeError::Client("no user agent configured".to_string()),
                Duration::ZERO,
                0,
                &self.user_agent,
            )
        })
    }

    /// Probe `url` with retries on transport failures.
    ///
    /// Never fails: every outcome, including exhausted retries, is a [`ProbeAttempt`].
    pub async fn probe(&self, url: &Url, kind: ProbeKind) -> ProbeAttempt {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.fetch_once(url, kind).await {
                Ok(mut attempt) => {
                    attempt.attempts = attempts;
                    return attempt;
                }
                Err(e) if e.is_retryable() && attempts <= self.config.retry_count => {
                    debug!(
                        url = %url,
                        attempt = attempts,
                        max_retries = self.config.retry_count,
                        error = %e,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    return ProbeAttempt::failed(url, e, started.elapsed(), attempts, &self.user_agent);
                }
            }
        }
    }

    /// One round-trip. `Err` only for transport failures; a received status is
    /// reported inside the attempt.
    async fn fetch_once(&self, url: &Url, kind: ProbeKind) -> Result<ProbeAttempt, ProbeError> {
        let limit = match kind {
            ProbeKind::Manifest => self.config.manifest_byte_limit,
            ProbeKind::Segment => self.config.byte_budget,
        }
        .max(1);
        let read_timeout = self.config.read_timeout;

        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }
        if kind == ProbeKind::Segment && self.config.send_range {
            request = request.header(RANGE, format!("bytes=0-{}", limit - 1));
        }

        let started = Instant::now();
        let mut response = match tokio::time::timeout(read_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProbeError::from(e)),
            Err(_) => return Err(ProbeError::timeout("waiting for response", read_timeout)),
        };

        let status = response.status();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut attempt = ProbeAttempt {
            target: url.clone(),
            final_url: Some(final_url),
            status: Some(status.as_u16()),
            elapsed: Duration::ZERO,
            bytes_read: 0,
            preview: Bytes::new(),
            content_type,
            error: None,
            attempts: 1,
            user_agent: self.user_agent.clone(),
        };

        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            attempt.elapsed = started.elapsed();
            attempt.error = Some(ProbeError::Protocol { status });
            return Ok(attempt);
        }

        // Early-stop streaming: stop as soon as the budget is filled.
        let mut buffer = BytesMut::with_capacity(limit.min(64 * 1024));
        let mut body_error = None;
        while buffer.len() < limit {
            match tokio::time::timeout(read_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    let take = (limit - buffer.len()).min(chunk.len());
                    buffer.extend_from_slice(&chunk[..take]);
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    body_error = Some(ProbeError::from(e));
                    break;
                }
                Err(_) => {
                    body_error = Some(ProbeError::timeout("reading body", read_timeout));
                    break;
                }
            }
        }

        if let Some(e) = body_error {
            if buffer.is_empty() {
                return Err(e);
            }
            trace!(url = %url, bytes = buffer.len(), error = %e, "Body ended early, keeping partial data");
        }

        attempt.elapsed = started.elapsed();
        attempt.bytes_read = buffer.len();
        attempt.preview = buffer.freeze();
        Ok(attempt)
    }
}

/// `scheme://host[:port]/` for http(s) addresses.
pub fn origin_referer(address: &Url) -> Option<String> {
    match address.scheme() {
        "http" | "https" => Some(format!("{}/", address.origin().ascii_serialization())),
        _ => None,
    }
}
