use reqwest::StatusCode;

/// Coarse reason for a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Connect,
    Timeout,
    Dns,
    Body,
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Connect => "connect",
            TransportKind::Timeout => "timeout",
            TransportKind::Dns => "dns",
            TransportKind::Body => "body",
            TransportKind::Other => "request",
        };
        f.write_str(s)
    }
}

/// Failure of a single probe round-trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    #[error("server returned status {status}")]
    Protocol { status: StatusCode },

    #[error("redirect failed: {0}")]
    Redirect(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("client setup failed: {0}")]
    Client(String),
}

impl ProbeError {
    /// Only transport failures are worth another attempt; a received status is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Transport { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProbeError::Protocol { status } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn timeout(what: &str, after: std::time::Duration) -> Self {
        ProbeError::Transport {
            kind: TransportKind::Timeout,
            message: format!("{what} timed out after {:.1}s", after.as_secs_f64()),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProbeError::Protocol { status };
        }
        if err.is_builder() {
            return ProbeError::InvalidUrl(err.to_string());
        }
        // Loops and over-long redirect chains answer the same way every time.
        if err.is_redirect() {
            return ProbeError::Redirect(flatten_error(&err));
        }

        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            // reqwest folds resolver failures into connect errors; the chain says which.
            if error_chain_mentions(&err, "dns") || error_chain_mentions(&err, "resolve") {
                TransportKind::Dns
            } else {
                TransportKind::Connect
            }
        } else if err.is_body() || err.is_decode() {
            TransportKind::Body
        } else {
            TransportKind::Other
        };

        ProbeError::Transport {
            kind,
            message: flatten_error(&err),
        }
    }
}

fn error_chain_mentions(err: &(dyn std::error::Error + 'static), needle: &str) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Render an error together with its sources, `outer: inner: innermost`.
fn flatten_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Why a playlist could not be followed down to a segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("too many nested playlists (max depth {max_depth})")]
    TooDeep { max_depth: usize },

    #[error("playlist cycle detected at {url}")]
    Cycle { url: String },

    #[error("failed to fetch playlist: {0}")]
    Fetch(#[from] ProbeError),

    #[error("not a playlist: missing #EXTM3U header at {url}")]
    NotAManifest { url: String },

    #[error("playlist has no segment references")]
    NoSegments,

    #[error("invalid playlist reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
}
