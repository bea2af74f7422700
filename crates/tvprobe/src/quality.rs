use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static RESOLUTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^0-9])(\d{3,5})\s*[x×]\s*(\d{3,5})(?:$|[^0-9])").unwrap());

static QUALITY_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^0-9])(\d{3,4})p(?:$|[^a-z0-9])").unwrap());

/// Height thresholds for declared resolutions, highest first.
const HEIGHT_LABELS: [(u32, &str); 4] = [(1000, "1080p"), (700, "720p"), (480, "480p"), (360, "360p")];

/// Measured transfer rate thresholds in kbps, highest first.
const BITRATE_LABELS: [(f64, &str); 5] = [
    (2500.0, "1080p"),
    (1200.0, "720p"),
    (700.0, "480p"),
    (400.0, "360p"),
    (200.0, "240p"),
];

/// Video resolution declared by a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Discrete label for this resolution, `WxH` below 360 lines.
    pub fn label(&self) -> String {
        HEIGHT_LABELS
            .iter()
            .find(|(min, _)| self.height >= *min)
            .map(|(_, label)| label.to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// First explicit `WxH` token in `text`.
pub fn declared_resolution(text: &str) -> Option<Resolution> {
    RESOLUTION_REGEX.captures_iter(text).find_map(|caps| {
        let width = caps[1].parse().ok()?;
        let height = caps[2].parse().ok()?;
        (width > 0 && height > 0).then(|| Resolution::new(width, height))
    })
}

/// First explicit quality token such as `720p` in `text`.
pub fn quality_token(text: &str) -> Option<String> {
    QUALITY_TOKEN_REGEX
        .captures(text)
        .map(|caps| format!("{}p", &caps[1]))
}

/// Label inferred from a measured transfer rate alone.
pub fn label_for_bitrate(kbps: f64) -> &'static str {
    BITRATE_LABELS
        .iter()
        .find(|(min, _)| kbps >= *min)
        .map_or("low", |(_, label)| label)
}

/// Human quality label for a stream.
///
/// Textual signals in `manifest_text` always take precedence: an explicit
/// resolution first, then a quality token. Only when both are absent is the
/// measured bitrate consulted; without a measurement the label is `unknown`.
pub fn extract_quality(manifest_text: &str, measured_bitrate_kbps: Option<f64>) -> String {
    if let Some(resolution) = declared_resolution(manifest_text) {
        return resolution.label();
    }
    if let Some(token) = quality_token(manifest_text) {
        return token;
    }
    match measured_bitrate_kbps {
        Some(kbps) if kbps.is_finite() && kbps > 0.0 => label_for_bitrate(kbps).to_string(),
        _ => "unknown".to_string(),
    }
}
