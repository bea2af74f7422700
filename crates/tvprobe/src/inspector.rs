// Per-address probing unit: root probe, playlist resolution, segment validation, verdict.

use std::sync::Arc;

use tracing::{debug, trace};
use url::Url;

use crate::classifier::{Evidence, classify};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::manifest::{ManifestFacts, prefix_signature};
use crate::prober::{ProbeAttempt, ProbeKind, SegmentProber};
use crate::quality::extract_quality;
use crate::record::{AddressEntry, ClassificationRecord};
use crate::resolver::PlaylistResolver;
use crate::validator;

/// Turns one address into one record. Never fails.
#[derive(Debug, Clone)]
pub struct Inspector {
    config: Arc<ProbeConfig>,
}

impl Inspector {
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }

    pub async fn inspect(&self, index: usize, entry: &AddressEntry) -> ClassificationRecord {
        let url = match parse_address(&entry.url) {
            Ok(url) => url,
            Err(e) => return ClassificationRecord::failed(index, entry, e.to_string()),
        };
        let mut prober = match SegmentProber::for_address(self.config.clone(), &url) {
            Ok(prober) => prober,
            Err(e) => return ClassificationRecord::failed(index, entry, e.to_string()),
        };

        let root = prober.probe_with_rotation(&url, ProbeKind::Segment).await;
        debug!(
            index,
            url = %url,
            status = ?root.status,
            bytes = root.bytes_read,
            attempts = root.attempts,
            "Root probe finished"
        );

        let findings = if root.is_success() && root.looks_like_manifest() {
            self.follow_playlist(&prober, root).await
        } else {
            Findings::direct(root)
        };

        findings.into_record(index, entry, &self.config)
    }

    async fn follow_playlist(&self, prober: &SegmentProber, root: ProbeAttempt) -> Findings {
        // A ranged root probe that filled its budget may have cut the playlist short.
        let playlist = if root.bytes_read < self.config.byte_budget {
            root
        } else {
            trace!(url = %root.target, "Playlist may be truncated, refetching in full");
            prober.probe(&root.target, ProbeKind::Manifest).await
        };

        let resolver = PlaylistResolver::new(prober.clone(), &self.config);
        let resolution = resolver.resolve_fetched(playlist.clone()).await;

        let quality_hint = format!("{} {}", resolution.quality_hint, url_paths(&resolution.chain));
        let mut findings = Findings {
            chain: resolution.chain_text(),
            facts: resolution.facts,
            quality_hint,
            signature_text: resolution.signature_text,
            failure: None,
            reported: playlist,
            segment_probed: false,
            valid_segments: 0,
            attempted_segments: 0,
            valid_bitrate_kbps: None,
        };

        let target = match resolution.outcome {
            Ok(target) => target,
            Err(e) => {
                findings.failure = Some(e.to_string());
                return findings;
            }
        };

        for candidate in target.candidates() {
            findings.attempted_segments += 1;
            findings.segment_probed = true;
            let attempt = prober.probe(candidate, ProbeKind::Segment).await;

            if let Some(error) = &attempt.error {
                findings.failure = Some(format!("segment probe failed: {error}"));
                findings.reported = attempt;
                return findings;
            }

            let kind = validator::sniff(&attempt.preview);
            if kind.is_media() {
                trace!(segment = %candidate, ?kind, "Segment validated");
                findings.valid_segments += 1;
                findings.valid_bitrate_kbps = attempt.bitrate_kbps();
                findings.reported = attempt;
                return findings;
            }

            debug!(segment = %candidate, bytes = attempt.bytes_read, "Segment failed validation, trying next");
            findings.reported = attempt;
        }

        findings
    }
}

/// Only absolute http(s) addresses can be probed.
fn parse_address(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw.trim()).map_err(|e| ProbeError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProbeError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{other}'"
        ))),
    }
}

/// Paths of `urls`, without hosts or query strings.
fn url_paths<'a>(urls: impl IntoIterator<Item = &'a Url>) -> String {
    urls.into_iter().map(Url::path).collect::<Vec<_>>().join(" ")
}

/// Evidence gathered for one address before classification.
struct Findings {
    chain: String,
    facts: ManifestFacts,
    /// Variant attributes and address paths, searched for quality tokens
    quality_hint: String,
    signature_text: Option<String>,
    failure: Option<String>,
    /// Attempt whose status, size and timing end up in the record
    reported: ProbeAttempt,
    segment_probed: bool,
    valid_segments: usize,
    attempted_segments: usize,
    valid_bitrate_kbps: Option<f64>,
}

impl Findings {
    /// The address itself is the media.
    fn direct(root: ProbeAttempt) -> Self {
        let failure = root.error.as_ref().map(ToString::to_string);
        let valid = failure.is_none() && validator::is_valid_media(&root.preview);
        Self {
            chain: root.target.to_string(),
            facts: ManifestFacts::default(),
            quality_hint: root.target.path().to_string(),
            signature_text: None,
            segment_probed: failure.is_none(),
            failure,
            valid_segments: usize::from(valid),
            attempted_segments: 1,
            valid_bitrate_kbps: if valid { root.bitrate_kbps() } else { None },
            reported: root,
        }
    }

    fn into_record(self, index: usize, entry: &AddressEntry, config: &ProbeConfig) -> ClassificationRecord {
        let reported = self.reported;
        let segment_url = self
            .segment_probed
            .then(|| reported.effective_url().to_string());

        let quality = match self.facts.declared_resolution {
            Some(resolution) => resolution.label(),
            None => {
                let segment_path = if self.segment_probed {
                    reported.effective_url().path()
                } else {
                    ""
                };
                let quality_text = format!("{} {segment_path}", self.quality_hint);
                extract_quality(&quality_text, self.valid_bitrate_kbps)
            }
        };

        let verdict = classify(
            &Evidence {
                failure: self.failure.as_deref(),
                facts: &self.facts,
                valid_segments: self.valid_segments,
                attempted_segments: self.attempted_segments,
                bitrate_kbps: self.valid_bitrate_kbps,
                quality: &quality,
            },
            config.min_bitrate_kbps,
        );

        let signature = if config.dedupe {
            self.signature_text
                .as_deref()
                .map(|text| prefix_signature(text, config.dedupe_prefix_lines))
        } else {
            None
        };

        ClassificationRecord {
            index,
            name: entry.name.clone(),
            category: verdict.category,
            reason: verdict.reason,
            original_url: entry.url.clone(),
            segment_url,
            status: reported.status,
            bytes: reported.bytes_read,
            elapsed_s: reported.elapsed.as_secs_f64(),
            bitrate_kbps: reported.bitrate_kbps(),
            quality,
            content_type: reported.content_type.clone(),
            user_agent: Some(reported.user_agent.clone()),
            error: self.failure,
            duplicate_of: None,
            preview_hex: reported.preview_hex(),
            chain: self.chain,
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::classifier::Category;

    fn ts_body(packets: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(packets * validator::TS_PACKET_SIZE);
        for _ in 0..packets {
            let mut packet = vec![0u8; validator::TS_PACKET_SIZE];
            packet[0] = validator::TS_SYNC_BYTE;
            data.extend_from_slice(&packet);
        }
        data
    }

    fn inspector() -> Inspector {
        Inspector::new(Arc::new(
            ProbeConfig::builder()
                .with_retry_delay(Duration::from_millis(10))
                .with_system_proxy(false)
                .build(),
        ))
    }

    async fn mount(server: &MockServer, at: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn rejects_unsupported_addresses() {
        assert!(parse_address("rtmp://live.test/app/stream").is_err());
        assert!(parse_address("not a url").is_err());
        assert!(parse_address(" https://live.test/a.m3u8 ").is_ok());
    }

    #[tokio::test]
    async fn invalid_address_is_not_valid() {
        let entry = AddressEntry::new("Broken", "udp://239.0.0.1:1234");
        let record = inspector().inspect(1, &entry).await;
        assert_eq!(record.category, Category::NotValid);
        assert!(record.reason.contains("unsupported scheme"));
    }

    #[tokio::test]
    async fn master_playlist_down_to_transport_stream() {
        let server = MockServer::start().await;
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
            hd/index.m3u8\n";
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n";
        mount(&server, "/master.m3u8", ResponseTemplate::new(200).set_body_string(master)).await;
        mount(&server, "/hd/index.m3u8", ResponseTemplate::new(200).set_body_string(media)).await;
        mount(&server, "/hd/seg0.ts", ResponseTemplate::new(200).set_body_bytes(ts_body(1000))).await;

        let entry = AddressEntry::new("HD", format!("{}/master.m3u8", server.uri()));
        let record = inspector().inspect(1, &entry).await;

        assert_eq!(record.category, Category::Playable, "{}", record.reason);
        assert_eq!(record.quality, "720p");
        assert_eq!(record.reason, "1/1 segments valid, quality 720p");
        assert!(record.segment_url.as_deref().unwrap().ends_with("/hd/seg0.ts"));
        assert!(record.chain.contains(" -> "));
        assert!(record.preview_hex.starts_with("47"));
    }

    #[tokio::test]
    async fn invalid_primary_segment_falls_back_to_sibling() {
        let server = MockServer::start().await;
        let media = "#EXTM3U\n#EXTINF:4.0,\nbad.ts\n#EXTINF:4.0,\ngood.ts\n";
        mount(&server, "/live.m3u8", ResponseTemplate::new(200).set_body_string(media)).await;
        mount(
            &server,
            "/bad.ts",
            ResponseTemplate::new(200).set_body_string("<html>error</html>"),
        )
        .await;
        mount(&server, "/good.ts", ResponseTemplate::new(200).set_body_bytes(ts_body(1000))).await;

        let entry = AddressEntry::new("Live", format!("{}/live.m3u8", server.uri()));
        let record = inspector().inspect(1, &entry).await;

        assert_eq!(record.category, Category::Playable, "{}", record.reason);
        assert!(record.reason.starts_with("1/2 segments valid"));
    }

    #[tokio::test]
    async fn query_tokens_do_not_declare_quality() {
        let server = MockServer::start().await;
        let media = "#EXTM3U\n#EXTINF:4.0,\nseg0.ts?sig=a640x480&q=360p\n";
        mount(&server, "/live/index.m3u8", ResponseTemplate::new(200).set_body_string(media)).await;
        mount(&server, "/live/seg0.ts", ResponseTemplate::new(200).set_body_bytes(ts_body(1000))).await;

        let entry = AddressEntry::new(
            "Signed",
            format!("{}/live/index.m3u8?token=b854x480p", server.uri()),
        );
        let record = inspector().inspect(1, &entry).await;

        assert_eq!(record.category, Category::Playable, "{}", record.reason);
        assert_ne!(record.quality, "480p");
        assert_ne!(record.quality, "360p");
        assert_ne!(record.quality, "unknown");
    }

    #[tokio::test]
    async fn media_playlist_resolution_outranks_variant_attributes() {
        let server = MockServer::start().await;
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
            hd/index.m3u8\n";
        let media = "#EXTM3U\n#EXT-X-PROGRAM-INFO:RESOLUTION=1920x1080\n#EXTINF:4.0,\nseg0.ts\n";
        mount(&server, "/master.m3u8", ResponseTemplate::new(200).set_body_string(master)).await;
        mount(&server, "/hd/index.m3u8", ResponseTemplate::new(200).set_body_string(media)).await;
        mount(&server, "/hd/seg0.ts", ResponseTemplate::new(200).set_body_bytes(ts_body(1000))).await;

        let entry = AddressEntry::new("FHD", format!("{}/master.m3u8", server.uri()));
        let record = inspector().inspect(1, &entry).await;

        assert_eq!(record.category, Category::Playable, "{}", record.reason);
        assert_eq!(record.quality, "1080p");
    }

    #[tokio::test]
    async fn garbage_body_has_no_valid_segments() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/stream",
            ResponseTemplate::new(200).set_body_string("<html><body>Not Found</body></html>"),
        )
        .await;

        let entry = AddressEntry::new("Fake", format!("{}/stream", server.uri()));
        let record = inspector().inspect(1, &entry).await;

        assert_eq!(record.category, Category::NotValid);
        assert_eq!(record.reason, "no valid segments (0/1 attempted)");
        assert_eq!(record.status, Some(200));
    }
}
