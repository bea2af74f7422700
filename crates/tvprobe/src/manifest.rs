//! Playlist text parsing.
//!
//! Master playlists go through `m3u8-rs`; anything it rejects is read by a
//! lenient line scanner, because origins in the wild publish playlists that
//! are only loosely HLS.

use std::collections::HashMap;

use m3u8_rs::Playlist;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::quality::{self, Resolution};

pub const MANIFEST_HEADER: &str = "#EXTM3U";

const UTF8_BOM: &str = "\u{feff}";

/// Boolean signals read from playlist text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestFacts {
    pub is_manifest: bool,
    pub has_variants: bool,
    /// `#EXT-X-ENDLIST`: finite content rather than a live feed
    pub has_end_marker: bool,
    /// A key tag whose METHOD is not NONE
    pub is_encrypted: bool,
    /// Resolution of the stream actually followed, when one is declared
    pub declared_resolution: Option<Resolution>,
}

impl ManifestFacts {
    /// Fold the facts of the next playlist down the chain into these.
    ///
    /// Encryption and nesting stick once seen. The end marker and any
    /// declared resolution belong to the deepest playlist that states them.
    pub fn merge(&mut self, next: &ManifestFacts) {
        self.is_manifest |= next.is_manifest;
        self.has_variants |= next.has_variants;
        self.is_encrypted |= next.is_encrypted;
        self.has_end_marker = next.has_end_marker;
        if next.declared_resolution.is_some() {
            self.declared_resolution = next.declared_resolution;
        }
    }
}

/// A nested stream declared by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
}

impl Variant {
    /// Text handed to the quality extractor for this variant. Query strings
    /// are left out so tokens in them cannot pass for a quality.
    pub fn quality_hint(&self) -> String {
        let path = self.uri.split(['?', '#']).next().unwrap_or_default();
        match self.resolution {
            Some(res) => format!("RESOLUTION={res} {path}"),
            None => path.to_string(),
        }
    }
}

/// Parsed playlist.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Nested streams in declaration order
    pub variants: Vec<Variant>,
    /// Segment references in playlist order, unresolved
    pub segments: Vec<String>,
    pub facts: ManifestFacts,
}

/// Whether `bytes` begin with the playlist header, ignoring a BOM and leading whitespace.
pub fn looks_like_manifest(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(64)];
    let text = String::from_utf8_lossy(head);
    text.trim_start_matches(UTF8_BOM)
        .trim_start()
        .starts_with(MANIFEST_HEADER)
}

/// Whether a reference points at another playlist rather than media.
pub fn is_nested_manifest(reference: &str) -> bool {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let path = path.to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

/// Parse playlist text. `None` when the header marker is missing.
pub fn parse(text: &str) -> Option<Manifest> {
    let text = text.trim_start_matches(UTF8_BOM).trim_start();
    if !text.starts_with(MANIFEST_HEADER) {
        return None;
    }

    let mut variants = parse_variants(text);
    let segments = scan_segments(text);

    // A bare list of playlists with no media of its own is treated as a master.
    if variants.is_empty() && segments.is_empty() {
        variants = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && is_nested_manifest(line))
            .map(|uri| Variant {
                uri: uri.to_string(),
                bandwidth: 0,
                resolution: None,
            })
            .collect();
    }

    let facts = ManifestFacts {
        is_manifest: true,
        has_variants: !variants.is_empty(),
        has_end_marker: text
            .lines()
            .any(|line| line.trim_start().starts_with("#EXT-X-ENDLIST")),
        is_encrypted: has_encryption_marker(text),
        // A master's resolution depends on the variant chosen, which the resolver records.
        declared_resolution: if variants.is_empty() {
            tag_resolution(text)
        } else {
            None
        },
    };

    Some(Manifest {
        variants,
        segments,
        facts,
    })
}

/// Resolution stated on a tag line; URI lines are not consulted.
fn tag_resolution(text: &str) -> Option<Resolution> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("#EXT"))
        .find_map(quality::declared_resolution)
}

fn parse_variants(text: &str) -> Vec<Variant> {
    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => master
            .variants
            .into_iter()
            .filter(|v| !v.is_i_frame)
            .map(|v| Variant {
                uri: v.uri,
                bandwidth: v.bandwidth,
                resolution: v
                    .resolution
                    .map(|r| Resolution::new(r.width as u32, r.height as u32)),
            })
            .collect(),
        Ok(Playlist::MediaPlaylist(_)) => Vec::new(),
        Err(e) => {
            trace!(error = %e, "m3u8-rs rejected playlist, falling back to line scan");
            scan_variants(text)
        }
    }
}

/// `#EXT-X-STREAM-INF` entries, each followed by its URI line.
fn scan_variants(text: &str) -> Vec<Variant> {
    let mut variants = Vec::new();
    let mut pending: Option<HashMap<String, String>> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending = Some(parse_attributes(rest));
        } else if line.starts_with('#') {
            continue;
        } else if let Some(attrs) = pending.take() {
            variants.push(Variant {
                uri: line.to_string(),
                bandwidth: attrs
                    .get("BANDWIDTH")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                resolution: attrs
                    .get("RESOLUTION")
                    .and_then(|r| quality::declared_resolution(r)),
            });
        }
    }
    variants
}

/// Segment references: lines following `#EXTINF` are preferred; otherwise any
/// non-comment line that is not itself a playlist.
fn scan_segments(text: &str) -> Vec<String> {
    let mut tagged = Vec::new();
    let mut loose = Vec::new();
    let mut after_inf = false;
    let mut after_stream_inf = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("#EXTINF") {
            after_inf = true;
            continue;
        }
        if line.starts_with("#EXT-X-STREAM-INF") {
            after_stream_inf = true;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if after_inf {
            tagged.push(line.to_string());
        } else if !after_stream_inf && !is_nested_manifest(line) {
            loose.push(line.to_string());
        }
        after_inf = false;
        after_stream_inf = false;
    }

    if tagged.is_empty() { loose } else { tagged }
}

fn has_encryption_marker(text: &str) -> bool {
    text.lines().map(str::trim).any(|line| {
        let attrs = line
            .strip_prefix("#EXT-X-KEY:")
            .or_else(|| line.strip_prefix("#EXT-X-SESSION-KEY:"));
        match attrs {
            Some(rest) => parse_attributes(rest)
                .get("METHOD")
                .is_none_or(|method| !method.eq_ignore_ascii_case("NONE")),
            None => false,
        }
    })
}

/// Parse an attribute list (`KEY=VALUE,KEY="quoted, value"`).
fn parse_attributes(input: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_ascii_uppercase();
        let after = &rest[eq + 1..];

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };

        attrs.insert(key, value.trim().to_string());
        rest = remaining.trim_start_matches(',').trim_start();
    }
    attrs
}

/// SHA-256 over the first `lines` non-empty lines, hex encoded.
///
/// Used as a duplicate heuristic only: unrelated playlists can share header lines.
pub fn prefix_signature(text: &str, lines: usize) -> String {
    let mut hasher = Sha256::new();
    for line in text
        .trim_start_matches(UTF8_BOM)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(lines)
    {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
mid/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=100000,URI=\"iframe.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=960x540
alt/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:6.0,
seg100.ts
#EXTINF:6.0,
#EXT-X-BYTERANGE:1000@0
seg101.ts
#EXT-X-ENDLIST
";

    #[test]
    fn detects_header_with_bom_and_whitespace() {
        assert!(looks_like_manifest(b"\xEF\xBB\xBF#EXTM3U\n"));
        assert!(looks_like_manifest(b"\r\n  #EXTM3U\n"));
        assert!(!looks_like_manifest(b"<html>#EXTM3U"));
        assert!(!looks_like_manifest(&[0x47, 0x40, 0x00, 0x10]));
        assert!(parse("<html></html>").is_none());
    }

    #[test]
    fn master_variants_keep_declaration_order() {
        let manifest = parse(MASTER).unwrap();
        let uris: Vec<_> = manifest.variants.iter().map(|v| v.uri.as_str()).collect();
        assert_eq!(uris, ["low/index.m3u8", "mid/index.m3u8", "alt/index.m3u8"]);
        assert_eq!(manifest.variants[1].bandwidth, 2_800_000);
        assert_eq!(
            manifest.variants[2].resolution,
            Some(Resolution::new(960, 540))
        );
        assert!(manifest.facts.has_variants);
        assert!(manifest.segments.is_empty());
    }

    #[test]
    fn line_scanner_reads_variants() {
        let variants = scan_variants(MASTER);
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].resolution, Some(Resolution::new(640, 360)));
        assert_eq!(variants[0].bandwidth, 800_000);
    }

    #[test]
    fn media_segments_follow_extinf() {
        let manifest = parse(MEDIA).unwrap();
        assert_eq!(manifest.segments, ["seg100.ts", "seg101.ts"]);
        assert!(manifest.facts.has_end_marker);
        assert!(!manifest.facts.has_variants);
        assert!(!manifest.facts.is_encrypted);
    }

    #[test]
    fn untagged_segments_fall_back_to_loose_lines() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\nchunk_1.ts\nother.m3u8\nchunk_2.ts\n";
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.segments, ["chunk_1.ts", "chunk_2.ts"]);
    }

    #[test]
    fn bare_playlist_list_is_treated_as_master() {
        let manifest = parse("#EXTM3U\nhttp://example.com/a.m3u8\n").unwrap();
        assert_eq!(manifest.variants.len(), 1);
        assert!(manifest.facts.has_variants);
    }

    #[test]
    fn encryption_marker_ignores_method_none() {
        let encrypted = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:4,\na.ts\n";
        let clear = "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\n#EXTINF:4,\na.ts\n";
        let session = "#EXTM3U\n#EXT-X-SESSION-KEY:METHOD=SAMPLE-AES,URI=\"skd://x\"\n";
        assert!(parse(encrypted).unwrap().facts.is_encrypted);
        assert!(!parse(clear).unwrap().facts.is_encrypted);
        assert!(parse(session).unwrap().facts.is_encrypted);
    }

    #[test]
    fn attribute_parser_handles_quoted_commas() {
        let attrs = parse_attributes("BANDWIDTH=1,CODECS=\"avc1,mp4a\",RESOLUTION=1x2");
        assert_eq!(attrs["CODECS"], "avc1,mp4a");
        assert_eq!(attrs["RESOLUTION"], "1x2");
    }

    #[test]
    fn nested_manifest_detection_ignores_query() {
        assert!(is_nested_manifest("index.m3u8?token=abc"));
        assert!(is_nested_manifest("LIST.M3U"));
        assert!(!is_nested_manifest("seg.ts?m3u8=1"));
    }

    #[test]
    fn signature_depends_only_on_prefix() {
        let a = "#EXTM3U\n\n#EXT-X-VERSION:3\nfoo.ts\n";
        let b = "#EXTM3U\n#EXT-X-VERSION:3\nbar.ts\n";
        assert_eq!(prefix_signature(a, 2), prefix_signature(b, 2));
        assert_ne!(prefix_signature(a, 3), prefix_signature(b, 3));
    }

    #[test]
    fn merged_facts_are_sticky_for_encryption() {
        let mut facts = parse(MASTER).unwrap().facts;
        let mut media = parse(MEDIA).unwrap().facts;
        media.is_encrypted = true;
        facts.merge(&media);
        assert!(facts.is_encrypted);
        assert!(facts.has_end_marker);
        assert!(facts.has_variants);
    }

    #[test]
    fn deepest_declared_resolution_wins() {
        let mut facts = ManifestFacts {
            declared_resolution: Some(Resolution::new(640, 360)),
            ..ManifestFacts::default()
        };
        facts.merge(&ManifestFacts {
            declared_resolution: Some(Resolution::new(1280, 720)),
            ..ManifestFacts::default()
        });
        assert_eq!(facts.declared_resolution, Some(Resolution::new(1280, 720)));

        facts.merge(&ManifestFacts::default());
        assert_eq!(facts.declared_resolution, Some(Resolution::new(1280, 720)));
    }

    #[test]
    fn master_leaves_resolution_to_the_chosen_variant() {
        assert_eq!(parse(MASTER).unwrap().facts.declared_resolution, None);

        let media = "#EXTM3U\n#EXT-X-PROGRAM-INFO:RESOLUTION=1280x720\n#EXTINF:4,\nclip_1920x1080.ts\n";
        assert_eq!(
            parse(media).unwrap().facts.declared_resolution,
            Some(Resolution::new(1280, 720))
        );

        let untagged = "#EXTM3U\n#EXTINF:4,\nclip_1920x1080.ts\n";
        assert_eq!(parse(untagged).unwrap().facts.declared_resolution, None);
    }

    #[test]
    fn quality_hint_drops_query_strings() {
        let variant = Variant {
            uri: "hd/index.m3u8?token=a640x480".to_string(),
            bandwidth: 1,
            resolution: None,
        };
        assert_eq!(variant.quality_hint(), "hd/index.m3u8");
    }
}
