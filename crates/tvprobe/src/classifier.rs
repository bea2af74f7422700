//! Maps probe evidence onto the stream taxonomy.

use serde::{Deserialize, Serialize};

use crate::manifest::ManifestFacts;

/// Where a stream ends up after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Playable,
    LowQuality,
    Encrypted,
    EndedPlaylist,
    Duplicate,
    NotValid,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Playable,
        Category::LowQuality,
        Category::Encrypted,
        Category::EndedPlaylist,
        Category::Duplicate,
        Category::NotValid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Playable => "playable",
            Category::LowQuality => "low_quality",
            Category::Encrypted => "encrypted",
            Category::EndedPlaylist => "ended_playlist",
            Category::Duplicate => "duplicate",
            Category::NotValid => "not_valid",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the inspector learned about one address.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    /// Transport or resolution failure, already rendered
    pub failure: Option<&'a str>,
    pub facts: &'a ManifestFacts,
    pub valid_segments: usize,
    pub attempted_segments: usize,
    pub bitrate_kbps: Option<f64>,
    pub quality: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub category: Category,
    pub reason: String,
}

impl Verdict {
    fn new(category: Category, reason: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
        }
    }
}

/// Ordered decision list; the first matching rule wins.
///
/// Never yields [`Category::Duplicate`], which depends on other addresses.
pub fn classify(evidence: &Evidence<'_>, min_bitrate_kbps: f64) -> Verdict {
    if let Some(failure) = evidence.failure {
        return Verdict::new(Category::NotValid, failure);
    }

    if evidence.facts.is_encrypted {
        return Verdict::new(Category::Encrypted, "playlist declares an encryption key");
    }

    if evidence.valid_segments == 0 {
        return Verdict::new(
            Category::NotValid,
            format!(
                "no valid segments (0/{} attempted)",
                evidence.attempted_segments
            ),
        );
    }

    if let Some(kbps) = evidence.bitrate_kbps.filter(|kbps| *kbps < min_bitrate_kbps) {
        return Verdict::new(
            Category::LowQuality,
            format!("bitrate {kbps:.0} kbps below minimum {min_bitrate_kbps:.0} kbps"),
        );
    }

    if evidence.facts.has_end_marker {
        return Verdict::new(Category::EndedPlaylist, "playlist has an end marker");
    }

    Verdict::new(
        Category::Playable,
        format!(
            "{}/{} segments valid, quality {}",
            evidence.valid_segments, evidence.attempted_segments, evidence.quality
        ),
    )
}
