// Playlist Resolver: follows nested playlists from an address down to concrete segments.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, trace};
use url::Url;

use crate::config::{ProbeConfig, VariantPolicy};
use crate::error::ResolveError;
use crate::manifest::{self, ManifestFacts, Variant};
use crate::prober::{ProbeAttempt, ProbeKind, SegmentProber};

/// Source of playlist bodies.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_manifest(&self, url: &Url) -> ProbeAttempt;
}

#[async_trait]
impl ManifestFetcher for SegmentProber {
    async fn fetch_manifest(&self, url: &Url) -> ProbeAttempt {
        self.probe(url, ProbeKind::Manifest).await
    }
}

/// Concrete media reached at the end of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// First segment of the media playlist
    pub segment: Url,
    /// Following segments, tried when the primary fails validation
    pub siblings: Vec<Url>,
    /// Media playlist the segments were read from, after redirects
    pub playlist: Url,
}

impl ResolvedTarget {
    /// Primary segment first, then siblings.
    pub fn candidates(&self) -> impl Iterator<Item = &Url> {
        std::iter::once(&self.segment).chain(self.siblings.iter())
    }
}

/// Everything learned while walking a chain, whether or not it reached media.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Addresses requested, outermost first
    pub chain: Vec<Url>,
    pub facts: ManifestFacts,
    /// Attributes of the chosen variants, for quality extraction
    pub quality_hint: String,
    /// Body of the outermost playlist, when one was read
    pub signature_text: Option<String>,
    pub outcome: Result<ResolvedTarget, ResolveError>,
}

impl Resolution {
    fn started() -> Self {
        Self {
            chain: Vec::new(),
            facts: ManifestFacts::default(),
            quality_hint: String::new(),
            signature_text: None,
            outcome: Err(ResolveError::NoSegments),
        }
    }

    fn fail(mut self, error: ResolveError) -> Self {
        self.outcome = Err(error);
        self
    }

    pub fn chain_text(&self) -> String {
        self.chain
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

pub struct PlaylistResolver<F> {
    fetcher: F,
    max_depth: usize,
    policy: VariantPolicy,
    max_segment_probes: usize,
}

impl<F: ManifestFetcher> PlaylistResolver<F> {
    pub fn new(fetcher: F, config: &ProbeConfig) -> Self {
        Self {
            fetcher,
            max_depth: config.max_depth,
            policy: config.variant_policy,
            max_segment_probes: config.max_segment_probes.max(1),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch `address` and follow it.
    pub async fn resolve(&self, address: &Url) -> Resolution {
        let attempt = self.fetcher.fetch_manifest(address).await;
        self.resolve_fetched(attempt).await
    }

    /// Follow a playlist whose body has already been fetched.
    ///
    /// Exactly one variant is followed at every level, so the walk is a
    /// single path bounded by the maximum depth.
    pub async fn resolve_fetched(&self, first: ProbeAttempt) -> Resolution {
        let mut resolution = Resolution::started();
        let mut visited = HashSet::new();
        let mut attempt = first;
        let mut depth = 0;

        visited.insert(normalized(&attempt.target));
        resolution.chain.push(attempt.target.clone());

        loop {
            if let Some(error) = attempt.error.take() {
                return resolution.fail(ResolveError::Fetch(error));
            }

            let final_url = attempt.effective_url().clone();
            if final_url != attempt.target && !visited.insert(normalized(&final_url)) {
                return resolution.fail(ResolveError::Cycle {
                    url: final_url.to_string(),
                });
            }

            let text = attempt.text().into_owned();
            let Some(playlist) = manifest::parse(&text) else {
                return resolution.fail(ResolveError::NotAManifest {
                    url: final_url.to_string(),
                });
            };

            if depth == 0 {
                resolution.signature_text = Some(text);
                resolution.facts = playlist.facts.clone();
            } else {
                resolution.facts.merge(&playlist.facts);
            }

            trace!(
                url = %final_url,
                depth,
                variants = playlist.variants.len(),
                segments = playlist.segments.len(),
                "Parsed playlist"
            );

            if let Some(variant) = select_variant(&playlist.variants, self.policy) {
                let next = match final_url.join(&variant.uri) {
                    Ok(url) => url,
                    Err(e) => {
                        return resolution.fail(ResolveError::InvalidReference {
                            reference: variant.uri.clone(),
                            reason: e.to_string(),
                        });
                    }
                };

                if depth + 1 > self.max_depth {
                    return resolution.fail(ResolveError::TooDeep {
                        max_depth: self.max_depth,
                    });
                }
                if !visited.insert(normalized(&next)) {
                    return resolution.fail(ResolveError::Cycle {
                        url: next.to_string(),
                    });
                }

                if variant.resolution.is_some() {
                    resolution.facts.declared_resolution = variant.resolution;
                }
                if !resolution.quality_hint.is_empty() {
                    resolution.quality_hint.push(' ');
                }
                resolution.quality_hint.push_str(&variant.quality_hint());

                debug!(from = %final_url, to = %next, bandwidth = variant.bandwidth, "Following variant");
                resolution.chain.push(next.clone());
                attempt = self.fetcher.fetch_manifest(&next).await;
                depth += 1;
                continue;
            }

            let Some((primary, rest)) = playlist.segments.split_first() else {
                return resolution.fail(ResolveError::NoSegments);
            };
            let segment = match final_url.join(primary) {
                Ok(url) => url,
                Err(e) => {
                    return resolution.fail(ResolveError::InvalidReference {
                        reference: primary.clone(),
                        reason: e.to_string(),
                    });
                }
            };
            let siblings = rest
                .iter()
                .take(self.max_segment_probes - 1)
                .filter_map(|reference| final_url.join(reference).ok())
                .collect();

            resolution.outcome = Ok(ResolvedTarget {
                segment,
                siblings,
                playlist: final_url,
            });
            return resolution;
        }
    }
}

fn select_variant(variants: &[Variant], policy: VariantPolicy) -> Option<&Variant> {
    match policy {
        VariantPolicy::Last => variants.last(),
        VariantPolicy::First => variants.first(),
        VariantPolicy::HighestBandwidth => variants.iter().max_by_key(|v| v.bandwidth),
        VariantPolicy::LowestBandwidth => variants.iter().min_by_key(|v| v.bandwidth),
    }
}

/// Cycle guard key: the address without its fragment.
fn normalized(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}
