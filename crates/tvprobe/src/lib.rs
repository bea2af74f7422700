//! # tvprobe engine
//!
//! Probes live media addresses and sorts them into a fixed taxonomy:
//! playable, low quality, encrypted, ended playlist, duplicate, or not valid.
//!
//! ## Features
//!
//! - Bounded, ranged fetches with retry on transport failures
//! - Nested playlist resolution with cycle and depth guards
//! - Transport stream and fragmented MP4 sniffing
//! - Concurrent batches with per-address time budgets and cancellation
//! - Optional duplicate detection across playlists

pub mod builder;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod inspector;
pub mod manifest;
pub mod orchestrator;
pub mod prober;
pub mod proxy;
pub mod quality;
pub mod record;
pub mod resolver;
pub mod validator;

pub use builder::ProbeConfigBuilder;
pub use config::{DEFAULT_USER_AGENTS, ProbeConfig, VariantPolicy};
pub use error::{ProbeError, ResolveError, TransportKind};

pub use classifier::{Category, Evidence, Verdict, classify};
pub use inspector::Inspector;
pub use orchestrator::{OnProgress, Orchestrator, ProbeEvent};
pub use record::{AddressEntry, ClassificationRecord};

// Re-export probing building blocks
pub use client::create_client;
pub use manifest::{Manifest, ManifestFacts};
pub use prober::{ProbeAttempt, ProbeKind, SegmentProber};
pub use quality::{Resolution, extract_quality};
pub use resolver::{ManifestFetcher, PlaylistResolver, ResolvedTarget};
pub use validator::{MediaKind, is_valid_media};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};

pub use tokio_util::sync::CancellationToken;
