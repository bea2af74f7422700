use serde::{Deserialize, Serialize};

use crate::classifier::Category;

/// One address to probe, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub name: String,
    pub url: String,
}

impl AddressEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Entry at 1-based `position`, named "Channel N" when no usable name is given.
    pub fn at_position(name: Option<&str>, url: impl Into<String>, position: usize) -> Self {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| format!("Channel {position}"), str::to_string);
        Self::new(name, url)
    }
}

/// Final verdict for one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// 1-based input position
    pub index: usize,
    pub name: String,
    pub category: Category,
    pub reason: String,
    pub original_url: String,
    pub segment_url: Option<String>,
    pub status: Option<u16>,
    pub bytes: usize,
    pub elapsed_s: f64,
    pub bitrate_kbps: Option<f64>,
    pub quality: String,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub error: Option<String>,
    /// Index of the record this one repeats
    pub duplicate_of: Option<usize>,
    pub preview_hex: String,
    /// Addresses visited, joined with ` -> `
    pub chain: String,
    /// Dedupe key of the outermost playlist
    #[serde(skip)]
    pub signature: Option<String>,
}

impl ClassificationRecord {
    /// `not_valid` record for an address that produced no evidence.
    pub fn failed(index: usize, entry: &AddressEntry, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            index,
            name: entry.name.clone(),
            category: Category::NotValid,
            reason: reason.clone(),
            original_url: entry.url.clone(),
            segment_url: None,
            status: None,
            bytes: 0,
            elapsed_s: 0.0,
            bitrate_kbps: None,
            quality: "unknown".to_string(),
            content_type: None,
            user_agent: None,
            error: Some(reason),
            duplicate_of: None,
            preview_hex: String::new(),
            chain: entry.url.clone(),
            signature: None,
        }
    }

    pub fn mark_duplicate(&mut self, of: usize) {
        self.category = Category::Duplicate;
        self.reason = format!("duplicate of #{of}");
        self.duplicate_of = Some(of);
    }
}
