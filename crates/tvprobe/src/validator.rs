//! Structural sniffing of probed media bytes.
//!
//! Two container families are recognised:
//! - MPEG transport stream: a 0x47 sync byte every 188 bytes. Probes may start
//!   mid-packet, so every offset of the first packet-sized window is tried.
//! - Fragmented MP4 / CMAF: an ISO-BMFF box type (`ftyp`, `styp`, `moof`,
//!   `mdat`, `sidx`) found by walking box headers from the first byte.

use serde::Serialize;

/// Transport stream sync byte
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Transport stream packet size
pub const TS_PACKET_SIZE: usize = 188;

/// Consecutive packets that must carry the sync byte
pub const MIN_TS_RUN: usize = 4;

const BOX_TYPES: [&[u8; 4]; 5] = [b"ftyp", b"styp", b"moof", b"mdat", b"sidx"];

/// Largest box a media segment is expected to carry. Four printable ASCII
/// bytes read as a size always exceed it.
const MAX_BOX_SIZE: u64 = 256 * 1024 * 1024;

/// Size and type header
const BOX_HEADER_SIZE: usize = 8;

/// What a byte prefix looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Transport stream whose first complete packet starts at `offset`
    MpegTs { offset: usize },
    /// ISO-BMFF fragment
    Fmp4,
    Unknown,
}

impl MediaKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, MediaKind::Unknown)
    }
}

/// Classify a byte prefix. Pure and deterministic.
pub fn sniff(data: &[u8]) -> MediaKind {
    if let Some(offset) = find_ts_alignment(data) {
        return MediaKind::MpegTs { offset };
    }
    if has_bmff_box(data) {
        return MediaKind::Fmp4;
    }
    MediaKind::Unknown
}

/// Whether `data` is a structurally valid transport stream or fragmented MP4 payload.
pub fn is_valid_media(data: &[u8]) -> bool {
    sniff(data).is_media()
}

/// First offset within the initial packet window that starts a run of
/// [`MIN_TS_RUN`] sync bytes at packet stride.
pub fn find_ts_alignment(data: &[u8]) -> Option<usize> {
    let span = (MIN_TS_RUN - 1) * TS_PACKET_SIZE;
    if data.len() < TS_PACKET_SIZE || data.len() <= span {
        return None;
    }

    let window = TS_PACKET_SIZE.min(data.len() - span);
    (0..window).find(|&offset| {
        (0..MIN_TS_RUN).all(|packet| data[offset + packet * TS_PACKET_SIZE] == TS_SYNC_BYTE)
    })
}

/// Walk box headers from offset 0 until a known segment box is found.
///
/// Every box on the way must have a printable type and a size within
/// [`MAX_BOX_SIZE`], so a box name buried in text does not count.
fn has_bmff_box(data: &[u8]) -> bool {
    let mut offset = 0;
    while offset + BOX_HEADER_SIZE <= data.len() {
        let header = &data[offset..offset + BOX_HEADER_SIZE];
        let box_type = &header[4..8];
        if !box_type.iter().all(|b| b.is_ascii_graphic()) {
            return false;
        }

        let size = match u32::from_be_bytes([header[0], header[1], header[2], header[3]]) {
            // Runs to the end of the file
            0 => None,
            // 64-bit size follows the type
            1 => match data.get(offset + 8..offset + 16) {
                Some(large) => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(large);
                    Some(u64::from_be_bytes(bytes))
                }
                None => return false,
            },
            size => Some(u64::from(size)),
        };
        if size.is_some_and(|size| size < BOX_HEADER_SIZE as u64 || size > MAX_BOX_SIZE) {
            return false;
        }

        if BOX_TYPES.iter().any(|known| known.as_slice() == box_type) {
            return true;
        }
        match size {
            Some(size) => offset += size as usize,
            None => return false,
        }
    }
    false
}
