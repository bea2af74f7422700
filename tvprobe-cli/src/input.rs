use std::path::Path;

use tracing::{debug, warn};
use tvprobe_engine::AddressEntry;

use crate::error::AppError;

/// Read channels from an extended M3U file.
///
/// A missing or unreadable file is fatal; malformed lines are not.
pub fn read_playlist(path: &Path, limit: Option<usize>) -> Result<Vec<AddressEntry>, AppError> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
    let entries = parse_m3u(&String::from_utf8_lossy(&bytes), limit);
    if entries.is_empty() {
        warn!(path = %path.display(), "No channels found in playlist");
    }
    Ok(entries)
}

/// Channels declared by `#EXTINF` descriptors, each followed by its address
/// after any number of other `#` lines.
pub fn parse_m3u(text: &str, limit: Option<usize>) -> Vec<AddressEntry> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    let mut pending: Option<Option<String>> = None;

    for line in text.lines() {
        if entries.len() >= limit {
            break;
        }
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }

        if line.starts_with("#EXTINF") {
            pending = Some(display_name(line));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        match pending.take() {
            Some(name) => {
                let position = entries.len() + 1;
                entries.push(AddressEntry::at_position(name.as_deref(), line, position));
            }
            None => debug!(line, "Skipping address without #EXTINF descriptor"),
        }
    }

    entries
}

/// Title after the first comma outside quoted attribute values.
fn display_name(descriptor: &str) -> Option<String> {
    let mut in_quotes = false;
    for (i, c) in descriptor.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let name = descriptor[i + 1..].trim();
                return (!name.is_empty()).then(|| name.to_string());
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U x-tvg-url=\"http://epg.test/guide.xml\"\n\
        #EXTINF:-1 tvg-id=\"news\" group-title=\"News, Local\",City News\n\
        #EXTVLCOPT:http-user-agent=Foo\n\
        http://a.test/news/index.m3u8\n\
        \n\
        #EXTINF:-1,\n\
        http://b.test/live.ts\n\
        http://orphan.test/ignored.m3u8\n\
        #EXTINF:-1 tvg-logo=\"x.png\",Sports HD\n\
        https://c.test/sports.m3u8\n";

    #[test]
    fn reads_names_and_addresses() {
        let entries = parse_m3u(PLAYLIST, None);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, "City News");
        assert_eq!(entries[0].url, "http://a.test/news/index.m3u8");
        assert_eq!(entries[1].name, "Channel 2");
        assert_eq!(entries[1].url, "http://b.test/live.ts");
        assert_eq!(entries[2].name, "Sports HD");
    }

    #[test]
    fn limit_caps_entries() {
        let entries = parse_m3u(PLAYLIST, Some(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].url, "http://b.test/live.ts");
    }

    #[test]
    fn descriptor_without_address_is_dropped() {
        let entries = parse_m3u("#EXTM3U\n#EXTINF:-1,Lonely\n", None);
        assert!(entries.is_empty());
    }

    #[test]
    fn missing_file_is_fatal() {
        let result = read_playlist(Path::new("/nonexistent/channels.m3u"), None);
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
