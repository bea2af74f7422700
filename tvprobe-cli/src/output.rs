use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tvprobe_engine::{Category, ClassificationRecord};

use crate::cli::OutputFormat;
use crate::error::AppError;

const CSV_HEADER: [&str; 17] = [
    "index",
    "name",
    "category",
    "reason",
    "original_url",
    "segment_url",
    "status",
    "bytes",
    "elapsed_s",
    "bitrate_kbps",
    "quality",
    "content_type",
    "user_agent",
    "error",
    "duplicate_of",
    "preview_hex",
    "chain",
];

/// Write records to `path`, or to standard output when no path is given.
pub fn write_records(
    records: &[ClassificationRecord],
    format: OutputFormat,
    path: Option<&Path>,
) -> Result<(), AppError> {
    let rendered = format_records(records, format)?;
    match path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            writer.write_all(rendered.as_bytes())?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(rendered.as_bytes())?;
            lock.flush()?;
        }
    }
    Ok(())
}

pub fn format_records(
    records: &[ClassificationRecord],
    format: OutputFormat,
) -> Result<String, AppError> {
    match format {
        OutputFormat::Csv => Ok(format_csv(records)),
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(records)?;
            json.push('\n');
            Ok(json)
        }
    }
}

fn format_csv(records: &[ClassificationRecord]) -> String {
    let mut output = String::new();
    output.push_str(&CSV_HEADER.join(","));
    output.push('\n');

    for record in records {
        let fields: [Cow<'_, str>; 17] = [
            Cow::Owned(record.index.to_string()),
            quoted(&record.name),
            Cow::Borrowed(record.category.as_str()),
            quoted(&record.reason),
            quoted(&record.original_url),
            quoted(record.segment_url.as_deref().unwrap_or_default()),
            optional(record.status),
            Cow::Owned(record.bytes.to_string()),
            Cow::Owned(format!("{:.3}", record.elapsed_s)),
            record
                .bitrate_kbps
                .map_or(Cow::Borrowed(""), |kbps| Cow::Owned(format!("{kbps:.1}"))),
            quoted(&record.quality),
            quoted(record.content_type.as_deref().unwrap_or_default()),
            quoted(record.user_agent.as_deref().unwrap_or_default()),
            quoted(record.error.as_deref().unwrap_or_default()),
            optional(record.duplicate_of),
            Cow::Borrowed(record.preview_hex.as_str()),
            quoted(&record.chain),
        ];
        output.push_str(&fields.join(","));
        output.push('\n');
    }

    output
}

fn quoted(s: &str) -> Cow<'static, str> {
    Cow::Owned(format!("\"{}\"", escape_csv(s)))
}

fn optional<T: ToString>(value: Option<T>) -> Cow<'static, str> {
    value.map_or(Cow::Borrowed(""), |v| Cow::Owned(v.to_string()))
}

// Helper method to avoid unnecessary allocations when escaping CSV
fn escape_csv(s: &str) -> Cow<'_, str> {
    if s.contains('"') {
        Cow::Owned(s.replace('"', "\"\""))
    } else {
        Cow::Borrowed(s)
    }
}

/// One-line count per category, e.g. `playable=3 low_quality=0 ... not_valid=1`.
pub fn summary(records: &[ClassificationRecord]) -> String {
    let mut counts: BTreeMap<Category, usize> = Category::ALL.iter().map(|c| (*c, 0)).collect();
    for record in records {
        *counts.entry(record.category).or_default() += 1;
    }
    counts
        .iter()
        .map(|(category, count)| format!("{category}={count}"))
        .collect::<Vec<_>>()
        .join(" ")
}
