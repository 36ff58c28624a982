//! Artifact naming: date-partitioned folders and timestamped filenames
//!
//! Pure functions over a supplied instant so tests control the clock.
//! Layout: `<outputDir>/<dd-mm-yyyy>/<key>__<HH-MM-SS>.<ext>`, with
//! diagnostic screenshots named `<key>__error__<HH-MM-SS>.png`.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Result of parsing an artifact filename back into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArtifact {
    pub key: String,
    /// True for `<key>__error__<HH-MM-SS>.png` diagnostic files
    pub error_artifact: bool,
    pub extension: String,
    pub time: NaiveTime,
    /// Full timestamp when a date folder was supplied alongside the filename
    pub timestamp: Option<NaiveDateTime>,
}

/// Date folder for an instant, local time: `dd-mm-yyyy`
pub fn date_folder(at: DateTime<Local>) -> String {
    at.format("%d-%m-%Y").to_string()
}

/// Artifact filename: `<key>__<HH-MM-SS>.<ext>`
pub fn artifact_filename(key: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{}__{}.{}", key, at.format("%H-%M-%S"), extension)
}

/// Diagnostic screenshot filename: `<key>__error__<HH-MM-SS>.png`
pub fn error_screenshot_filename(key: &str, at: DateTime<Local>) -> String {
    format!("{}__error__{}.png", key, at.format("%H-%M-%S"))
}

/// Inverse of the naming functions, used by offline tooling. The time part
/// is taken from the last `__`-separated segment; an optional date folder
/// recovers the full timestamp.
pub fn parse(filename: &str, folder: Option<&str>) -> Option<ParsedArtifact> {
    let (stem, extension) = filename.rsplit_once('.')?;
    let (mut key, time_part) = stem.rsplit_once("__")?;

    let time = NaiveTime::parse_from_str(time_part, "%H-%M-%S").ok()?;

    let error_artifact = if let Some(k) = key.strip_suffix("__error") {
        key = k;
        true
    } else {
        false
    };
    if key.is_empty() {
        return None;
    }

    let timestamp = match folder {
        Some(f) => {
            let date = NaiveDate::parse_from_str(f, "%d-%m-%Y").ok()?;
            Some(date.and_time(time))
        }
        None => None,
    };

    Some(ParsedArtifact {
        key: key.to_string(),
        error_artifact,
        extension: extension.to_string(),
        time,
        timestamp,
    })
}
