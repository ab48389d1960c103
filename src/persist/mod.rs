//! Durable persistence for images and annotation records.
//!
//! Every file goes through the same publication protocol: write to a
//! `transferring.<name>` staging path in the target directory, then atomic
//! rename to `<name>`. A reader can therefore never observe a half-written
//! image or log file. Failures degrade to losing that one file: the staging
//! path is deleted best-effort and the error is reported to the caller.

use chrono::{DateTime, FixedOffset, Local, Utc};
use thiserror::Error;

pub mod image;
pub mod window;

pub use self::image::{ImageEncoding, ImageWriter};
pub use window::{LogFormat, RotatingLog};

/// Staging prefix for files that are still being written.
pub const STAGING_PREFIX: &str = "transferring.";

/// Recoverable persistence failure; callers count it and continue.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("rename failed: {0}")]
    RenameFailed(String),
}

/// Format an epoch timestamp as `YYYY-MM-DD_HH:MM:SS.mmm+TZ` for file names.
///
/// A configured fixed UTC offset wins; otherwise the local offset is used.
pub fn format_stamp(epoch_secs: f64, utc_offset: Option<FixedOffset>) -> String {
    let millis = (epoch_secs * 1000.0).round() as i64;
    let Some(utc) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        // Out-of-range frame times still need a deterministic name.
        return format!("{:.3}", epoch_secs);
    };
    const STAMP: &str = "%Y-%m-%d_%H:%M:%S%.3f%z";
    match utc_offset {
        Some(offset) => utc.with_timezone(&offset).format(STAMP).to_string(),
        None => utc.with_timezone(&Local).format(STAMP).to_string(),
    }
}

/// Strip whitespace and path separators from a resolved file identifier.
pub fn sanitize_file_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '/' && *c != '\\')
        .collect()
}

fn staging_name(name: &str) -> String {
    format!("{}{}", STAGING_PREFIX, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn stamp_uses_millisecond_precision_and_offset() {
        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        let stamp = format_stamp(1700000000.125, Some(offset));
        assert_eq!(stamp, "2023-11-15_07:13:20.125+0900");
    }

    #[test]
    fn stamp_is_deterministic_for_equal_times() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            format_stamp(12.5, Some(offset)),
            format_stamp(12.5, Some(offset))
        );
    }

    #[test]
    fn file_ids_lose_whitespace_and_separators() {
        assert_eq!(sanitize_file_id("front door/cam\\1 "), "frontdoorcam1");
        assert_eq!(sanitize_file_id("cam0"), "cam0");
    }
}
