//! Validated subscriber/publisher configuration.
//!
//! Binaries build these structs from their CLI arguments and call
//! `validate()` before handing them to the core; the core only ever sees
//! pre-validated configuration. Validation failures are fatal at startup.

use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use std::path::PathBuf;
use std::time::Duration;

use crate::persist::ImageEncoding;
use crate::wire::{JPEG_TOPIC, LOG_TOPIC, VIDEO_TOPIC};

/// MQTT broker endpoint. The subscriber only ever connects; fan-in of
/// multiple publishers happens at the broker.
#[derive(Clone, Debug)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Settings for the persisting variant.
#[derive(Clone, Debug)]
pub struct PersistSettings {
    pub image_dir: PathBuf,
    pub log_dir: PathBuf,
    pub image_encoding: ImageEncoding,
    /// Dot-separated key path into the annotation for the image file id.
    pub file_id_path: Vec<String>,
    /// Minimum spacing between persisted frames, seconds, >= 0.
    pub inhibition_secs: f64,
    /// Log window duration, seconds, >= 1.
    pub log_dump_interval: f64,
    pub flatten: bool,
    /// `Some` selects CSV output restricted to these fields; `None` selects
    /// JSON-lines.
    pub csv_fields: Option<Vec<String>>,
    pub utc_offset: Option<FixedOffset>,
}

/// Settings for the display variant.
#[derive(Clone, Debug)]
pub struct DisplaySettings {
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    pub broker: BrokerEndpoint,
    pub client_id: String,
    /// MQTT topic filters to subscribe to.
    pub topics: Vec<String>,
    /// Bound on each poll, which also bounds shutdown latency.
    pub poll_timeout: Duration,
    /// Stats reporting interval in seconds; 0 disables.
    pub stats_interval: f64,
    /// Suppress the stdout echo of received log records.
    pub quiet: bool,
    pub persist: Option<PersistSettings>,
    pub display: Option<DisplaySettings>,
}

impl SubscriberConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(anyhow!("broker host must not be empty"));
        }
        if self.topics.is_empty() {
            return Err(anyhow!("at least one topic filter is required"));
        }
        if self.poll_timeout.is_zero() {
            return Err(anyhow!("poll timeout must be greater than zero"));
        }
        if !self.stats_interval.is_finite() || self.stats_interval < 0.0 {
            return Err(anyhow!("stats interval must be >= 0 seconds"));
        }
        if let Some(persist) = &self.persist {
            persist.validate()?;
        }
        if let Some(display) = &self.display {
            if display.queue_capacity == 0 {
                return Err(anyhow!("display queue capacity must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl PersistSettings {
    fn validate(&self) -> Result<()> {
        if !self.inhibition_secs.is_finite() || self.inhibition_secs < 0.0 {
            return Err(anyhow!("inhibition period must be >= 0 seconds"));
        }
        if !self.log_dump_interval.is_finite() || self.log_dump_interval < 1.0 {
            return Err(anyhow!("log dump interval must be >= 1 second"));
        }
        if let ImageEncoding::Jpeg { quality } = self.image_encoding {
            if quality == 0 || quality > 100 {
                return Err(anyhow!("jpeg quality must be in 1..=100"));
            }
        }
        if let Some(fields) = &self.csv_fields {
            if fields.is_empty() {
                return Err(anyhow!("csv field list must not be empty"));
            }
        }
        for dir in [&self.image_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("output directory {} is unusable: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

/// Default subscription filters covering all frame topics, with or without
/// publisher-appended source suffixes.
pub fn default_topic_filters() -> Vec<String> {
    [VIDEO_TOPIC, JPEG_TOPIC, LOG_TOPIC]
        .iter()
        .flat_map(|t| [t.to_string(), format!("{}/#", t)])
        .collect()
}

/// Parse `host:port` into a broker endpoint.
pub fn parse_broker_endpoint(addr: &str) -> Result<BrokerEndpoint> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("broker address '{}' must be host:port", addr))?;
    if host.is_empty() {
        return Err(anyhow!("broker address '{}' has an empty host", addr));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("broker address '{}' has an invalid port", addr))?;
    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
    })
}

/// Parse a UTC offset of the form `+HH:MM`, `-HH:MM`, `+HHMM` or `-HHMM`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let err = || anyhow!("invalid utc offset '{}'; expected e.g. +09:00 or -0530", raw);
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1i32, &raw[1..]),
        Some(b'-') => (-1i32, &raw[1..]),
        _ => return Err(err()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(err());
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    if hours > 23 || minutes > 59 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

/// Parse a dot-separated annotation key path; empty input means "unset".
pub fn parse_key_path(raw: &str) -> Vec<String> {
    raw.split('.')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parse an image format name plus quality into an encoding.
pub fn parse_image_encoding(format: &str, jpeg_quality: u8) -> Result<ImageEncoding> {
    match format.to_ascii_lowercase().as_str() {
        "jpeg" | "jpg" => Ok(ImageEncoding::Jpeg {
            quality: jpeg_quality,
        }),
        "bmp" => Ok(ImageEncoding::Bmp),
        other => Err(anyhow!(
            "unknown image format '{}'; expected jpeg or bmp",
            other
        )),
    }
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
