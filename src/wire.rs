//! Wire codec for the multipart frame envelope.
//!
//! One published message carries an ordered sequence of byte-string parts:
//!
//! - `parts[0]`: topic (`VideoFrame`, `JpegFrame`, `LogFrame`), optionally
//!   suffixed with `/<source_id>` by the publisher
//! - `parts[1]`: source id
//! - `parts[2]`: frame time, JSON-encoded seconds since epoch
//! - image topics: `parts[3]` = JSON `{dtype, shape}`, `parts[4]` = pixel or
//!   JPEG buffer, `parts[5]` = JSON annotation record
//! - log topic: `parts[3]` = JSON annotation record
//!
//! The underlying transport delivers a single payload per message, so parts
//! after the topic are framed as u32 little-endian length prefixes followed
//! by the part bytes. `decode` is pure: callers count and log failures.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const VIDEO_TOPIC: &str = "VideoFrame";
pub const JPEG_TOPIC: &str = "JpegFrame";
pub const LOG_TOPIC: &str = "LogFrame";

/// Parts expected for `VideoFrame` / `JpegFrame` messages.
pub const IMAGE_PART_COUNT: usize = 6;
/// Parts expected for `LogFrame` messages.
pub const LOG_PART_COUNT: usize = 4;

/// Maximum accepted length for a single framed part (64 MiB) to prevent
/// memory exhaustion from a corrupt length prefix.
const MAX_PART_LEN: usize = 64 * 1024 * 1024;

/// Decode failure, classified by the stage that rejected the message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has {got} parts, expected {expected}")]
    ShortMessage { got: usize, expected: usize },
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("bad encoding in {stage}: {reason}")]
    BadEncoding { stage: &'static str, reason: String },
}

impl DecodeError {
    fn bad(stage: &'static str, err: impl std::fmt::Display) -> Self {
        DecodeError::BadEncoding {
            stage,
            reason: err.to_string(),
        }
    }
}

/// Logical topic of a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topic {
    Video,
    Jpeg,
    Log,
    Unknown,
}

impl Topic {
    pub fn parse(raw: &str) -> Self {
        match raw {
            VIDEO_TOPIC => Topic::Video,
            JPEG_TOPIC => Topic::Jpeg,
            LOG_TOPIC => Topic::Log,
            _ => Topic::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Video => VIDEO_TOPIC,
            Topic::Jpeg => JPEG_TOPIC,
            Topic::Log => LOG_TOPIC,
            Topic::Unknown => "Unknown",
        }
    }
}

/// How the image buffer on the wire is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireEncoding {
    Raw,
    Jpeg,
}

/// Describes how to reinterpret the pixel buffer as a multi-dimensional array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub dtype: String,
    pub shape: Vec<usize>,
}

/// Image payload as carried on the wire (raw pixels or a JPEG buffer).
#[derive(Clone, Debug, PartialEq)]
pub struct WireImage {
    pub encoding: WireEncoding,
    pub meta: ImageMeta,
    pub data: Vec<u8>,
}

/// Decoded payload of an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum WirePayload {
    Image {
        image: WireImage,
        annotation: Map<String, Value>,
    },
    Log {
        annotation: Map<String, Value>,
    },
}

/// One decoded logical unit of the wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub topic: Topic,
    pub source_id: String,
    pub frame_time: f64,
    pub payload: WirePayload,
}

impl Envelope {
    pub fn annotation(&self) -> &Map<String, Value> {
        match &self.payload {
            WirePayload::Image { annotation, .. } => annotation,
            WirePayload::Log { annotation } => annotation,
        }
    }
}

/// Decode an ordered part sequence into an [`Envelope`].
///
/// Pure over its input; no counters are touched here.
pub fn decode(parts: &[Vec<u8>]) -> Result<Envelope, DecodeError> {
    if parts.len() < 2 {
        return Err(DecodeError::ShortMessage {
            got: parts.len(),
            expected: LOG_PART_COUNT,
        });
    }

    let raw_topic =
        std::str::from_utf8(&parts[0]).map_err(|e| DecodeError::bad("topic", e))?;
    let source_id = std::str::from_utf8(&parts[1])
        .map_err(|e| DecodeError::bad("source_id", e))?
        .to_string();

    // Publishers may suffix the topic with their own id; accept both forms.
    let logical = strip_source_suffix(raw_topic, &source_id);
    let topic = Topic::parse(logical);

    let expected = match topic {
        Topic::Video | Topic::Jpeg => IMAGE_PART_COUNT,
        Topic::Log => LOG_PART_COUNT,
        Topic::Unknown => return Err(DecodeError::UnknownTopic(raw_topic.to_string())),
    };
    if parts.len() != expected {
        return Err(DecodeError::ShortMessage {
            got: parts.len(),
            expected,
        });
    }

    let frame_time: f64 =
        serde_json::from_slice(&parts[2]).map_err(|e| DecodeError::bad("frame_time", e))?;

    let payload = match topic {
        Topic::Video | Topic::Jpeg => {
            let meta: ImageMeta =
                serde_json::from_slice(&parts[3]).map_err(|e| DecodeError::bad("meta", e))?;
            let encoding = if topic == Topic::Jpeg {
                WireEncoding::Jpeg
            } else {
                WireEncoding::Raw
            };
            WirePayload::Image {
                image: WireImage {
                    encoding,
                    meta,
                    data: parts[4].clone(),
                },
                annotation: decode_annotation(&parts[5])?,
            }
        }
        Topic::Log => WirePayload::Log {
            annotation: decode_annotation(&parts[3])?,
        },
        Topic::Unknown => unreachable!(),
    };

    Ok(Envelope {
        topic,
        source_id,
        frame_time,
        payload,
    })
}

/// Encode an envelope into `(wire_topic, framed_payload)`.
///
/// The wire topic carries the `/<source_id>` suffix, exercising the
/// suffix-stripping path on every subscriber.
pub fn encode(envelope: &Envelope) -> Result<(String, Vec<u8>)> {
    let wire_topic = format!("{}/{}", envelope.topic.as_str(), envelope.source_id);
    let mut parts: Vec<Vec<u8>> = vec![
        envelope.source_id.as_bytes().to_vec(),
        serde_json::to_vec(&envelope.frame_time)?,
    ];
    match &envelope.payload {
        WirePayload::Image { image, annotation } => {
            parts.push(serde_json::to_vec(&image.meta)?);
            parts.push(image.data.clone());
            parts.push(serde_json::to_vec(annotation)?);
        }
        WirePayload::Log { annotation } => {
            parts.push(serde_json::to_vec(annotation)?);
        }
    }
    Ok((wire_topic, frame_parts(&parts)))
}

/// Frame parts as u32-LE length prefixes followed by the part bytes.
pub fn frame_parts(parts: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_le_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Reassemble the full part sequence `[topic, part1, ...]` from a received
/// transport topic and framed payload.
pub fn unframe_payload(topic: &[u8], payload: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut parts = vec![topic.to_vec()];
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let len = read_u32(payload, &mut cursor)? as usize;
        if len > MAX_PART_LEN {
            return Err(DecodeError::BadEncoding {
                stage: "framing",
                reason: format!("part length {} exceeds maximum {}", len, MAX_PART_LEN),
            });
        }
        let part = read_slice(payload, &mut cursor, len)?;
        parts.push(part.to_vec());
    }
    Ok(parts)
}

fn strip_source_suffix<'a>(raw_topic: &'a str, source_id: &str) -> &'a str {
    match raw_topic.strip_suffix(source_id) {
        Some(prefix) => prefix.strip_suffix('/').unwrap_or(raw_topic),
        None => raw_topic,
    }
}

fn decode_annotation(part: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    if part.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(part) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(DecodeError::BadEncoding {
            stage: "annotation",
            reason: format!("expected object, got {}", kind_of(&other)),
        }),
        Err(e) => Err(DecodeError::bad("annotation", e)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, DecodeError> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_slice<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a [u8], DecodeError> {
    if *cursor + len > bytes.len() {
        return Err(DecodeError::BadEncoding {
            stage: "framing",
            reason: "truncated payload".to_string(),
        });
    }
    let out = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(out)
}
