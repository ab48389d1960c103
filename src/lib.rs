//! framesink
//!
//! Subscriber/demultiplexer and persistence engine for tagged media and log
//! frames streamed over MQTT.
//!
//! # Architecture
//!
//! One published message is a multipart envelope (topic, source id, frame
//! time, payload). The subscriber thread runs the full ingest path and owns
//! every piece of persistent state:
//!
//! - `wire`: pure multipart codec with a classified error taxonomy
//! - `route`: topic dispatch, JPEG payloads decoded to raw pixels
//! - `stats`: rolling delivery counters reported between poll cycles
//! - `inhibit`: minimum spacing between persisted frames
//! - `persist`: staged, atomically-renamed image files and rotating log
//!   windows; a reader never observes a half-written file
//! - `handoff`: the only state shared with the render thread, a bounded
//!   queue that neither side ever blocks on
//!
//! Delivery is at-most-once and best-effort: malformed messages and failed
//! writes are counted and skipped, never retried, and never stop the loop.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod annotation;
pub mod config;
pub mod handoff;
pub mod inhibit;
pub mod persist;
pub mod publisher;
pub mod route;
pub mod stats;
pub mod subscriber;
pub mod wire;

pub use config::{DisplaySettings, PersistSettings, SubscriberConfig};
pub use handoff::{handoff, FrameReceiver, FrameSender, QueueFull};
pub use inhibit::InhibitGate;
pub use persist::{ImageEncoding, ImageWriter, LogFormat, PersistError, RotatingLog};
pub use route::{ImageFrame, Routed, RoutedPayload};
pub use stats::{DeliveryStats, StatsReport};
pub use subscriber::Pipeline;
pub use wire::{DecodeError, Envelope, Topic, WirePayload};

/// Wall clock as float seconds since the epoch, the time domain shared with
/// publishers' `frame_time`. A pre-epoch clock degrades to 0.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
