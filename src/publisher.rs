//! Publishing side of the wire protocol.
//!
//! The subscriber is the core of this crate; publishing support exists so
//! the wire contract has both halves and the binaries can exercise an end
//! to end flow. `SyntheticFrames` generates a moving gradient for demo and
//! load-testing purposes.

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use serde_json::{Map, Value};

use crate::config::BrokerEndpoint;
use crate::route::ImageFrame;
use crate::wire::{self, Envelope, ImageMeta, Topic, WireEncoding, WireImage, WirePayload};

/// Connect a publishing client. The returned `Connection` must be polled
/// (typically from a companion thread) for publishes to make progress.
pub fn connect(broker: &BrokerEndpoint, client_id: &str) -> Result<(Client, Connection)> {
    let mut options = MqttOptions::new(client_id, &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_start(true);
    let (client, connection) = Client::new(options, 64);
    Ok((client, connection))
}

/// Encode and publish one envelope, at-most-once.
pub fn publish_envelope(client: &Client, envelope: &Envelope) -> Result<()> {
    let (topic, payload) = wire::encode(envelope)?;
    client
        .publish(topic, QoS::AtMostOnce, false, payload)
        .context("mqtt publish")?;
    Ok(())
}

/// Build a raw video envelope from a pixel frame.
pub fn video_envelope(
    source_id: &str,
    frame_time: f64,
    image: &ImageFrame,
    annotation: Map<String, Value>,
) -> Envelope {
    Envelope {
        topic: Topic::Video,
        source_id: source_id.to_string(),
        frame_time,
        payload: WirePayload::Image {
            image: WireImage {
                encoding: WireEncoding::Raw,
                meta: ImageMeta {
                    dtype: image.dtype.clone(),
                    shape: image.shape.clone(),
                },
                data: image.data.clone(),
            },
            annotation,
        },
    }
}

/// Build a JPEG envelope, compressing the pixel frame at the given quality.
pub fn jpeg_envelope(
    source_id: &str,
    frame_time: f64,
    image: &ImageFrame,
    annotation: Map<String, Value>,
    quality: u8,
) -> Result<Envelope> {
    let Some((height, width)) = image.dimensions() else {
        anyhow::bail!("unsupported image shape {:?}", image.shape);
    };
    let rgb = image::RgbImage::from_raw(width as u32, height as u32, image.data.clone())
        .context("pixel buffer does not match shape")?;
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&rgb)
        .context("jpeg encode")?;
    Ok(Envelope {
        topic: Topic::Jpeg,
        source_id: source_id.to_string(),
        frame_time,
        payload: WirePayload::Image {
            image: WireImage {
                encoding: WireEncoding::Jpeg,
                meta: ImageMeta {
                    dtype: "uint8".to_string(),
                    shape: image.shape.clone(),
                },
                data: jpeg,
            },
            annotation,
        },
    })
}

/// Build a log envelope from an annotation record.
pub fn log_envelope(source_id: &str, frame_time: f64, annotation: Map<String, Value>) -> Envelope {
    Envelope {
        topic: Topic::Log,
        source_id: source_id.to_string(),
        frame_time,
        payload: WirePayload::Log { annotation },
    }
}

/// Whether a periodic log frame is due after `published` image frames.
/// Never due before the first successful publish; 0 disables the cadence.
pub fn log_frame_due(published: u64, log_every: u64) -> bool {
    log_every > 0 && published > 0 && published % log_every == 0
}

/// Moving-gradient RGB frame generator for demos and load tests.
pub struct SyntheticFrames {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticFrames {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    pub fn next_image(&mut self) -> ImageFrame {
        let t = self.tick;
        self.tick = self.tick.wrapping_add(1);
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x as u64 + t) % 256) as u8);
                data.push(((y as u64 + t / 2) % 256) as u8);
                data.push((t % 256) as u8);
            }
        }
        ImageFrame {
            dtype: "uint8".to_string(),
            shape: vec![self.height as usize, self.width as usize, 3],
            data,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.tick
    }
}
