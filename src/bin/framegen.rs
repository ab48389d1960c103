//! framegen - publish synthetic frames for demos and end-to-end testing.
//!
//! Generates a moving gradient at a fixed rate and publishes it as raw
//! video or JPEG frames, with a periodic log frame carrying a small
//! annotation record.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framesink::config::parse_broker_endpoint;
use framesink::publisher::{self, SyntheticFrames};
use framesink::now_epoch;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish synthetic media and log frames")]
struct Args {
    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Source identifier carried in every envelope.
    #[arg(long, default_value = "cam0")]
    source_id: String,

    /// Frames per second.
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Publish JPEG-compressed frames instead of raw video frames.
    #[arg(long)]
    jpeg: bool,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 85)]
    jpeg_quality: u8,

    /// Publish a log frame every N image frames; 0 disables.
    #[arg(long, default_value_t = 10)]
    log_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        anyhow::bail!("fps must be greater than zero");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Relaxed);
    })
    .context("install signal handler")?;

    let broker = parse_broker_endpoint(&args.mqtt_broker_addr)?;
    let client_id = format!("framegen-{}", args.source_id);
    let (client, mut connection) = publisher::connect(&broker, &client_id)?;

    // The sync client needs its event loop polled for publishes to flow.
    let poll_stop = stop.clone();
    let poller = thread::Builder::new()
        .name("mqtt-poll".into())
        .spawn(move || {
            while !poll_stop.load(Ordering::Relaxed) {
                match connection.recv_timeout(Duration::from_millis(250)) {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::warn!("mqtt connection: {}", e),
                    Err(_) => {}
                }
            }
        })
        .context("spawn mqtt poll thread")?;

    log::info!(
        "framegen publishing {}x{} at {} fps as {} (source {})",
        args.width,
        args.height,
        args.fps,
        if args.jpeg { "jpeg" } else { "raw video" },
        args.source_id
    );

    let mut frames = SyntheticFrames::new(args.width, args.height);
    let frame_interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let mut published = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let image = frames.next_image();
        let frame_time = now_epoch();
        let annotation = match json!({
            "frame": frames.frame_index(),
            "meta": {"camera": args.source_id},
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };

        let envelope = if args.jpeg {
            publisher::jpeg_envelope(
                &args.source_id,
                frame_time,
                &image,
                annotation.clone(),
                args.jpeg_quality,
            )?
        } else {
            publisher::video_envelope(&args.source_id, frame_time, &image, annotation.clone())
        };
        if let Err(e) = publisher::publish_envelope(&client, &envelope) {
            log::warn!("publish failed: {}", e);
        } else {
            published += 1;
        }

        if publisher::log_frame_due(published, args.log_every) {
            let log_frame = publisher::log_envelope(&args.source_id, frame_time, annotation);
            if let Err(e) = publisher::publish_envelope(&client, &log_frame) {
                log::warn!("log publish failed: {}", e);
            }
        }

        thread::sleep(frame_interval);
    }

    log::info!("stop requested after {} frames", published);
    let _ = client.disconnect();
    if poller.join().is_err() {
        log::warn!("mqtt poll thread panicked");
    }
    Ok(())
}
