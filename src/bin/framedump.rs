//! framedump - subscribe to frame topics and persist them to disk.
//!
//! Images are written one file per persisted frame; log records are grouped
//! into time-bounded rotating files. Both are staged and atomically renamed
//! so partially written files are never visible under their final names.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framesink::config::{
    default_topic_filters, parse_broker_endpoint, parse_image_encoding, parse_key_path,
    parse_utc_offset, split_csv,
};
use framesink::{subscriber, PersistSettings, SubscriberConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Persist published media and log frames to disk")]
struct Args {
    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "framedump")]
    mqtt_client_id: String,

    /// Topic filter to subscribe to (repeatable). Defaults to all frame topics.
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Directory for persisted images.
    #[arg(long, env = "FRAMESINK_IMAGE_DIR", default_value = "images")]
    image_dir: PathBuf,

    /// Directory for rotating log files.
    #[arg(long, env = "FRAMESINK_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Dot-separated annotation key path for the image file id
    /// (e.g. "meta.camera"). Falls back to the source id.
    #[arg(long, env = "FRAMESINK_FILE_ID_PATH", default_value = "")]
    file_id_path: String,

    /// Fixed UTC offset for file-name timestamps (e.g. +09:00).
    /// Local offset when unset.
    #[arg(long, env = "FRAMESINK_UTC_OFFSET")]
    utc_offset: Option<String>,

    /// Minimum spacing between persisted frames, in seconds. 0 persists all.
    #[arg(long, default_value_t = 0.0)]
    inhibition_secs: f64,

    /// Log window duration in seconds (>= 1).
    #[arg(long, default_value_t = 60.0)]
    log_dump_interval: f64,

    /// Flatten nested annotation records into dotted keys before writing.
    #[arg(long)]
    flatten: bool,

    /// Comma-separated field list; selects CSV output restricted to these
    /// fields. JSON-lines when unset.
    #[arg(long)]
    csv_fields: Option<String>,

    /// Image file format: jpeg or bmp.
    #[arg(long, default_value = "jpeg")]
    image_format: String,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 85)]
    jpeg_quality: u8,

    /// Stats reporting interval in seconds; 0 disables.
    #[arg(long, default_value_t = 10.0)]
    stats_interval: f64,

    /// Poll timeout in milliseconds; bounds shutdown latency.
    #[arg(long, default_value_t = 100)]
    poll_timeout_ms: u64,

    /// Suppress the stdout echo of received log records.
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SubscriberConfig {
        broker: parse_broker_endpoint(&args.mqtt_broker_addr)?,
        client_id: args.mqtt_client_id,
        topics: if args.topics.is_empty() {
            default_topic_filters()
        } else {
            args.topics
        },
        poll_timeout: Duration::from_millis(args.poll_timeout_ms),
        stats_interval: args.stats_interval,
        quiet: args.quiet,
        persist: Some(PersistSettings {
            image_dir: args.image_dir,
            log_dir: args.log_dir,
            image_encoding: parse_image_encoding(&args.image_format, args.jpeg_quality)?,
            file_id_path: parse_key_path(&args.file_id_path),
            inhibition_secs: args.inhibition_secs,
            log_dump_interval: args.log_dump_interval,
            flatten: args.flatten,
            csv_fields: args.csv_fields.as_deref().map(split_csv),
            utc_offset: args
                .utc_offset
                .as_deref()
                .map(parse_utc_offset)
                .transpose()?,
        }),
        display: None,
    };
    config.validate().context("invalid configuration")?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Relaxed);
    })
    .context("install signal handler")?;

    log::info!(
        "framedump starting, broker {}:{}",
        config.broker.host,
        config.broker.port
    );
    subscriber::run(&config, stop, None)
}
