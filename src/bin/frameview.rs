//! frameview - subscribe to frame topics and feed a display loop.
//!
//! The subscriber thread decodes frames and hands them off through a
//! bounded queue; the render thread drains the queue on its own cadence,
//! coalescing any backlog down to the newest frame per source. Neither
//! thread ever blocks the other, so decode throughput is independent of
//! refresh pacing. Actual on-screen rendering is left to the embedding
//! environment; this binary reports what would be displayed.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framesink::config::{default_topic_filters, parse_broker_endpoint};
use framesink::{handoff, subscriber, DisplaySettings, FrameReceiver, SubscriberConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch published media frames")]
struct Args {
    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "frameview")]
    mqtt_client_id: String,

    /// Topic filter to subscribe to (repeatable). Defaults to all frame topics.
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Handoff queue capacity between the subscriber and render threads.
    #[arg(long, default_value_t = 16)]
    queue_capacity: usize,

    /// Render loop refresh interval in milliseconds.
    #[arg(long, default_value_t = 50)]
    refresh_ms: u64,

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
        persist: None,
        display: Some(DisplaySettings {
            queue_capacity: args.queue_capacity,
        }),
    };
    config.validate().context("invalid configuration")?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Relaxed);
    })
    .context("install signal handler")?;

    let (sender, receiver) = handoff(args.queue_capacity);
    let render_stop = stop.clone();
    let refresh = Duration::from_millis(args.refresh_ms.max(1));
    let render = thread::Builder::new()
        .name("render".into())
        .spawn(move || render_loop(receiver, render_stop, refresh))
        .context("spawn render thread")?;

    log::info!(
        "frameview starting, broker {}:{}",
        config.broker.host,
        config.broker.port
    );
    let result = subscriber::run(&config, stop.clone(), Some(sender));

    // The subscriber has exited (its sender is dropped); release the render
    // thread and join it before reporting the loop outcome.
    stop.store(true, Ordering::Relaxed);
    if render.join().is_err() {
        log::warn!("render thread panicked");
    }
    result
}

fn render_loop(receiver: FrameReceiver, stop: Arc<AtomicBool>, refresh: Duration) {
    let mut shown: HashMap<String, u64> = HashMap::new();
    let mut coalesced_total = 0usize;
    let mut last_report = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let (latest, drained) = receiver.drain_coalesced();
        coalesced_total += drained.saturating_sub(latest.len());
        for (source_id, image) in latest {
            *shown.entry(source_id.clone()).or_insert(0) += 1;
            if let Some((height, width)) = image.dimensions() {
                log::debug!("display {}: {}x{}", source_id, width, height);
            }
        }

        if last_report.elapsed() >= Duration::from_secs(5) && !shown.is_empty() {
            let mut sources: Vec<String> = shown
                .iter()
                .map(|(source, frames)| format!("{}={}", source, frames))
                .collect();
            sources.sort();
            log::info!(
                "display frames: {} (coalesced {})",
                sources.join(" "),
                coalesced_total
            );
            last_report = Instant::now();
        }

        // Refresh pacing is local to this thread; the subscriber never
        // waits on it.
        thread::sleep(refresh);
    }
}
