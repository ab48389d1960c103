//! Subscriber loop and per-message pipeline.
//!
//! The per-message pipeline is independent of the transport so it can be
//! driven directly in tests; the subscriber loop is MQTT glue over it.
//! Every decode, route, and persist failure is classified, counted as a
//! drop, and the loop continues. Only transport failures stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};

use crate::annotation;
use crate::config::SubscriberConfig;
use crate::handoff::FrameSender;
use crate::inhibit::InhibitGate;
use crate::now_epoch;
use crate::persist::{ImageWriter, LogFormat, RotatingLog};
use crate::route::{self, RoutedPayload};
use crate::stats::DeliveryStats;
use crate::wire;

struct Persistence {
    gate: InhibitGate,
    images: ImageWriter,
    log: RotatingLog,
}

/// Per-message processing state, exclusively owned by the subscriber thread.
pub struct Pipeline {
    stats: DeliveryStats,
    quiet: bool,
    persistence: Option<Persistence>,
    sender: Option<FrameSender>,
}

impl Pipeline {
    pub fn new(config: &SubscriberConfig, sender: Option<FrameSender>, now: f64) -> Self {
        let persistence = config.persist.as_ref().map(|p| Persistence {
            gate: InhibitGate::new(p.inhibition_secs),
            images: ImageWriter::new(
                &p.image_dir,
                p.image_encoding,
                p.file_id_path.clone(),
                p.utc_offset,
            ),
            log: RotatingLog::new(
                &p.log_dir,
                p.log_dump_interval,
                match &p.csv_fields {
                    Some(fields) => LogFormat::Csv {
                        fields: fields.clone(),
                    },
                    None => LogFormat::JsonLines,
                },
                p.flatten,
                p.utc_offset,
            ),
        });
        Self {
            stats: DeliveryStats::new(config.stats_interval, now),
            quiet: config.quiet,
            persistence,
            sender,
        }
    }

    /// Process one received message. Never fails: malformed input is
    /// dropped, counted, and logged.
    pub fn ingest(&mut self, wire_topic: &[u8], payload: &[u8], now: f64) {
        let parts = match wire::unframe_payload(wire_topic, payload) {
            Ok(parts) => parts,
            Err(e) => return self.drop_message(e),
        };
        let envelope = match wire::decode(&parts) {
            Ok(envelope) => envelope,
            Err(e) => return self.drop_message(e),
        };
        let routed = match route::route(envelope) {
            Ok(routed) => routed,
            Err(e) => return self.drop_message(e),
        };

        let frame_time = routed.frame_time;
        match routed.payload {
            RoutedPayload::Image { image, annotation } => {
                if let Some(p) = &mut self.persistence {
                    if p.gate.admit(now) {
                        if let Err(e) =
                            p.images
                                .write(frame_time, &routed.source_id, &annotation, &image)
                        {
                            log::warn!("image persist failed ({}): {}", routed.source_id, e);
                            self.stats.note_dropped();
                            return;
                        }
                    }
                }
                if let Some(sender) = &self.sender {
                    if sender.send(routed.source_id.clone(), image).is_err() {
                        // Queue full: diagnostics only, the frame is lost.
                        log::debug!("display queue full, frame from {} skipped", routed.source_id);
                    }
                }
            }
            RoutedPayload::Log { mut annotation } => {
                annotation::merge_reserved(&mut annotation, &routed.source_id, frame_time);
                if !self.quiet {
                    match annotation::to_json_line(&annotation) {
                        Ok(line) => println!("{}", line),
                        Err(e) => log::warn!("annotation echo failed: {}", e),
                    }
                }
                if let Some(p) = &mut self.persistence {
                    if p.gate.admit(now) {
                        if let Err(e) = p.log.append(&annotation, frame_time) {
                            log::warn!("log persist failed ({}): {}", routed.source_id, e);
                            self.stats.note_dropped();
                            return;
                        }
                    }
                }
            }
        }
        self.stats.note_received(frame_time, now);
    }

    /// Between-poll housekeeping: window rotation deadline and stats report.
    /// Runs on every loop iteration, with or without traffic.
    pub fn idle(&mut self, now: f64) {
        if let Some(p) = &mut self.persistence {
            match p.log.maybe_rotate(now) {
                Ok(Some(path)) => log::info!("log window published: {}", path.display()),
                Ok(None) => {}
                Err(e) => log::warn!("log window rotation failed: {}", e),
            }
        }
        if let Some(report) = self.stats.tick(now) {
            log::info!("{}", report);
        }
    }

    /// Force-close any open log window. Called once on loop exit.
    pub fn shutdown(&mut self) {
        if let Some(p) = &mut self.persistence {
            match p.log.close() {
                Ok(Some(path)) => log::info!("log window published: {}", path.display()),
                Ok(None) => {}
                Err(e) => log::warn!("closing log window failed: {}", e),
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.stats.received()
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped()
    }

    fn drop_message(&mut self, error: wire::DecodeError) {
        log::debug!("message dropped: {}", error);
        self.stats.note_dropped();
    }
}

/// Run the subscriber loop until the stop flag is raised or the transport
/// fails. Decoded image frames go to `sender` when display is enabled.
pub fn run(
    config: &SubscriberConfig,
    stop: Arc<AtomicBool>,
    sender: Option<FrameSender>,
) -> Result<()> {
    let mut pipeline = Pipeline::new(config, sender, now_epoch());
    let (client, mut connection) = connect(config)?;
    for filter in &config.topics {
        client
            .subscribe(filter.clone(), QoS::AtMostOnce)
            .with_context(|| format!("subscribe to {}", filter))?;
    }
    log::info!(
        "subscribed to {} filter(s) on {}:{}",
        config.topics.len(),
        config.broker.host,
        config.broker.port
    );

    let result = poll_loop(config, &mut pipeline, &mut connection, &stop);
    pipeline.shutdown();
    let _ = client.disconnect();
    result
}

fn poll_loop(
    config: &SubscriberConfig,
    pipeline: &mut Pipeline,
    connection: &mut Connection,
    stop: &AtomicBool,
) -> Result<()> {
    while !stop.load(Ordering::Relaxed) {
        match connection.recv_timeout(config.poll_timeout) {
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                pipeline.ingest(&publish.topic, &publish.payload, now_epoch());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(e).context("mqtt transport failed");
            }
            // Poll timeout, or the event channel closed mid-shutdown. A
            // dead link surfaces as a transport error on a later recv.
            Err(_) => {}
        }
        // Rotation deadline and stats are wall-clock driven; check every
        // cycle so an idle subscriber still publishes expired windows.
        pipeline.idle(now_epoch());
    }
    log::info!("stop requested, subscriber exiting");
    Ok(())
}

fn connect(config: &SubscriberConfig) -> Result<(Client, Connection)> {
    let mut options = MqttOptions::new(
        config.client_id.clone(),
        &config.broker.host,
        config.broker.port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_start(true);
    let (client, connection) = Client::new(options, 64);
    Ok((client, connection))
}
