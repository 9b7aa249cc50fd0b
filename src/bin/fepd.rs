//! fepd - filter Frigate's MQTT event stream into actionable alerts.
//!
//! The daemon:
//! 1. Subscribes to Frigate's event topic
//! 2. Runs every tracked object through the admission engine
//!    (per-camera rules, minimum-duration debounce, cooldowns, optional
//!    stationary-object filtering)
//! 3. Republishes admitted events on a separate alert topic for
//!    downstream automations
//!
//! Exit status is zero on signal-driven shutdown and non-zero when the
//! configuration cannot be loaded or the broker connection cannot be set
//! up.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use frigate_event_processor::artifacts::{ArtifactGate, HttpArtifactChecker};
use frigate_event_processor::clock::{Clock, SystemClock};
use frigate_event_processor::config::AppConfig;
use frigate_event_processor::engine::AdmissionEngine;
use frigate_event_processor::frame::decode_event;
use frigate_event_processor::publish::MqttAlertSink;
use frigate_event_processor::transport::{self, InboundMessage};

const DAEMON_NAME: &str = "fepd";

/// Upper bound on the engine loop's wait so shutdown stays responsive.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about = "Frigate event processor daemon")]
struct Args {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long, short = 'c', env = "FEP_CONFIG", default_value = "fep.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    init_logging(&config)?;

    if args.check {
        log::info!("configuration OK ({})", args.config.display());
        return Ok(());
    }

    log::info!("{} starting", DAEMON_NAME);
    log::info!("  MQTT broker: {}:{}", config.mqtt.host, config.mqtt.port);
    log::info!("  listen topic: {}", config.mqtt.listen_topic);
    log::info!("  alert topic: {}", config.mqtt.alert_topic);
    log::info!(
        "  cameras: {}",
        config
            .rules
            .cameras
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.camera.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(base) = config.frigate.base_url() {
        log::info!(
            "  frigate: {} (verify artifacts: {})",
            base,
            config.frigate.verify_artifacts
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    {
        let running = running.clone();
        let tx = tx.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
            let _ = tx.send(InboundMessage::Closed);
        })
        .context("install signal handler")?;
    }

    let (client, connection) = transport::connect(&config.mqtt)?;
    let pump = transport::spawn_pump(
        connection,
        client.clone(),
        config.mqtt.listen_topic.clone(),
        tx,
        running.clone(),
    );

    let sink = MqttAlertSink::new(client.clone(), config.mqtt.alert_topic.clone());
    let mut gate = ArtifactGate::new(
        config.rules.require_snapshot,
        config.rules.require_video,
        config.frigate.base_url(),
    );
    if config.frigate.verify_artifacts {
        if let Some(base) = config.frigate.base_url() {
            gate = gate.with_checker(Box::new(HttpArtifactChecker::new(base)));
        }
    }
    let mut engine = AdmissionEngine::new(
        config.rules.clone(),
        gate,
        Box::new(SystemClock),
        Box::new(sink),
    );

    run_loop(&mut engine, &rx, &running);

    let stats = engine.stats();
    log::info!(
        "{} shutting down: {} frames in, {} alerts out, {} suppressed, {} still live",
        DAEMON_NAME,
        stats.frames,
        stats.admitted,
        stats.suppressed,
        engine.live_events()
    );
    let _ = client.disconnect();
    let _ = pump.join();
    Ok(())
}

fn run_loop(engine: &mut AdmissionEngine, rx: &Receiver<InboundMessage>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let wait = match engine.next_deadline() {
            Some(deadline) => {
                let until = deadline - SystemClock.now();
                Duration::from_secs_f64(until.clamp(0.0, MAX_IDLE_WAIT.as_secs_f64()))
            }
            None => MAX_IDLE_WAIT,
        };
        match rx.recv_timeout(wait) {
            Ok(InboundMessage::Payload(payload)) => match decode_event(&payload) {
                Ok(Some(frame)) => engine.handle_frame(frame),
                Ok(None) => log::debug!("skipping false-positive event frame"),
                Err(e) => log::warn!("dropping malformed event payload: {:#}", e),
            },
            Ok(InboundMessage::Closed) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        engine.fire_due();
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    );
    if let Some(path) = &config.logging.path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}
