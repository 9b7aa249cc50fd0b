//! MQTT connection plumbing.
//!
//! Builds broker options and runs the ingress pump thread. The pump
//! iterates the rumqttc connection, resubscribes after every reconnect,
//! and forwards raw publish payloads to the engine loop's channel. Frame
//! decoding happens on the engine side so malformed payloads are counted
//! and logged in one place.

use anyhow::Result;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MqttConfig;

/// Messages handed from the MQTT pump to the engine loop.
pub enum InboundMessage {
    /// Raw payload from the listen topic.
    Payload(Vec<u8>),
    /// The pump stopped: shutdown requested or the channel went away.
    Closed,
}

/// Request-queue depth between engine publishes and the connection thread.
pub const MQTT_CHANNEL_CAPACITY: usize = 64;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Build the MQTT client and its connection from configuration.
pub fn connect(cfg: &MqttConfig) -> Result<(Client, Connection)> {
    let mut options = MqttOptions::new(cfg.client_id.as_str(), cfg.host.as_str(), cfg.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_start(true);
    if let Some(username) = &cfg.username {
        options.set_credentials(username, cfg.password.clone().unwrap_or_default());
    }
    Ok(Client::new(options, MQTT_CHANNEL_CAPACITY))
}

/// Spawn the ingress pump.
///
/// rumqttc reconnects when the connection keeps being polled after an
/// error; the broker forgets a clean-start session on reconnect, so the
/// subscription is re-issued on every `ConnAck`.
pub fn spawn_pump(
    mut connection: Connection,
    client: Client,
    listen_topic: String,
    tx: Sender<InboundMessage>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    log::info!("connected to MQTT broker");
                    match client.subscribe(listen_topic.as_str(), QoS::AtMostOnce) {
                        Ok(()) => log::info!("subscribed to {}", listen_topic),
                        Err(e) => log::error!("subscribe to {} failed: {}", listen_topic, e),
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if tx
                        .send(InboundMessage::Payload(publish.payload.to_vec()))
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        "MQTT connection error: {}; retrying in {}s",
                        e,
                        RECONNECT_DELAY.as_secs()
                    );
                    std::thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        let _ = tx.send(InboundMessage::Closed);
        log::debug!("MQTT pump stopped");
    })
}
