//! Alert serialization and MQTT egress.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rumqttc::v5::{mqttbytes::QoS, Client};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::artifacts::ArtifactUrls;
use crate::table::LiveEvent;

/// Payload published on the alert topic for every admitted event.
/// `sub_label` is always present (null when Frigate never set one); the
/// media URLs are omitted entirely when unavailable.
#[derive(Clone, Debug, Serialize)]
pub struct AlertPayload {
    pub event_id: String,
    pub camera: String,
    pub label: String,
    pub sub_label: Option<String>,

    /// ISO-8601 creation time of the upstream Frigate event.
    pub created_at: String,

    pub zones: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_url: Option<String>,

    /// Admission verdict carried on the wire. Currently always "admit".
    pub reason: &'static str,
}

pub const ALERT_REASON_ADMIT: &str = "admit";

impl AlertPayload {
    pub fn from_event(event: &LiveEvent, urls: ArtifactUrls) -> Self {
        Self {
            event_id: event.id.clone(),
            camera: event.camera.clone(),
            label: event.label.clone(),
            sub_label: event.sub_label.clone(),
            created_at: iso8601(event.created),
            zones: event.zones.clone(),
            snapshot_url: urls.snapshot,
            clip_url: urls.clip,
            reason: ALERT_REASON_ADMIT,
        }
    }
}

/// Render an epoch timestamp as ISO-8601 with millisecond precision.
fn iso8601(epoch: f64) -> String {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - epoch.floor()) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Downstream alert submission.
pub trait AlertSink {
    fn publish(&mut self, payload: &AlertPayload) -> Result<()>;
}

/// Publishes alerts over the shared MQTT client, QoS 1, not retained.
pub struct MqttAlertSink {
    client: Client,
    topic: String,
}

impl MqttAlertSink {
    pub fn new(client: Client, topic: String) -> Self {
        Self { client, topic }
    }
}

impl AlertSink for MqttAlertSink {
    fn publish(&mut self, payload: &AlertPayload) -> Result<()> {
        let body = serde_json::to_vec(payload).context("serialize alert payload")?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, body)
            .with_context(|| format!("publish alert to {}", self.topic))?;
        Ok(())
    }
}

/// In-memory sink that records published alerts. Ships as public API so
/// integration tests and dry runs can observe engine output without a
/// broker; clones share the same record list.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    records: Rc<RefCell<Vec<AlertPayload>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AlertPayload> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl AlertSink for RecordingSink {
    fn publish(&mut self, payload: &AlertPayload) -> Result<()> {
        self.records.borrow_mut().push(payload.clone());
        Ok(())
    }
}

pub const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF: Duration = Duration::from_millis(500);

/// Publish with bounded retries and exponential backoff.
///
/// The final error is returned after the last attempt; the caller decides
/// what that means for the event's record.
pub fn publish_with_retry(sink: &mut dyn AlertSink, payload: &AlertPayload) -> Result<()> {
    let mut last_err = None;
    for attempt in 0..PUBLISH_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(PUBLISH_BACKOFF * 2u32.pow(attempt - 1));
        }
        match sink.publish(payload) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!(
                    "alert publish attempt {}/{} failed: {:#}",
                    attempt + 1,
                    PUBLISH_ATTEMPTS,
                    e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("publish failed")))
}
