//! Frigate Event Processor (FEP)
//!
//! A stateful filter between a Frigate NVR's MQTT event stream and a
//! downstream alert topic. Frigate publishes every tracked-object update;
//! most of those should not wake a human. FEP consumes the raw stream,
//! applies per-camera admission rules, debounces short-lived events,
//! suppresses repeats with cooldowns, optionally drops stationary objects,
//! and republishes a much smaller stream of actionable alerts.
//!
//! # Module Structure
//!
//! - `frame`: Frigate MQTT payload decoding into typed event frames
//! - `rules`: pure admission rule evaluation
//! - `table`: live-event bookkeeping keyed by Frigate event id
//! - `engine`: the admission state machine tying everything together
//! - `clock`: time source and cancellable deferral timers
//! - `cooldown`: per-camera / per-label repeat suppression
//! - `track`: bounding-box history for stationary-object detection
//! - `artifacts`: snapshot/clip availability gating before publish
//! - `publish`: alert serialization and MQTT egress
//! - `transport`: broker connection and the ingress pump
//! - `config`: configuration loading and validation

pub mod artifacts;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod frame;
pub mod publish;
pub mod rules;
pub mod table;
pub mod track;
pub mod transport;

pub use artifacts::{ArtifactChecker, ArtifactGate, ArtifactUrls, HttpArtifactChecker};
pub use clock::{Clock, ManualClock, SystemClock, TimerQueue};
pub use config::AppConfig;
pub use cooldown::{CooldownCheck, CooldownLedger};
pub use engine::{AdmissionEngine, EngineStats};
pub use frame::{decode_event, EventFrame, FrameKind};
pub use publish::{AlertPayload, AlertSink, MqttAlertSink, RecordingSink};
pub use rules::{
    evaluate, AlertRules, CameraRule, Decision, DenyReason, EventSnapshot, TrackingRules,
    ZoneFilter,
};
pub use table::{EventStatus, EventTable, LiveEvent};
pub use track::Track;
