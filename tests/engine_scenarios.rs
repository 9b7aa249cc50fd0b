//! End-to-end admission scenarios, driven through the engine with a
//! hand-advanced clock and an in-memory alert sink.
//!
//! These cover the externally observable contract:
//! 1. At most one publish per event id
//! 2. Cooldown spacing between publishes for a camera/label
//! 3. Events shorter than the minimum duration never publish
//! 4. Suppressions are sticky except for artifact arrival
//! 5. Out-of-order frames cannot revert event state

use std::time::Duration;

use frigate_event_processor::artifacts::ArtifactGate;
use frigate_event_processor::clock::ManualClock;
use frigate_event_processor::engine::AdmissionEngine;
use frigate_event_processor::frame::{EventFrame, FrameKind};
use frigate_event_processor::publish::{AlertPayload, RecordingSink};
use frigate_event_processor::rules::{AlertRules, CameraRule, DenyReason, ZoneFilter};
use frigate_event_processor::table::EventStatus;

const T0: f64 = 1_700_000_000.0;

fn camera_rule(camera: &str, labels: &[&str]) -> CameraRule {
    CameraRule {
        camera: camera.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        require: Vec::new(),
        ignore: Vec::new(),
        enabled: true,
    }
}

fn zone_filter(zone: &str, labels: &[&str]) -> ZoneFilter {
    ZoneFilter {
        zone: zone.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}

fn rules_for(cameras: Vec<CameraRule>) -> AlertRules {
    AlertRules {
        cameras,
        ..AlertRules::default()
    }
}

struct Harness {
    clock: ManualClock,
    sink: RecordingSink,
    engine: AdmissionEngine,
}

impl Harness {
    fn new(rules: AlertRules) -> Self {
        let clock = ManualClock::new(T0);
        let sink = RecordingSink::new();
        let gate = ArtifactGate::new(rules.require_snapshot, rules.require_video, None);
        let engine = AdmissionEngine::new(
            rules,
            gate,
            Box::new(clock.clone()),
            Box::new(sink.clone()),
        );
        Self {
            clock,
            sink,
            engine,
        }
    }

    /// Move the clock to an absolute offset from T0.
    fn at(&self, offset: f64) {
        self.clock.set(T0 + offset);
    }

    fn push(&mut self, frame: EventFrame) {
        self.engine.handle_frame(frame);
        self.engine.fire_due();
    }

    fn tick(&mut self) {
        self.engine.fire_due();
    }

    fn alerts(&self) -> Vec<AlertPayload> {
        self.sink.records()
    }

    fn status(&self, id: &str) -> Option<EventStatus> {
        self.engine.status(id)
    }
}

fn new_frame(id: &str, camera: &str, label: &str, created: f64) -> EventFrame {
    EventFrame {
        kind: FrameKind::New,
        id: id.to_string(),
        camera: camera.to_string(),
        label: label.to_string(),
        sub_label: None,
        created,
        updated: created,
        zones: Vec::new(),
        center: Some((0.5, 0.5)),
        has_snapshot: true,
        has_clip: true,
    }
}

fn update_frame(id: &str, camera: &str, label: &str, created: f64, at: f64) -> EventFrame {
    EventFrame {
        kind: FrameKind::Update,
        updated: at,
        ..new_frame(id, camera, label, created)
    }
}

fn end_frame(id: &str, camera: &str, label: &str, created: f64, at: f64) -> EventFrame {
    EventFrame {
        kind: FrameKind::End,
        updated: at,
        ..new_frame(id, camera, label, created)
    }
}

// ==================== Basic admission ====================

#[test]
fn immediate_admit_publishes_once() {
    let mut h = Harness::new(rules_for(vec![camera_rule("yard", &["person"])]));

    h.push(new_frame("A", "yard", "person", T0));
    assert_eq!(h.alerts().len(), 1, "publish right after new");

    h.at(3.0);
    h.push(end_frame("A", "yard", "person", T0, T0 + 3.0));
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.status("A"), None, "record removed after end");

    let alert = &h.alerts()[0];
    assert_eq!(alert.event_id, "A");
    assert_eq!(alert.camera, "yard");
    assert_eq!(alert.label, "person");
    assert_eq!(alert.created_at, "2023-11-14T22:13:20.000Z");
}

#[test]
fn updates_after_admission_do_not_republish() {
    let mut h = Harness::new(rules_for(vec![camera_rule("yard", &["person"])]));

    h.push(new_frame("A", "yard", "person", T0));
    for i in 1..=5 {
        h.at(i as f64);
        h.push(update_frame("A", "yard", "person", T0, T0 + i as f64));
    }
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.status("A"), Some(EventStatus::Admitted));
}

#[test]
fn unmatched_camera_never_publishes() {
    let mut h = Harness::new(rules_for(vec![camera_rule("yard", &["person"])]));

    h.push(new_frame("X", "garage", "person", T0));
    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("X"),
        Some(EventStatus::Suppressed(DenyReason::NoRule))
    );
}

// ==================== Deferral ====================

#[test]
fn deferral_cancelled_by_early_end() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.min_event_duration = Duration::from_secs(2);
    let mut h = Harness::new(rules);

    h.push(new_frame("B", "yard", "person", T0));
    assert!(h.alerts().is_empty(), "still deferred");

    h.at(1.0);
    h.push(end_frame("B", "yard", "person", T0, T0 + 1.0));

    h.at(3.0);
    h.tick();
    assert!(h.alerts().is_empty(), "cancelled deferral must not fire");
}

#[test]
fn deferral_fires_after_minimum_duration() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.min_event_duration = Duration::from_secs(2);
    let mut h = Harness::new(rules);

    h.push(new_frame("B", "yard", "person", T0));
    h.at(1.9);
    h.tick();
    assert!(h.alerts().is_empty());

    h.at(2.0);
    h.tick();
    assert_eq!(h.alerts().len(), 1);
}

// ==================== Cooldown ====================

#[test]
fn label_cooldown_blocks_second_event() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.label_cooldown = Duration::from_secs(60);
    let mut h = Harness::new(rules);

    h.push(new_frame("A", "yard", "person", T0));
    assert_eq!(h.alerts().len(), 1);

    h.at(10.0);
    h.push(new_frame("C", "yard", "person", T0 + 10.0));
    assert_eq!(h.alerts().len(), 1, "second event lands in the cooldown");
    assert_eq!(
        h.status("C"),
        Some(EventStatus::Suppressed(DenyReason::Cooldown))
    );

    h.at(15.0);
    h.push(end_frame("C", "yard", "person", T0 + 10.0, T0 + 15.0));
    assert_eq!(h.alerts().len(), 1);
}

#[test]
fn cooldown_expires_and_alerts_flow_again() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.label_cooldown = Duration::from_secs(60);
    let mut h = Harness::new(rules);

    h.push(new_frame("A", "yard", "person", T0));
    h.at(61.0);
    h.push(new_frame("C", "yard", "person", T0 + 61.0));
    assert_eq!(h.alerts().len(), 2);
}

#[test]
fn camera_cooldown_blocks_across_labels() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person", "dog"])]);
    rules.camera_cooldown = Duration::from_secs(60);
    let mut h = Harness::new(rules);

    h.push(new_frame("A", "yard", "person", T0));
    h.at(10.0);
    h.push(new_frame("D", "yard", "dog", T0 + 10.0));
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(
        h.status("D"),
        Some(EventStatus::Suppressed(DenyReason::Cooldown))
    );
}

#[test]
fn cooldown_suppression_is_sticky() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.label_cooldown = Duration::from_secs(30);
    let mut h = Harness::new(rules);

    h.push(new_frame("A", "yard", "person", T0));
    h.at(10.0);
    h.push(new_frame("C", "yard", "person", T0 + 10.0));
    assert_eq!(
        h.status("C"),
        Some(EventStatus::Suppressed(DenyReason::Cooldown))
    );

    // Updates far past the window must not resurrect the suppressed event.
    h.at(120.0);
    h.push(update_frame("C", "yard", "person", T0 + 10.0, T0 + 120.0));
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(
        h.status("C"),
        Some(EventStatus::Suppressed(DenyReason::Cooldown))
    );
}

// ==================== Zones ====================

#[test]
fn ignored_zone_suppresses() {
    let mut rule = camera_rule("front_door", &["car"]);
    rule.ignore = vec![zone_filter("street", &["car"])];
    let mut h = Harness::new(rules_for(vec![rule]));

    let mut frame = new_frame("D", "front_door", "car", T0);
    frame.zones = vec!["street".to_string(), "driveway".to_string()];
    h.push(frame);

    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("D"),
        Some(EventStatus::Suppressed(DenyReason::IgnoredZone))
    );
}

#[test]
fn ignored_zone_suppression_outlives_the_zone() {
    let mut rule = camera_rule("front_door", &["car"]);
    rule.ignore = vec![zone_filter("street", &["*"])];
    let mut h = Harness::new(rules_for(vec![rule]));

    let mut frame = new_frame("D", "front_door", "car", T0);
    frame.zones = vec!["street".to_string()];
    h.push(frame);

    // The car leaves the ignored zone; the event stays suppressed.
    h.at(5.0);
    let mut update = update_frame("D", "front_door", "car", T0, T0 + 5.0);
    update.zones = vec!["driveway".to_string()];
    h.push(update);

    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("D"),
        Some(EventStatus::Suppressed(DenyReason::IgnoredZone))
    );
}

#[test]
fn required_zone_gained_on_update_publishes() {
    let mut rule = camera_rule("porch", &["person"]);
    rule.require = vec![zone_filter("steps", &["person"])];
    let mut rules = rules_for(vec![rule]);
    rules.min_event_duration = Duration::from_secs(1);
    let mut h = Harness::new(rules);

    let mut frame = new_frame("E", "porch", "person", T0);
    frame.zones = vec!["yard".to_string()];
    h.push(frame);
    assert!(h.alerts().is_empty());

    // The deferral fires with the zone still missing; the event waits.
    h.at(1.0);
    h.tick();
    assert!(h.alerts().is_empty());
    assert_eq!(h.status("E"), Some(EventStatus::Pending));

    h.at(1.2);
    let mut update = update_frame("E", "porch", "person", T0, T0 + 1.2);
    update.zones = vec!["yard".to_string(), "steps".to_string()];
    h.push(update);

    assert_eq!(h.alerts().len(), 1, "publish at/after the update");
    assert_eq!(h.status("E"), Some(EventStatus::Admitted));
}

#[test]
fn required_zone_never_gained_never_publishes() {
    let mut rule = camera_rule("porch", &["person"]);
    rule.require = vec![zone_filter("steps", &["*"])];
    let mut h = Harness::new(rules_for(vec![rule]));

    let mut frame = new_frame("E", "porch", "person", T0);
    frame.zones = vec!["yard".to_string()];
    h.push(frame);
    h.at(30.0);
    h.tick();
    h.push(end_frame("E", "porch", "person", T0, T0 + 30.0));

    assert!(h.alerts().is_empty());
    assert_eq!(h.status("E"), None);
}

// ==================== Stationary tracking ====================

#[test]
fn stationary_object_is_suppressed() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.min_event_duration = Duration::from_secs(2);
    rules.tracking.enabled = true;
    let mut h = Harness::new(rules);

    h.push(new_frame("F", "yard", "person", T0));
    for (i, center) in [(0.502, 0.500), (0.504, 0.501), (0.505, 0.5005)]
        .iter()
        .enumerate()
    {
        let offset = 0.5 * (i + 1) as f64;
        h.at(offset);
        let mut update = update_frame("F", "yard", "person", T0, T0 + offset);
        update.center = Some(*center);
        h.push(update);
    }

    h.at(2.0);
    let mut update = update_frame("F", "yard", "person", T0, T0 + 2.0);
    update.center = Some((0.506, 0.500));
    h.push(update);

    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("F"),
        Some(EventStatus::Suppressed(DenyReason::Stationary))
    );
}

#[test]
fn moving_object_is_not_stationary() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.min_event_duration = Duration::from_secs(2);
    rules.tracking.enabled = true;
    let mut h = Harness::new(rules);

    h.push(new_frame("G", "yard", "person", T0));
    h.at(1.0);
    let mut update = update_frame("G", "yard", "person", T0, T0 + 1.0);
    update.center = Some((0.6, 0.6));
    h.push(update);

    h.at(2.0);
    let mut update = update_frame("G", "yard", "person", T0, T0 + 2.0);
    update.center = Some((0.7, 0.7));
    h.push(update);

    assert_eq!(h.alerts().len(), 1);
}

#[test]
fn tracking_disabled_ignores_stillness() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.min_event_duration = Duration::from_secs(2);
    let mut h = Harness::new(rules);

    h.push(new_frame("F", "yard", "person", T0));
    h.at(2.0);
    h.push(update_frame("F", "yard", "person", T0, T0 + 2.0));

    assert_eq!(h.alerts().len(), 1);
}

// ==================== Artifacts ====================

#[test]
fn missing_snapshot_suppresses_until_it_arrives() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.require_snapshot = true;
    let mut h = Harness::new(rules);

    let mut frame = new_frame("H", "yard", "person", T0);
    frame.has_snapshot = false;
    h.push(frame);
    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("H"),
        Some(EventStatus::Suppressed(DenyReason::NoSnapshot))
    );

    h.at(5.0);
    h.push(update_frame("H", "yard", "person", T0, T0 + 5.0));
    assert_eq!(h.alerts().len(), 1, "snapshot arrival revives the event");
    assert_eq!(h.status("H"), Some(EventStatus::Admitted));
}

#[test]
fn artifact_revival_respects_max_event_duration() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.require_snapshot = true;
    rules.max_event_duration = Duration::from_secs(30);
    let mut h = Harness::new(rules);

    let mut frame = new_frame("H", "yard", "person", T0);
    frame.has_snapshot = false;
    h.push(frame);

    h.at(40.0);
    h.push(update_frame("H", "yard", "person", T0, T0 + 40.0));
    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("H"),
        Some(EventStatus::Suppressed(DenyReason::NoSnapshot))
    );
}

#[test]
fn missing_clip_suppresses_until_it_arrives() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.require_video = true;
    let mut h = Harness::new(rules);

    let mut frame = new_frame("I", "yard", "person", T0);
    frame.has_clip = false;
    h.push(frame);
    assert_eq!(
        h.status("I"),
        Some(EventStatus::Suppressed(DenyReason::NoClip))
    );

    h.at(8.0);
    h.push(update_frame("I", "yard", "person", T0, T0 + 8.0));
    assert_eq!(h.alerts().len(), 1);
}

// ==================== Ordering and age ====================

#[test]
fn stale_frames_cannot_revert_zones() {
    let mut rule = camera_rule("porch", &["person"]);
    rule.require = vec![zone_filter("steps", &["*"])];
    let mut rules = rules_for(vec![rule]);
    rules.min_event_duration = Duration::from_secs(2);
    let mut h = Harness::new(rules);

    let mut frame = new_frame("J", "porch", "person", T0);
    frame.zones = vec!["steps".to_string()];
    h.push(frame);

    // A delayed redelivery with an older frame time and no zones.
    h.at(1.0);
    let mut stale = update_frame("J", "porch", "person", T0, T0 - 1.0);
    stale.zones = Vec::new();
    h.push(stale);

    h.at(2.0);
    h.tick();
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.alerts()[0].zones, vec!["steps"]);
}

#[test]
fn events_older_than_max_duration_are_rejected() {
    let mut rules = rules_for(vec![camera_rule("yard", &["person"])]);
    rules.max_event_duration = Duration::from_secs(5);
    let mut h = Harness::new(rules);

    // A replayed event created long before it reaches us.
    h.push(new_frame("K", "yard", "person", T0 - 10.0));
    assert!(h.alerts().is_empty());
    assert_eq!(
        h.status("K"),
        Some(EventStatus::Suppressed(DenyReason::TooOld))
    );
}

#[test]
fn first_frame_end_creates_nothing() {
    let mut h = Harness::new(rules_for(vec![camera_rule("yard", &["person"])]));
    h.push(end_frame("L", "yard", "person", T0, T0));
    assert!(h.alerts().is_empty());
    assert_eq!(h.status("L"), None);
}

#[test]
fn alert_payload_carries_artifact_state_and_zones() {
    let mut rule = camera_rule("yard", &["person"]);
    rule.require = Vec::new();
    let mut h = Harness::new(rules_for(vec![rule]));

    let mut frame = new_frame("M", "yard", "person", T0);
    frame.zones = vec!["porch".to_string()];
    frame.sub_label = Some("mail_carrier".to_string());
    h.push(frame);

    let alert = &h.alerts()[0];
    assert_eq!(alert.zones, vec!["porch"]);
    assert_eq!(alert.sub_label.as_deref(), Some("mail_carrier"));
    // No Frigate host configured in the harness, so no media URLs.
    assert_eq!(alert.snapshot_url, None);
    assert_eq!(alert.clip_url, None);
}
