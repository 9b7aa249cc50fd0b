//! The admission state machine.
//!
//! Consumes decoded event frames, keeps the live-event table current,
//! schedules deferrals, and publishes admitted alerts. Every admission goes
//! through the deferral pipeline, even when the target is "now": cooldown,
//! stationary, and artifact checks always happen at fire time against the
//! freshest state.
//!
//! The engine runs on one thread. The MQTT ingress hands frames over a
//! channel and the owning loop alternates `handle_frame` with `fire_due`,
//! so operations for a single event id never interleave.

use crate::artifacts::{ArtifactGate, GateOutcome};
use crate::clock::{Clock, TimerQueue, Timestamp};
use crate::cooldown::{CooldownCheck, CooldownLedger};
use crate::frame::{EventFrame, FrameKind};
use crate::publish::{publish_with_retry, AlertPayload, AlertSink, PUBLISH_ATTEMPTS};
use crate::rules::{evaluate, AlertRules, Decision, DenyReason, EventSnapshot};
use crate::table::{EventStatus, EventTable};

/// Records that stopped updating this long ago are dropped: a lost `end`
/// (broker hiccup, Frigate restart) must not grow the table forever.
const STALE_EVENT_HORIZON: f64 = 6.0 * 3600.0;
const REAP_INTERVAL: f64 = 60.0;

/// Lifetime counters, logged at shutdown.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub frames: u64,
    pub admitted: u64,
    pub suppressed: u64,
}

pub struct AdmissionEngine {
    rules: AlertRules,
    table: EventTable,
    timers: TimerQueue,
    cooldowns: CooldownLedger,
    gate: ArtifactGate,
    clock: Box<dyn Clock>,
    sink: Box<dyn AlertSink>,
    stats: EngineStats,
    last_reap: Timestamp,
}

impl AdmissionEngine {
    pub fn new(
        rules: AlertRules,
        gate: ArtifactGate,
        clock: Box<dyn Clock>,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        let cooldowns = CooldownLedger::new(rules.camera_cooldown, rules.label_cooldown);
        let last_reap = clock.now();
        Self {
            rules,
            table: EventTable::new(),
            timers: TimerQueue::new(),
            cooldowns,
            gate,
            clock,
            sink,
            stats: EngineStats::default(),
            last_reap,
        }
    }

    /// Earliest pending deferral, for the owning loop's wait timeout.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn live_events(&self) -> usize {
        self.table.len()
    }

    /// Current status of a live event, if any.
    pub fn status(&self, id: &str) -> Option<EventStatus> {
        self.table.get(id).map(|record| record.status)
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, frame: EventFrame) {
        self.stats.frames += 1;
        log::debug!(
            "frame: {} {} {}/{} zones={:?}",
            frame.kind.as_str(),
            frame.id,
            frame.camera,
            frame.label,
            frame.zones
        );
        match frame.kind {
            FrameKind::End => self.on_end(&frame),
            FrameKind::New | FrameKind::Update => {
                if self.table.get(&frame.id).is_some() {
                    self.on_update(frame);
                } else {
                    self.on_first_seen(frame);
                }
            }
        }
    }

    /// Fire every deferral due at the current time, then reap stale records.
    pub fn fire_due(&mut self) {
        let now = self.clock.now();
        while let Some((handle, id)) = self.timers.pop_due(now) {
            // Entries whose handle no longer matches the record were
            // cancelled or superseded; they just fall out of the heap.
            let live = self
                .table
                .get(&id)
                .map_or(false, |record| record.deferral == Some(handle));
            if !live {
                continue;
            }
            if let Some(record) = self.table.get_mut(&id) {
                record.deferral = None;
            }
            self.attempt_admission(&id);
        }
        if now - self.last_reap >= REAP_INTERVAL {
            self.last_reap = now;
            self.reap_stale(now);
        }
    }

    /// First frame for an unknown id: create the record, take a provisional
    /// decision, and schedule the deferral. Minimum duration is not judged
    /// here, and neither is a missing required zone: the object may still
    /// walk into it, so that check waits for fire time.
    fn on_first_seen(&mut self, frame: EventFrame) {
        let now = self.clock.now();
        let (record, _) = self.table.upsert(&frame);

        let snapshot = EventSnapshot {
            camera: &record.camera,
            label: &record.label,
            zones: &record.zones,
            created: record.created,
            has_snapshot: record.has_snapshot,
            has_clip: record.has_clip,
            // A single sample can never trip the stationary filter.
            stationary: false,
        };
        let decision = evaluate(&snapshot, &self.rules, now);

        match decision {
            Decision::Admit | Decision::Deny(DenyReason::MissingRequiredZone) => {
                let min = self.rules.min_event_duration.as_secs_f64();
                let fire_at = if min > 0.0 && now - record.created < min {
                    record.created + min
                } else {
                    now
                };
                record.deferral = Some(self.timers.schedule(fire_at, &record.id));
            }
            Decision::Deny(reason) => {
                record.status = EventStatus::Suppressed(reason);
                self.stats.suppressed += 1;
                log::info!("event {} suppressed on entry: {}", record.id, reason);
            }
        }
    }

    /// Later frame for a known id: absorb state, then give waiting or
    /// artifact-suppressed records another shot.
    fn on_update(&mut self, frame: EventFrame) {
        let now = self.clock.now();
        let id = frame.id.clone();

        let stale = self
            .table
            .get(&id)
            .map_or(false, |record| frame.updated < record.updated);
        if stale {
            log::debug!("event {}: stale frame dropped", id);
            return;
        }

        let mut retry = false;
        {
            let (record, _) = self.table.upsert(&frame);
            match record.status {
                // A Pending record without a deferral already had its fire;
                // some condition was not met yet, so re-check now.
                EventStatus::Pending => retry = record.deferral.is_none(),
                EventStatus::Suppressed(reason) if reason.is_artifact() => {
                    let ready = match reason {
                        DenyReason::NoClip => record.has_clip,
                        _ => record.has_snapshot,
                    };
                    let max = self.rules.max_event_duration.as_secs_f64();
                    let within = max <= 0.0 || record.age(now) <= max;
                    if ready && within {
                        record.status = EventStatus::Pending;
                        let min = self.rules.min_event_duration.as_secs_f64();
                        let fire_at = (record.created + min).max(now);
                        record.deferral = Some(self.timers.schedule(fire_at, &id));
                        log::debug!("event {}: artifact arrived, re-queued for admission", id);
                    }
                }
                // Admitted events never publish twice; other suppressions
                // are sticky until the event ends.
                _ => {}
            }
        }
        if retry {
            self.attempt_admission(&id);
        }
    }

    /// Terminal frame: cancel any deferral and drop the record. An event
    /// whose very first frame is `end` never creates state.
    fn on_end(&mut self, frame: &EventFrame) {
        let id = &frame.id;
        let Some(record) = self.table.get_mut(id) else {
            log::debug!("end for unknown event {}", id);
            return;
        };
        record.deferral = None;
        self.table.mark(id, EventStatus::Terminal);
        if let Some(record) = self.table.remove(id) {
            log::debug!(
                "event {} closed: {}/{} alerted={}",
                id,
                record.camera,
                record.label,
                record.alerted
            );
        }
    }

    /// The fire step: re-evaluate against current state, then cooldown,
    /// then the artifact gate, then publish.
    fn attempt_admission(&mut self, id: &str) {
        let now = self.clock.now();
        let (decision, camera, label) = {
            let Some(record) = self.table.get(id) else {
                return;
            };
            if record.status != EventStatus::Pending {
                return;
            }
            let stationary = self.rules.tracking.enabled
                && record.track.is_stationary(
                    self.rules.tracking.displacement_threshold,
                    self.rules.min_event_duration.as_secs_f64(),
                );
            let snapshot = EventSnapshot {
                camera: &record.camera,
                label: &record.label,
                zones: &record.zones,
                created: record.created,
                has_snapshot: record.has_snapshot,
                has_clip: record.has_clip,
                stationary,
            };
            (
                evaluate(&snapshot, &self.rules, now),
                record.camera.clone(),
                record.label.clone(),
            )
        };

        match decision {
            // Still waiting on the object to enter a required zone; the
            // next update re-checks, and `end` simply drops the record.
            Decision::Deny(DenyReason::MissingRequiredZone) => {
                log::debug!("event {}: required zone not yet entered", id);
            }
            Decision::Deny(reason) => self.suppress(id, reason),
            Decision::Admit => match self.cooldowns.check(&camera, &label, now) {
                CooldownCheck::Blocked { until } => {
                    log::info!(
                        "event {}: cooldown for {}/{} active until {:.0}",
                        id,
                        camera,
                        label,
                        until
                    );
                    self.suppress(id, DenyReason::Cooldown);
                }
                CooldownCheck::Allowed => self.publish(id, now),
            },
        }
    }

    fn publish(&mut self, id: &str, now: Timestamp) {
        let outcome = {
            let Some(record) = self.table.get(id) else {
                return;
            };
            self.gate.clear(record)
        };
        let urls = match outcome {
            GateOutcome::Missing(reason) => {
                self.suppress(id, reason);
                return;
            }
            GateOutcome::Ready(urls) => urls,
        };

        let payload = {
            let Some(record) = self.table.get_mut(id) else {
                return;
            };
            record.status = EventStatus::Admitted;
            record.alerted = true;
            AlertPayload::from_event(record, urls)
        };

        match publish_with_retry(self.sink.as_mut(), &payload) {
            Ok(()) => {
                self.cooldowns.record(&payload.camera, &payload.label, now);
                self.stats.admitted += 1;
                log::info!(
                    "alert published: {} {}/{} zones={:?}",
                    payload.event_id,
                    payload.camera,
                    payload.label,
                    payload.zones
                );
            }
            Err(e) => {
                // The event stays Admitted and alerted; a retry storm must
                // not double-publish once the broker recovers.
                log::error!(
                    "alert for {} dropped after {} attempts: {:#}",
                    id,
                    PUBLISH_ATTEMPTS,
                    e
                );
            }
        }
    }

    fn suppress(&mut self, id: &str, reason: DenyReason) {
        if let Some(record) = self.table.get_mut(id) {
            if record.status == EventStatus::Pending {
                self.stats.suppressed += 1;
            }
            record.status = EventStatus::Suppressed(reason);
            log::info!("event {} suppressed: {}", id, reason);
        }
    }

    fn reap_stale(&mut self, now: Timestamp) {
        let mut dropped = 0usize;
        self.table.retain(|id, record| {
            let keep = now - record.updated < STALE_EVENT_HORIZON;
            if !keep {
                log::warn!("dropping stale event {} (no frames for {:.0}s)", id, now - record.updated);
                dropped += 1;
            }
            keep
        });
        if dropped > 0 {
            log::warn!("reaped {} stale events, {} live", dropped, self.table.len());
        }
    }
}
