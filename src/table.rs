//! Live-event bookkeeping.
//!
//! One record per in-flight Frigate event id, created on the first inbound
//! frame, mutated only by the admission engine, and removed once the event
//! is terminal.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::clock::TimerHandle;
use crate::frame::EventFrame;
use crate::rules::DenyReason;
use crate::track::Track;

/// Admission status of a live event.
///
/// Transitions are monotone: Pending may become Admitted, Suppressed, or
/// Terminal; Admitted and Suppressed only become Terminal. The one
/// sanctioned reverse edge is Suppressed back to Pending when a missing
/// snapshot or clip shows up on a later frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Admitted,
    Suppressed(DenyReason),
    Terminal,
}

/// Everything the processor remembers about one in-flight event.
#[derive(Debug)]
pub struct LiveEvent {
    pub id: String,
    pub camera: String,
    pub label: String,
    pub sub_label: Option<String>,
    pub created: f64,
    pub updated: f64,
    pub zones: Vec<String>,
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub status: EventStatus,
    /// Handle of the scheduled deferral, present only while Pending.
    pub deferral: Option<TimerHandle>,
    pub track: Track,
    /// Set exactly once, when a publish has been handed to the egress.
    pub alerted: bool,
}

impl LiveEvent {
    fn from_frame(frame: &EventFrame) -> Self {
        let mut track = Track::new();
        track.push(frame.updated, frame.center);
        Self {
            id: frame.id.clone(),
            camera: frame.camera.clone(),
            label: frame.label.clone(),
            sub_label: frame.sub_label.clone(),
            created: frame.created,
            updated: frame.updated,
            zones: frame.zones.clone(),
            has_snapshot: frame.has_snapshot,
            has_clip: frame.has_clip,
            status: EventStatus::Pending,
            deferral: None,
            track,
            alerted: false,
        }
    }

    /// Fold a newer frame into the record. Frames whose `frame_time` is
    /// older than what the record already holds are ignored, so a delayed
    /// redelivery cannot revert zones or artifact flags.
    pub fn absorb(&mut self, frame: &EventFrame) -> bool {
        if frame.updated < self.updated {
            return false;
        }
        self.updated = frame.updated;
        self.zones = frame.zones.clone();
        if frame.sub_label.is_some() {
            self.sub_label = frame.sub_label.clone();
        }
        self.has_snapshot = frame.has_snapshot;
        self.has_clip = frame.has_clip;
        self.track.push(frame.updated, frame.center);
        true
    }

    pub fn age(&self, now: f64) -> f64 {
        (now - self.created).max(0.0)
    }
}

/// Map of live events keyed by Frigate event id.
#[derive(Debug, Default)]
pub struct EventTable {
    events: HashMap<String, LiveEvent>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for an unseen id, or absorb the frame into the
    /// existing one. Returns the record and whether it was newly created.
    pub fn upsert(&mut self, frame: &EventFrame) -> (&mut LiveEvent, bool) {
        match self.events.entry(frame.id.clone()) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                record.absorb(frame);
                (record, false)
            }
            Entry::Vacant(entry) => (entry.insert(LiveEvent::from_frame(frame)), true),
        }
    }

    pub fn get(&self, id: &str) -> Option<&LiveEvent> {
        self.events.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LiveEvent> {
        self.events.get_mut(id)
    }

    /// Set an event's status. Returns false for unknown ids.
    pub fn mark(&mut self, id: &str, status: EventStatus) -> bool {
        match self.events.get_mut(id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<LiveEvent> {
        self.events.remove(id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &LiveEvent) -> bool) {
        self.events.retain(|id, record| keep(id, record));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    fn frame(id: &str, kind: FrameKind, updated: f64, zones: &[&str]) -> EventFrame {
        EventFrame {
            kind,
            id: id.to_string(),
            camera: "yard".to_string(),
            label: "person".to_string(),
            sub_label: None,
            created: 100.0,
            updated,
            zones: zones.iter().map(|z| z.to_string()).collect(),
            center: Some((0.5, 0.5)),
            has_snapshot: false,
            has_clip: false,
        }
    }

    #[test]
    fn upsert_creates_then_updates() {
        let mut table = EventTable::new();
        let (record, was_new) = table.upsert(&frame("a", FrameKind::New, 100.0, &["yard"]));
        assert!(was_new);
        assert_eq!(record.status, EventStatus::Pending);
        assert_eq!(record.track.len(), 1);

        let (record, was_new) = table.upsert(&frame("a", FrameKind::Update, 101.0, &["porch"]));
        assert!(!was_new);
        assert_eq!(record.zones, vec!["porch"]);
        assert_eq!(record.track.len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_frames_are_ignored() {
        let mut table = EventTable::new();
        table.upsert(&frame("a", FrameKind::New, 100.0, &["yard"]));
        table.upsert(&frame("a", FrameKind::Update, 105.0, &["porch"]));

        let (record, _) = table.upsert(&frame("a", FrameKind::Update, 102.0, &["street"]));
        assert_eq!(record.zones, vec!["porch"]);
        assert!((record.updated - 105.0).abs() < 1e-9);
    }

    #[test]
    fn equal_frame_times_still_absorb() {
        let mut table = EventTable::new();
        table.upsert(&frame("a", FrameKind::New, 100.0, &["yard"]));
        let (record, _) = table.upsert(&frame("a", FrameKind::Update, 100.0, &["porch"]));
        assert_eq!(record.zones, vec!["porch"]);
    }

    #[test]
    fn mark_and_remove() {
        let mut table = EventTable::new();
        table.upsert(&frame("a", FrameKind::New, 100.0, &[]));
        assert!(table.mark("a", EventStatus::Terminal));
        assert!(!table.mark("missing", EventStatus::Terminal));
        assert_eq!(table.remove("a").map(|r| r.status), Some(EventStatus::Terminal));
        assert!(table.is_empty());
    }

    #[test]
    fn sub_label_survives_frames_without_one() {
        let mut table = EventTable::new();
        let mut first = frame("a", FrameKind::New, 100.0, &[]);
        first.sub_label = Some("amazon".to_string());
        table.upsert(&first);

        let (record, _) = table.upsert(&frame("a", FrameKind::Update, 101.0, &[]));
        assert_eq!(record.sub_label.as_deref(), Some("amazon"));
    }
}
