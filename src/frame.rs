//! Frigate MQTT event payload decoding.
//!
//! Frigate publishes tracked-object events as
//! `{ "before": {...}, "after": {...}, "type": "new"|"update"|"end" }`,
//! where `after` carries the current detection state. Unknown fields are
//! ignored; structurally required fields that are missing make the payload
//! a decode error, which callers log and drop without creating state.

use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    New,
    Update,
    End,
}

impl FrameKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "new" => Ok(Self::New),
            "update" => Ok(Self::Update),
            "end" => Ok(Self::End),
            other => Err(anyhow!("unknown event type '{}'", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Update => "update",
            Self::End => "end",
        }
    }
}

/// One decoded frame of a Frigate event's lifecycle.
#[derive(Clone, Debug)]
pub struct EventFrame {
    pub kind: FrameKind,
    pub id: String,
    pub camera: String,
    pub label: String,
    pub sub_label: Option<String>,
    /// Seconds since epoch when Frigate first saw the object.
    pub created: f64,
    /// Seconds since epoch of the frame this state was taken from.
    pub updated: f64,
    /// Zones the object currently occupies.
    pub zones: Vec<String>,
    /// Bounding-box center. Absent when Frigate reports no box.
    pub center: Option<(f64, f64)>,
    pub has_snapshot: bool,
    pub has_clip: bool,
}

#[derive(Debug, Deserialize)]
struct EventWrapper {
    after: Option<EventBody>,

    #[serde(rename = "type")]
    event_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    id: String,
    camera: String,
    label: String,

    #[serde(default)]
    sub_label: Option<String>,

    start_time: f64,

    #[serde(default)]
    frame_time: Option<f64>,

    #[serde(default)]
    current_zones: Vec<String>,

    /// Corners as [x1, y1, x2, y2].
    #[serde(default, rename = "box")]
    bbox: Option<[f64; 4]>,

    #[serde(default)]
    has_snapshot: bool,

    #[serde(default)]
    has_clip: bool,

    #[serde(default)]
    false_positive: bool,
}

/// Decode one inbound payload.
///
/// Returns `Ok(None)` for payloads that are well-formed but carry nothing to
/// process: events Frigate itself marked as false positives. Their `end`
/// frames still come through so any live record gets torn down.
pub fn decode_event(payload: &[u8]) -> Result<Option<EventFrame>> {
    let wrapper: EventWrapper =
        serde_json::from_slice(payload).map_err(|e| anyhow!("parse error: {}", e))?;

    let kind = match wrapper.event_type.as_deref() {
        Some(raw) => FrameKind::parse(raw)?,
        None => return Err(anyhow!("missing event type")),
    };

    let body = wrapper
        .after
        .ok_or_else(|| anyhow!("missing 'after' section in event"))?;

    if body.false_positive && kind != FrameKind::End {
        return Ok(None);
    }

    let center = body
        .bbox
        .map(|[x1, y1, x2, y2]| ((x1 + x2) / 2.0, (y1 + y2) / 2.0));

    Ok(Some(EventFrame {
        kind,
        id: body.id,
        camera: body.camera,
        label: body.label,
        sub_label: body.sub_label.filter(|s| !s.is_empty()),
        created: body.start_time,
        updated: body.frame_time.unwrap_or(body.start_time),
        zones: body.current_zones,
        center,
        has_snapshot: body.has_snapshot,
        has_clip: body.has_clip,
    }))
}
