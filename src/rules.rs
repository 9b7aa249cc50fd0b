//! Admission rule evaluation.
//!
//! `evaluate` is a pure function of an event snapshot, the configured rules,
//! and an explicit `now`. It holds no state and performs no I/O, so the same
//! inputs always produce the same decision. Minimum event duration is
//! deliberately not checked here; enforcing it is the admission engine's
//! deferral, which calls back in once enough time has passed.

use std::fmt;
use std::time::Duration;

/// Matches any label when present in a label list.
pub const LABEL_WILDCARD: &str = "*";

/// Default stationary displacement threshold in frame-normalized units.
pub const DEFAULT_DISPLACEMENT_THRESHOLD: f64 = 0.02;

/// Zone filter with an optional label scope. An empty or wildcard label
/// list applies the filter to every label.
#[derive(Clone, Debug)]
pub struct ZoneFilter {
    pub zone: String,
    pub labels: Vec<String>,
}

impl ZoneFilter {
    fn applies_to(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| l == LABEL_WILDCARD || l == label)
    }
}

/// Admission specification for one camera.
#[derive(Clone, Debug)]
pub struct CameraRule {
    pub camera: String,
    pub labels: Vec<String>,
    pub require: Vec<ZoneFilter>,
    pub ignore: Vec<ZoneFilter>,
    pub enabled: bool,
}

/// Stationary-object tracking knobs.
#[derive(Clone, Debug)]
pub struct TrackingRules {
    pub enabled: bool,
    pub displacement_threshold: f64,
}

impl Default for TrackingRules {
    fn default() -> Self {
        Self {
            enabled: false,
            displacement_threshold: DEFAULT_DISPLACEMENT_THRESHOLD,
        }
    }
}

/// Static admission configuration shared by every evaluation.
///
/// A zero duration disables the corresponding bound or window.
#[derive(Clone, Debug, Default)]
pub struct AlertRules {
    pub cameras: Vec<CameraRule>,
    pub min_event_duration: Duration,
    pub max_event_duration: Duration,
    pub require_snapshot: bool,
    pub require_video: bool,
    pub camera_cooldown: Duration,
    pub label_cooldown: Duration,
    pub tracking: TrackingRules,
}

/// The slice of a live event the evaluator looks at.
#[derive(Clone, Debug)]
pub struct EventSnapshot<'a> {
    pub camera: &'a str,
    pub label: &'a str,
    pub zones: &'a [String],
    pub created: f64,
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub stationary: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(DenyReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NoRule,
    Label,
    IgnoredZone,
    MissingRequiredZone,
    TooOld,
    NoSnapshot,
    NoClip,
    Stationary,
    Cooldown,
    RuleError,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRule => "no-rule",
            Self::Label => "label",
            Self::IgnoredZone => "ignored-zone",
            Self::MissingRequiredZone => "missing-required-zone",
            Self::TooOld => "too-old",
            Self::NoSnapshot => "no-snapshot",
            Self::NoClip => "no-clip",
            Self::Stationary => "stationary",
            Self::Cooldown => "cooldown",
            Self::RuleError => "rule-error",
        }
    }

    /// Artifact prerequisites are the only suppressions an event can
    /// recover from once the missing artifact shows up.
    pub fn is_artifact(self) -> bool {
        matches!(self, Self::NoSnapshot | Self::NoClip)
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether an event qualifies for an alert right now.
///
/// Checks run in a fixed order and the first failure wins: camera rule,
/// label, ignore zones, required zones, maximum age, artifact
/// prerequisites, stationary filter.
pub fn evaluate(snapshot: &EventSnapshot<'_>, rules: &AlertRules, now: f64) -> Decision {
    let Some(rule) = rules
        .cameras
        .iter()
        .find(|r| r.enabled && r.camera == snapshot.camera)
    else {
        return Decision::Deny(DenyReason::NoRule);
    };

    // An enabled rule that can never match anything is a configuration
    // defect, reported per evaluation rather than crashing the process.
    if rule.labels.is_empty() {
        return Decision::Deny(DenyReason::RuleError);
    }
    if !rule
        .labels
        .iter()
        .any(|l| l == LABEL_WILDCARD || l == snapshot.label)
    {
        return Decision::Deny(DenyReason::Label);
    }

    for filter in &rule.ignore {
        if snapshot.zones.iter().any(|z| z == &filter.zone) && filter.applies_to(snapshot.label) {
            return Decision::Deny(DenyReason::IgnoredZone);
        }
    }

    if !rule.require.is_empty() {
        let satisfied = rule.require.iter().any(|filter| {
            filter.applies_to(snapshot.label) && snapshot.zones.iter().any(|z| z == &filter.zone)
        });
        if !satisfied {
            return Decision::Deny(DenyReason::MissingRequiredZone);
        }
    }

    let max_age = rules.max_event_duration.as_secs_f64();
    if max_age > 0.0 && now - snapshot.created > max_age {
        return Decision::Deny(DenyReason::TooOld);
    }

    if rules.require_snapshot && !snapshot.has_snapshot {
        return Decision::Deny(DenyReason::NoSnapshot);
    }
    if rules.require_video && !snapshot.has_clip {
        return Decision::Deny(DenyReason::NoClip);
    }

    if rules.tracking.enabled && snapshot.stationary {
        return Decision::Deny(DenyReason::Stationary);
    }

    Decision::Admit
}
