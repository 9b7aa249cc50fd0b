//! Snapshot/clip availability gating ahead of publish.
//!
//! The gate never downloads media. It trusts the event's `has_snapshot` and
//! `has_clip` flags, builds the Frigate media URLs for the alert payload,
//! and can optionally confirm with a HEAD request that Frigate really serves
//! a required artifact before the alert goes out.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::rules::DenyReason;
use crate::table::LiveEvent;

/// Media artifacts Frigate serves per event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Snapshot,
    Clip,
}

impl ArtifactKind {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot.jpg",
            Self::Clip => "clip.mp4",
        }
    }

    fn deny_reason(self) -> DenyReason {
        match self {
            Self::Snapshot => DenyReason::NoSnapshot,
            Self::Clip => DenyReason::NoClip,
        }
    }
}

/// Media URLs attached to an outgoing alert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArtifactUrls {
    pub snapshot: Option<String>,
    pub clip: Option<String>,
}

/// Availability probe against the Frigate HTTP API.
///
/// `Ok(true)` means the artifact resolves (200), `Ok(false)` means Frigate
/// has not produced it yet (404), and `Err` is a transient failure worth
/// retrying.
pub trait ArtifactChecker {
    fn confirm(&self, event_id: &str, kind: ArtifactKind) -> Result<bool>;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(2);
const CONFIRM_ATTEMPTS: u32 = 3;
const CONFIRM_BACKOFF: Duration = Duration::from_millis(250);

/// HEAD-probes `/api/events/{id}/...` on the Frigate server.
pub struct HttpArtifactChecker {
    base: String,
    agent: ureq::Agent,
}

impl HttpArtifactChecker {
    pub fn new(base: String) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        Self { base, agent }
    }
}

impl ArtifactChecker for HttpArtifactChecker {
    fn confirm(&self, event_id: &str, kind: ArtifactKind) -> Result<bool> {
        let url = event_media_url(&self.base, event_id, kind);
        match self.agent.head(&url).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(anyhow!("HEAD {} failed: {}", url, e)),
        }
    }
}

/// Media URL for one event artifact.
pub fn event_media_url(base: &str, event_id: &str, kind: ArtifactKind) -> String {
    format!(
        "{}/api/events/{}/{}",
        base.trim_end_matches('/'),
        event_id,
        kind.path_segment()
    )
}

/// Outcome of the gate for one admitted event.
#[derive(Debug, PartialEq)]
pub enum GateOutcome {
    /// Publish may proceed; attach these URLs.
    Ready(ArtifactUrls),
    /// A required artifact is unavailable.
    Missing(DenyReason),
}

/// Final check between admission and publish.
pub struct ArtifactGate {
    require_snapshot: bool,
    require_video: bool,
    base_url: Option<String>,
    checker: Option<Box<dyn ArtifactChecker>>,
}

impl ArtifactGate {
    pub fn new(require_snapshot: bool, require_video: bool, base_url: Option<String>) -> Self {
        Self {
            require_snapshot,
            require_video,
            base_url,
            checker: None,
        }
    }

    pub fn with_checker(mut self, checker: Box<dyn ArtifactChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Decide whether an admitted event may publish right now.
    ///
    /// Required artifacts must be flagged present on the event, and when a
    /// checker is configured they must also confirm over HTTP. Optional
    /// artifacts are never probed; their URL is attached whenever the flag
    /// is set and a base URL is known.
    pub fn clear(&self, event: &LiveEvent) -> GateOutcome {
        if self.require_snapshot && !event.has_snapshot {
            return GateOutcome::Missing(DenyReason::NoSnapshot);
        }
        if self.require_video && !event.has_clip {
            return GateOutcome::Missing(DenyReason::NoClip);
        }

        if self.require_snapshot && !self.confirmed(&event.id, ArtifactKind::Snapshot) {
            return GateOutcome::Missing(DenyReason::NoSnapshot);
        }
        if self.require_video && !self.confirmed(&event.id, ArtifactKind::Clip) {
            return GateOutcome::Missing(DenyReason::NoClip);
        }

        let mut urls = ArtifactUrls::default();
        if let Some(base) = &self.base_url {
            if event.has_snapshot {
                urls.snapshot = Some(event_media_url(base, &event.id, ArtifactKind::Snapshot));
            }
            if event.has_clip {
                urls.clip = Some(event_media_url(base, &event.id, ArtifactKind::Clip));
            }
        }
        GateOutcome::Ready(urls)
    }

    fn confirmed(&self, event_id: &str, kind: ArtifactKind) -> bool {
        let Some(checker) = &self.checker else {
            return true;
        };
        for attempt in 0..CONFIRM_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(CONFIRM_BACKOFF * 2u32.pow(attempt - 1));
            }
            match checker.confirm(event_id, kind) {
                Ok(available) => return available,
                Err(e) => log::warn!(
                    "{} confirmation attempt {}/{} for {}: {:#}",
                    kind.deny_reason(),
                    attempt + 1,
                    CONFIRM_ATTEMPTS,
                    event_id,
                    e
                ),
            }
        }
        false
    }
}
