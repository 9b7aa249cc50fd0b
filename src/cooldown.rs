//! Per-camera and per-(camera, label) repeat suppression.

use std::collections::HashMap;
use std::time::Duration;

use crate::clock::Timestamp;

/// Outcome of a cooldown check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CooldownCheck {
    Allowed,
    /// Blocked until the latest of the active windows expires.
    Blocked { until: Timestamp },
}

/// Last-alert timestamps keyed by camera and by (camera, label).
///
/// A zero window disables that dimension. Entries are pruned lazily on
/// writes once they fall outside their own window. State lives in-process
/// only; a restart starts cold and downstream consumers are expected to do
/// their own deduplication.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    camera_window: Duration,
    label_window: Duration,
    by_camera: HashMap<String, Timestamp>,
    by_label: HashMap<(String, String), Timestamp>,
}

impl CooldownLedger {
    pub fn new(camera_window: Duration, label_window: Duration) -> Self {
        Self {
            camera_window,
            label_window,
            by_camera: HashMap::new(),
            by_label: HashMap::new(),
        }
    }

    pub fn check(&self, camera: &str, label: &str, now: Timestamp) -> CooldownCheck {
        let mut until: Option<Timestamp> = None;

        let camera_window = self.camera_window.as_secs_f64();
        if camera_window > 0.0 {
            if let Some(last) = self.by_camera.get(camera) {
                if now - last < camera_window {
                    until = Some(last + camera_window);
                }
            }
        }

        let label_window = self.label_window.as_secs_f64();
        if label_window > 0.0 {
            if let Some(last) = self.by_label.get(&(camera.to_string(), label.to_string())) {
                if now - last < label_window {
                    let expiry = last + label_window;
                    until = Some(until.map_or(expiry, |u| u.max(expiry)));
                }
            }
        }

        match until {
            Some(until) => CooldownCheck::Blocked { until },
            None => CooldownCheck::Allowed,
        }
    }

    /// Record a successful publish for both dimensions.
    pub fn record(&mut self, camera: &str, label: &str, now: Timestamp) {
        self.prune(now);
        self.by_camera.insert(camera.to_string(), now);
        self.by_label
            .insert((camera.to_string(), label.to_string()), now);
    }

    fn prune(&mut self, now: Timestamp) {
        let camera_window = self.camera_window.as_secs_f64();
        self.by_camera.retain(|_, last| now - *last < camera_window);
        let label_window = self.label_window.as_secs_f64();
        self.by_label.retain(|_, last| now - *last < label_window);
    }

    #[cfg(test)]
    fn entries(&self) -> (usize, usize) {
        (self.by_camera.len(), self.by_label.len())
    }
}
