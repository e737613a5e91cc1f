use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

pub const MIN_DEBOUNCE_MS: u64 = 10;
pub const MAX_DEBOUNCE_MS: u64 = 1000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Rising,
    Falling,
}

impl EdgeDirection {
    fn from_level(level: bool) -> Self {
        if level {
            EdgeDirection::Rising
        } else {
            EdgeDirection::Falling
        }
    }

    pub fn level_name(&self) -> &'static str {
        match self {
            EdgeDirection::Rising => "HIGH",
            EdgeDirection::Falling => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub direction: EdgeDirection,
    pub timestamp: Instant,
}

/// Turns a polled boolean level into discrete edge events. A transition is
/// only reported if at least `window` has elapsed since the previously
/// reported one; transitions inside the window are dropped, not deferred.
pub struct EdgeDebouncer {
    last_reported_state: bool,
    last_event_time: Option<Instant>,
    window: Duration,
}

impl EdgeDebouncer {
    pub fn new(initial_state: bool, window: Duration) -> Self {
        EdgeDebouncer {
            last_reported_state: initial_state,
            last_event_time: None,
            window: clamp_window(window),
        }
    }

    pub fn observe(&mut self, sample: bool, timestamp: Instant) -> Option<EdgeEvent> {
        if sample == self.last_reported_state {
            return None;
        }

        if let Some(last) = self.last_event_time {
            let elapsed = timestamp.saturating_duration_since(last);
            if elapsed < self.window {
                debug!(
                    "Suppressed transition to {} after {}ms (window {}ms)",
                    EdgeDirection::from_level(sample).level_name(),
                    elapsed.as_millis(),
                    self.window.as_millis()
                );
                return None;
            }
        }

        self.last_reported_state = sample;
        self.last_event_time = Some(timestamp);

        Some(EdgeEvent {
            direction: EdgeDirection::from_level(sample),
            timestamp,
        })
    }

    /// Applies from the next observation onwards
    pub fn set_window(&mut self, window: Duration) {
        self.window = clamp_window(window);
    }

    /// Nudge the window by some (possibly negative) number of milliseconds
    pub fn adjust_window(&mut self, delta_ms: i64) -> Duration {
        let current = self.window.as_millis() as i64;
        let next = (current + delta_ms).max(0) as u64;
        self.set_window(Duration::from_millis(next));
        self.window
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> bool {
        self.last_reported_state
    }
}

pub fn clamp_window(window: Duration) -> Duration {
    let ms = (window.as_millis() as u64).clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
    Duration::from_millis(ms)
}
