//! Debounced "face nearby" state.
//!
//! Detector output flickers from frame to frame (motion blur, occlusion), so
//! presence latches on the first qualifying frame and is only released after
//! more than `miss_limit` consecutive frames without a close enough face.

use crate::selector::max_area;
use crate::types::BoundingBox;
use serde::Serialize;

/// Face area in px² at detection scale (~1.5 m at 320x240).
pub const DEFAULT_FACE_AREA_THRESHOLD: i64 = 1500;
pub const DEFAULT_MISS_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PresenceState {
    #[default]
    Absent,
    Present,
}

impl PresenceState {
    pub fn is_present(self) -> bool {
        self == PresenceState::Present
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// A frame qualifies when its largest box area is strictly greater than this.
    pub face_area_threshold: i64,
    /// Consecutive non-qualifying frames tolerated before dropping to Absent.
    pub miss_limit: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            face_area_threshold: DEFAULT_FACE_AREA_THRESHOLD,
            miss_limit: DEFAULT_MISS_LIMIT,
        }
    }
}

pub struct PresenceTracker {
    config: PresenceConfig,
    state: PresenceState,
    miss_streak: u32,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            state: PresenceState::Absent,
            miss_streak: 0,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn miss_streak(&self) -> u32 {
        self.miss_streak
    }

    /// True if a frame with these boxes counts as "face nearby".
    pub fn qualifies(&self, boxes: &[BoundingBox]) -> bool {
        max_area(boxes) > self.config.face_area_threshold
    }

    /// Advance by one frame and return the resulting state.
    pub fn update(&mut self, boxes: &[BoundingBox]) -> PresenceState {
        let previous = self.state;

        if self.qualifies(boxes) {
            self.miss_streak = 0;
            self.state = PresenceState::Present;
        } else {
            self.miss_streak = self.miss_streak.saturating_add(1);
            if self.miss_streak > self.config.miss_limit {
                self.state = PresenceState::Absent;
            }
        }

        if self.state != previous {
            tracing::info!(
                from = ?previous,
                to = ?self.state,
                miss_streak = self.miss_streak,
                "presence changed"
            );
        }

        self.state
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}
