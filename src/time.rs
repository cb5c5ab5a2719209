//! Temporal types for grant scheduling.
//!
//! A grant occupies a half-open window `[start, end)`. Two grants contend in
//! time only if their windows intersect; expiry is defined as `end <= now`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,

    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a time window from two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTimeWindow` if `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidTimeWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a window starting now with the given duration.
    ///
    /// # Panics
    ///
    /// Panics if `duration` is zero or negative.
    #[must_use]
    pub fn from_now_for(duration: Duration) -> Self {
        assert!(duration > Duration::zero(), "duration must be positive");
        let start = Utc::now();
        Self {
            start,
            end: start + duration,
        }
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check whether a timestamp falls within `[start, end)`.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Whether two windows intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the intersection of two windows, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Whether the window has fully elapsed as of `now`.
    #[must_use]
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }

    /// Splits the window at `at`, returning the two halves.
    ///
    /// Returns `None` if `at` is not strictly inside the window (either half
    /// would be empty).
    #[must_use]
    pub fn split_at(&self, at: DateTime<Utc>) -> Option<(Self, Self)> {
        if at <= self.start || at >= self.end {
            return None;
        }
        Some((
            Self {
                start: self.start,
                end: at,
            },
            Self {
                start: at,
                end: self.end,
            },
        ))
    }
}
