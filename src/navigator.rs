//! Day navigation
//!
//! Offset 0 is today; larger offsets go back in time. Moving past either
//! bound is a no-op.

use crate::bucket::Resolution;
use crate::types::DayContext;
use chrono::{Duration, NaiveDate};

/// Oldest day the sensor history is expected to cover
pub const MAX_DAY_OFFSET: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayNavigator {
    offset: u32,
    max: u32,
}

impl Default for DayNavigator {
    fn default() -> Self {
        Self::new(MAX_DAY_OFFSET)
    }
}

impl DayNavigator {
    pub fn new(max: u32) -> Self {
        Self {
            offset: 0,
            max: max.min(MAX_DAY_OFFSET),
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn max_offset(&self) -> u32 {
        self.max
    }

    /// Step one day into the past; `false` if already at the oldest day
    pub fn increase_offset(&mut self) -> bool {
        if self.offset >= self.max {
            return false;
        }
        self.offset += 1;
        true
    }

    /// Step one day towards today; `false` if already at today
    pub fn decrease_offset(&mut self) -> bool {
        if self.offset == 0 {
            return false;
        }
        self.offset -= 1;
        true
    }

    /// Apply a signed step (`+1` older, `-1` newer), clamping one day at a
    /// time. Returns whether the offset changed.
    pub fn shift(&mut self, delta: i32) -> bool {
        let before = self.offset;
        for _ in 0..delta.unsigned_abs() {
            let moved = if delta > 0 {
                self.increase_offset()
            } else {
                self.decrease_offset()
            };
            if !moved {
                break;
            }
        }
        self.offset != before
    }

    pub fn can_go_back(&self) -> bool {
        self.offset < self.max
    }

    pub fn can_go_forward(&self) -> bool {
        self.offset > 0
    }

    /// Calendar date of the viewed day
    pub fn date_for(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.offset as i64)
    }

    pub fn is_today(&self) -> bool {
        self.offset == 0
    }

    pub fn context(&self, resolution: Resolution) -> DayContext {
        DayContext {
            day_offset: self.offset,
            resolution_minutes: resolution.minutes(),
        }
    }
}
