//! Engine configuration
//!
//! Loaded from JSON; every field has a default so `{}` is a valid config.

use crate::bucket::Resolution;
use crate::error::StepsError;
use crate::navigator::MAX_DAY_OFFSET;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How a day's series is populated from the sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStrategy {
    /// One history query per bucket, summing per-interval deltas
    PerInterval,
    /// One merged query for the whole day, folded into buckets
    #[default]
    DayStream,
}

impl SeriesStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesStrategy::PerInterval => "per_interval",
            SeriesStrategy::DayStream => "day_stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bucket width for the trend series
    pub resolution_minutes: u32,
    /// Seconds between counters-only refreshes; 0 disables polling
    pub poll_interval_secs: u64,
    /// How far back the navigator may go
    pub max_day_offset: u32,
    pub series_strategy: SeriesStrategy,
    /// Fixed offset from UTC used to find local midnight
    pub utc_offset_minutes: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolution_minutes: 15,
            poll_interval_secs: 5,
            max_day_offset: MAX_DAY_OFFSET,
            series_strategy: SeriesStrategy::default(),
            utc_offset_minutes: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, StepsError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, StepsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StepsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), StepsError> {
        Resolution::new(self.resolution_minutes)?;
        if self.max_day_offset > MAX_DAY_OFFSET {
            return Err(StepsError::InvalidConfig(format!(
                "max_day_offset {} exceeds {}",
                self.max_day_offset, MAX_DAY_OFFSET
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(StepsError::InvalidConfig(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Result<Resolution, StepsError> {
        Resolution::new(self.resolution_minutes)
    }

    /// `None` when polling is disabled
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
