//! Core types for the step-series engine
//!
//! This module defines the values that flow from a step source through the
//! delta calculator and bucketizer into the model published by the engine.

use crate::error::SensorError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use uuid::Uuid;

/// Sensor backend identifier for provenance and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Platform pedometer exposing cumulative reading history
    Pedometer,
    /// Vendor sensor SDK exposing per-range step counts
    SensorCore,
    /// Playback of a recorded reading file
    Recording,
    /// Live in-process counter
    Memory,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pedometer => "pedometer",
            SourceKind::SensorCore => "sensor_core",
            SourceKind::Recording => "recording",
            SourceKind::Memory => "memory",
        }
    }
}

/// Opaque handle to one sensor session owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorHandle {
    pub id: Uuid,
    pub kind: SourceKind,
}

impl SensorHandle {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }
}

/// A single cumulative counter observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// When the counters were sampled
    pub timestamp: DateTime<Utc>,
    /// Cumulative walking steps in the current session
    pub walking: u32,
    /// Cumulative running steps in the current session
    pub running: u32,
    /// Cumulative steps the sensor could not classify
    #[serde(default)]
    pub unknown: u32,
}

impl StepSnapshot {
    pub fn new(timestamp: DateTime<Utc>, walking: u32, running: u32) -> Self {
        Self {
            timestamp,
            walking,
            running,
            unknown: 0,
        }
    }

    pub fn with_unknown(mut self, unknown: u32) -> Self {
        self.unknown = unknown;
        self
    }
}

/// Non-negative step counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDelta {
    pub walking: u32,
    pub running: u32,
    pub unknown: u32,
}

impl StepDelta {
    pub const ZERO: StepDelta = StepDelta {
        walking: 0,
        running: 0,
        unknown: 0,
    };

    pub fn new(walking: u32, running: u32, unknown: u32) -> Self {
        Self {
            walking,
            running,
            unknown,
        }
    }

    pub fn total(&self) -> u32 {
        self.walking
            .saturating_add(self.running)
            .saturating_add(self.unknown)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Add for StepDelta {
    type Output = StepDelta;

    fn add(self, rhs: StepDelta) -> StepDelta {
        StepDelta {
            walking: self.walking.saturating_add(rhs.walking),
            running: self.running.saturating_add(rhs.running),
            unknown: self.unknown.saturating_add(rhs.unknown),
        }
    }
}

impl AddAssign for StepDelta {
    fn add_assign(&mut self, rhs: StepDelta) {
        *self = *self + rhs;
    }
}

/// One point of a day's trend line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Minutes from local midnight to the bucket start
    pub offset_minutes: u32,
    /// Steps counted from the day start up to this bucket
    pub cumulative_steps: u32,
}

impl Bucket {
    pub fn new(offset_minutes: u32, cumulative_steps: u32) -> Self {
        Self {
            offset_minutes,
            cumulative_steps,
        }
    }
}

/// Which day is viewed and at what series resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayContext {
    /// Days into the past, 0 = today
    pub day_offset: u32,
    /// Bucket width in minutes
    pub resolution_minutes: u32,
}

/// Result of a sensor-backed fetch that distinguishes "zero" from "failed"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Fetched<T> {
    /// Value read from the sensor
    Fresh { value: T },
    /// Fetch failed; `fallback` is the zero value shown instead
    Failed { fallback: T, error: SensorError },
}

impl<T> Fetched<T> {
    pub fn fresh(value: T) -> Self {
        Fetched::Fresh { value }
    }

    pub fn failed(fallback: T, error: SensorError) -> Self {
        Fetched::Failed { fallback, error }
    }

    /// The value to display, fresh or fallback
    pub fn value(&self) -> &T {
        match self {
            Fetched::Fresh { value } => value,
            Fetched::Failed { fallback, .. } => fallback,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Fetched::Fresh { value } => value,
            Fetched::Failed { fallback, .. } => fallback,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Fetched::Fresh { .. })
    }

    pub fn error(&self) -> Option<&SensorError> {
        match self {
            Fetched::Fresh { .. } => None,
            Fetched::Failed { error, .. } => Some(error),
        }
    }
}

impl<T: Default> Fetched<T> {
    /// Degrade a sensor result to its zero value on failure
    pub fn from_result(result: Result<T, SensorError>) -> Self {
        match result {
            Ok(value) => Fetched::fresh(value),
            Err(error) => Fetched::failed(T::default(), error),
        }
    }
}

/// Snapshot of everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepModel {
    /// Calendar date being viewed
    pub date: NaiveDate,
    pub day: DayContext,
    /// Walking/running/unknown counts for the day
    pub summary: Fetched<StepDelta>,
    /// Trend line for the day
    pub series: Fetched<Vec<Bucket>>,
    /// When this model was published
    pub updated_at: DateTime<Utc>,
    /// Incremented on every publish
    pub revision: u64,
}

impl StepModel {
    /// Empty model shown before the first refresh
    pub fn empty(date: NaiveDate, day: DayContext, now: DateTime<Utc>) -> Self {
        Self {
            date,
            day,
            summary: Fetched::fresh(StepDelta::ZERO),
            series: Fetched::fresh(Vec::new()),
            updated_at: now,
            revision: 0,
        }
    }
}
