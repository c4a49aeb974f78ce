//! Step Series - step counter aggregation engine
//!
//! Turns irregular, cumulative pedometer readings into daily walking/running
//! summaries and fixed-resolution, monotonic trend series:
//! sensor source → recovery wrapper → delta calculation → bucketing → model.
//!
//! ## Modules
//!
//! - **Sources**: the `StepSource` capability plus recording playback and a
//!   live in-memory counter
//! - **Engine**: lifecycle, day navigation, polling and model publication

pub mod bucket;
pub mod clock;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod navigator;
pub mod poller;
pub mod retry;
pub mod source;
pub mod types;

pub use bucket::{Bucketizer, DayWindow, Resolution};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SeriesStrategy};
pub use delta::{DayAccumulator, DeltaCalculator};
pub use engine::{PollOutcome, StepsEngine};
pub use error::{SensorError, SensorErrorKind, StepsError};
pub use navigator::{DayNavigator, MAX_DAY_OFFSET};
pub use source::{select_source, MemorySource, RecordedSource, RecordingAdapter, StepSource};
pub use types::{
    Bucket, DayContext, Fetched, SensorHandle, SourceKind, StepDelta, StepModel, StepSnapshot,
};

/// Crate version, reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
