//! Stage timers for repeated processing loops.
//!
//! An [`IntervalAccumulator`] owns one uniform-width histogram per stage of a
//! cycle plus one for the whole cycle:
//!
//! ```
//! use stage_timers::{IntervalAccumulator, TimerConfig};
//!
//! let mut timers = IntervalAccumulator::init(TimerConfig::new(3, 0, 1_000_000, 1_000))?;
//! for _ in 0..100 {
//!     timers.start_cycle();
//!     timers.mark(); // stage 0
//!     timers.mark(); // stage 1
//!     timers.end_cycle(); // stage 2, then the cycle total
//! }
//! let report = timers.summary();
//! assert_eq!(report.used_slots, 3);
//! # Ok::<(), stage_timers::TimerError>(())
//! ```

pub mod accumulator;
pub mod clock;
pub mod config;
pub mod error;
pub mod histogram;
pub mod report;

pub use accumulator::{IntervalAccumulator, Mark};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, OutputFormat, TimerConfig, MAX_TIMERS};
pub use error::{Result, TimerError};
pub use histogram::{HistogramStats, Increment, UniformHistogram, MAX_BINS};
pub use report::{StageStats, SummaryReport};
