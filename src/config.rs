use serde::Serialize;

use crate::error::{Result, TimerError};
use crate::histogram::MAX_BINS;

/// Maximum number of stage slots one accumulator may allocate.
pub const MAX_TIMERS: usize = 10;

/// Defaults match the readout test loop: 10 slots, 0–500 µs in 100 ns bins.
pub const DEFAULT_SLOTS: usize = 10;
pub const DEFAULT_MIN_NS: u64 = 0;
pub const DEFAULT_MAX_NS: u64 = 500_000;
pub const DEFAULT_BIN_NS: u64 = 100;

/// Cycles the driver runs and the pause it inserts after the second mark.
pub const DEFAULT_CYCLES: u64 = 10_000;
pub const DEFAULT_SLEEP_US: u64 = 150;

/// Histogram layout shared by every stage slot and the total histogram.
/// All times are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerConfig {
    pub slots: usize,
    pub min_time: u64,
    pub max_time: u64,
    pub bin_width: u64,
}

impl TimerConfig {
    pub fn new(slots: usize, min_time: u64, max_time: u64, bin_width: u64) -> Self {
        Self {
            slots,
            min_time,
            max_time,
            bin_width,
        }
    }

    /// Slot capacity and range sanity, including the `MAX_BINS` cap. Bin count
    /// is checked again when the histograms are allocated.
    pub fn validate(&self) -> Result<()> {
        if self.slots > MAX_TIMERS {
            return Err(TimerError::CapacityExceeded {
                requested: self.slots,
                max: MAX_TIMERS,
            });
        }
        if self.max_time <= self.min_time
            || self.bin_width == 0
            || (self.max_time - self.min_time) / self.bin_width == 0
            || (self.max_time - self.min_time) / self.bin_width > MAX_BINS as u64
        {
            return Err(TimerError::InvalidRange {
                min: self.min_time as f64,
                max: self.max_time as f64,
                bin_width: self.bin_width as f64,
            });
        }
        Ok(())
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS, DEFAULT_MIN_NS, DEFAULT_MAX_NS, DEFAULT_BIN_NS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = TimerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(TimerError::Config(format!(
                "TIMER_OUTPUT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Driver settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub timer: TimerConfig,
    /// Cycles to run (TIMER_CYCLES)
    pub cycles: u64,
    /// Pause between the second and third mark, in microseconds (TIMER_SLEEP_US)
    pub sleep_us: u64,
    /// Per-mark diagnostics (TIMER_DEBUG)
    pub debug: bool,
    pub output: OutputFormat,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys fall back to defaults;
    /// present but unparseable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timer = TimerConfig {
            slots: parse_or(&lookup, "TIMER_SLOTS", DEFAULT_SLOTS)?,
            min_time: parse_or(&lookup, "TIMER_MIN_NS", DEFAULT_MIN_NS)?,
            max_time: parse_or(&lookup, "TIMER_MAX_NS", DEFAULT_MAX_NS)?,
            bin_width: parse_or(&lookup, "TIMER_BIN_NS", DEFAULT_BIN_NS)?,
        };

        let debug = match lookup("TIMER_DEBUG") {
            None => false,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(TimerError::Config(format!(
                        "TIMER_DEBUG must be a boolean, got '{other}'"
                    )))
                }
            },
        };

        Ok(Self {
            timer,
            cycles: parse_or(&lookup, "TIMER_CYCLES", DEFAULT_CYCLES)?,
            sleep_us: parse_or(&lookup, "TIMER_SLEEP_US", DEFAULT_SLEEP_US)?,
            debug,
            output: lookup("TIMER_OUTPUT")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(OutputFormat::Text),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| TimerError::Config(format!("{key} must be a non-negative integer, got '{v}'"))),
    }
}
