//! Uniform-width frequency histogram with running mean/sigma.
//!
//! Values are elapsed times in nanoseconds, but nothing here depends on the
//! unit. Bins cover `[min, max)`; samples outside that range are tallied as
//! underflow/overflow and otherwise ignored.

use serde::Serialize;

use crate::error::{Result, TimerError};

/// Upper bound on bins per histogram (8 MiB of counts).
pub const MAX_BINS: usize = 1 << 20;

/// Outcome of a single [`UniformHistogram::increment`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Increment {
    /// Sample was binned. Carries the histogram's new total count.
    Counted(u64),
    /// Sample was below `min`.
    Underflow,
    /// Sample was at or above `max` (or NaN).
    Overflow,
}

impl Increment {
    pub fn is_counted(&self) -> bool {
        matches!(self, Increment::Counted(_))
    }
}

impl std::fmt::Display for Increment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Increment::Counted(n) => write!(f, "counted (n={n})"),
            Increment::Underflow => write!(f, "underflow"),
            Increment::Overflow => write!(f, "overflow"),
        }
    }
}

/// Snapshot of a histogram's derived statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HistogramStats {
    pub count: u64,
    pub mean: f64,
    pub stddev: f64,
    /// Samples rejected as underflow or overflow.
    pub out_of_range: u64,
}

#[derive(Debug, Clone)]
pub struct UniformHistogram {
    min: f64,
    max: f64,
    /// Effective width: `(max - min) / bins.len()`.
    width: f64,
    bins: Vec<u64>,
    count: u64,
    /// Welford running mean.
    mean: f64,
    /// Welford M2: sum of squared deviations from the running mean.
    m2: f64,
    underflow: u64,
    overflow: u64,
}

impl UniformHistogram {
    /// Allocate `floor((max - min) / bin_width)` bins spanning exactly `[min, max)`.
    pub fn new(min: f64, max: f64, bin_width: f64) -> Result<Self> {
        let invalid = || TimerError::InvalidRange { min, max, bin_width };

        if !min.is_finite() || !max.is_finite() || !bin_width.is_finite() {
            return Err(invalid());
        }
        if max <= min || bin_width <= 0.0 {
            return Err(invalid());
        }
        let nbins = ((max - min) / bin_width).floor();
        if nbins < 1.0 || nbins > MAX_BINS as f64 {
            return Err(invalid());
        }
        let nbins = nbins as usize;

        let mut bins = Vec::new();
        bins.try_reserve_exact(nbins).map_err(|_| invalid())?;
        bins.resize(nbins, 0);

        Ok(Self {
            min,
            max,
            width: (max - min) / nbins as f64,
            bins,
            count: 0,
            mean: 0.0,
            m2: 0.0,
            underflow: 0,
            overflow: 0,
        })
    }

    /// Bin `value`. Out-of-range samples are counted as underflow/overflow only.
    pub fn increment(&mut self, value: f64) -> Increment {
        if value < self.min {
            self.underflow += 1;
            return Increment::Underflow;
        }
        if value >= self.max || value.is_nan() {
            self.overflow += 1;
            return Increment::Overflow;
        }

        let idx = ((value - self.min) / self.width).floor() as usize;
        let idx = idx.min(self.bins.len() - 1); // rounding at the top edge
        self.bins[idx] += 1;

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        Increment::Counted(self.count)
    }

    /// Zero all counts and running statistics. Bin edges are kept.
    pub fn reset(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
        self.underflow = 0;
        self.overflow = 0;
    }

    pub fn stats(&self) -> HistogramStats {
        HistogramStats {
            count: self.count,
            mean: self.mean(),
            stddev: self.stddev(),
            out_of_range: self.underflow + self.overflow,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 0.0 for an empty histogram.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Population standard deviation; 0.0 for an empty histogram.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0).sqrt()
    }

    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_width(&self) -> f64 {
        self.width
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    pub fn bin(&self, i: usize) -> Option<u64> {
        self.bins.get(i).copied()
    }

    /// `[lower, upper)` edges of bin `i`.
    pub fn bin_range(&self, i: usize) -> Option<(f64, f64)> {
        if i >= self.bins.len() {
            return None;
        }
        let lower = self.min + i as f64 * self.width;
        let upper = if i + 1 == self.bins.len() {
            self.max
        } else {
            self.min + (i + 1) as f64 * self.width
        };
        Some((lower, upper))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
