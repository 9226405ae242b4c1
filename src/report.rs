//! Summary of an accumulator run, as data and as console text.

use std::fmt;

use serde::Serialize;

use crate::histogram::HistogramStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageStats {
    pub index: usize,
    pub count: u64,
    pub mean: f64,
    pub stddev: f64,
    pub out_of_range: u64,
}

impl StageStats {
    pub fn new(index: usize, stats: HistogramStats) -> Self {
        Self {
            index,
            count: stats.count,
            mean: stats.mean,
            stddev: stats.stddev,
            out_of_range: stats.out_of_range,
        }
    }
}

/// Stages `0..used_slots` plus the cycle total. Times are nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub allocated_slots: usize,
    pub used_slots: usize,
    pub stages: Vec<StageStats>,
    pub total: HistogramStats,
    /// Marks that arrived after every slot of their cycle was used.
    pub dropped_marks: u64,
}

impl SummaryReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            " Allocated Histograms = {}   Used = {}",
            self.allocated_slots, self.used_slots
        )?;
        for s in &self.stages {
            writeln!(
                f,
                "{:2}: n = {:.1}   mean = {:4.1}  sigma = {:4.1}  ",
                s.index, s.count as f64, s.mean, s.stddev
            )?;
        }
        writeln!(f, "TOTAL:")?;
        writeln!(
            f,
            "    n = {:.1}   mean = {:4.1}  sigma = {:4.1}  ",
            self.total.count as f64, self.total.mean, self.total.stddev
        )
    }
}
