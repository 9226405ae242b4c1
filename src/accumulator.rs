//! Per-stage interval accumulator.
//!
//! One accumulator measures one repeated sequence of operations. Each call to
//! [`IntervalAccumulator::mark`] closes a stage: the time since the previous
//! mark (or cycle start) goes into that stage's histogram and the cursor
//! moves to the next slot. [`IntervalAccumulator::end_cycle`] closes the last
//! stage and folds the whole cycle span into the total histogram.
//!
//! Mutating calls take `&mut self`; use one accumulator per thread.

use std::time::Duration;

use tracing::{debug, error};

use crate::clock::{Clock, MonotonicClock};
use crate::config::TimerConfig;
use crate::error::Result;
use crate::histogram::{Increment, UniformHistogram};
use crate::report::{StageStats, SummaryReport};

/// Outcome of a single [`IntervalAccumulator::mark`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mark {
    /// Delta went into stage `slot`'s histogram.
    Recorded {
        slot: usize,
        delta_ns: f64,
        increment: Increment,
    },
    /// All slots for this cycle are used; the delta was measured but not kept.
    Dropped { delta_ns: f64 },
}

impl Mark {
    pub fn delta_ns(&self) -> f64 {
        match *self {
            Mark::Recorded { delta_ns, .. } | Mark::Dropped { delta_ns } => delta_ns,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match *self {
            Mark::Recorded { slot, .. } => Some(slot),
            Mark::Dropped { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct IntervalAccumulator<C: Clock = MonotonicClock> {
    clock: C,
    stages: Vec<UniformHistogram>,
    total: UniformHistogram,
    /// Clock reading at the last `start_cycle` (or init).
    cycle_start: Duration,
    /// Clock reading at the last mark, cycle start, or init.
    last_mark: Duration,
    /// Next stage slot to receive a sample.
    cursor: usize,
    /// Highest slot ever recorded since init/reset.
    max_cursor: usize,
    dropped_marks: u64,
    debug: bool,
}

impl IntervalAccumulator<MonotonicClock> {
    /// Allocate `config.slots` stage histograms plus the total histogram,
    /// timed by the process monotonic clock.
    pub fn init(config: TimerConfig) -> Result<Self> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> IntervalAccumulator<C> {
    pub fn with_clock(config: TimerConfig, clock: C) -> Result<Self> {
        if let Err(e) = config.validate() {
            error!(?config, "timer init failed: {e}");
            return Err(e);
        }

        let alloc = || {
            UniformHistogram::new(
                config.min_time as f64,
                config.max_time as f64,
                config.bin_width as f64,
            )
        };
        let stages = (0..config.slots)
            .map(|_| alloc())
            .collect::<Result<Vec<_>>>()?;
        let total = alloc()?;

        let now = clock.now();
        Ok(Self {
            clock,
            stages,
            total,
            cycle_start: now,
            last_mark: now,
            cursor: 0,
            max_cursor: 0,
            dropped_marks: 0,
            debug: false,
        })
    }

    /// Begin a cycle. A previous cycle that recorded stages but was never
    /// closed by `end_cycle` is folded into the total histogram first.
    /// Returns the folded span, if any.
    pub fn start_cycle(&mut self) -> Option<f64> {
        let folded = if self.cursor > 0 { Some(self.fold_total()) } else { None };

        let now = self.clock.now();
        self.cycle_start = now;
        self.last_mark = now;
        self.cursor = 0;

        folded
    }

    /// Close the current stage. Past the last allocated slot the sample is
    /// dropped, but the reference time still moves to now.
    pub fn mark(&mut self) -> Mark {
        let now = self.clock.now();
        let delta_ns = elapsed_ns(self.last_mark, now);
        self.last_mark = now;

        let Some(hist) = self.stages.get_mut(self.cursor) else {
            self.dropped_marks += 1;
            if self.debug {
                debug!(cursor = self.cursor, delta_ns, "mark past allocated slots, sample dropped");
            }
            return Mark::Dropped { delta_ns };
        };

        let slot = self.cursor;
        let increment = hist.increment(delta_ns);
        if self.debug {
            debug!(slot, delta_ns, %increment, "stage sample");
        }

        self.max_cursor = self.max_cursor.max(slot);
        self.cursor += 1;

        Mark::Recorded {
            slot,
            delta_ns,
            increment,
        }
    }

    /// Close the last stage and, if the cycle recorded anything, fold the
    /// cycle span into the total histogram. Returns the folded span.
    pub fn end_cycle(&mut self) -> Option<f64> {
        self.mark();
        if self.cursor == 0 {
            return None;
        }
        let span = self.fold_total();
        self.cursor = 0;
        Some(span)
    }

    fn fold_total(&mut self) -> f64 {
        let span = elapsed_ns(self.cycle_start, self.last_mark);
        let increment = self.total.increment(span);
        if self.debug {
            debug!(span_ns = span, %increment, "cycle total");
        }
        span
    }

    /// Zero every histogram and the cursors. Storage is kept.
    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(UniformHistogram::reset);
        self.total.reset();
        self.cursor = 0;
        self.max_cursor = 0;
        self.dropped_marks = 0;
    }

    /// Release all histogram storage. Equivalent to dropping the accumulator.
    pub fn dispose(self) {}

    pub fn summary(&self) -> SummaryReport {
        let stages = if self.stages.is_empty() {
            Vec::new()
        } else {
            self.stages[..=self.max_cursor]
                .iter()
                .enumerate()
                .map(|(index, h)| StageStats::new(index, h.stats()))
                .collect()
        };

        SummaryReport {
            allocated_slots: self.stages.len(),
            used_slots: stages.len(),
            stages,
            total: self.total.stats(),
            dropped_marks: self.dropped_marks,
        }
    }

    pub fn print_summary(&self) {
        print!("{}", self.summary());
    }

    pub fn set_debug(&mut self, on: bool) {
        self.debug = on;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn allocated_slots(&self) -> usize {
        self.stages.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn max_cursor(&self) -> usize {
        self.max_cursor
    }

    pub fn dropped_marks(&self) -> u64 {
        self.dropped_marks
    }

    pub fn stage(&self, slot: usize) -> Option<&UniformHistogram> {
        self.stages.get(slot)
    }

    pub fn total(&self) -> &UniformHistogram {
        &self.total
    }
}

/// Nanoseconds between two readings. A reading earlier than `from` yields 0.
#[inline]
fn elapsed_ns(from: Duration, to: Duration) -> f64 {
    to.saturating_sub(from).as_nanos() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TimerError;
    use crate::histogram::HistogramStats;

    fn manual(slots: usize, min: u64, max: u64, bin: u64) -> (IntervalAccumulator<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let acc = IntervalAccumulator::with_clock(TimerConfig::new(slots, min, max, bin), clock.clone())
            .expect("valid config");
        (acc, clock)
    }

    fn counts(acc: &IntervalAccumulator<ManualClock>) -> Vec<u64> {
        (0..acc.allocated_slots())
            .map(|i| acc.stage(i).unwrap().count())
            .collect()
    }

    #[test]
    fn init_rejects_more_than_max_slots() {
        let err = IntervalAccumulator::init(TimerConfig::new(11, 0, 1000, 100)).unwrap_err();
        assert_eq!(err, TimerError::CapacityExceeded { requested: 11, max: 10 });
    }

    #[test]
    fn init_rejects_degenerate_range() {
        let err = IntervalAccumulator::init(TimerConfig::new(3, 1000, 1000, 100)).unwrap_err();
        assert!(matches!(err, TimerError::InvalidRange { .. }));
    }

    #[test]
    fn init_rejects_range_too_wide_to_allocate() {
        let err = IntervalAccumulator::init(TimerConfig::new(1, 0, u64::MAX, 1)).unwrap_err();
        assert!(matches!(err, TimerError::InvalidRange { .. }));

        let clock = ManualClock::new();
        let err = IntervalAccumulator::with_clock(TimerConfig::new(0, 0, u64::MAX, 1), clock).unwrap_err();
        assert!(matches!(err, TimerError::InvalidRange { .. }));
    }

    #[test]
    fn init_allocates_slots_plus_total() {
        let (acc, _) = manual(10, 0, 500_000, 100);
        assert_eq!(acc.allocated_slots(), 10);
        for i in 0..10 {
            assert_eq!(acc.stage(i).unwrap().bin_count(), 5000);
        }
        assert!(acc.stage(10).is_none());
        assert_eq!(acc.total().bin_count(), 5000);
        assert_eq!(acc.cursor(), 0);
        assert_eq!(acc.max_cursor(), 0);
    }

    #[test]
    fn marks_fill_slots_in_order() {
        let (mut acc, clock) = manual(5, 0, 1000, 100);
        acc.start_cycle();
        for n in 0..3 {
            clock.advance_ns(10);
            assert_eq!(acc.mark().slot(), Some(n));
        }
        assert_eq!(counts(&acc), vec![1, 1, 1, 0, 0]);
        assert_eq!(acc.cursor(), 3);
        assert_eq!(acc.max_cursor(), 2);
    }

    #[test]
    fn marks_past_capacity_are_dropped_but_advance_time() {
        let (mut acc, clock) = manual(2, 0, 10_000, 10);
        acc.start_cycle();
        clock.advance_ns(100);
        acc.mark();
        clock.advance_ns(200);
        acc.mark();

        clock.advance_ns(5_000);
        let dropped = acc.mark();
        assert_eq!(dropped, Mark::Dropped { delta_ns: 5_000.0 });
        clock.advance_ns(300);
        assert_eq!(acc.mark().delta_ns(), 300.0);

        assert_eq!(counts(&acc), vec![1, 1]);
        assert_eq!(acc.dropped_marks(), 2);

        // Next cycle's first delta measures from its own start, not a stale mark.
        clock.advance_ns(1_000);
        acc.start_cycle();
        clock.advance_ns(42);
        assert_eq!(acc.mark().delta_ns(), 42.0);
        assert!((acc.stage(0).unwrap().mean() - 71.0).abs() < 1e-9);
    }

    #[test]
    fn zero_slot_accumulator_drops_everything() {
        let (mut acc, clock) = manual(0, 0, 1000, 100);
        acc.start_cycle();
        clock.advance_ns(50);
        assert!(matches!(acc.mark(), Mark::Dropped { .. }));
        assert_eq!(acc.end_cycle(), None);

        let report = acc.summary();
        assert_eq!(report.allocated_slots, 0);
        assert_eq!(report.used_slots, 0);
        assert!(report.stages.is_empty());
        assert_eq!(report.total.count, 0);
    }

    #[test]
    fn round_trip_five_stages() {
        let (mut acc, clock) = manual(5, 0, 1000, 100);
        acc.start_cycle();
        for _ in 0..4 {
            clock.advance_ns(100);
            acc.mark();
        }
        clock.advance_ns(100);
        assert_eq!(acc.end_cycle(), Some(500.0));

        let report = acc.summary();
        assert_eq!(report.allocated_slots, 5);
        assert_eq!(report.used_slots, 5);
        for s in &report.stages {
            assert_eq!(s.count, 1, "stage {}", s.index);
            assert!((s.mean - 100.0).abs() < 1e-9);
            assert_eq!(s.stddev, 0.0);
        }
        assert_eq!(report.total.count, 1);
        assert!((report.total.mean - 500.0).abs() < 1e-9);
    }

    #[test]
    fn end_cycle_then_start_cycle_folds_once() {
        let (mut acc, clock) = manual(3, 0, 10_000, 10);
        acc.start_cycle();
        clock.advance_ns(100);
        acc.mark();
        clock.advance_ns(100);
        assert_eq!(acc.end_cycle(), Some(200.0));

        clock.advance_ns(700);
        assert_eq!(acc.start_cycle(), None);
        assert_eq!(acc.total().count(), 1);
    }

    #[test]
    fn start_cycle_folds_unclosed_cycle() {
        let (mut acc, clock) = manual(3, 0, 10_000, 10);
        acc.start_cycle();
        clock.advance_ns(100);
        acc.mark();
        clock.advance_ns(150);
        acc.mark();

        // The gap before the next start is not part of the cycle span.
        clock.advance_ns(5_000);
        assert_eq!(acc.start_cycle(), Some(250.0));
        assert_eq!(acc.total().count(), 1);
        assert!((acc.total().mean() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn start_cycle_without_stages_folds_nothing() {
        let (mut acc, clock) = manual(3, 0, 10_000, 10);
        acc.start_cycle();
        clock.advance_ns(100);
        assert_eq!(acc.start_cycle(), None);
        assert_eq!(acc.total().count(), 0);
    }

    #[test]
    fn mark_before_start_measures_from_init() {
        let (mut acc, clock) = manual(2, 0, 10_000, 10);
        clock.advance_ns(400);
        assert_eq!(
            acc.mark(),
            Mark::Recorded {
                slot: 0,
                delta_ns: 400.0,
                increment: Increment::Counted(1)
            }
        );
    }

    #[test]
    fn out_of_range_delta_is_not_counted() {
        let (mut acc, clock) = manual(2, 0, 1000, 100);
        acc.start_cycle();
        clock.advance_ns(5_000);
        let m = acc.mark();
        assert_eq!(m.slot(), Some(0));
        assert!(matches!(m, Mark::Recorded { increment, .. } if !increment.is_counted()));
        assert!(matches!(
            m,
            Mark::Recorded {
                increment: Increment::Overflow,
                ..
            }
        ));
        assert_eq!(acc.stage(0).unwrap().count(), 0);
        assert_eq!(acc.summary().stages[0].out_of_range, 1);
        // The slot is still consumed.
        assert_eq!(acc.cursor(), 1);
    }

    #[test]
    fn reset_zeroes_everything() {
        let (mut acc, clock) = manual(4, 0, 10_000, 10);
        for _ in 0..3 {
            acc.start_cycle();
            for _ in 0..6 {
                clock.advance_ns(90);
                acc.mark();
            }
            acc.end_cycle();
        }
        acc.reset();

        assert_eq!(acc.cursor(), 0);
        assert_eq!(acc.max_cursor(), 0);
        let report = acc.summary();
        assert_eq!(report.used_slots, 1);
        assert_eq!(report.dropped_marks, 0);
        for s in &report.stages {
            assert_eq!((s.count, s.mean, s.stddev), (0, 0.0, 0.0));
        }
        assert_eq!(report.total, HistogramStats::default());
        assert_eq!(counts(&acc), vec![0, 0, 0, 0]);
    }

    #[test]
    fn max_cursor_is_high_water_mark_across_cycles() {
        let (mut acc, clock) = manual(6, 0, 10_000, 10);
        acc.start_cycle();
        for _ in 0..4 {
            clock.advance_ns(10);
            acc.mark();
        }
        acc.end_cycle();

        acc.start_cycle();
        clock.advance_ns(10);
        acc.end_cycle();

        assert_eq!(acc.max_cursor(), 4);
        assert_eq!(acc.summary().used_slots, 5);
    }

    #[test]
    fn accumulators_do_not_share_state() {
        let (mut a, clock_a) = manual(3, 0, 10_000, 10);
        let (b, _clock_b) = manual(3, 0, 10_000, 10);
        let before = b.summary();

        a.start_cycle();
        clock_a.advance_ns(100);
        a.mark();
        a.end_cycle();

        assert_eq!(b.summary(), before);
        assert_eq!(b.cursor(), 0);
        assert_eq!(a.summary().total.count, 1);
    }

    #[test]
    fn accumulators_can_borrow_one_clock() {
        let clock = ManualClock::new();
        let cfg = TimerConfig::new(2, 0, 10_000, 10);
        let mut a = IntervalAccumulator::with_clock(cfg, &clock).unwrap();
        let mut b = IntervalAccumulator::with_clock(cfg, &clock).unwrap();

        a.start_cycle();
        clock.advance_ns(300);
        b.start_cycle();
        clock.advance_ns(200);

        assert_eq!(a.mark().delta_ns(), 500.0);
        assert_eq!(b.mark().delta_ns(), 200.0);
        assert_eq!(b.summary().stages[0].count, 1);
        assert_eq!(a.summary().stages[0].count, 1);
    }

    #[test]
    fn debug_flag_does_not_change_accumulation() {
        let run = |debug: bool| {
            let (mut acc, clock) = manual(3, 0, 10_000, 10);
            acc.set_debug(debug);
            assert_eq!(acc.debug(), debug);
            for step in [120, 340, 560, 780] {
                acc.start_cycle();
                for _ in 0..4 {
                    clock.advance_ns(step);
                    acc.mark();
                }
                acc.end_cycle();
            }
            acc.summary()
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn sleep_between_marks_shows_in_stage_mean() {
        let mut acc = IntervalAccumulator::init(TimerConfig::new(10, 0, 1_000_000_000, 100_000)).unwrap();
        let cycles = 200;
        for _ in 0..cycles {
            acc.start_cycle();
            acc.mark();
            acc.mark();
            std::thread::sleep(Duration::from_micros(150));
            acc.mark();
            acc.mark();
            acc.end_cycle();
        }

        let report = acc.summary();
        assert_eq!(report.allocated_slots, 10);
        assert_eq!(report.used_slots, 5);
        for s in &report.stages {
            assert_eq!(s.count, cycles, "stage {}", s.index);
        }
        assert_eq!(report.total.count, cycles);

        let slept = report.stages[2].mean;
        assert!(slept >= 150_000.0, "stage 2 mean {slept}");
        for i in [0, 1, 3, 4] {
            assert!(report.stages[i].mean < slept, "stage {i} not below stage 2");
        }
        assert!(report.total.mean >= slept);
    }

    fn run_readout_loop(acc: &mut IntervalAccumulator, cycles: u64) {
        for _ in 0..cycles {
            acc.start_cycle();
            acc.mark();
            acc.mark();
            std::thread::sleep(Duration::from_micros(150));
            acc.mark();
            acc.mark();
            acc.end_cycle();
        }
    }

    #[test]
    fn readout_layout_counts_every_stage() {
        let mut acc = IntervalAccumulator::init(TimerConfig::new(10, 0, 500_000, 100)).unwrap();
        assert_eq!(acc.stage(0).unwrap().bin_count(), 5000);
        let cycles = 200;
        run_readout_loop(&mut acc, cycles);

        let report = acc.summary();
        assert_eq!(report.used_slots, 5);
        for s in &report.stages {
            // A sleep overshooting 500 us lands in overflow, never nowhere.
            assert_eq!(s.count + s.out_of_range, cycles, "stage {}", s.index);
        }
        for i in [0, 1, 3, 4] {
            assert_eq!(report.stages[i].count, cycles, "stage {i}");
        }
        let slept = acc.stage(2).unwrap();
        let populated = slept.bins().iter().position(|&b| b > 0);
        assert!(populated.is_some_and(|i| i >= 1500), "first populated bin {populated:?}");
    }

    #[test]
    #[ignore = "runs 10000 real-clock cycles (~2 s)"]
    fn readout_loop_ten_thousand_cycles() {
        let mut acc = IntervalAccumulator::init(TimerConfig::new(10, 0, 500_000, 100)).unwrap();
        run_readout_loop(&mut acc, 10_000);

        let report = acc.summary();
        assert_eq!(report.allocated_slots, 10);
        assert_eq!(report.used_slots, 5);
        for s in &report.stages {
            assert_eq!(s.count, 10_000, "stage {}", s.index);
        }
        let slept = report.stages[2].mean;
        for i in [0, 1, 3, 4] {
            assert!(report.stages[i].mean < slept, "stage {i} not below stage 2");
        }
    }
}
