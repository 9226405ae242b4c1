use std::time::{Duration, Instant};

use stage_timers::{Config, IntervalAccumulator, OutputFormat, Result};
use tracing::{error, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cfg))
        .init();

    if let Err(e) = run(cfg) {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

/// `LOG_LEVEL`, plus `stage_timers=debug` when per-mark diagnostics are on.
fn log_filter(cfg: &Config) -> EnvFilter {
    let filter = EnvFilter::new(&cfg.log_level);
    if !cfg.debug {
        return filter;
    }
    match "stage_timers=debug".parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Readout-style loop: four stages with a pause between marks 1 and 2,
/// the fifth closed by `end_cycle`.
fn run(cfg: Config) -> Result<()> {
    let mut timers = IntervalAccumulator::init(cfg.timer)?;
    timers.set_debug(cfg.debug);
    info!(
        "Timers ready: {} slots, [{}, {}) ns in {} ns bins",
        cfg.timer.slots, cfg.timer.min_time, cfg.timer.max_time, cfg.timer.bin_width,
    );

    let wait = Duration::from_micros(cfg.sleep_us);
    let started = Instant::now();
    for _ in 0..cfg.cycles {
        timers.start_cycle();
        timers.mark(); // 0
        timers.mark(); // 1
        std::thread::sleep(wait);
        timers.mark(); // 2
        timers.mark(); // 3
        timers.end_cycle(); // 4
    }
    info!(
        cycles = cfg.cycles,
        elapsed_ms = started.elapsed().as_millis() as u64,
        dropped_marks = timers.dropped_marks(),
        "Run complete"
    );

    match cfg.output {
        OutputFormat::Text => timers.print_summary(),
        OutputFormat::Json => match timers.summary().to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to encode summary: {e}"),
        },
    }

    timers.dispose();
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
