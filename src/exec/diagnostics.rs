// src/exec/diagnostics.rs

//! Settings and helpers behind the executor's monitoring queries.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Heuristic thresholds for [`Executor::is_likely_stuck`](crate::exec::Executor::is_likely_stuck).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckPolicy {
    /// A run taking more than `estimate_factor` times its estimate is stuck.
    pub estimate_factor: u32,
    /// Without an estimate, a run longer than this is stuck.
    pub no_estimate_limit: Duration,
}

impl StuckPolicy {
    pub fn is_stuck(&self, elapsed: Duration, estimate: Option<Duration>) -> bool {
        match estimate {
            Some(d) => d.saturating_mul(self.estimate_factor) < elapsed,
            None => elapsed > self.no_estimate_limit,
        }
    }
}

impl Default for StuckPolicy {
    fn default() -> Self {
        Self {
            estimate_factor: 10,
            no_estimate_limit: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Per-executor settings handed down by the owning node.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub clock: Arc<dyn Clock>,
    pub stuck: StuckPolicy,
}

impl ExecutorSettings {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stuck: StuckPolicy::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

/// Progress as a percentage in `0..=99`, or `-1` without a usable estimate.
///
/// Never reports 100: a run is only done once its completion is observed.
pub fn progress_percent(elapsed: Duration, estimate: Option<Duration>) -> i32 {
    let Some(estimate) = estimate.filter(|d| !d.is_zero()) else {
        return -1;
    };
    let percent = elapsed.as_millis().saturating_mul(100) / estimate.as_millis().max(1);
    percent.min(99) as i32
}

/// Human-readable span using the two most significant units.
///
/// `"1 day 2 hr"`, `"3 min 4 sec"`, `"850 ms"`.
pub fn time_span_string(span: Duration) -> String {
    const UNITS: [(u64, &str, &str); 5] = [
        (24 * 60 * 60 * 1000, "day", "days"),
        (60 * 60 * 1000, "hr", "hr"),
        (60 * 1000, "min", "min"),
        (1000, "sec", "sec"),
        (1, "ms", "ms"),
    ];

    let millis = span.as_millis() as u64;
    for (i, (size, one, many)) in UNITS.iter().enumerate() {
        let major = millis / size;
        if major == 0 && i + 1 < UNITS.len() {
            continue;
        }
        let major_label = if major == 1 { one } else { many };
        // Seconds and below: a single unit reads better.
        if *size <= 1000 {
            return format!("{major} {major_label}");
        }
        let (minor_size, minor_one, minor_many) = UNITS[i + 1];
        let minor = (millis % size) / minor_size;
        if minor == 0 {
            return format!("{major} {major_label}");
        }
        let minor_label = if minor == 1 { minor_one } else { minor_many };
        return format!("{major} {major_label} {minor} {minor_label}");
    }
    "0 ms".to_string()
}
