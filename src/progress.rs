//! Progress/ETA tracker (C2): `try_lock`-and-skip updates so a contended tracker never
//! blocks a parallel worker; rate/ETA math lives here rather than in a formatting dependency.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SMOOTHING_ALPHA: f64 = 0.3;

/// A running exponentially-smoothed rate, seeded by the first sample (no warm-up bias).
struct Smoothed {
    value: Option<f64>,
}

impl Smoothed {
    fn new() -> Self {
        Smoothed { value: None }
    }

    fn push(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(prev) => SMOOTHING_ALPHA * sample + (1.0 - SMOOTHING_ALPHA) * prev,
        };
        self.value = Some(next);
        next
    }
}

struct State {
    start: Instant,
    last_print: Option<Instant>,
    total_items: Option<u64>,
    items_done: u64,
    bytes_done: u64,
    speed_smoothed: Smoothed,
}

/// Rate-limited progress tracker: accepts `update(items_done, bytes_done)` and prints at most
/// one line per `interval` (default 2s). Construct with `total_items: None` for unknown-total
/// operations (e.g. fill-until-full on a share); percentage/ETA are omitted, bytes/speed
/// still printed.
pub struct Tracker {
    state: Mutex<State>,
    interval: Duration,
    label: String,
}

impl Tracker {
    pub fn new(label: impl Into<String>, total_items: Option<u64>) -> Self {
        Tracker {
            state: Mutex::new(State {
                start: Instant::now(),
                last_print: None,
                total_items,
                items_done: 0,
                bytes_done: 0,
                speed_smoothed: Smoothed::new(),
            }),
            interval: Duration::from_secs(2),
            label: label.into(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Record progress and print a line if the rate-limit interval has elapsed.
    pub fn update(&self, items_done: u64, bytes_done: u64) {
        let mut state = match self.state.try_lock() {
            Ok(s) => s,
            Err(_) => return, // contended; skip rather than block a worker
        };
        state.items_done = items_done;
        state.bytes_done = bytes_done;

        let now = Instant::now();
        let should_print = match state.last_print {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !should_print {
            return;
        }
        state.last_print = Some(now);

        let elapsed = now.duration_since(state.start).as_secs_f64();
        let instantaneous_speed = if elapsed > 0.0 {
            state.bytes_done as f64 / elapsed
        } else {
            0.0
        };
        let speed = state.speed_smoothed.push(instantaneous_speed);

        let line = match state.total_items {
            Some(total) if total > 0 => {
                let pct = (state.items_done as f64 / total as f64 * 100.0).min(100.0);
                let eta = eta_seconds(state.items_done, total, elapsed);
                format!(
                    "{}: {:.1}% ({}/{}) {}/s, ETA {}",
                    self.label,
                    pct,
                    state.items_done,
                    total,
                    human_bytes(speed as u64),
                    format_duration(eta),
                )
            }
            _ => {
                format!(
                    "{}: {} items, {} done, {}/s",
                    self.label,
                    state.items_done,
                    human_bytes(state.bytes_done),
                    human_bytes(speed as u64),
                )
            }
        };
        println!("{line}");
    }
}

fn eta_seconds(items_done: u64, total: u64, elapsed_secs: f64) -> f64 {
    if items_done == 0 {
        return 0.0;
    }
    let remaining = total.saturating_sub(items_done) as f64;
    let per_item = elapsed_secs / items_done as f64;
    remaining * per_item
}

/// Format a duration: `Ns` under a minute, `Mm Ns` under an hour, else `Hh Mm Ns`.
pub fn format_duration(secs: f64) -> String {
    let total = secs.round().max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

pub type SharedTracker = Arc<Tracker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_seconds_only() {
        assert_eq!(format_duration(5.0), "5s");
    }

    #[test]
    fn duration_minutes_and_seconds() {
        assert_eq!(format_duration(65.0), "1m 5s");
    }

    #[test]
    fn duration_hours_minutes_seconds() {
        assert_eq!(format_duration(3725.0), "1h 2m 5s");
    }

    #[test]
    fn eta_zero_when_no_progress() {
        assert_eq!(eta_seconds(0, 100, 10.0), 0.0);
    }

    #[test]
    fn human_bytes_scales() {
        assert_eq!(human_bytes(512), "512 B");
        assert!(human_bytes(2 * 1024 * 1024).contains("MiB"));
    }
}
