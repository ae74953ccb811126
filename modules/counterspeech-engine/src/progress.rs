use std::time::{Duration, Instant};

use tracing::info;

/// Items done so far and a projected time to completion, based on the pace
/// of this process (items restored from a checkpoint don't count toward it).
#[derive(Debug, Clone)]
pub struct Progress {
    total: usize,
    resumed_from: usize,
    done: usize,
    started: Instant,
}

impl Progress {
    pub fn new(total: usize, resumed_from: usize) -> Self {
        Self {
            total,
            resumed_from,
            done: resumed_from,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, items: usize) {
        self.done = (self.done + items).min(self.total);
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn remaining(&self) -> usize {
        self.total - self.done
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.done as f64 * 100.0 / self.total as f64
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn eta(&self) -> Option<Duration> {
        let this_run = self.done - self.resumed_from;
        if this_run == 0 {
            return None;
        }
        let per_item = self.elapsed().as_secs_f64() / this_run as f64;
        Some(Duration::from_secs_f64(per_item * self.remaining() as f64))
    }

    pub fn log(&self, processor: &str, batch_index: usize) {
        info!(
            processor,
            batch = batch_index,
            done = self.done,
            total = self.total,
            percent = format!("{:.1}", self.percent()),
            elapsed = %format_duration(self.elapsed()),
            eta = %self.eta().map(format_duration).unwrap_or_else(|| "?".into()),
            "Progress"
        );
    }
}

/// `3725s` → `"1h 2m 5s"`, `65s` → `"1m 5s"`, `7s` → `"7s"`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
