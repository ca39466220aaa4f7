use std::time::Duration;

/// Number of invocations averaged into one timing result.
pub const TIMING_WINDOW: u32 = 10;

/// Mean execution time over consecutive windows of `TIMING_WINDOW` invocations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingStats {
    accumulated: Duration,
    count: u32,
    mean: Duration,
    windows: u64,
}

impl TimingStats {
    /// Records one invocation. Returns the new mean when a window completes.
    pub fn record(&mut self, elapsed: Duration) -> Option<Duration> {
        self.accumulated += elapsed;
        self.count += 1;
        if self.count < TIMING_WINDOW {
            return None;
        }
        self.mean = self.accumulated / TIMING_WINDOW;
        self.accumulated = Duration::ZERO;
        self.count = 0;
        self.windows += 1;
        Some(self.mean)
    }

    /// Mean of the last completed window.
    pub fn mean(&self) -> Duration {
        self.mean
    }

    /// Mean of the last completed window in milliseconds.
    pub fn mean_ms(&self) -> f64 {
        self.mean.as_secs_f64() * 1000.0
    }

    pub fn completed_windows(&self) -> u64 {
        self.windows
    }
}
