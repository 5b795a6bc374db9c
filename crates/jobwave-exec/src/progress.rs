//! Run-wide progress across waves.

/// Tracks `(jobs completed before this wave + progress within it) / total`.
///
/// The value never decreases and stays at or below `(total - 1) / total`
/// while jobs are being polled; only the finished run reports 100%.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    value: f64,
    last_reported: f64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            value: 0.0,
            last_reported: 0.0,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    fn ceiling(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - 1) as f64 / self.total as f64
        }
    }

    /// Fold in one poll. `wave_done` is the summed progress of the current
    /// wave's jobs. Returns the percentage to log when progress moved at least
    /// one point since the last reported value.
    pub fn update(&mut self, wave_done: f64) -> Option<u32> {
        if self.total == 0 {
            return None;
        }
        let raw = (self.completed as f64 + wave_done) / self.total as f64;
        self.value = raw.min(self.ceiling()).max(self.value);

        if self.value - self.last_reported >= 0.01 {
            self.last_reported = self.value;
            Some(percent(self.value))
        } else {
            None
        }
    }

    /// Count a finished wave's jobs as completed.
    pub fn wave_finished(&mut self, jobs: usize) {
        self.completed = (self.completed + jobs).min(self.total);
    }
}

/// One job's reported progress as a fraction in `0.0..=1.0`. Readings that
/// are not finite count as no progress.
pub fn job_fraction(reported: f64) -> f64 {
    if reported.is_finite() {
        reported.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn percent(value: f64) -> u32 {
    (value * 100.0 + 1e-9).floor() as u32
}
