//! Rolling render-time statistics.

use std::collections::VecDeque;
use std::time::Duration;

/// Default rolling window capacity (about one second at 60fps).
pub const DEFAULT_STATS_WINDOW: usize = 60;

/// Snapshot returned by `Compositor::render_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderStats {
    /// Successful composited renders (cache hits excluded)
    pub frames_rendered: u64,
    pub render_errors: u64,
    /// Mean of the rolling window
    pub avg_render_time: Duration,
    pub last_render_time: Duration,
    /// Samples currently in the window
    pub samples: usize,
}

/// Fixed-capacity window of render durations plus monotonic counters.
#[derive(Debug, Clone)]
pub struct RenderStatsWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    sum: Duration,
    frames_rendered: u64,
    render_errors: u64,
    last: Duration,
}

impl Default for RenderStatsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}

impl RenderStatsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: Duration::ZERO,
            frames_rendered: 0,
            render_errors: 0,
            last: Duration::ZERO,
        }
    }

    pub fn record_render(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity
            && let Some(old) = self.samples.pop_front()
        {
            self.sum -= old;
        }
        self.samples.push_back(elapsed);
        self.sum += elapsed;
        self.last = elapsed;
        self.frames_rendered += 1;
    }

    pub fn record_error(&mut self) {
        self.render_errors += 1;
    }

    pub fn snapshot(&self) -> RenderStats {
        let avg = if self.samples.is_empty() {
            Duration::ZERO
        } else {
            self.sum / self.samples.len() as u32
        };
        RenderStats {
            frames_rendered: self.frames_rendered,
            render_errors: self.render_errors,
            avg_render_time: avg,
            last_render_time: self.last,
            samples: self.samples.len(),
        }
    }
}
