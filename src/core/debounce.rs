//! Render debouncer - collapses rapid scrub requests into one render per tick.
//!
//! Scrubbing produces far more time requests than we can render. Instead:
//! 1. Each request replaces the pending one (latest time wins)
//! 2. Requests within `threshold` of the last rendered time are dropped
//! 3. The host's frame loop calls `take()` once per tick and renders at most
//!    one time
//!
//! # Usage
//! ```ignore
//! // On scrub input:
//! debouncer.schedule(t);
//!
//! // In update loop:
//! if let Some(t) = debouncer.take() {
//!     render(t);
//!     debouncer.mark_rendered(t);
//! }
//! ```

/// Default threshold: 1ms of timeline time.
pub const DEFAULT_THRESHOLD_SECS: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct RenderDebouncer {
    threshold: f64,
    pending: Option<f64>,
    last_rendered: Option<f64>,
}

impl Default for RenderDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_SECS)
    }
}

impl RenderDebouncer {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold: threshold_secs.max(0.0),
            pending: None,
            last_rendered: None,
        }
    }

    /// Request a render of `time`. Returns false if it was dropped.
    ///
    /// A dropped request also clears any pending one: the frame already on
    /// screen is the most recent one asked for.
    pub fn schedule(&mut self, time: f64) -> bool {
        if let Some(last) = self.last_rendered
            && (time - last).abs() < self.threshold
        {
            log::trace!("RenderDebouncer: drop {:.4}s (last rendered {:.4}s)", time, last);
            self.pending = None;
            return false;
        }
        if let Some(prev) = self.pending.replace(time) {
            log::trace!("RenderDebouncer: {:.4}s superseded by {:.4}s", prev, time);
        }
        true
    }

    /// Pop the pending request, if any.
    pub fn take(&mut self) -> Option<f64> {
        self.pending.take()
    }

    /// Record a completed render (interactive or debounced).
    pub fn mark_rendered(&mut self, time: f64) {
        self.last_rendered = Some(time);
    }

    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            log::trace!("RenderDebouncer: cancelled pending render");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_rendered(&self) -> Option<f64> {
        self.last_rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_request_wins() {
        let mut d = RenderDebouncer::default();
        assert!(d.schedule(0.10));
        assert!(d.schedule(0.1001));
        assert!(d.schedule(0.1002));
        assert_eq!(d.take(), Some(0.1002));
        assert_eq!(d.take(), None);
    }

    #[test]
    fn test_drop_near_last_rendered() {
        let mut d = RenderDebouncer::new(0.001);
        d.mark_rendered(1.0);
        assert!(!d.schedule(1.0005));
        assert!(!d.is_pending());
        assert!(d.schedule(1.002));
        assert!(d.is_pending());
    }

    #[test]
    fn test_drop_clears_stale_pending() {
        let mut d = RenderDebouncer::new(0.001);
        d.mark_rendered(2.0);
        d.schedule(3.0);
        d.schedule(2.0);
        assert_eq!(d.take(), None);
    }

    #[test]
    fn test_cancel() {
        let mut d = RenderDebouncer::default();
        d.schedule(0.5);
        d.cancel();
        assert!(!d.is_pending());
        assert_eq!(d.last_rendered(), None);
    }
}
