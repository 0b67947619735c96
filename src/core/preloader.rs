//! Background preloader - keeps the cache warm around the playhead.
//!
//! One long-lived named thread consumes preload jobs from a channel and
//! renders their frames sequentially, forward window first, then backward.
//!
//! Epoch mechanism: every `preload()` or `cancel()` bumps a shared epoch. A job
//! carries the epoch it was issued under ([`CancelToken`]) and stops at the
//! next check once the epoch moves on. Checks happen before and after each
//! render, never inside one.
//!
//! `is_preloading` compares the issued epoch with the highest finished one.
//! A pass that ends after a newer one was queued cannot clear the state of
//! the newer pass.
//!
//! The interactive render path never waits on the preloader: both only meet
//! in the frame cache, whose `put` is last-writer-wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, trace, warn};

use crate::entities::RenderedFrame;
use crate::error::{CompositorError, CompositorResult};

const EPSILON: f64 = 1e-9;

/// Cooperative cancellation token bound to one epoch.
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: Arc<AtomicU64>,
    issued: u64,
}

impl CancelToken {
    /// Token for epoch `issued`, cancelled as soon as `epoch` moves past it.
    pub fn at(epoch: Arc<AtomicU64>, issued: u64) -> Self {
        Self { epoch, issued }
    }

    /// Token that is never cancelled (for synchronous passes).
    pub fn detached() -> Self {
        Self::at(Arc::new(AtomicU64::new(0)), 0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.issued
    }

    pub fn epoch(&self) -> u64 {
        self.issued
    }
}

/// Ordered candidate times around a centre time.
///
/// Shared by the preloader and by preload-range queries so both always agree.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadWindow {
    pub start_time: f64,
    pub end_time: f64,
    /// Forward from the centre, then backward
    pub times: Vec<f64>,
}

impl PreloadWindow {
    pub fn compute(center: f64, total_duration: f64, frame_rate: f64, ahead: u32, behind: u32) -> Self {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Self {
                start_time: center,
                end_time: center,
                times: Vec::new(),
            };
        }
        let frame_duration = 1.0 / frame_rate;
        let end_time = (center + ahead as f64 * frame_duration).min(total_duration);
        let start_time = (center - behind as f64 * frame_duration).max(0.0).min(end_time.max(0.0));

        let mut times = Vec::with_capacity(ahead as usize + behind as usize + 1);
        // Integer steps, no accumulated drift
        for i in 0..=ahead {
            let t = center + i as f64 * frame_duration;
            if t > end_time + EPSILON {
                break;
            }
            times.push(t);
        }
        for i in 1..=behind {
            let t = center - i as f64 * frame_duration;
            if t < start_time - EPSILON {
                break;
            }
            // Centre past the end: skip back into the timeline
            if t > end_time + EPSILON {
                continue;
            }
            times.push(t);
        }

        Self {
            start_time,
            end_time,
            times,
        }
    }
}

/// Side-effect-free description of what a preload would do.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadRange {
    pub start_time: f64,
    pub end_time: f64,
    /// Candidate times not yet cached, in preload order
    pub missing_frames: Vec<f64>,
}

/// How a preload pass ended. Cancellation is a normal termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    Completed { rendered: usize, skipped: usize, failed: usize },
    Cancelled { rendered: usize },
}

impl PreloadOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PreloadOutcome::Cancelled { .. })
    }

    pub fn rendered(&self) -> usize {
        match *self {
            PreloadOutcome::Completed { rendered, .. } | PreloadOutcome::Cancelled { rendered } => rendered,
        }
    }
}

/// What the preloader renders into. Implemented by the compositor.
pub trait PreloadTarget: Send + Sync {
    fn is_cached(&self, time: f64) -> bool;
    /// Render `time` without touching the cache.
    fn render(&self, time: f64) -> CompositorResult<RenderedFrame>;
    fn store(&self, time: f64, frame: RenderedFrame);
}

/// Handle to a queued preload pass.
#[derive(Debug)]
pub struct PreloadTicket {
    rx: Receiver<PreloadOutcome>,
    epoch: u64,
}

impl PreloadTicket {
    fn ready(outcome: PreloadOutcome, epoch: u64) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _ = tx.send(outcome);
        Self { rx, epoch }
    }

    /// Block until the pass ends.
    pub fn wait(self) -> PreloadOutcome {
        self.rx.recv().unwrap_or(PreloadOutcome::Cancelled { rendered: 0 })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct PreloadJob {
    target: Arc<dyn PreloadTarget>,
    times: Vec<f64>,
    token: CancelToken,
    reply: Sender<PreloadOutcome>,
}

/// Run one preload pass on the calling thread.
///
/// Already-cached times are skipped; a failed frame is logged and the pass
/// moves on.
pub fn run_pass(target: &dyn PreloadTarget, times: &[f64], token: &CancelToken) -> PreloadOutcome {
    let (mut rendered, mut skipped, mut failed) = (0, 0, 0);

    for &time in times {
        if token.is_cancelled() {
            debug!("Preload epoch {} cancelled after {} frames", token.epoch(), rendered);
            return PreloadOutcome::Cancelled { rendered };
        }
        if target.is_cached(time) {
            skipped += 1;
            continue;
        }

        let result = target.render(time);

        if token.is_cancelled() {
            debug!("Preload epoch {} cancelled after {} frames", token.epoch(), rendered);
            return PreloadOutcome::Cancelled { rendered };
        }
        match result {
            Ok(frame) => {
                target.store(time, frame);
                rendered += 1;
                trace!("Preloaded {:.4}s", time);
            }
            Err(e) => {
                warn!("Preload render failed at {:.4}s: {}", time, e);
                failed += 1;
            }
        }
    }

    PreloadOutcome::Completed {
        rendered,
        skipped,
        failed,
    }
}

/// Record that the pass issued under `epoch` is over (finished or superseded).
fn mark_finished(finished: &AtomicU64, epoch: u64) {
    finished.fetch_max(epoch, Ordering::SeqCst);
}

/// Owner of the preload thread and the cancellation epoch.
pub struct Preloader {
    epoch: Arc<AtomicU64>,
    /// Highest epoch whose pass is over
    finished: Arc<AtomicU64>,
    jobs: Option<Sender<PreloadJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Preloader {
    pub fn new() -> CompositorResult<Self> {
        let epoch = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicU64::new(0));
        let (tx, rx) = unbounded::<PreloadJob>();

        let done = Arc::clone(&finished);
        let handle = thread::Builder::new()
            .name("strata-preload".into())
            .spawn(move || {
                trace!("Preload worker started");
                for job in rx.iter() {
                    let outcome = run_pass(job.target.as_ref(), &job.times, &job.token);
                    mark_finished(&done, job.token.epoch());
                    if let PreloadOutcome::Completed { rendered, skipped, failed } = outcome {
                        info!(
                            "Preload done: {} rendered, {} cached, {} failed",
                            rendered, skipped, failed
                        );
                    }
                    let _ = job.reply.send(outcome);
                }
                trace!("Preload worker stopped");
            })
            .map_err(|e| CompositorError::Other(anyhow::anyhow!("failed to spawn preload thread: {}", e)))?;

        Ok(Self {
            epoch,
            finished,
            jobs: Some(tx),
            handle: Some(handle),
        })
    }

    /// Bump the epoch and hand out the token for the new pass.
    ///
    /// The token is bound to the epoch this call produced, so a concurrent
    /// `cancel()` landing right after the bump still cancels it.
    fn begin_pass(&self) -> CancelToken {
        let new_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        CancelToken::at(Arc::clone(&self.epoch), new_epoch)
    }

    /// Cancel any running pass and queue a new one over `window`.
    pub fn preload(&self, target: Arc<dyn PreloadTarget>, window: &PreloadWindow) -> PreloadTicket {
        let token = self.begin_pass();
        let new_epoch = token.epoch();

        debug!(
            "Preload epoch {}: {} candidates in [{:.4}, {:.4}]",
            new_epoch,
            window.times.len(),
            window.start_time,
            window.end_time
        );

        let (reply, rx) = crossbeam_channel::bounded(1);
        let job = PreloadJob {
            target,
            times: window.times.clone(),
            token,
            reply,
        };
        let sent = self.jobs.as_ref().is_some_and(|tx| tx.send(job).is_ok());
        if !sent {
            warn!("Preload worker unavailable, pass dropped");
            mark_finished(&self.finished, new_epoch);
            return PreloadTicket::ready(PreloadOutcome::Cancelled { rendered: 0 }, new_epoch);
        }
        PreloadTicket { rx, epoch: new_epoch }
    }

    /// Invalidate the running pass. It stops at its next check.
    pub fn cancel(&self) {
        let e = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        mark_finished(&self.finished, e);
        trace!("Preload cancelled, epoch {}", e);
    }

    /// True while the most recently issued pass has neither finished nor been cancelled.
    pub fn is_preloading(&self) -> bool {
        let issued = self.epoch.load(Ordering::SeqCst);
        issued > self.finished.load(Ordering::SeqCst)
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.cancel();
        // Closing the channel ends the worker loop
        self.jobs.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Preload worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame_cache::{FrameCache, cache_key_for};
    use crate::config::FrameCacheConfig;
    use std::sync::Mutex;
    use std::time::Duration;

    const FPS: f64 = 10.0;

    /// Renders 1x1 frames into a real cache, optionally slow or failing.
    struct FakeTarget {
        cache: FrameCache,
        delay: Duration,
        fail_at: Option<f64>,
        rendered: Mutex<Vec<f64>>,
    }

    impl FakeTarget {
        fn new(delay: Duration) -> Self {
            Self {
                cache: FrameCache::new(FrameCacheConfig::default()),
                delay,
                fail_at: None,
                rendered: Mutex::new(Vec::new()),
            }
        }
    }

    impl PreloadTarget for FakeTarget {
        fn is_cached(&self, time: f64) -> bool {
            self.cache.contains(&cache_key_for(time, FPS))
        }

        fn render(&self, time: f64) -> CompositorResult<RenderedFrame> {
            thread::sleep(self.delay);
            if self.fail_at.is_some_and(|f| (f - time).abs() < 1e-6) {
                return Err(CompositorError::render("boom"));
            }
            self.rendered.lock().unwrap().push(time);
            RenderedFrame::solid(1, 1, [255; 4])
        }

        fn store(&self, time: f64, frame: RenderedFrame) {
            self.cache.put(cache_key_for(time, FPS), frame);
        }
    }

    fn round(v: &[f64]) -> Vec<f64> {
        v.iter().map(|t| (t * 1000.0).round() / 1000.0).collect()
    }

    #[test]
    fn test_window_forward_then_backward() {
        let w = PreloadWindow::compute(1.0, 10.0, FPS, 3, 2);
        assert!((w.start_time - 0.8).abs() < 1e-9);
        assert!((w.end_time - 1.3).abs() < 1e-9);
        assert_eq!(round(&w.times), vec![1.0, 1.1, 1.2, 1.3, 0.9, 0.8]);
    }

    #[test]
    fn test_window_clamped_to_timeline() {
        let w = PreloadWindow::compute(0.1, 0.3, FPS, 5, 5);
        assert_eq!(w.start_time, 0.0);
        assert_eq!(w.end_time, 0.3);
        assert_eq!(round(&w.times), vec![0.1, 0.2, 0.3, 0.0]);
    }

    #[test]
    fn test_window_past_end_is_empty() {
        let w = PreloadWindow::compute(12.0, 10.0, FPS, 3, 2);
        assert!(w.times.is_empty());
        assert!(w.start_time <= w.end_time);
    }

    #[test]
    fn test_window_just_past_end_stays_inside() {
        let w = PreloadWindow::compute(10.05, 10.0, FPS, 3, 3);
        assert_eq!(round(&w.times), vec![9.95, 9.85, 9.75]);
        assert!(w.times.iter().all(|&t| t <= 10.0));
    }

    #[test]
    fn test_window_invalid_rate_empty() {
        assert!(PreloadWindow::compute(1.0, 10.0, 0.0, 5, 5).times.is_empty());
    }

    #[test]
    fn test_run_pass_skips_cached_and_survives_errors() {
        let mut target = FakeTarget::new(Duration::ZERO);
        target.fail_at = Some(1.1);
        target.store(1.0, RenderedFrame::solid(1, 1, [0; 4]).unwrap());
        let w = PreloadWindow::compute(1.0, 10.0, FPS, 2, 1);

        let outcome = run_pass(&target, &w.times, &CancelToken::detached());
        assert_eq!(
            outcome,
            PreloadOutcome::Completed {
                rendered: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert!(target.is_cached(1.2));
        assert!(target.is_cached(0.9));
        assert!(!target.is_cached(1.1));
    }

    #[test]
    fn test_background_preload_completes() {
        let preloader = Preloader::new().unwrap();
        let target = Arc::new(FakeTarget::new(Duration::ZERO));
        let w = PreloadWindow::compute(0.0, 10.0, FPS, 4, 0);

        let ticket = preloader.preload(target.clone(), &w);
        let outcome = ticket.wait();
        assert_eq!(outcome.rendered(), 5);
        assert!(!preloader.is_preloading());
        assert_eq!(target.cache.len(), 5);
    }

    #[test]
    fn test_new_preload_cancels_previous() {
        let preloader = Preloader::new().unwrap();
        let target = Arc::new(FakeTarget::new(Duration::from_millis(20)));

        let first = preloader.preload(target.clone(), &PreloadWindow::compute(0.0, 100.0, FPS, 200, 0));
        thread::sleep(Duration::from_millis(70));
        let second = preloader.preload(target.clone(), &PreloadWindow::compute(50.0, 100.0, FPS, 2, 0));

        let first = first.wait();
        assert!(first.is_cancelled());
        assert!(first.rendered() < 200);
        let second = second.wait();
        assert!(!second.is_cancelled());

        // Every cached frame is complete and accounted for
        let stats = target.cache.stats();
        assert_eq!(stats.entries, first.rendered() + second.rendered());
        assert_eq!(stats.size_bytes, stats.entries as u64 * 4);
        assert!(!preloader.is_preloading());
    }

    #[test]
    fn test_cancel_right_after_epoch_bump_wins() {
        let epoch = Arc::new(AtomicU64::new(0));
        // preload: bump
        let issued = epoch.fetch_add(1, Ordering::SeqCst) + 1;
        // cancel from another thread before the token exists
        epoch.fetch_add(1, Ordering::SeqCst);
        // preload: token creation
        let token = CancelToken::at(Arc::clone(&epoch), issued);
        assert_eq!(token.epoch(), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_after_begin_pass_clears_state() {
        let preloader = Preloader::new().unwrap();
        let token = preloader.begin_pass();
        assert!(preloader.is_preloading());
        preloader.cancel();
        assert!(token.is_cancelled());
        assert!(!preloader.is_preloading());
    }

    #[test]
    fn test_stale_pass_finishing_keeps_newer_pass_active() {
        let preloader = Preloader::new().unwrap();
        let first = preloader.begin_pass();
        let second = preloader.begin_pass();

        // First pass reports done after the second was issued
        mark_finished(&preloader.finished, first.epoch());
        assert!(preloader.is_preloading());

        mark_finished(&preloader.finished, second.epoch());
        assert!(!preloader.is_preloading());

        // Late report of the first pass does not move anything back
        mark_finished(&preloader.finished, first.epoch());
        assert!(!preloader.is_preloading());
    }

    #[test]
    fn test_cancel_stops_pass() {
        let preloader = Preloader::new().unwrap();
        let target = Arc::new(FakeTarget::new(Duration::from_millis(10)));
        let ticket = preloader.preload(target.clone(), &PreloadWindow::compute(0.0, 100.0, FPS, 500, 0));
        assert!(preloader.is_preloading());
        thread::sleep(Duration::from_millis(30));
        preloader.cancel();
        assert!(!preloader.is_preloading());
        assert!(ticket.wait().is_cancelled());
    }
}
