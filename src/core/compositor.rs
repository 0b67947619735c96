//! Compositor - timeline time in, composited frame out.
//!
//! **Why**: One explicit instance owns its cache, preloader and statistics,
//! so several compositors (or tests) can live side by side without global
//! state.
//!
//! Per render request:
//! ```text
//! Idle -> Resolving -> CacheHit ----------------------------------> Done
//!                   -> Rendering -> Transforming -> (Transitioning) -> Done | Failed
//! ```
//! Rendering asks the external [`PrimitiveRenderer`] for one layer per
//! active clip (with the resolved transform), a track with an active
//! transition renders both clips and blends them, and the layers of all
//! tracks are stacked bottom-to-top. The final composited frame is what
//! gets cached.
//!
//! Failed renders resolve to `None` and bump `render_errors`; callers keep
//! showing the previous frame.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use glam::Vec2;
use log::{debug, info, trace, warn};

use super::debounce::RenderDebouncer;
use super::frame_cache::{CacheInsert, FrameCache, FrameCacheStats, cache_key_for};
use super::preloader::{PreloadRange, PreloadTarget, PreloadTicket, PreloadWindow, Preloader};
use super::render_stats::{RenderStats, RenderStatsWindow};
use crate::config::{CompositorConfig, FrameCacheConfig, FrameCacheConfigPatch};
use crate::entities::blend::{BlendMode, blend_layers};
use crate::entities::emphasis::EmphasisContext;
use crate::entities::timeline::{Clip, Timeline, Track};
use crate::entities::traits::{PrimitiveRenderer, PrimitiveRequest, TransitionEngine};
use crate::entities::transform::resolve_transform;
use crate::entities::transition::TransitionCoordinator;
use crate::entities::RenderedFrame;
use crate::error::{CompositorError, CompositorResult};

/// State shared with the preload thread.
struct CompositorCore {
    timeline: RwLock<Arc<Timeline>>,
    renderer: Arc<dyn PrimitiveRenderer>,
    transitions: TransitionCoordinator,
    cache: FrameCache,
    stats: Mutex<RenderStatsWindow>,
}

impl CompositorCore {
    fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RenderStatsWindow> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Full composite of `time`, bypassing the cache.
    fn compose(&self, timeline: &Timeline, time: f64) -> CompositorResult<RenderedFrame> {
        let mut layers: Vec<(RenderedFrame, BlendMode)> = Vec::new();

        for track in timeline.tracks.iter().filter(|t| !t.muted) {
            self.compose_track(timeline, track, time, &mut layers)?;
        }

        trace!("Compose {:.4}s: {} layers", time, layers.len());
        blend_layers(&layers, timeline.width, timeline.height)
    }

    fn compose_track(
        &self,
        timeline: &Timeline,
        track: &Track,
        time: f64,
        layers: &mut Vec<(RenderedFrame, BlendMode)>,
    ) -> CompositorResult<()> {
        let active = self.transitions.find_active_transition(track, time);

        for clip in track.active_clips(time) {
            if active.is_some_and(|a| clip.id == a.clip_a.id || clip.id == a.clip_b.id) {
                continue;
            }
            if let Some(frame) = self.render_clip(timeline, clip, time)? {
                layers.push((frame, clip.blend_mode));
            }
        }

        let Some(active) = active else {
            return Ok(());
        };
        let outgoing = self.render_clip(timeline, active.clip_a, time)?;
        let incoming = self.render_clip(timeline, active.clip_b, time)?;
        let layer = match (outgoing, incoming) {
            (Some(a), Some(b)) => {
                let mode = if active.progress < 0.5 {
                    active.clip_a.blend_mode
                } else {
                    active.clip_b.blend_mode
                };
                Some((self.transitions.blend(&a, &b, active.transition, active.progress), mode))
            }
            (Some(a), None) => Some((a, active.clip_a.blend_mode)),
            (None, Some(b)) => Some((b, active.clip_b.blend_mode)),
            (None, None) => None,
        };
        layers.extend(layer);
        Ok(())
    }

    /// Resolve the clip's transform and ask the renderer for its layer.
    fn render_clip(&self, timeline: &Timeline, clip: &Clip, time: f64) -> CompositorResult<Option<RenderedFrame>> {
        let local_time = clip.local_time(time);
        let ctx = EmphasisContext::for_clip(
            clip.id,
            timeline.frame_rate as f32,
            Vec2::new(timeline.width as f32, timeline.height as f32),
        );
        let transform = resolve_transform(clip, local_time, &ctx);
        if transform.opacity <= 0.0 {
            trace!("Clip {} fully transparent at {:.4}s", clip.id, time);
            return Ok(None);
        }

        let request = PrimitiveRequest {
            clip,
            time,
            local_time,
            width: timeline.width,
            height: timeline.height,
            transform: &transform,
        };
        self.renderer.render_primitive(&request).map_err(|e| {
            CompositorError::render(format!("{:?} clip '{}' ({}): {:#}", clip.kind, clip.name, clip.id, e))
        })
    }

    /// Interactive render: compose and record stats.
    fn render_timed(&self, timeline: &Timeline, time: f64) -> CompositorResult<RenderedFrame> {
        let start = Instant::now();
        match self.compose(timeline, time) {
            Ok(frame) => {
                self.stats().record_render(start.elapsed());
                Ok(frame)
            }
            Err(e) => {
                if e.is_render_failure() {
                    self.stats().record_error();
                }
                Err(e)
            }
        }
    }

    fn store(&self, key: String, frame: RenderedFrame) -> CacheInsert {
        let result = self.cache.put(key.as_str(), frame);
        if let Err(e) = result.into_result(&key) {
            debug!("Frame not cached: {}", e);
        }
        result
    }
}

/// Preload pass bound to one timeline snapshot and key frame rate.
struct PreloadPass {
    core: Arc<CompositorCore>,
    timeline: Arc<Timeline>,
    frame_rate: f64,
}

impl PreloadTarget for PreloadPass {
    fn is_cached(&self, time: f64) -> bool {
        self.core.cache.contains(&cache_key_for(time, self.frame_rate))
    }

    fn render(&self, time: f64) -> CompositorResult<RenderedFrame> {
        self.core.compose(&self.timeline, time)
    }

    fn store(&self, time: f64, frame: RenderedFrame) {
        self.core.store(cache_key_for(time, self.frame_rate), frame);
    }
}

/// Top-level orchestrator, constructed once by the host and shared by reference.
pub struct Compositor {
    core: Arc<CompositorCore>,
    debouncer: Mutex<RenderDebouncer>,
    preloader: Preloader,
}

impl Compositor {
    pub fn new(
        timeline: Timeline,
        renderer: Arc<dyn PrimitiveRenderer>,
        transitions: Arc<dyn TransitionEngine>,
        config: CompositorConfig,
    ) -> CompositorResult<Self> {
        timeline.validate()?;
        config.cache.validate()?;

        info!(
            "Compositor: {}x{} @ {} fps, {} tracks, cache {} frames / {} MB",
            timeline.width,
            timeline.height,
            timeline.frame_rate,
            timeline.tracks.len(),
            config.cache.max_frames,
            config.cache.max_size_bytes / 1024 / 1024
        );

        Ok(Self {
            core: Arc::new(CompositorCore {
                timeline: RwLock::new(Arc::new(timeline)),
                renderer,
                transitions: TransitionCoordinator::new(transitions),
                cache: FrameCache::new(config.cache),
                stats: Mutex::new(RenderStatsWindow::new(config.stats_window)),
            }),
            debouncer: Mutex::new(RenderDebouncer::new(config.debounce_threshold_secs)),
            preloader: Preloader::new()?,
        })
    }

    fn debouncer(&self) -> std::sync::MutexGuard<'_, RenderDebouncer> {
        self.debouncer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn timeline(&self) -> Arc<Timeline> {
        self.core.timeline()
    }

    /// Cache key of `time` on the current timeline.
    pub fn cache_key(&self, time: f64) -> String {
        cache_key_for(time, self.core.timeline().frame_rate)
    }

    /// Composited frame at `time`, cache first.
    ///
    /// `None` means the render failed; keep showing the previous frame.
    pub fn render_frame(&self, time: f64) -> Option<RenderedFrame> {
        let timeline = self.core.timeline();
        let key = cache_key_for(time, timeline.frame_rate);

        if let Some(frame) = self.core.cache.get(&key) {
            trace!("render_frame {:.4}s: cache hit '{}'", time, key);
            self.debouncer().mark_rendered(time);
            return Some(frame);
        }

        match self.core.render_timed(&timeline, time) {
            Ok(frame) => {
                self.core.store(key, frame.clone());
                self.debouncer().mark_rendered(time);
                Some(frame)
            }
            Err(e) => {
                warn!("render_frame {:.4}s failed: {}", time, e);
                None
            }
        }
    }

    /// Schedule a render of `time` for the next [`Self::tick`].
    ///
    /// Replaces any pending request. Returns false if dropped as too close to
    /// the last rendered time.
    pub fn render_frame_debounced(&self, time: f64) -> bool {
        self.debouncer().schedule(time)
    }

    /// Run the pending debounced render, if any. Call once per host frame.
    pub fn tick(&self) -> Option<RenderedFrame> {
        let time = self.debouncer().take()?;
        self.render_frame(time)
    }

    pub fn has_pending_render(&self) -> bool {
        self.debouncer().is_pending()
    }

    pub fn last_rendered_time(&self) -> Option<f64> {
        self.debouncer().last_rendered()
    }

    pub fn cache_frame(&self, key: impl Into<String>, frame: RenderedFrame) -> CacheInsert {
        self.core.store(key.into(), frame)
    }

    pub fn get_cached_frame(&self, key: &str) -> Option<RenderedFrame> {
        self.core.cache.get(key)
    }

    pub fn has_frame(&self, key: &str) -> bool {
        self.core.cache.contains(key)
    }

    fn window(&self, center: f64, duration: f64, frame_rate: f64) -> PreloadWindow {
        let cfg = self.core.cache.config();
        PreloadWindow::compute(center, duration, frame_rate, cfg.preload_ahead, cfg.preload_behind)
    }

    /// Warm the cache around `center` in the background.
    ///
    /// Cancels the previous preload pass.
    pub fn preload_frames(&self, center: f64, duration: f64, frame_rate: f64) -> PreloadTicket {
        let window = self.window(center, duration, frame_rate);
        let pass = PreloadPass {
            core: Arc::clone(&self.core),
            timeline: self.core.timeline(),
            frame_rate,
        };
        self.preloader.preload(Arc::new(pass), &window)
    }

    pub fn cancel_preload(&self) {
        self.preloader.cancel();
    }

    pub fn is_preloading(&self) -> bool {
        self.preloader.is_preloading()
    }

    /// What `preload_frames` would render, without doing it.
    pub fn get_preload_range(&self, current: f64, duration: f64, frame_rate: f64) -> PreloadRange {
        let window = self.window(current, duration, frame_rate);
        let missing_frames = window
            .times
            .iter()
            .copied()
            .filter(|&t| !self.core.cache.contains(&cache_key_for(t, frame_rate)))
            .collect();
        PreloadRange {
            start_time: window.start_time,
            end_time: window.end_time,
            missing_frames,
        }
    }

    pub fn cache_stats(&self) -> FrameCacheStats {
        self.core.cache.stats()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.core.stats().snapshot()
    }

    pub fn cache_config(&self) -> FrameCacheConfig {
        self.core.cache.config()
    }

    pub fn update_cache_config(&self, patch: &FrameCacheConfigPatch) -> CompositorResult<()> {
        self.core.cache.update_config(patch)
    }

    /// Swap the timeline. Cached frames and any running preload are dropped.
    pub fn set_timeline(&self, timeline: Timeline) -> CompositorResult<()> {
        timeline.validate()?;
        self.preloader.cancel();
        self.debouncer().cancel();
        {
            let mut slot = self.core.timeline.write().unwrap_or_else(|e| e.into_inner());
            *slot = Arc::new(timeline);
        }
        self.core.cache.clear();
        debug!("Timeline replaced, cache cleared");
        Ok(())
    }

    /// Drop cached frames in `[start, end]` after a local edit.
    pub fn invalidate_range(&self, start: f64, end: f64) -> usize {
        self.core.cache.invalidate_range(start, end)
    }

    pub fn clear_cache(&self) {
        self.core.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::keyframes::{AnimatedProperty, Keyframe};
    use crate::entities::timeline::{ClipKind, Transition};
    use crate::synthetic::{CrossfadeEngine, SolidColorRenderer};
    use serde_json::json;
    use std::time::Duration;

    const W: u32 = 8;
    const H: u32 = 8;
    const FPS: f64 = 30.0;

    fn solid_clip(start: f64, duration: f64, color: [u8; 4]) -> Clip {
        Clip::new(ClipKind::Shape, start, duration).with_payload(json!({ "color": color }))
    }

    fn timeline_with(clips: Vec<Clip>) -> Timeline {
        let mut track = Track::new("v1");
        track.clips = clips;
        Timeline::new(W, H, FPS).with_track(track)
    }

    fn compositor(timeline: Timeline, renderer: Arc<SolidColorRenderer>) -> Compositor {
        Compositor::new(timeline, renderer, Arc::new(CrossfadeEngine), CompositorConfig::default()).unwrap()
    }

    #[test]
    fn test_render_then_cache_hit() {
        let renderer = Arc::new(SolidColorRenderer::new());
        let comp = compositor(timeline_with(vec![solid_clip(0.0, 2.0, [255, 0, 0, 255])]), renderer.clone());

        let first = comp.render_frame(0.5).unwrap();
        assert_eq!(first.pixel(4, 4), Some([255, 0, 0, 255]));
        assert_eq!(renderer.calls(), 1);

        let second = comp.render_frame(0.5 + 0.4 / FPS).unwrap();
        assert!(second.same_surface(&first));
        assert_eq!(renderer.calls(), 1);

        let stats = comp.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(comp.render_stats().frames_rendered, 1);
        assert!(comp.has_frame(&comp.cache_key(0.5)));
    }

    #[test]
    fn test_render_failure_counts_and_returns_none() {
        let clip = Clip::new(ClipKind::Text, 0.0, 2.0).with_payload(json!({ "fail": true }));
        let comp = compositor(timeline_with(vec![clip]), Arc::new(SolidColorRenderer::new()));

        assert!(comp.render_frame(0.5).is_none());
        assert!(comp.render_frame(0.6).is_none());
        let stats = comp.render_stats();
        assert_eq!(stats.render_errors, 2);
        assert_eq!(stats.frames_rendered, 0);
        assert_eq!(comp.cache_stats().entries, 0);
        assert_eq!(comp.last_rendered_time(), None);
    }

    #[test]
    fn test_empty_time_is_transparent() {
        let comp = compositor(
            timeline_with(vec![solid_clip(1.0, 1.0, [255; 4])]),
            Arc::new(SolidColorRenderer::new()),
        );
        let frame = comp.render_frame(0.2).unwrap();
        assert_eq!(frame.resolution(), (W, H));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_tracks_stack_bottom_to_top() {
        let timeline = Timeline::new(W, H, FPS)
            .with_track(Track::new("bg").with_clip(solid_clip(0.0, 5.0, [0, 0, 255, 255])))
            .with_track(Track::new("fg").with_clip(
                solid_clip(0.0, 5.0, [255, 0, 0, 255])
                    .with_payload(json!({ "color": [255, 0, 0, 255], "size": [4, 4] })),
            ));
        let comp = compositor(timeline, Arc::new(SolidColorRenderer::new()));
        let frame = comp.render_frame(1.0).unwrap();
        // 4x4 layer centred on the 8x8 canvas
        assert_eq!(frame.pixel(4, 4), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_keyframed_opacity_zero_skips_layer() {
        let clip = solid_clip(0.0, 2.0, [255; 4]).with_keyframes(vec![
            Keyframe::new(0.0, AnimatedProperty::Opacity, 0.0),
            Keyframe::new(1.0, AnimatedProperty::Opacity, 1.0),
        ]);
        let renderer = Arc::new(SolidColorRenderer::new());
        let comp = compositor(timeline_with(vec![clip]), renderer.clone());
        let frame = comp.render_frame(0.0).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(renderer.calls(), 0);
    }

    #[test]
    fn test_transition_blends_both_clips() {
        let a = solid_clip(0.0, 2.0, [255, 0, 0, 255]);
        let b = solid_clip(1.0, 2.0, [0, 0, 255, 255]);
        let tr = Transition::new("crossfade", a.id, b.id, 1.0);
        let timeline = Timeline::new(W, H, FPS).with_track(Track::new("v").with_clip(a).with_clip(b).with_transition(tr));
        let comp = compositor(timeline, Arc::new(SolidColorRenderer::new()));

        let px = comp.render_frame(1.5).unwrap().pixel(2, 2).unwrap();
        assert!((126..=129).contains(&px[0]));
        assert!((126..=129).contains(&px[2]));
        assert_eq!(comp.render_frame(0.5).unwrap().pixel(2, 2), Some([255, 0, 0, 255]));
        assert_eq!(comp.render_frame(2.5).unwrap().pixel(2, 2), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_debounce_collapses_to_last_request() {
        let renderer = Arc::new(SolidColorRenderer::new());
        let comp = compositor(timeline_with(vec![solid_clip(0.0, 2.0, [9, 9, 9, 255])]), renderer.clone());

        for t in [0.10, 0.1001, 0.1002] {
            comp.render_frame_debounced(t);
        }
        assert_eq!(renderer.calls(), 0);
        assert!(comp.tick().is_some());
        assert!(comp.tick().is_none());
        assert_eq!(renderer.calls(), 1);
        assert_eq!(comp.last_rendered_time(), Some(0.1002));

        // Within threshold of the last rendered time: dropped
        assert!(!comp.render_frame_debounced(0.10025));
        assert!(!comp.has_pending_render());
    }

    #[test]
    fn test_preload_fills_window() {
        let comp = compositor(
            timeline_with(vec![solid_clip(0.0, 10.0, [1, 2, 3, 255])]),
            Arc::new(SolidColorRenderer::new()),
        );
        comp.update_cache_config(&FrameCacheConfigPatch::default().preload_ahead(5).preload_behind(2))
            .unwrap();

        let before = comp.get_preload_range(1.0, 10.0, FPS);
        assert_eq!(before.missing_frames.len(), 8);

        let outcome = comp.preload_frames(1.0, 10.0, FPS).wait();
        assert_eq!(outcome.rendered(), 8);
        assert!(comp.get_preload_range(1.0, 10.0, FPS).missing_frames.is_empty());
        assert!(comp.has_frame(&comp.cache_key(1.0 + 5.0 / FPS)));
        // Preload is off the interactive path: no render stats
        assert_eq!(comp.render_stats().frames_rendered, 0);
    }

    #[test]
    fn test_second_preload_cancels_first() {
        let renderer = Arc::new(SolidColorRenderer::new().with_delay(Duration::from_millis(15)));
        let comp = compositor(timeline_with(vec![solid_clip(0.0, 100.0, [1, 2, 3, 255])]), renderer);
        comp.update_cache_config(&FrameCacheConfigPatch::default().preload_ahead(100).preload_behind(0))
            .unwrap();

        let first = comp.preload_frames(0.0, 100.0, FPS);
        std::thread::sleep(Duration::from_millis(50));
        let second = comp.preload_frames(99.0, 100.0, FPS);

        let first = first.wait();
        let second = second.wait();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        let stats = comp.cache_stats();
        assert_eq!(stats.entries, first.rendered() + second.rendered());
        assert_eq!(stats.size_bytes, stats.entries as u64 * (W * H * 4) as u64);
    }

    #[test]
    fn test_interactive_render_while_preloading() {
        let renderer = Arc::new(SolidColorRenderer::new().with_delay(Duration::from_millis(5)));
        let comp = compositor(timeline_with(vec![solid_clip(0.0, 100.0, [7, 7, 7, 255])]), renderer);
        comp.update_cache_config(&FrameCacheConfigPatch::default().preload_ahead(60)).unwrap();

        let ticket = comp.preload_frames(0.0, 100.0, FPS);
        assert!(comp.render_frame(80.0).is_some());
        comp.cancel_preload();
        assert!(ticket.wait().is_cancelled());
        assert!(!comp.is_preloading());
    }

    #[test]
    fn test_set_timeline_clears_cache() {
        let comp = compositor(
            timeline_with(vec![solid_clip(0.0, 2.0, [255, 0, 0, 255])]),
            Arc::new(SolidColorRenderer::new()),
        );
        comp.render_frame(0.5);
        assert_eq!(comp.cache_stats().entries, 1);

        comp.set_timeline(timeline_with(vec![solid_clip(0.0, 2.0, [0, 255, 0, 255])]))
            .unwrap();
        assert_eq!(comp.cache_stats().entries, 0);
        assert_eq!(comp.render_frame(0.5).unwrap().pixel(1, 1), Some([0, 255, 0, 255]));
        assert!(comp.set_timeline(Timeline::new(0, 0, FPS)).is_err());
    }

    #[test]
    fn test_invalidate_and_shrink() {
        let comp = compositor(
            timeline_with(vec![solid_clip(0.0, 2.0, [255, 0, 0, 255])]),
            Arc::new(SolidColorRenderer::new()),
        );
        for i in 0..10 {
            comp.render_frame(i as f64 / FPS);
        }
        assert_eq!(comp.invalidate_range(2.0 / FPS, 4.0 / FPS), 3);
        assert_eq!(comp.cache_stats().entries, 7);

        comp.update_cache_config(&FrameCacheConfigPatch::default().max_frames(2)).unwrap();
        assert_eq!(comp.cache_stats().entries, 2);
        assert!(comp.update_cache_config(&FrameCacheConfigPatch::default().max_size_bytes(0)).is_err());
        assert_eq!(comp.cache_config().max_frames, 2);
    }

    #[test]
    fn test_oversized_frame_returned_but_not_cached() {
        let comp = compositor(
            timeline_with(vec![solid_clip(0.0, 2.0, [255, 0, 0, 255])]),
            Arc::new(SolidColorRenderer::new()),
        );
        comp.update_cache_config(&FrameCacheConfigPatch::default().max_size_bytes(16)).unwrap();
        assert!(comp.render_frame(0.5).is_some());
        assert!(!comp.has_frame(&comp.cache_key(0.5)));

        let big = RenderedFrame::solid(W, H, [1, 1, 1, 255]).unwrap();
        assert!(matches!(
            comp.cache_frame("big", big).into_result("big"),
            Err(CompositorError::CacheRejection { .. })
        ));
    }

    #[test]
    fn test_external_cache_access() {
        let comp = compositor(timeline_with(vec![]), Arc::new(SolidColorRenderer::new()));
        let frame = RenderedFrame::solid(W, H, [5, 5, 5, 255]).unwrap();
        assert_eq!(comp.cache_frame("custom", frame), CacheInsert::Inserted);
        assert!(comp.has_frame("custom"));
        assert!(comp.get_cached_frame("custom").is_some());
        comp.clear_cache();
        assert!(comp.get_cached_frame("custom").is_none());
    }
}
