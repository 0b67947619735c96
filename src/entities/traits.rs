//! Abstract traits for the external collaborators of the compositor.
//!
//! Pixel work lives outside the core: decoding, primitive rasterisation
//! (text, SVG, shapes, video) and transition blend algorithms. The core only
//! knows these interfaces, so hosts can plug in CPU, GPU or test renderers.
//!
//! All calls may block; the compositor never holds the cache lock while
//! calling into them.

use std::time::Duration;

use super::frame::RenderedFrame;
use super::timeline::{Clip, Transition};
use super::transform::ClipTransform;

/// Everything a primitive renderer needs for one clip at one time.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveRequest<'a> {
    pub clip: &'a Clip,
    /// Timeline time (seconds)
    pub time: f64,
    /// Clip-local time (seconds)
    pub local_time: f32,
    /// Canvas size
    pub width: u32,
    pub height: u32,
    /// Resolved transform to apply (includes keyframes and emphasis)
    pub transform: &'a ClipTransform,
}

/// Per clip-type renderer (video/shape/text/svg/sticker).
pub trait PrimitiveRenderer: Send + Sync {
    /// Render one clip layer onto a canvas-sized surface.
    ///
    /// `Ok(None)` means the clip has nothing to show at this time (not an error).
    fn render_primitive(&self, request: &PrimitiveRequest<'_>) -> anyhow::Result<Option<RenderedFrame>>;
}

/// Result of a transition render.
#[derive(Debug, Clone)]
pub struct TransitionOutput {
    pub frame: RenderedFrame,
    pub processing_time: Duration,
}

/// Transition engine: timing predicates plus the pixel blend.
///
/// The default window is the last `duration` seconds of the outgoing clip.
pub trait TransitionEngine: Send + Sync {
    /// Active window `[start, end)` of `transition` in timeline seconds.
    fn window(&self, transition: &Transition, clip_a: &Clip) -> (f64, f64) {
        let end = clip_a.end_time();
        (end - transition.duration.max(0.0), end)
    }

    fn is_time_in_transition(&self, transition: &Transition, clip_a: &Clip, time: f64) -> bool {
        let (start, end) = self.window(transition, clip_a);
        end > start && time >= start && time < end
    }

    /// Raw progress, 0 = fully outgoing, 1 = fully incoming. May drift outside [0, 1].
    fn calculate_progress(&self, transition: &Transition, clip_a: &Clip, time: f64) -> f32 {
        let (start, end) = self.window(transition, clip_a);
        if end <= start {
            return 1.0;
        }
        ((time - start) / (end - start)) as f32
    }

    fn render_transition(
        &self,
        frame_a: &RenderedFrame,
        frame_b: &RenderedFrame,
        transition: &Transition,
        progress: f32,
    ) -> anyhow::Result<TransitionOutput>;
}
