//! Synthetic collaborators: a solid-colour primitive renderer and a crossfade engine.
//!
//! Used by the `strata` binary for benchmarking without real media, and by
//! tests. Clip payload fields understood by [`SolidColorRenderer`]:
//!
//! - `color`: `[r, g, b, a]` (default opaque white)
//! - `size`: `[w, h]` layer size in pixels (default: canvas size)
//! - `fail`: `true` makes every render of the clip fail

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use glam::Vec2;
use rayon::prelude::*;
use serde::Deserialize;

use crate::entities::RenderedFrame;
use crate::entities::blend::BlendMode;
use crate::entities::emphasis::{EmphasisAnimation, EmphasisKind};
use crate::entities::keyframes::{AnimatedProperty, Easing, Keyframe};
use crate::entities::timeline::{Clip, ClipKind, Timeline, Track, Transition};
use crate::entities::traits::{PrimitiveRenderer, PrimitiveRequest, TransitionEngine, TransitionOutput};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SolidPayload {
    color: [u8; 4],
    size: Option<[u32; 2]>,
    fail: bool,
}

impl Default for SolidPayload {
    fn default() -> Self {
        Self {
            color: [255; 4],
            size: None,
            fail: false,
        }
    }
}

/// Fills the transformed layer rectangle with the clip's colour.
///
/// Pixels are mapped back through the inverse model matrix, so rotation,
/// scale and anchor are honoured. Opacity scales the colour's alpha.
#[derive(Debug, Default)]
pub struct SolidColorRenderer {
    delay: Duration,
    calls: AtomicUsize,
}

impl SolidColorRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per render (simulates decode cost).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `render_primitive` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl PrimitiveRenderer for SolidColorRenderer {
    fn render_primitive(&self, req: &PrimitiveRequest<'_>) -> anyhow::Result<Option<RenderedFrame>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let payload: SolidPayload = if req.clip.payload.is_null() {
            SolidPayload::default()
        } else {
            serde_json::from_value(req.clip.payload.clone()).context("invalid solid payload")?
        };
        if payload.fail {
            bail!("simulated failure at {:.4}s", req.time);
        }

        let [lw, lh] = payload.size.unwrap_or([req.width, req.height]);
        let layer = Vec2::new(lw as f32, lh as f32);
        let canvas = Vec2::new(req.width as f32, req.height as f32);
        let inverse = req.transform.inverse_matrix(layer, canvas);

        let mut rgba = payload.color;
        rgba[3] = (rgba[3] as f32 * req.transform.opacity.clamp(0.0, 1.0)).round() as u8;

        let stride = req.width as usize * 4;
        let mut pixels = vec![0u8; stride * req.height as usize];
        pixels.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let q = inverse.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                if q.x >= 0.0 && q.y >= 0.0 && q.x < layer.x && q.y < layer.y {
                    px.copy_from_slice(&rgba);
                }
            }
        });

        Ok(Some(RenderedFrame::from_rgba8(pixels, req.width, req.height)?))
    }
}

/// Linear per-channel crossfade. Any transition kind is rendered as a crossfade.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossfadeEngine;

impl TransitionEngine for CrossfadeEngine {
    fn render_transition(
        &self,
        frame_a: &RenderedFrame,
        frame_b: &RenderedFrame,
        _transition: &Transition,
        progress: f32,
    ) -> anyhow::Result<TransitionOutput> {
        let start = Instant::now();
        if frame_a.resolution() != frame_b.resolution() {
            bail!(
                "crossfade size mismatch: {:?} vs {:?}",
                frame_a.resolution(),
                frame_b.resolution()
            );
        }
        let p = progress.clamp(0.0, 1.0);
        let pixels: Vec<u8> = frame_a
            .pixels()
            .par_iter()
            .zip(frame_b.pixels().par_iter())
            .map(|(&a, &b)| (a as f32 + (b as f32 - a as f32) * p).round() as u8)
            .collect();
        let frame = RenderedFrame::from_rgba8(pixels, frame_a.width(), frame_a.height())?;
        Ok(TransitionOutput {
            frame,
            processing_time: start.elapsed(),
        })
    }
}

/// Three-track demo timeline exercising keyframes, emphasis, blend modes and a crossfade.
pub fn demo_timeline(width: u32, height: u32, frame_rate: f64, duration: f64) -> Timeline {
    let half = duration / 2.0;
    let fade = (duration / 6.0).min(1.0);
    let w = width as f32;

    let background = Clip::new(ClipKind::Shape, 0.0, duration)
        .with_name("background")
        .with_payload(serde_json::json!({ "color": [24, 24, 32, 255] }));

    let slide = Clip::new(ClipKind::Video, 0.0, half + fade / 2.0)
        .with_name("slide")
        .with_payload(serde_json::json!({ "color": [220, 60, 40, 255], "size": [width / 2, height / 2] }))
        .with_keyframes(vec![
            Keyframe::new(0.0, AnimatedProperty::PositionX, -w / 4.0).with_easing(Easing::EaseInOutCubic),
            Keyframe::new(half as f32, AnimatedProperty::PositionX, w / 4.0),
            Keyframe::new(0.0, AnimatedProperty::Rotation, 0.0),
            Keyframe::new(half as f32, AnimatedProperty::Rotation, 15.0),
        ]);

    let pulse = Clip::new(ClipKind::Text, half - fade / 2.0, duration - half + fade / 2.0)
        .with_name("pulse")
        .with_payload(serde_json::json!({ "color": [40, 90, 220, 255], "size": [width / 2, height / 2] }))
        .with_emphasis(EmphasisAnimation::new(EmphasisKind::Pulse).speed(2.0));

    let crossfade = Transition::new("crossfade", slide.id, pulse.id, fade);

    let sticker = Clip::new(ClipKind::Sticker, 0.0, duration)
        .with_name("sticker")
        .with_payload(serde_json::json!({ "color": [250, 220, 90, 200], "size": [width / 6, width / 6] }))
        .with_blend_mode(BlendMode::Screen)
        .with_keyframes(vec![
            Keyframe::new(0.0, AnimatedProperty::Opacity, 0.0),
            Keyframe::new(0.5, AnimatedProperty::Opacity, 1.0),
        ])
        .with_emphasis(EmphasisAnimation::new(EmphasisKind::Vibrate).intensity(2.0));

    let mut timeline = Timeline::new(width, height, frame_rate)
        .with_track(Track::new("background").with_clip(background))
        .with_track(
            Track::new("main")
                .with_clip(slide)
                .with_clip(pulse)
                .with_transition(crossfade),
        )
        .with_track(Track::new("overlay").with_clip(sticker));
    timeline.duration = duration;
    timeline
}
