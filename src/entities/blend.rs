//! CPU layer stacking - blends per-clip layers into one canvas.
//!
//! Layers arrive already transformed (the primitive renderer applies the
//! resolved transform and opacity). This module only stacks them
//! bottom-to-top with the clip's blend mode, using straight-alpha RGBA8
//! source-over compositing. Rows are blended in parallel with rayon.

use log::{trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::frame::RenderedFrame;
use crate::error::CompositorResult;

/// Supported blend modes for layer compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Screen,
    Add,
    Subtract,
    Multiply,
    Divide,
    Difference,
}

impl BlendMode {
    /// Blend one colour channel, both inputs in 0..1.
    #[inline]
    fn apply(self, b: f32, t: f32) -> f32 {
        match self {
            BlendMode::Normal => t,
            BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
            BlendMode::Add => (b + t).min(1.0),
            BlendMode::Subtract => (b - t).max(0.0),
            BlendMode::Multiply => b * t,
            BlendMode::Divide => {
                if t <= 0.00001 {
                    b
                } else {
                    (b / t).min(1.0)
                }
            }
            BlendMode::Difference => (b - t).abs(),
        }
    }
}

/// Composite `top` over `bottom` in place (RGBA8 rows of equal length).
fn blend_row(bottom: &mut [u8], top: &[u8], mode: BlendMode) {
    debug_assert_eq!(bottom.len(), top.len());

    for (dst, src) in bottom.chunks_exact_mut(4).zip(top.chunks_exact(4)) {
        let ta = src[3] as f32 / 255.0;
        if ta <= 0.0 {
            continue;
        }
        let ba = dst[3] as f32 / 255.0;
        let out_a = ta + ba * (1.0 - ta);

        for c in 0..3 {
            let b = dst[c] as f32 / 255.0;
            let t = src[c] as f32 / 255.0;
            // Blend mode only applies where the backdrop has coverage
            let mixed = (1.0 - ba) * t + ba * mode.apply(b, t);
            let out = (mixed * ta + b * ba * (1.0 - ta)) / out_a;
            dst[c] = (out.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        dst[3] = (out_a.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

/// Stack layers bottom-to-top onto a transparent `width` x `height` canvas.
///
/// Layers smaller than the canvas are anchored top-left; larger ones are
/// clipped. An empty list yields a transparent canvas.
pub fn blend_layers(
    layers: &[(RenderedFrame, BlendMode)],
    width: u32,
    height: u32,
) -> CompositorResult<RenderedFrame> {
    // Single canvas-sized Normal layer: nothing to blend against
    if let [(only, BlendMode::Normal)] = layers
        && only.resolution() == (width, height)
    {
        return Ok(only.clone());
    }

    let stride = width as usize * 4;
    let mut canvas = vec![0u8; stride * height as usize];

    for (layer, mode) in layers {
        let (lw, lh) = layer.resolution();
        let overlap_w = width.min(lw) as usize;
        let overlap_h = height.min(lh) as usize;
        if overlap_w == 0 || overlap_h == 0 {
            warn!("Skipping empty layer {}x{}", lw, lh);
            continue;
        }
        if (lw, lh) != (width, height) {
            trace!("Layer {}x{} clipped to canvas {}x{}", lw, lh, width, height);
        }

        let layer_stride = lw as usize * 4;
        let src = layer.pixels();
        canvas
            .par_chunks_mut(stride)
            .take(overlap_h)
            .enumerate()
            .for_each(|(y, row)| {
                let l_off = y * layer_stride;
                blend_row(
                    &mut row[..overlap_w * 4],
                    &src[l_off..l_off + overlap_w * 4],
                    *mode,
                );
            });
    }

    RenderedFrame::from_rgba8(canvas, width, height)
}
