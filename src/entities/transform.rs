//! 2D clip transforms and per-frame transform resolution.
//!
//! Forward transform (layer -> canvas), Y-down pixel space:
//! ```text
//! canvas = canvas_center + position + R * S * (object - anchor * layer_size)
//! ```
//! Rotation is in degrees, clockwise-positive on screen.
//!
//! The clip's base transform is never mutated. [`resolve_transform`] returns a
//! derived value for one render call: keyframed properties override their
//! base field, then the emphasis delta is layered on top.

use glam::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

use super::emphasis::{EmphasisContext, EmphasisDelta, delta_at_time};
use super::keyframes::{AnimatedProperty, keys_for, value_at_time};
use super::timeline::Clip;

/// Normalised crop rectangle, all components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRect {
    /// Clamp into the unit square.
    pub fn clamped(self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: self.width.clamp(0.0, 1.0 - x),
            height: self.height.clamp(0.0, 1.0 - y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipTransform {
    /// Offset of the anchor from the canvas centre (pixels)
    pub position: Vec2,
    pub scale: Vec2,
    /// Degrees, clockwise-positive
    pub rotation: f32,
    /// 0..1
    pub opacity: f32,
    /// Normalised pivot inside the layer, (0.5, 0.5) = centre
    pub anchor: Vec2,
    pub crop: Option<CropRect>,
    pub border_radius: Option<f32>,
}

impl Default for ClipTransform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
            opacity: 1.0,
            anchor: Vec2::splat(0.5),
            crop: None,
            border_radius: None,
        }
    }
}

impl ClipTransform {
    /// True if the transform leaves the layer centred and untouched.
    pub fn is_identity(&self) -> bool {
        self.position == Vec2::ZERO
            && self.scale == Vec2::ONE
            && self.rotation == 0.0
            && self.opacity == 1.0
            && self.crop.is_none()
    }

    pub fn get(&self, property: AnimatedProperty) -> f32 {
        match property {
            AnimatedProperty::PositionX => self.position.x,
            AnimatedProperty::PositionY => self.position.y,
            AnimatedProperty::ScaleX => self.scale.x,
            AnimatedProperty::ScaleY => self.scale.y,
            AnimatedProperty::Rotation => self.rotation,
            AnimatedProperty::Opacity => self.opacity,
        }
    }

    pub fn set(&mut self, property: AnimatedProperty, value: f32) {
        match property {
            AnimatedProperty::PositionX => self.position.x = value,
            AnimatedProperty::PositionY => self.position.y = value,
            AnimatedProperty::ScaleX => self.scale.x = value,
            AnimatedProperty::ScaleY => self.scale.y = value,
            AnimatedProperty::Rotation => self.rotation = value,
            AnimatedProperty::Opacity => self.opacity = value,
        }
    }

    /// Combine with an emphasis delta.
    pub fn with_delta(mut self, delta: &EmphasisDelta) -> Self {
        self.opacity *= delta.opacity;
        self.scale.x *= delta.scale * delta.scale_x;
        self.scale.y *= delta.scale * delta.scale_y;
        self.position += Vec2::new(delta.offset_x, delta.offset_y);
        self.rotation += delta.rotation;
        self
    }

    /// Model matrix: layer pixels -> canvas pixels.
    pub fn model_matrix(&self, layer_size: Vec2, canvas_size: Vec2) -> Affine2 {
        Affine2::from_translation(canvas_size * 0.5 + self.position)
            * Affine2::from_angle(self.rotation.to_radians())
            * Affine2::from_scale(self.scale)
            * Affine2::from_translation(-self.anchor * layer_size)
    }

    /// Inverse of [`Self::model_matrix`] for reverse-mapping canvas pixels to
    /// layer pixels. Degenerate (zero) scale axes collapse to zero.
    pub fn inverse_matrix(&self, layer_size: Vec2, canvas_size: Vec2) -> Affine2 {
        let inv_scale = Vec2::new(
            if self.scale.x.abs() > f32::EPSILON { 1.0 / self.scale.x } else { 0.0 },
            if self.scale.y.abs() > f32::EPSILON { 1.0 / self.scale.y } else { 0.0 },
        );
        Affine2::from_translation(self.anchor * layer_size)
            * Affine2::from_scale(inv_scale)
            * Affine2::from_angle(-self.rotation.to_radians())
            * Affine2::from_translation(-(canvas_size * 0.5 + self.position))
    }
}

/// Final transform of `clip` at clip-local time `local_time`.
///
/// Non-animated fields keep their base value. Opacity is clamped to [0, 1].
pub fn resolve_transform(clip: &Clip, local_time: f32, ctx: &EmphasisContext) -> ClipTransform {
    let mut resolved = clip.transform;

    if !clip.keyframes.is_empty() {
        for property in AnimatedProperty::ALL {
            let keys = keys_for(&clip.keyframes, property);
            if let Some(value) = value_at_time(&keys, local_time) {
                resolved.set(property, value);
            }
        }
    }

    if let Some(emphasis) = &clip.emphasis {
        let delta = delta_at_time(emphasis, local_time, ctx);
        if !delta.is_identity() {
            resolved = resolved.with_delta(&delta);
        }
    }

    resolved.opacity = resolved.opacity.clamp(0.0, 1.0);
    resolved.crop = resolved.crop.map(CropRect::clamped);
    resolved
}
