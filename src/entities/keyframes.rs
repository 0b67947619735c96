//! Keyframe interpolation for animated clip properties.
//!
//! Keyframe times are clip-local seconds. Each property is interpolated
//! independently; a property with no keyframes keeps its base value.

use serde::{Deserialize, Serialize};

/// Animatable transform property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimatedProperty {
    #[serde(rename = "position.x")]
    PositionX,
    #[serde(rename = "position.y")]
    PositionY,
    #[serde(rename = "scale.x")]
    ScaleX,
    #[serde(rename = "scale.y")]
    ScaleY,
    Rotation,
    Opacity,
}

impl AnimatedProperty {
    pub const ALL: [AnimatedProperty; 6] = [
        Self::PositionX,
        Self::PositionY,
        Self::ScaleX,
        Self::ScaleY,
        Self::Rotation,
        Self::Opacity,
    ];
}

/// Easing applied to the segment leaving a keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
}

impl Easing {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseInQuad => t * t,
            Self::EaseOutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::EaseInCubic => t * t * t,
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub property: AnimatedProperty,
    pub value: f32,
    #[serde(default)]
    pub easing: Easing,
}

impl Keyframe {
    pub fn new(time: f32, property: AnimatedProperty, value: f32) -> Self {
        Self {
            time,
            property,
            value,
            easing: Easing::Linear,
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }
}

/// Interpolated value of one property at clip-local time `t`.
///
/// `keys` must hold keyframes of a single property sorted by time. Returns
/// `None` for an empty list (caller keeps the base value). Clamps outside the
/// keyed range. With duplicate times the last-listed key wins.
pub fn value_at_time(keys: &[Keyframe], t: f32) -> Option<f32> {
    let first = keys.first()?;
    // Index of the first key strictly after t
    let idx = keys.partition_point(|k| k.time <= t);

    if idx == 0 {
        return Some(first.value);
    }
    let a = &keys[idx - 1];
    if idx >= keys.len() || a.time == t {
        return Some(a.value);
    }

    let b = &keys[idx];
    let span = b.time - a.time;
    if span <= 0.0 {
        return Some(a.value);
    }
    let u = a.easing.apply((t - a.time) / span);
    Some(a.value + u * (b.value - a.value))
}

/// Keyframes of `property` from a mixed list, stably sorted by time.
///
/// Stable sort keeps listing order among equal times, so `value_at_time`
/// still picks the last-listed duplicate.
pub fn keys_for(all: &[Keyframe], property: AnimatedProperty) -> Vec<Keyframe> {
    let mut keys: Vec<Keyframe> = all.iter().filter(|k| k.property == property).copied().collect();
    keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    keys
}
