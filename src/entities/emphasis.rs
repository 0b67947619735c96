//! Procedural "emphasis" animations (pulse, shake, focus zoom, ...).
//!
//! Every variant is a closed-form function of
//! `(kind, speed, intensity, loop, phase, params)`. There is no internal
//! state, so evaluating at any time (including after a backward seek) always
//! gives the same delta.
//!
//! # Phase
//!
//! `elapsed = local_time - start_time`, `phase = elapsed * speed`, then
//! wrapped modulo 1 when looping or clamped to 1 for one-shots.
//!
//! # Randomness
//!
//! `Flicker` and `Vibrate` use a SplitMix64 hash of `(seed, frame_index)`,
//! where the seed is derived from the clip id. Re-rendering the same frame
//! of the same clip is reproducible.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use uuid::Uuid;

use super::keyframes::Easing;

/// Default length of a focus zoom when no duration is set (seconds).
pub const DEFAULT_FOCUS_DURATION: f32 = 3.0;
/// Default zoom factor for focus zoom.
pub const DEFAULT_ZOOM_SCALE: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmphasisKind {
    #[default]
    None,
    Pulse,
    Bounce,
    Shake,
    Wiggle,
    Float,
    Spin,
    Swing,
    Heartbeat,
    Flash,
    Flicker,
    Vibrate,
    Breathe,
    Wobble,
    Jello,
    RubberBand,
    Tada,
    HeadShake,
    Blink,
    Orbit,
    FocusZoom,
}

/// Declarative emphasis animation attached to a clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmphasisAnimation {
    #[serde(rename = "type")]
    pub kind: EmphasisKind,
    #[serde(default = "default_one")]
    pub speed: f32,
    #[serde(default = "default_one")]
    pub intensity: f32,
    #[serde(rename = "loop", default = "default_true")]
    pub looping: bool,
    #[serde(default)]
    pub start_time: Option<f32>,
    #[serde(default)]
    pub animation_duration: Option<f32>,
    /// Normalised focus point, (0,0) top-left .. (1,1) bottom-right
    #[serde(default)]
    pub focus_point: Option<Vec2>,
    #[serde(default)]
    pub zoom_scale: Option<f32>,
    /// Seconds spent fully zoomed in
    #[serde(default)]
    pub hold_duration: Option<f32>,
}

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl EmphasisAnimation {
    pub fn new(kind: EmphasisKind) -> Self {
        Self {
            kind,
            speed: 1.0,
            intensity: 1.0,
            looping: true,
            start_time: None,
            animation_duration: None,
            focus_point: None,
            zoom_scale: None,
            hold_duration: None,
        }
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn window(mut self, start_time: f32, duration: Option<f32>) -> Self {
        self.start_time = Some(start_time);
        self.animation_duration = duration;
        self
    }

    pub fn focus(mut self, point: Vec2, zoom_scale: f32, hold_duration: f32) -> Self {
        self.focus_point = Some(point);
        self.zoom_scale = Some(zoom_scale);
        self.hold_duration = Some(hold_duration);
        self
    }
}

/// Multiplicative/additive change applied on top of a clip transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmphasisDelta {
    /// Multiplies base opacity
    pub opacity: f32,
    /// Uniform scale multiplier
    pub scale: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Pixels
    pub offset_x: f32,
    pub offset_y: f32,
    /// Degrees
    pub rotation: f32,
}

impl EmphasisDelta {
    pub const IDENTITY: Self = Self {
        opacity: 1.0,
        scale: 1.0,
        scale_x: 1.0,
        scale_y: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
        rotation: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for EmphasisDelta {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Per-evaluation inputs that are not part of the animation itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmphasisContext {
    /// Stable per-clip seed for the random variants
    pub seed: u64,
    pub frame_rate: f32,
    /// Canvas size in pixels (focus zoom offsets)
    pub canvas: Vec2,
}

impl EmphasisContext {
    pub fn for_clip(clip_id: Uuid, frame_rate: f32, canvas: Vec2) -> Self {
        Self {
            seed: seed_for(clip_id),
            frame_rate,
            canvas,
        }
    }
}

/// Stable 64-bit seed from a clip id.
pub fn seed_for(id: Uuid) -> u64 {
    let (hi, lo) = id.as_u64_pair();
    hi ^ lo.rotate_left(32)
}

/// SplitMix64 step.
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Deterministic value in [0, 1) for (seed, frame, channel).
fn hash01(seed: u64, frame: i64, channel: u64) -> f32 {
    let x = mix64(seed ^ (frame as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93) ^ channel.wrapping_mul(0xA24B_AED4_963E_E407));
    // 24 bits fit an f32 mantissa exactly
    ((x >> 40) as f32) / ((1u64 << 24) as f32)
}

/// Sine pulse over `[start, start + width]` of the phase, zero elsewhere.
fn beat(p: f32, start: f32, width: f32) -> f32 {
    let x = (p - start) / width;
    if (0.0..=1.0).contains(&x) { (x * PI).sin() } else { 0.0 }
}

/// Transform delta of `anim` at clip-local time `local_time`.
pub fn delta_at_time(anim: &EmphasisAnimation, local_time: f32, ctx: &EmphasisContext) -> EmphasisDelta {
    if anim.kind == EmphasisKind::None {
        return EmphasisDelta::IDENTITY;
    }

    let start = anim.start_time.unwrap_or(0.0);
    if local_time < start {
        return EmphasisDelta::IDENTITY;
    }
    let elapsed = local_time - start;
    if let Some(duration) = anim.animation_duration
        && duration.is_finite()
        && elapsed > duration
    {
        return EmphasisDelta::IDENTITY;
    }

    let speed = anim.speed.max(0.0);
    if anim.kind == EmphasisKind::FocusZoom {
        return focus_zoom(anim, elapsed * speed, ctx);
    }

    let scaled = elapsed * speed;
    let p = if anim.looping { scaled - scaled.floor() } else { scaled.min(1.0) };
    let i = anim.intensity;
    let frame = (local_time * ctx.frame_rate).floor() as i64;

    let mut d = EmphasisDelta::IDENTITY;
    match anim.kind {
        EmphasisKind::None | EmphasisKind::FocusZoom => {}
        EmphasisKind::Pulse => {
            d.scale = 1.0 + (p * TAU).sin() * 0.1 * i;
        }
        EmphasisKind::Bounce => {
            d.offset_y = -(p * PI).sin().abs() * 20.0 * i;
        }
        EmphasisKind::Shake => {
            d.offset_x = (p * TAU * 10.0).sin() * 5.0 * i;
            d.offset_y = (p * TAU * 7.0).cos() * 3.0 * i;
        }
        EmphasisKind::Wiggle => {
            d.rotation = (p * TAU * 4.0).sin() * 5.0 * i;
        }
        EmphasisKind::Float => {
            d.offset_y = (p * TAU).sin() * 10.0 * i;
        }
        EmphasisKind::Spin => {
            d.rotation = p * 360.0;
        }
        EmphasisKind::Swing => {
            d.rotation = (p * TAU).sin() * 15.0 * i;
        }
        EmphasisKind::Heartbeat => {
            d.scale = 1.0 + 0.15 * i * (beat(p, 0.0, 0.15) + 0.7 * beat(p, 0.25, 0.15));
        }
        EmphasisKind::Flash => {
            d.opacity = 1.0 - i * (0.5 - 0.5 * (p * TAU * 2.0).cos());
        }
        EmphasisKind::Flicker => {
            d.opacity = 1.0 - i * 0.5 * hash01(ctx.seed, frame, 0);
        }
        EmphasisKind::Vibrate => {
            d.offset_x = (hash01(ctx.seed, frame, 1) * 2.0 - 1.0) * 3.0 * i;
            d.offset_y = (hash01(ctx.seed, frame, 2) * 2.0 - 1.0) * 3.0 * i;
        }
        EmphasisKind::Breathe => {
            let w = 0.5 - 0.5 * (p * TAU).cos();
            d.scale = 1.0 + 0.05 * i * w;
            d.opacity = 1.0 - 0.15 * i * w;
        }
        EmphasisKind::Wobble => {
            let damp = 1.0 - p;
            d.offset_x = (p * TAU * 2.0).sin() * 25.0 * i * damp;
            d.rotation = -(p * TAU * 2.0).sin() * 5.0 * i * damp;
        }
        EmphasisKind::Jello => {
            let skew = (p * TAU * 3.0).sin() * 0.12 * i * (1.0 - p);
            d.scale_x = 1.0 + skew;
            d.scale_y = 1.0 - skew;
        }
        EmphasisKind::RubberBand => {
            let s = (p * PI).sin();
            d.scale_x = 1.0 + s * 0.25 * i;
            d.scale_y = 1.0 - s * 0.15 * i;
        }
        EmphasisKind::Tada => {
            let env = (p * PI).sin();
            d.scale = 1.0 + 0.1 * i * env;
            d.rotation = (p * TAU * 5.0).sin() * 3.0 * i * env;
        }
        EmphasisKind::HeadShake => {
            let damp = 1.0 - p;
            d.offset_x = (p * TAU * 3.0).sin() * 10.0 * i * damp;
            d.rotation = -(p * TAU * 3.0).sin() * 4.0 * i * damp;
        }
        EmphasisKind::Blink => {
            let half = (p * 2.0).fract();
            d.opacity = if half < 0.5 { 1.0 } else { 1.0 - i };
        }
        EmphasisKind::Orbit => {
            d.offset_x = ((p * TAU).cos() - 1.0) * 15.0 * i;
            d.offset_y = (p * TAU).sin() * 15.0 * i;
        }
    }
    d.opacity = d.opacity.clamp(0.0, 1.0);
    d
}

/// Three-phase zoom toward `focus_point`: ease in, hold, ease out.
///
/// `u` is speed-scaled seconds since start.
fn focus_zoom(anim: &EmphasisAnimation, u: f32, ctx: &EmphasisContext) -> EmphasisDelta {
    let total = anim
        .animation_duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(DEFAULT_FOCUS_DURATION);
    let hold = anim.hold_duration.unwrap_or(total / 3.0).clamp(0.0, total);
    let ramp = (total - hold) / 2.0;
    let u = if anim.looping { u.rem_euclid(total) } else { u.min(total) };

    let ease = Easing::EaseInOutCubic;
    let e = if ramp <= 0.0 {
        1.0
    } else if u < ramp {
        ease.apply(u / ramp)
    } else if u < ramp + hold {
        1.0
    } else {
        ease.apply(1.0 - (u - ramp - hold) / ramp)
    };

    let zoom = anim.zoom_scale.unwrap_or(DEFAULT_ZOOM_SCALE);
    let scale = 1.0 + (zoom - 1.0) * e;
    let focus = anim.focus_point.unwrap_or(Vec2::splat(0.5));
    // Shift so the focus point stays put while the layer grows around the centre
    let offset = (Vec2::splat(0.5) - focus) * ctx.canvas * (scale - 1.0);

    EmphasisDelta {
        scale,
        offset_x: offset.x,
        offset_y: offset.y,
        ..EmphasisDelta::IDENTITY
    }
}
