//! Timeline model: tracks of clips plus cross-clip transitions.
//!
//! # Coordinate Systems
//!
//! - Timeline time: absolute seconds (`f64`), 0 = project start
//! - Clip-local time: `t - clip.start_time` (`f32`), used by keyframes and
//!   emphasis animations
//! - `source_offset`: seconds trimmed from the head of the source media;
//!   renderers add it to the local time when sampling video
//!
//! Tracks are stacked bottom-to-top in list order. The compositor only
//! reads the timeline; editing and persistence belong to the host app.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::blend::BlendMode;
use super::emphasis::EmphasisAnimation;
use super::keyframes::Keyframe;
use super::transform::ClipTransform;
use crate::error::{CompositorError, CompositorResult};

/// Primitive type of a clip; selects the external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Video,
    Shape,
    Text,
    Sticker,
    Svg,
}

/// Single clip placement on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub kind: ClipKind,
    /// Placement on the timeline (seconds)
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub source_offset: f64,
    #[serde(default)]
    pub transform: ClipTransform,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default)]
    pub emphasis: Option<EmphasisAnimation>,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Type-specific payload (text, colour, media path...) passed to the renderer untouched
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl Clip {
    pub fn new(kind: ClipKind, start_time: f64, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            kind,
            start_time,
            duration,
            source_offset: 0.0,
            transform: ClipTransform::default(),
            keyframes: Vec::new(),
            emphasis: None,
            blend_mode: BlendMode::Normal,
            visible: true,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_transform(mut self, transform: ClipTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_keyframes(mut self, keyframes: Vec<Keyframe>) -> Self {
        self.keyframes = keyframes;
        self
    }

    pub fn with_emphasis(mut self, emphasis: EmphasisAnimation) -> Self {
        self.emphasis = Some(emphasis);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Exclusive end time.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// `start <= t < end` and visible.
    pub fn is_active_at(&self, t: f64) -> bool {
        self.visible && t >= self.start_time && t < self.end_time()
    }

    pub fn local_time(&self, t: f64) -> f32 {
        (t - self.start_time) as f32
    }
}

/// Transition between two clips of the same track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    /// Engine-specific type name ("crossfade", "wipe", ...)
    pub kind: String,
    /// Outgoing clip
    pub clip_a: Uuid,
    /// Incoming clip
    pub clip_b: Uuid,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Transition {
    pub fn new(kind: impl Into<String>, clip_a: Uuid, clip_b: Uuid, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            clip_a,
            clip_b,
            duration,
            params: serde_json::Value::Null,
        }
    }
}

/// Ordered collection of clips; transitions reference clips of this track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub muted: bool,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push(clip);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn clip(&self, id: Uuid) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn active_clips(&self, t: f64) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |c| c.is_active_at(t))
    }

    pub fn end_time(&self) -> f64 {
        self.clips.iter().map(Clip::end_time).fold(0.0, f64::max)
    }
}

/// Project timeline as seen by the compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Output canvas size (pixels)
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Explicit duration in seconds; 0 = derive from clips
    #[serde(default)]
    pub duration: f64,
    /// Bottom-to-top
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Timeline {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
            duration: 0.0,
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn validate(&self) -> CompositorResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CompositorError::Timeline(format!(
                "canvas must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(CompositorError::Timeline(format!(
                "frame rate must be > 0, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }

    /// Total duration: explicit value or the last clip end, whichever is larger.
    pub fn total_duration(&self) -> f64 {
        self.tracks.iter().map(Track::end_time).fold(self.duration, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_activity_is_half_open() {
        let clip = Clip::new(ClipKind::Shape, 1.0, 2.0);
        assert!(!clip.is_active_at(0.99));
        assert!(clip.is_active_at(1.0));
        assert!(clip.is_active_at(2.99));
        assert!(!clip.is_active_at(3.0));
        assert_eq!(clip.local_time(1.5), 0.5);
    }

    #[test]
    fn test_hidden_clip_inactive() {
        let mut clip = Clip::new(ClipKind::Text, 0.0, 5.0);
        clip.visible = false;
        assert!(!clip.is_active_at(1.0));
    }

    #[test]
    fn test_total_duration_from_clips() {
        let timeline = Timeline::new(64, 64, 30.0)
            .with_track(Track::new("v1").with_clip(Clip::new(ClipKind::Video, 0.0, 4.0)))
            .with_track(Track::new("v2").with_clip(Clip::new(ClipKind::Svg, 2.0, 5.0)));
        assert_eq!(timeline.total_duration(), 7.0);
    }

    #[test]
    fn test_validate() {
        assert!(Timeline::new(64, 64, 30.0).validate().is_ok());
        assert!(Timeline::new(0, 64, 30.0).validate().is_err());
        assert!(Timeline::new(64, 64, 0.0).validate().is_err());
    }

    #[test]
    fn test_timeline_json_roundtrip_defaults() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{ "width": 320, "height": 180, "frame_rate": 25.0,
                 "tracks": [{{ "id": "{id}", "clips": [
                    {{ "id": "{id}", "kind": "sticker", "start_time": 0.0, "duration": 1.0 }}
                 ] }}] }}"#
        );
        let timeline: Timeline = serde_json::from_str(&json).unwrap();
        let clip = &timeline.tracks[0].clips[0];
        assert!(clip.visible);
        assert_eq!(clip.blend_mode, BlendMode::Normal);
        assert_eq!(clip.transform, ClipTransform::default());
        assert_eq!(timeline.tracks[0].clip(id).map(|c| c.kind), Some(ClipKind::Sticker));
    }
}
