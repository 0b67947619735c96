//! Entities module - timeline data model and pure per-frame math
//!
//! Nothing here owns threads or caches:
//! - Timeline, tracks, clips and transitions (read-only for the compositor)
//! - Keyframe interpolation and emphasis waveforms
//! - Transform resolution and layer blending
//! - Traits for the external renderers

pub mod blend;
pub mod emphasis;
pub mod frame;
pub mod keyframes;
pub mod timeline;
pub mod traits;
pub mod transform;
pub mod transition;

pub use blend::BlendMode;
pub use emphasis::{EmphasisAnimation, EmphasisDelta, EmphasisKind};
pub use frame::RenderedFrame;
pub use keyframes::{AnimatedProperty, Easing, Keyframe};
pub use timeline::{Clip, ClipKind, Timeline, Track, Transition};
pub use traits::{PrimitiveRenderer, PrimitiveRequest, TransitionEngine, TransitionOutput};
pub use transform::{ClipTransform, CropRect};
pub use transition::{ActiveTransition, TransitionCoordinator, TransitionRenderInfo};
