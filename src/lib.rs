//! STRATA - real-time frame compositor for timeline-based media editors
//!
//! Turns a project timeline and a playback time into one composited frame,
//! with a bounded LRU frame cache and a cancelable background preloader.
//! Pixel work (decoding, primitive rasterisation, transition blends) is
//! supplied by the host through the traits in [`entities::traits`].

// Core engine (cache, preloader, compositor)
pub mod core;

// Data model and per-frame math
pub mod entities;

pub mod cli;
pub mod config;
pub mod error;
pub mod synthetic;

pub use crate::config::{CompositorConfig, FrameCacheConfig, FrameCacheConfigPatch};
pub use crate::core::{CacheInsert, Compositor, FrameCache, FrameCacheStats, PreloadOutcome, PreloadRange, RenderStats};
pub use crate::entities::{Clip, ClipTransform, RenderedFrame, Timeline, Track, Transition};
pub use crate::error::{CompositorError, CompositorResult};
