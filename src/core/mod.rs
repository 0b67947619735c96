//! Core engine modules - cache, preloader, debouncer, compositor
//!
//! These modules form the render engine, independent of any UI.

pub mod compositor;
pub mod debounce;
pub mod frame_cache;
pub mod preloader;
pub mod render_stats;

// Re-exports for convenience
pub use compositor::Compositor;
pub use debounce::RenderDebouncer;
pub use frame_cache::{CacheInsert, CacheStats, FrameCache, FrameCacheStats, cache_key_for};
pub use preloader::{CancelToken, PreloadOutcome, PreloadRange, PreloadTicket, PreloadWindow, Preloader};
pub use render_stats::{RenderStats, RenderStatsWindow};
