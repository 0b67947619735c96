//! Error taxonomy for the compositor core.
//!
//! Only genuine failures live here. A cache miss is a valid outcome and a
//! cancelled preload is a normal termination (`PreloadOutcome::Cancelled`).

pub type CompositorResult<T> = Result<T, CompositorError>;

#[derive(thiserror::Error, Debug)]
pub enum CompositorError {
    /// A primitive or transition render call failed.
    #[error("render failure: {0}")]
    RenderFailure(String),

    /// Renderer returned a surface with a zero dimension.
    #[error("invalid surface: {width}x{height}")]
    InvalidSurface { width: u32, height: u32 },

    /// Frame does not fit in the configured byte budget.
    #[error("cache rejected '{key}': {size_bytes} bytes exceeds limit of {max_size_bytes}")]
    CacheRejection {
        key: String,
        size_bytes: u64,
        max_size_bytes: u64,
    },

    /// Zero limits supplied to a cache config update.
    #[error("invalid cache config: {0}")]
    ConfigInvalid(String),

    /// Timeline cannot be rendered (empty canvas, bad frame rate).
    #[error("invalid timeline: {0}")]
    Timeline(String),

    /// Config file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompositorError {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::RenderFailure(msg.into())
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// True for failures that count against `RenderStats::render_errors`.
    pub fn is_render_failure(&self) -> bool {
        matches!(self, Self::RenderFailure(_) | Self::InvalidSurface { .. } | Self::Other(_))
    }
}
