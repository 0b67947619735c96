//! Cache and compositor configuration.
//!
//! **Why**: Cache limits are a runtime setting (preferences panel, CLI, JSON
//! file). A config is an immutable snapshot; updates go through
//! [`FrameCacheConfigPatch`] and replace it wholesale.

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::System;

use crate::core::debounce::DEFAULT_THRESHOLD_SECS;
use crate::core::render_stats::DEFAULT_STATS_WINDOW;
use crate::error::{CompositorError, CompositorResult};

/// Limits for [`crate::core::FrameCache`] and the preload window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameCacheConfig {
    /// Maximum number of cached frames
    pub max_frames: u32,
    /// Maximum total bytes of cached frames (RGBA, 4 bytes/pixel)
    pub max_size_bytes: u64,
    /// Frames to preload ahead of the playhead
    pub preload_ahead: u32,
    /// Frames to preload behind the playhead
    pub preload_behind: u32,
}

impl Default for FrameCacheConfig {
    fn default() -> Self {
        Self {
            max_frames: 120,
            max_size_bytes: 512 * 1024 * 1024,
            preload_ahead: 30,
            preload_behind: 10,
        }
    }
}

impl FrameCacheConfig {
    /// Size the byte budget from currently available system memory.
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.25 = 25%)
    /// * `reserve_gb` - Memory kept free for the system (GB)
    pub fn from_system_memory(mem_fraction: f64, reserve_gb: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available = sys.available_memory();
        let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as u64;
        let usable = available.saturating_sub(reserve);
        let limit = ((usable as f64) * mem_fraction.clamp(0.0, 1.0)) as u64;

        info!(
            "FrameCacheConfig from system: available={} MB, reserve={} MB, limit={} MB ({}%)",
            available / 1024 / 1024,
            reserve / 1024 / 1024,
            limit / 1024 / 1024,
            (mem_fraction * 100.0) as u32
        );

        Self {
            // Never hand out an unusable zero budget on a starved machine
            max_size_bytes: limit.max(64 * 1024 * 1024),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CompositorResult<()> {
        if self.max_frames == 0 {
            return Err(CompositorError::config_invalid("max_frames must be > 0"));
        }
        if self.max_size_bytes == 0 {
            return Err(CompositorError::config_invalid("max_size_bytes must be > 0"));
        }
        Ok(())
    }

    /// Merge a partial update into a copy of this config.
    ///
    /// The merged result is validated; `self` is never modified.
    pub fn merged(&self, patch: &FrameCacheConfigPatch) -> CompositorResult<Self> {
        let merged = Self {
            max_frames: patch.max_frames.unwrap_or(self.max_frames),
            max_size_bytes: patch.max_size_bytes.unwrap_or(self.max_size_bytes),
            preload_ahead: patch.preload_ahead.unwrap_or(self.preload_ahead),
            preload_behind: patch.preload_behind.unwrap_or(self.preload_behind),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial cache config update. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameCacheConfigPatch {
    pub max_frames: Option<u32>,
    pub max_size_bytes: Option<u64>,
    pub preload_ahead: Option<u32>,
    pub preload_behind: Option<u32>,
}

impl FrameCacheConfigPatch {
    pub fn max_frames(mut self, v: u32) -> Self {
        self.max_frames = Some(v);
        self
    }

    pub fn max_size_bytes(mut self, v: u64) -> Self {
        self.max_size_bytes = Some(v);
        self
    }

    pub fn preload_ahead(mut self, v: u32) -> Self {
        self.preload_ahead = Some(v);
        self
    }

    pub fn preload_behind(mut self, v: u32) -> Self {
        self.preload_behind = Some(v);
        self
    }
}

/// Top-level compositor settings (persisted as JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub cache: FrameCacheConfig,
    /// Debounced requests closer than this to the last rendered time are dropped (seconds)
    pub debounce_threshold_secs: f64,
    /// Number of render-duration samples kept for the rolling average
    pub stats_window: usize,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            cache: FrameCacheConfig::default(),
            debounce_threshold_secs: DEFAULT_THRESHOLD_SECS,
            stats_window: DEFAULT_STATS_WINDOW,
        }
    }
}

impl CompositorConfig {
    /// Load from JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> CompositorResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CompositorError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| CompositorError::Config(format!("{}: {}", path.display(), e)))?;
        config.cache.validate()?;
        info!("Loaded compositor config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> CompositorResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| CompositorError::Config(e.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|e| CompositorError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}
