//! Rendered frames and the surfaces that back them.
//!
//! **Why**: Raster surfaces are a finite external resource (GPU textures,
//! pooled pixmaps, decoder buffers). A [`Surface`] carries an optional
//! release hook that fires exactly once, when the last [`RenderedFrame`]
//! referencing it is dropped. Ownership is structural, so a double release
//! cannot be expressed.
//!
//! Pixels are straight-alpha RGBA8, 4 bytes/pixel.

use std::fmt;
use std::sync::Arc;

use crate::error::{CompositorError, CompositorResult};

/// Bytes per pixel for all cached frames (RGBA8).
pub const BYTES_PER_PIXEL: u64 = 4;

/// Called once when a surface is released. Receives (width, height).
pub type ReleaseHook = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Owned raster surface.
pub struct Surface {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    on_release: Option<ReleaseHook>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_release_hook", &self.on_release.is_some())
            .finish()
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(self.width, self.height);
        }
    }
}

/// Immutable composited or primitive frame.
///
/// Cheap to clone (shared surface). Once handed to the cache via `put`, the
/// caller should not keep its own clone around: the surface is released
/// when the cache drops the last reference.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    surface: Arc<Surface>,
}

impl RenderedFrame {
    /// Wrap an RGBA8 buffer. Fails on zero dimensions or a buffer of the wrong length.
    pub fn from_rgba8(pixels: Vec<u8>, width: u32, height: u32) -> CompositorResult<Self> {
        Self::with_release_hook(pixels, width, height, None)
    }

    /// Wrap an RGBA8 buffer with a hook run when the surface is released.
    pub fn with_release_hook(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        on_release: Option<ReleaseHook>,
    ) -> CompositorResult<Self> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSurface { width, height });
        }
        let expected = width as u64 * height as u64 * BYTES_PER_PIXEL;
        if pixels.len() as u64 != expected {
            return Err(CompositorError::render(format!(
                "surface buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            surface: Arc::new(Surface {
                pixels,
                width,
                height,
                on_release,
            }),
        })
    }

    /// Fully transparent canvas.
    pub fn blank(width: u32, height: u32) -> CompositorResult<Self> {
        let len = (width as u64 * height as u64 * BYTES_PER_PIXEL) as usize;
        Self::from_rgba8(vec![0u8; len], width, height)
    }

    /// Canvas filled with one RGBA colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> CompositorResult<Self> {
        let len = (width as u64 * height as u64 * BYTES_PER_PIXEL) as usize;
        let mut pixels = vec![0u8; len];
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self::from_rgba8(pixels, width, height)
    }

    pub fn width(&self) -> u32 {
        self.surface.width
    }

    pub fn height(&self) -> u32 {
        self.surface.height
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    /// Memory footprint used for cache accounting: width * height * 4.
    pub fn size_bytes(&self) -> u64 {
        self.surface.width as u64 * self.surface.height as u64 * BYTES_PER_PIXEL
    }

    pub fn pixels(&self) -> &[u8] {
        &self.surface.pixels
    }

    /// RGBA of one pixel, `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.surface.width || y >= self.surface.height {
            return None;
        }
        let i = ((y as usize * self.surface.width as usize) + x as usize) * 4;
        let p = &self.surface.pixels[i..i + 4];
        Some([p[0], p[1], p[2], p[3]])
    }

    /// True if both handles point at the same surface.
    pub fn same_surface(&self, other: &RenderedFrame) -> bool {
        Arc::ptr_eq(&self.surface, &other.surface)
    }

    /// Number of live handles to this surface.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.surface)
    }

    /// Give up this handle. The surface is released if this was the last one.
    pub fn release(self) {
        drop(self);
    }
}
