//! Presentation surface management.
//!
//! - [`SurfaceTarget`] - What the surface presents to: a window or nothing (headless)
//! - [`Surface`] - The configured presentation surface owned by the context
//! - [`SurfaceImage`] - An acquired image that will be presented at the end of a frame
//! - [`PresentMode`] - Controls vsync behavior
//!
//! Surface formats are picked by preference score: `Rgba8Unorm` first, then
//! `Bgra8Unorm`, then whatever the surface reports first.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{GpuBackend, GpuSurface, GpuSurfaceImage};
use crate::error::GraphicsError;
use crate::types::TextureFormat;

/// Presentation mode for the swapchain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    #[default]
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    Fifo,
    /// VSync with relaxed timing. May tear if a frame is late.
    FifoRelaxed,
}

/// Configuration for a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    pub format: TextureFormat,
    /// Width of the surface in pixels.
    pub width: u32,
    /// Height of the surface in pixels.
    pub height: u32,
    pub present_mode: PresentMode,
}

impl SurfaceConfiguration {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            format,
            width,
            height,
            present_mode: PresentMode::default(),
        }
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }
}

/// A window the surface can present to.
///
/// Implemented for every thread-safe type exposing raw window and display
/// handles, e.g. `winit::window::Window`.
pub trait WindowHandle: HasWindowHandle + HasDisplayHandle + Send + Sync {}

impl<T: HasWindowHandle + HasDisplayHandle + Send + Sync> WindowHandle for T {}

/// Presentation target handed over by the window collaborator.
#[derive(Clone, Default)]
pub enum SurfaceTarget {
    /// Render offscreen. Acquired images are backend-owned placeholders.
    #[default]
    Headless,
    Window(Arc<dyn WindowHandle>),
}

impl std::fmt::Debug for SurfaceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Headless => write!(f, "SurfaceTarget::Headless"),
            Self::Window(_) => write!(f, "SurfaceTarget::Window"),
        }
    }
}

/// Preference score of a surface format. Higher is better.
pub fn format_score(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgba8Unorm => 80,
        TextureFormat::Bgra8Unorm => 60,
        _ => 0,
    }
}

/// Pick the highest-scoring format. Ties keep the surface's own order.
pub fn select_surface_format(formats: &[TextureFormat]) -> Option<TextureFormat> {
    formats
        .iter()
        .copied()
        .enumerate()
        .max_by_key(|(index, format)| (format_score(*format), std::cmp::Reverse(*index)))
        .map(|(_, format)| format)
}

/// The presentation surface.
#[derive(Debug)]
pub struct Surface {
    gpu: GpuSurface,
    config: SurfaceConfiguration,
    generation: u64,
}

impl Surface {
    /// Create and configure a surface for `target`.
    pub(crate) fn create(
        backend: &dyn GpuBackend,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        present_mode: PresentMode,
    ) -> Result<Self, GraphicsError> {
        let gpu = backend.create_surface(target)?;
        let formats = backend.surface_formats(&gpu);
        let format = select_surface_format(&formats).ok_or_else(|| {
            GraphicsError::ResourceCreationFailed("surface reports no supported formats".into())
        })?;

        let config = SurfaceConfiguration::new(width.max(1), height.max(1), format)
            .with_present_mode(present_mode);
        backend.configure_surface(&gpu, &config)?;
        log::info!(
            "Configured surface {}x{} {:?} {:?}",
            config.width,
            config.height,
            config.format,
            config.present_mode
        );

        Ok(Self {
            gpu,
            config,
            generation: 0,
        })
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Incremented every time the surface is reconfigured.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reconfigure with a new size. Zero dimensions are clamped to one.
    pub(crate) fn resize(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let previous = (self.config.width, self.config.height);
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        if let Err(e) = backend.configure_surface(&self.gpu, &self.config) {
            (self.config.width, self.config.height) = previous;
            return Err(e);
        }
        self.generation += 1;
        log::info!(
            "Surface reconfigured to {}x{} (generation {})",
            self.config.width,
            self.config.height,
            self.generation
        );
        Ok(())
    }

    pub(crate) fn acquire(&self, backend: &dyn GpuBackend) -> Result<SurfaceImage, GraphicsError> {
        let gpu = backend.acquire_image(&self.gpu)?;
        let (width, height) = gpu.size();
        Ok(SurfaceImage {
            gpu,
            generation: self.generation,
            width,
            height,
        })
    }

    pub(crate) fn present(
        &self,
        backend: &dyn GpuBackend,
        image: SurfaceImage,
    ) -> Result<(), GraphicsError> {
        if image.generation != self.generation {
            return Err(GraphicsError::SurfaceOutdated);
        }
        backend.present(image.gpu)
    }
}

/// A presentation image acquired for the current frame.
#[derive(Debug)]
pub struct SurfaceImage {
    gpu: GpuSurfaceImage,
    generation: u64,
    width: u32,
    height: u32,
}

impl SurfaceImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Surface generation the image was acquired from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn gpu(&self) -> &GpuSurfaceImage {
        &self.gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_format_scores() {
        assert_eq!(format_score(TextureFormat::Rgba8Unorm), 80);
        assert_eq!(format_score(TextureFormat::Bgra8Unorm), 60);
        assert_eq!(format_score(TextureFormat::Bgra8UnormSrgb), 0);
    }

    #[test]
    fn test_select_prefers_highest_score() {
        let formats = [
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba8Unorm,
        ];
        assert_eq!(
            select_surface_format(&formats),
            Some(TextureFormat::Rgba8Unorm)
        );
    }

    #[test]
    fn test_select_falls_back_to_first_reported() {
        let formats = [TextureFormat::Rgba16Float, TextureFormat::Bgra8UnormSrgb];
        assert_eq!(
            select_surface_format(&formats),
            Some(TextureFormat::Rgba16Float)
        );
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn test_default_present_mode_is_immediate() {
        assert_eq!(PresentMode::default(), PresentMode::Immediate);
    }

    #[test]
    fn test_resize_bumps_generation() {
        let backend = DummyBackend::new();
        let mut surface = Surface::create(
            &backend,
            &SurfaceTarget::Headless,
            320,
            240,
            PresentMode::Immediate,
        )
        .unwrap();
        assert_eq!(surface.format(), TextureFormat::Rgba8Unorm);

        let stale = surface.acquire(&backend).unwrap();
        surface.resize(&backend, 640, 0).unwrap();
        assert_eq!(surface.size(), (640, 1));
        assert_eq!(surface.generation(), 1);

        assert!(matches!(
            surface.present(&backend, stale),
            Err(GraphicsError::SurfaceOutdated)
        ));
        let fresh = surface.acquire(&backend).unwrap();
        assert_eq!((fresh.width(), fresh.height()), (640, 1));
        surface.present(&backend, fresh).unwrap();
    }
}
