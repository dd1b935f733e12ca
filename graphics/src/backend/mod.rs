//! GPU backend abstraction layer.
//!
//! Every GPU API the crate talks to implements [`GpuBackend`]. Higher layers
//! hold backend objects only through the opaque handle enums in this module
//! ([`GpuBuffer`], [`GpuTexture`], ...), so the same frame orchestration runs
//! against a real device or the headless [`DummyBackend`].
//!
//! # Available Backends
//!
//! - `dummy` (always available): headless backend with memory-backed buffers,
//!   submission reports and fault injection for tests
//! - `wgpu-backend`: cross-platform backend using wgpu
//!
//! [`DummyBackend`]: dummy::DummyBackend

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub mod commands;
pub mod dummy;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::error::GraphicsError;
use crate::pipeline::ProgramDescriptor;
use crate::swapchain::{SurfaceConfiguration, SurfaceTarget};
use crate::types::{BufferDescriptor, SamplerDescriptor, TextureDescriptor, TextureFormat};

pub use commands::{CommandList, GpuCommand, RecordedAttachment, RecordedDepth, RecordedPass};
pub use dummy::{DummyBackend, PassReport, SubmissionReport};

/// Which backend [`create_backend`] should try to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Use the best available GPU backend, falling back to the dummy backend.
    #[default]
    Auto,
    /// Always use the headless dummy backend.
    Dummy,
    /// Require the wgpu backend. Fails if the feature is disabled or no adapter exists.
    Wgpu,
}

/// Handle to a GPU buffer resource.
pub enum GpuBuffer {
    /// Dummy backend buffer, keyed into the backend's memory table.
    Dummy(u64),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Buffer>),
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(id) => f.debug_tuple("GpuBuffer::Dummy").field(id).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(buffer) => f.debug_tuple("GpuBuffer::Wgpu").field(buffer).finish(),
        }
    }
}

impl Clone for GpuBuffer {
    fn clone(&self) -> Self {
        match self {
            Self::Dummy(id) => Self::Dummy(*id),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(buffer) => Self::Wgpu(buffer.clone()),
        }
    }
}

/// Handle to a GPU texture resource.
pub enum GpuTexture {
    Dummy(u64),
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        texture: Arc<wgpu::Texture>,
        view: Arc<wgpu::TextureView>,
    },
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(id) => f.debug_tuple("GpuTexture::Dummy").field(id).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { texture, view } => f
                .debug_struct("GpuTexture::Wgpu")
                .field("texture", texture)
                .field("view", view)
                .finish(),
        }
    }
}

impl Clone for GpuTexture {
    fn clone(&self) -> Self {
        match self {
            Self::Dummy(id) => Self::Dummy(*id),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { texture, view } => Self::Wgpu {
                texture: texture.clone(),
                view: view.clone(),
            },
        }
    }
}

/// Handle to a GPU sampler resource.
pub enum GpuSampler {
    Dummy(u64),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Sampler>),
}

impl std::fmt::Debug for GpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(id) => f.debug_tuple("GpuSampler::Dummy").field(id).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(sampler) => f.debug_tuple("GpuSampler::Wgpu").field(sampler).finish(),
        }
    }
}

/// Handle to a compiled GPU program (render or compute pipeline).
pub enum GpuProgram {
    Dummy(u64),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_backend::WgpuProgram>),
}

impl std::fmt::Debug for GpuProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(id) => f.debug_tuple("GpuProgram::Dummy").field(id).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(program) => f.debug_tuple("GpuProgram::Wgpu").field(program).finish(),
        }
    }
}

impl Clone for GpuProgram {
    fn clone(&self) -> Self {
        match self {
            Self::Dummy(id) => Self::Dummy(*id),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(program) => Self::Wgpu(program.clone()),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    Dummy { signaled: AtomicBool },
    /// wgpu fence (submission index for polling)
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        device: Arc<wgpu::Device>,
        submission_index: parking_lot::Mutex<Option<wgpu::SubmissionIndex>>,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { signaled } => f
                .debug_struct("GpuFence::Dummy")
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu {
                submission_index, ..
            } => f
                .debug_struct("GpuFence::Wgpu")
                .field("submission_index", submission_index)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a presentation surface.
pub enum GpuSurface {
    /// Surface of the dummy backend (headless or window-backed alike).
    Dummy,
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Surface<'static>>),
}

impl std::fmt::Debug for GpuSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "GpuSurface::Dummy"),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => write!(f, "GpuSurface::Wgpu"),
        }
    }
}

/// An acquired presentation image. Consumed by [`GpuBackend::present`].
pub enum GpuSurfaceImage {
    Dummy {
        width: u32,
        height: u32,
    },
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        texture: wgpu::SurfaceTexture,
        view: wgpu::TextureView,
    },
}

impl GpuSurfaceImage {
    /// Size of the image in pixels.
    pub fn size(&self) -> (u32, u32) {
        match self {
            Self::Dummy { width, height } => (*width, *height),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { texture, .. } => (texture.texture.width(), texture.texture.height()),
        }
    }
}

impl std::fmt::Debug for GpuSurfaceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.size();
        f.debug_struct("GpuSurfaceImage")
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Device limits reported by the adapter.
    fn max_buffer_size(&self) -> u64;

    /// Largest supported 2D texture dimension.
    fn max_texture_dimension(&self) -> u32;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError>;

    /// Create a program from validated shader code.
    fn create_program(&self, descriptor: &ProgramDescriptor<'_>)
    -> Result<GpuProgram, GraphicsError>;

    fn destroy_buffer(&self, buffer: &GpuBuffer);

    fn destroy_texture(&self, texture: &GpuTexture);

    fn destroy_sampler(&self, sampler: &GpuSampler);

    /// Write data to a buffer. Ordered before any later submission.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Upload the base mip level of a texture.
    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Read data from a buffer.
    ///
    /// This is a blocking operation that waits for the GPU to finish.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64)
    -> Result<Vec<u8>, GraphicsError>;

    /// Create a presentation surface for the given target.
    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError>;

    /// Formats the surface can be configured with.
    fn surface_formats(&self, surface: &GpuSurface) -> Vec<TextureFormat>;

    fn configure_surface(
        &self,
        surface: &GpuSurface,
        config: &SurfaceConfiguration,
    ) -> Result<(), GraphicsError>;

    /// Acquire the next presentation image.
    ///
    /// Returns [`GraphicsError::SurfaceOutdated`] when the surface must be
    /// reconfigured before use.
    fn acquire_image(&self, surface: &GpuSurface) -> Result<GpuSurfaceImage, GraphicsError>;

    fn present(&self, image: GpuSurfaceImage) -> Result<(), GraphicsError>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> GpuFence;

    /// Wait for a fence to be signaled.
    ///
    /// Returns `true` if the fence was signaled, `false` if the timeout elapsed.
    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> bool;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Submit recorded work, rendering to `surface_image` where passes target
    /// the surface, and arrange for `fence` to signal on completion.
    fn submit(
        &self,
        commands: &CommandList,
        surface_image: Option<&GpuSurfaceImage>,
        fence: &GpuFence,
    ) -> Result<(), GraphicsError>;

    /// Block until all submitted work has completed.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

/// Selects and creates the backend requested by `kind`.
pub fn create_backend(kind: BackendKind) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match kind {
        BackendKind::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
        BackendKind::Wgpu => create_wgpu_backend(),
        BackendKind::Auto => {
            #[cfg(feature = "wgpu-backend")]
            {
                match wgpu_backend::WgpuBackend::new() {
                    Ok(backend) => {
                        log::info!("Using wgpu backend");
                        return Ok(Arc::new(backend));
                    }
                    Err(e) => {
                        log::warn!("Failed to create wgpu backend: {}", e);
                    }
                }
            }

            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
    }
}

#[cfg(feature = "wgpu-backend")]
fn create_wgpu_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    let backend = wgpu_backend::WgpuBackend::new()?;
    log::info!("Using wgpu backend");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "wgpu-backend"))]
fn create_wgpu_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::FatalInit(
        "wgpu backend requested but the `wgpu-backend` feature is disabled".into(),
    ))
}

/// Check if a real GPU backend is available.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "wgpu-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_backend_selected_explicitly() {
        let backend = create_backend(BackendKind::Dummy).unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
    }

    #[cfg(not(feature = "wgpu-backend"))]
    #[test]
    fn test_wgpu_without_feature_is_fatal() {
        let err = create_backend(BackendKind::Wgpu).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_gpu_handles_clone() {
        let buffer = GpuBuffer::Dummy(3);
        assert!(matches!(buffer.clone(), GpuBuffer::Dummy(3)));
        let program = GpuProgram::Dummy(9);
        assert!(matches!(program.clone(), GpuProgram::Dummy(9)));
    }
}
