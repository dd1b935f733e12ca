//! Device context: the single owner of device-level resources.
//!
//! A [`GpuContext`] is created once the window surface exists and is passed
//! by reference to every component that needs GPU memory. It owns, in
//! acquisition order:
//!
//! 1. the [`GraphicsDevice`]
//! 2. the presentation [`Surface`]
//! 3. size-dependent targets (the depth buffer)
//! 4. the [`TransientPool`]
//! 5. the global uniform buffer holding [`ShaderGlobals`]
//! 6. the [`SamplerSet`]
//! 7. the [`DebugChannel`]
//!
//! [`GpuContext::shutdown`] releases them in the reverse order.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use sandpiper_core::scene::{CameraState, IDENTITY_MATRIX, Matrix4};

use crate::backend::{self, GpuBackend};
use crate::config::ContextConfig;
use crate::debug::{DebugChannel, ReadbackEntry};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Sampler, Texture};
use crate::swapchain::{Surface, SurfaceImage, SurfaceTarget};
use crate::transient::{TransientHandle, TransientPool};
use crate::types::{
    BufferDescriptor, BufferUsage, SamplerDescriptor, TextureDescriptor, TextureFormat,
    TextureUsage,
};

/// Format of the depth target recreated with the surface.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Per-frame constants visible to every shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShaderGlobals {
    pub main_view: Matrix4,
    pub main_projection: Matrix4,
    pub observer_view: Matrix4,
    pub observer_projection: Matrix4,
    /// Shader indices of the [`SamplerSet`] in declaration order.
    pub samplers: [u32; 4],
    pub surface_size: [f32; 2],
    pub delta_time: f32,
    pub frame_index: u32,
    pub debug_address: u32,
    pub _padding: [u32; 3],
}

impl Default for ShaderGlobals {
    fn default() -> Self {
        Self {
            main_view: IDENTITY_MATRIX,
            main_projection: IDENTITY_MATRIX,
            observer_view: IDENTITY_MATRIX,
            observer_projection: IDENTITY_MATRIX,
            samplers: [0; 4],
            surface_size: [0.0; 2],
            delta_time: 0.0,
            frame_index: 0,
            debug_address: 0,
            _padding: [0; 3],
        }
    }
}

impl ShaderGlobals {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn with_main_camera(mut self, camera: &CameraState) -> Self {
        self.main_view = camera.view;
        self.main_projection = camera.projection;
        self
    }

    pub fn with_observer_camera(mut self, camera: &CameraState) -> Self {
        self.observer_view = camera.view;
        self.observer_projection = camera.projection;
        self
    }
}

static_assertions::const_assert_eq!(std::mem::size_of::<ShaderGlobals>() % 16, 0);

/// The four samplers every shader can index.
#[derive(Debug)]
pub struct SamplerSet {
    pub linear_clamp: Arc<Sampler>,
    pub linear_repeat: Arc<Sampler>,
    pub nearest_clamp: Arc<Sampler>,
    pub linear_repeat_anisotropic: Arc<Sampler>,
}

impl SamplerSet {
    pub const ANISOTROPY: u16 = 16;

    fn new(device: &Arc<GraphicsDevice>) -> Result<Self, GraphicsError> {
        Ok(Self {
            linear_clamp: device
                .create_sampler(&SamplerDescriptor::linear_clamp().with_label("linear clamp"))?,
            linear_repeat: device
                .create_sampler(&SamplerDescriptor::linear_repeat().with_label("linear repeat"))?,
            nearest_clamp: device
                .create_sampler(&SamplerDescriptor::nearest_clamp().with_label("nearest clamp"))?,
            linear_repeat_anisotropic: device.create_sampler(
                &SamplerDescriptor::linear_repeat_anisotropic(Self::ANISOTROPY)
                    .with_label("linear repeat anisotropic"),
            )?,
        })
    }

    /// Shader indices in the order stored in [`ShaderGlobals::samplers`].
    pub fn indices(&self) -> [u32; 4] {
        [
            self.linear_clamp.shader_index(),
            self.linear_repeat.shader_index(),
            self.nearest_clamp.shader_index(),
            self.linear_repeat_anisotropic.shader_index(),
        ]
    }

    fn release(&self, device: &GraphicsDevice) {
        device.destroy_sampler(&self.linear_repeat_anisotropic);
        device.destroy_sampler(&self.nearest_clamp);
        device.destroy_sampler(&self.linear_repeat);
        device.destroy_sampler(&self.linear_clamp);
    }
}

/// Owner of the device, surface and every long-lived device resource.
///
/// # Example
///
/// ```
/// use sandpiper_graphics::backend::BackendKind;
/// use sandpiper_graphics::config::ContextConfig;
/// use sandpiper_graphics::context::GpuContext;
/// use sandpiper_graphics::swapchain::SurfaceTarget;
///
/// let config = ContextConfig::new().with_backend(BackendKind::Dummy);
/// let mut context = GpuContext::initialize(config, SurfaceTarget::Headless).unwrap();
///
/// let handle = context.allocate_transient(64).unwrap();
/// context.write_transient(&handle, &[7; 64]).unwrap();
/// context.reset_frame();
/// assert!(context.read_transient(&handle).is_err());
///
/// let device = context.device().clone();
/// context.shutdown();
/// assert_eq!(device.live_resource_count(), 0);
/// ```
pub struct GpuContext {
    config: ContextConfig,
    device: Arc<GraphicsDevice>,
    surface: Surface,
    depth: Arc<Texture>,
    transient: TransientPool,
    globals: Arc<Buffer>,
    samplers: SamplerSet,
    debug: DebugChannel,
    label_counters: Mutex<HashMap<String, u64>>,
}

impl GpuContext {
    /// Create the backend named by `config.backend` and everything on top of it.
    ///
    /// # Errors
    ///
    /// Every failure is reported as [`GraphicsError::FatalInit`].
    pub fn initialize(config: ContextConfig, target: SurfaceTarget) -> Result<Self, GraphicsError> {
        let backend = backend::create_backend(config.backend).map_err(fatal("backend"))?;
        Self::with_backend(backend, config, target)
    }

    /// Build a context on an already constructed backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        config: ContextConfig,
        target: SurfaceTarget,
    ) -> Result<Self, GraphicsError> {
        let device = GraphicsDevice::new(backend, config.label.clone(), config.capabilities);

        let surface = Surface::create(
            device.backend().as_ref(),
            &target,
            config.width,
            config.height,
            config.present_mode,
        )
        .map_err(fatal("surface"))?;
        let (width, height) = surface.size();

        let depth = create_depth_target(&device, width, height).map_err(fatal("depth target"))?;
        let transient = TransientPool::new(
            &device,
            config.transient_capacity,
            config.frames_in_flight,
            "transient pool",
        )
        .map_err(fatal("transient pool"))?;
        let globals = device
            .create_buffer(
                &BufferDescriptor::new(ShaderGlobals::SIZE, BufferUsage::UNIFORM | BufferUsage::COPY_DST)
                    .with_label("shader globals"),
            )
            .map_err(fatal("globals buffer"))?;
        let samplers = SamplerSet::new(&device).map_err(fatal("samplers"))?;
        let lens_size = config.debug_lens.then_some((width, height));
        let debug = DebugChannel::new(&device, config.readback_capacity, lens_size)
            .map_err(fatal("debug channel"))?;

        log::info!(
            "GPU context '{}' ready: {}x{} {:?}, {} frames in flight",
            config.label,
            width,
            height,
            surface.format(),
            config.frames_in_flight
        );

        Ok(Self {
            config,
            device,
            surface,
            depth,
            transient,
            globals,
            samplers,
            debug,
            label_counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Depth target matching the current surface size.
    pub fn depth_target(&self) -> &Arc<Texture> {
        &self.depth
    }

    pub fn globals_buffer(&self) -> &Arc<Buffer> {
        &self.globals
    }

    pub fn samplers(&self) -> &SamplerSet {
        &self.samplers
    }

    pub fn debug_channel(&self) -> &DebugChannel {
        &self.debug
    }

    pub fn transient_pool(&self) -> &TransientPool {
        &self.transient
    }

    /// Allocate transient memory valid until the next [`reset_frame`](Self::reset_frame).
    pub fn allocate_transient(&mut self, size: u64) -> Result<TransientHandle, GraphicsError> {
        self.transient.allocate(size)
    }

    /// Invalidate every transient handle issued since the previous reset.
    pub fn reset_frame(&mut self) {
        self.transient.reset_frame();
    }

    pub fn write_transient(&self, handle: &TransientHandle, data: &[u8]) -> Result<(), GraphicsError> {
        self.transient.write(&self.device, handle, data)
    }

    pub fn read_transient(&self, handle: &TransientHandle) -> Result<Vec<u8>, GraphicsError> {
        self.transient.read(&self.device, handle)
    }

    /// Globals with the context-owned fields filled in.
    pub fn base_globals(&self) -> ShaderGlobals {
        let (width, height) = self.surface.size();
        ShaderGlobals {
            samplers: self.samplers.indices(),
            surface_size: [width as f32, height as f32],
            debug_address: self.debug.shader_address(),
            ..ShaderGlobals::default()
        }
    }

    pub fn update_globals(&self, globals: &ShaderGlobals) -> Result<(), GraphicsError> {
        self.device
            .write_buffer(&self.globals, 0, bytemuck::bytes_of(globals))
    }

    /// Copy the debug buffer into the readback queue.
    pub fn capture_debug(&mut self, frame: u64) -> Result<(), GraphicsError> {
        self.debug.capture(&self.device, frame)
    }

    pub fn drain_debug(&mut self) -> Vec<ReadbackEntry> {
        self.debug.drain()
    }

    /// Reconfigure the surface and rebuild the size-dependent targets.
    ///
    /// The size is clamped to the device's texture limit. The new targets are
    /// created before the old ones are released, so on failure the context
    /// keeps its previous size and targets.
    pub fn recreate_surface(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        let max = self.device.capabilities().max_texture_dimension;
        let (clamped_width, clamped_height) = (width.clamp(1, max), height.clamp(1, max));
        if (clamped_width, clamped_height) != (width, height) {
            log::warn!(
                "Surface size {}x{} clamped to {}x{}",
                width,
                height,
                clamped_width,
                clamped_height
            );
        }

        let depth = create_depth_target(&self.device, clamped_width, clamped_height)?;
        let lens = match self
            .debug
            .resized_lens(&self.device, clamped_width, clamped_height)
        {
            Ok(lens) => lens,
            Err(e) => {
                self.device.destroy_texture(&depth);
                return Err(e);
            }
        };
        if let Err(e) =
            self.surface
                .resize(self.device.backend().as_ref(), clamped_width, clamped_height)
        {
            self.device.destroy_texture(&depth);
            if let Some(lens) = &lens {
                self.device.destroy_texture(lens);
            }
            return Err(e);
        }

        let old = std::mem::replace(&mut self.depth, depth);
        self.device.destroy_texture(&old);
        self.debug.replace_lens(&self.device, lens);
        Ok(())
    }

    /// A debug name not handed out before: `"{base} - {n}"`.
    pub fn unique_label(&self, base: &str) -> String {
        let mut counters = self.label_counters.lock();
        let counter = counters.entry(base.to_string()).or_insert(0);
        *counter += 1;
        format!("{base} - {counter}")
    }

    pub(crate) fn acquire_image(&self) -> Result<SurfaceImage, GraphicsError> {
        self.surface.acquire(self.device.backend().as_ref())
    }

    pub(crate) fn present(&self, image: SurfaceImage) -> Result<(), GraphicsError> {
        self.surface.present(self.device.backend().as_ref(), image)
    }

    /// Wait for the device, then release everything in reverse acquisition order.
    ///
    /// Returns the number of resources issued by other owners that were still
    /// alive and had to be force-released.
    pub fn shutdown(mut self) -> usize {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before shutdown: {}", e);
        }

        let device = self.device.clone();
        self.debug.release(&device);
        self.samplers.release(&device);
        device.destroy_buffer(&self.globals);
        self.transient.release(&device);
        device.destroy_texture(&self.depth);
        drop(self.surface);

        let leaked = device.release_all();
        if leaked > 0 {
            log::warn!("{} resources outlived their owners at shutdown", leaked);
        }
        log::info!("GPU context '{}' shut down", self.config.label);
        leaked
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("label", &self.config.label)
            .field("surface", &self.surface.size())
            .field("transient", &self.transient)
            .finish()
    }
}

fn create_depth_target(
    device: &Arc<GraphicsDevice>,
    width: u32,
    height: u32,
) -> Result<Arc<Texture>, GraphicsError> {
    device.create_texture(
        &TextureDescriptor::new_2d(width, height, DEPTH_FORMAT, TextureUsage::RENDER_ATTACHMENT)
            .with_label("depth target"),
    )
}

fn fatal(stage: &'static str) -> impl FnOnce(GraphicsError) -> GraphicsError {
    move |e| {
        if matches!(e, GraphicsError::FatalInit(_)) {
            return e;
        }
        log::error!("Failed to initialize {}: {}", stage, e);
        GraphicsError::FatalInit(format!("{stage}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn create_context(backend: &Arc<DummyBackend>) -> GpuContext {
        GpuContext::with_backend(
            backend.clone(),
            ContextConfig::new().with_size(320, 240),
            SurfaceTarget::Headless,
        )
        .unwrap()
    }

    #[test]
    fn test_shader_globals_layout() {
        assert_eq!(ShaderGlobals::SIZE, 304);
        let globals = ShaderGlobals::default();
        assert_eq!(bytemuck::bytes_of(&globals).len(), 304);
    }

    #[test]
    fn test_initialize_creates_resources() {
        let backend = Arc::new(DummyBackend::new());
        let context = create_context(&backend);

        assert_eq!(context.surface().size(), (320, 240));
        assert_eq!(context.surface().format(), TextureFormat::Rgba8Unorm);
        assert_eq!(context.depth_target().width(), 320);
        assert_eq!(context.device().sampler_count(), 4);
        assert_eq!(
            context.samplers().linear_repeat_anisotropic.descriptor().anisotropy_clamp,
            16
        );
        assert_eq!(context.transient_pool().region_size(), 2048);
    }

    #[test]
    fn test_surface_failure_is_fatal() {
        let backend = Arc::new(DummyBackend::new());
        backend.fail_surface_creation();
        let err = GpuContext::with_backend(backend, ContextConfig::new(), SurfaceTarget::Headless)
            .unwrap_err();
        assert!(matches!(err, GraphicsError::FatalInit(_)));
    }

    #[test]
    fn test_no_supported_format_is_fatal() {
        let backend = Arc::new(DummyBackend::new());
        backend.set_surface_formats(Vec::new());
        let err = GpuContext::with_backend(backend, ContextConfig::new(), SurfaceTarget::Headless)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unique_labels() {
        let backend = Arc::new(DummyBackend::new());
        let context = create_context(&backend);
        assert_eq!(context.unique_label("mesh"), "mesh - 1");
        assert_eq!(context.unique_label("mesh"), "mesh - 2");
        assert_eq!(context.unique_label("texture"), "texture - 1");
    }

    #[test]
    fn test_update_globals_uploads_bytes() {
        let backend = Arc::new(DummyBackend::new());
        let context = create_context(&backend);

        let mut globals = context.base_globals();
        globals.frame_index = 42;
        context.update_globals(&globals).unwrap();

        let bytes = context
            .device()
            .read_buffer(context.globals_buffer(), 0, ShaderGlobals::SIZE)
            .unwrap();
        let read: ShaderGlobals = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(read.frame_index, 42);
        assert_eq!(read.surface_size, [320.0, 240.0]);
        assert_eq!(read.samplers, context.samplers().indices());
    }

    #[test]
    fn test_recreate_surface_rebuilds_depth_and_lens() {
        let backend = Arc::new(DummyBackend::new());
        let mut context = create_context(&backend);
        let old_depth = context.depth_target().clone();

        context.recreate_surface(800, 600).unwrap();

        assert!(old_depth.is_released());
        assert_eq!(context.depth_target().width(), 800);
        assert_eq!(context.surface().generation(), 1);
        assert_eq!(context.debug_channel().lens().map(|l| l.width()), Some(800));
        assert_eq!(backend.surface_size(), Some((800, 600)));
    }

    #[test]
    fn test_recreate_surface_clamps_to_texture_limit() {
        let backend = Arc::new(DummyBackend::new());
        let mut context = create_context(&backend);
        let max = context.device().capabilities().max_texture_dimension;

        context.recreate_surface(max + 1000, 600).unwrap();

        assert_eq!(context.surface().size(), (max, 600));
        assert_eq!(context.depth_target().width(), max);
        assert!(!context.depth_target().is_released());
    }

    #[test]
    fn test_failed_recreate_keeps_previous_targets() {
        let backend = Arc::new(DummyBackend::new());
        let mut context = create_context(&backend);
        let old_depth = context.depth_target().clone();
        let old_lens = context.debug_channel().lens().unwrap().clone();

        backend.lose_device();
        assert!(context.recreate_surface(800, 600).is_err());

        assert!(!old_depth.is_released());
        assert!(Arc::ptr_eq(context.depth_target(), &old_depth));
        assert!(Arc::ptr_eq(context.debug_channel().lens().unwrap(), &old_lens));
        assert!(!old_lens.is_released());
        assert_eq!(context.surface().size(), (320, 240));
        assert_eq!(context.surface().generation(), 0);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let backend = Arc::new(DummyBackend::new());
        let context = create_context(&backend);
        let device = context.device().clone();
        assert!(device.live_resource_count() > 0);

        assert_eq!(context.shutdown(), 0);
        assert_eq!(device.live_resource_count(), 0);
        assert_eq!(backend.live_allocations(), 0);
    }

    #[test]
    fn test_shutdown_reports_foreign_leaks() {
        let backend = Arc::new(DummyBackend::new());
        let context = create_context(&backend);
        let stray = context
            .device()
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();

        assert_eq!(context.shutdown(), 1);
        assert!(stray.is_released());
    }
}
