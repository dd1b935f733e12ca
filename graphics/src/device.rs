//! Graphics device.
//!
//! The [`GraphicsDevice`] issues every GPU resource and tracks what it issued,
//! so that teardown can verify nothing outlives it. It is created by
//! [`GpuContext::initialize`](crate::context::GpuContext::initialize) and
//! shared as an `Arc` with the components that allocate on their own
//! (pipeline registry, asset workers).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend::{GpuBackend, GpuProgram};
use crate::error::GraphicsError;
use crate::pipeline::ProgramDescriptor;
use crate::resources::{Buffer, ResourceId, Sampler, Texture};
use crate::scheduler::Fence;
use crate::types::{BufferDescriptor, SamplerDescriptor, TextureDescriptor};

/// Limits enforced by a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size in bytes.
    pub max_buffer_size: u64,
    /// Maximum number of live buffers.
    pub max_buffers: usize,
    /// Maximum number of live textures.
    pub max_textures: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
            max_buffers: 100_000,
            max_textures: 100_000,
        }
    }
}

impl DeviceCapabilities {
    /// Clamp to what the backend can actually provide.
    pub fn clamped_to(self, backend: &dyn GpuBackend) -> Self {
        Self {
            max_texture_dimension: self
                .max_texture_dimension
                .min(backend.max_texture_dimension()),
            max_buffer_size: self.max_buffer_size.min(backend.max_buffer_size()),
            ..self
        }
    }
}

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Asset workers create buffers and
/// textures concurrently with the render thread.
pub struct GraphicsDevice {
    backend: Arc<dyn GpuBackend>,
    name: String,
    capabilities: DeviceCapabilities,
    next_id: AtomicU64,
    // Weak so that tracking never extends a resource's lifetime
    buffers: RwLock<Vec<Weak<Buffer>>>,
    textures: RwLock<Vec<Weak<Texture>>>,
    samplers: RwLock<Vec<Weak<Sampler>>>,
}

impl GraphicsDevice {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        name: impl Into<String>,
        capabilities: DeviceCapabilities,
    ) -> Arc<Self> {
        let capabilities = capabilities.clamped_to(backend.as_ref());
        let name = name.into();
        log::info!(
            "Created graphics device '{}' on {} ({:?})",
            name,
            backend.name(),
            capabilities
        );
        Arc::new(Self {
            backend,
            name,
            capabilities,
            next_id: AtomicU64::new(1),
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
            samplers: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// The backend this device records to.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    fn next_id(&self) -> ResourceId {
        ResourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the size is zero, exceeds the device limit,
    /// or the live buffer limit is reached.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let mut buffers = self.buffers.write();
        buffers.retain(|w| w.upgrade().is_some_and(|b| !b.is_released()));
        if buffers.len() >= self.capabilities.max_buffers {
            return Err(GraphicsError::InvalidParameter(format!(
                "live buffer limit of {} reached",
                self.capabilities.max_buffers
            )));
        }

        let gpu = self.backend.create_buffer(descriptor)?;
        let buffer = Arc::new(Buffer::new(
            self.next_id(),
            Arc::downgrade(self),
            descriptor.clone(),
            gpu,
        ));
        buffers.push(Arc::downgrade(&buffer));

        log::trace!(
            "GraphicsDevice: created buffer {} {:?}, size={}",
            buffer.id(),
            descriptor.label,
            descriptor.size
        );

        Ok(buffer)
    }

    /// Create a GPU texture.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if a dimension is zero or above the device
    /// limit, or the live texture limit is reached.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        let max_dim = self.capabilities.max_texture_dimension;
        if descriptor.size.width > max_dim
            || descriptor.size.height > max_dim
            || descriptor.size.depth > max_dim
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture dimension exceeds maximum {max_dim}"
            )));
        }

        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }

        let mut textures = self.textures.write();
        textures.retain(|w| w.upgrade().is_some_and(|t| !t.is_released()));
        if textures.len() >= self.capabilities.max_textures {
            return Err(GraphicsError::InvalidParameter(format!(
                "live texture limit of {} reached",
                self.capabilities.max_textures
            )));
        }

        let gpu = self.backend.create_texture(descriptor)?;
        let texture = Arc::new(Texture::new(
            self.next_id(),
            Arc::downgrade(self),
            descriptor.clone(),
            gpu,
        ));
        textures.push(Arc::downgrade(&texture));

        log::trace!(
            "GraphicsDevice: created texture {} {:?}, size={}x{}",
            texture.id(),
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );

        Ok(texture)
    }

    /// Create a texture sampler.
    pub fn create_sampler(
        self: &Arc<Self>,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, GraphicsError> {
        let gpu = self.backend.create_sampler(descriptor)?;
        let sampler = Arc::new(Sampler::new(
            self.next_id(),
            Arc::downgrade(self),
            descriptor.clone(),
            gpu,
        ));

        let mut samplers = self.samplers.write();
        samplers.retain(|w| w.upgrade().is_some_and(|s| !s.is_released()));
        samplers.push(Arc::downgrade(&sampler));

        log::trace!(
            "GraphicsDevice: created sampler {} {:?}",
            sampler.id(),
            descriptor.label
        );

        Ok(sampler)
    }

    /// Create a GPU program from validated shader code.
    pub fn create_program(
        &self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<GpuProgram, GraphicsError> {
        self.backend.create_program(descriptor)
    }

    pub fn create_fence(&self) -> Fence {
        Fence::new(self.backend.clone(), self.backend.create_fence(false))
    }

    /// Release a buffer's GPU allocation now. Further use is rejected.
    pub fn destroy_buffer(&self, buffer: &Buffer) {
        if buffer.mark_released() {
            log::trace!("GraphicsDevice: destroyed buffer {}", buffer.id());
            self.backend.destroy_buffer(buffer.gpu());
        }
    }

    pub fn destroy_texture(&self, texture: &Texture) {
        if texture.mark_released() {
            log::trace!("GraphicsDevice: destroyed texture {}", texture.id());
            self.backend.destroy_texture(texture.gpu());
        }
    }

    pub fn destroy_sampler(&self, sampler: &Sampler) {
        if sampler.mark_released() {
            log::trace!("GraphicsDevice: destroyed sampler {}", sampler.id());
            self.backend.destroy_sampler(sampler.gpu());
        }
    }

    /// Write bytes into a buffer.
    pub fn write_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        check_live(buffer)?;
        if offset + data.len() as u64 > buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer {} of size {}",
                data.len(),
                offset,
                buffer.id(),
                buffer.size()
            )));
        }
        self.backend.write_buffer(buffer.gpu(), offset, data)
    }

    /// Read bytes back from a buffer. Blocks until the GPU is done with it.
    pub fn read_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        check_live(buffer)?;
        if offset + size > buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "read of {size} bytes at offset {offset} exceeds buffer {} of size {}",
                buffer.id(),
                buffer.size()
            )));
        }
        self.backend.read_buffer(buffer.gpu(), offset, size)
    }

    /// Upload the base level of a texture.
    pub fn write_texture(&self, texture: &Texture, data: &[u8]) -> Result<(), GraphicsError> {
        if texture.is_released() {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {} has been released",
                texture.id()
            )));
        }
        self.backend
            .write_texture(texture.gpu(), texture.descriptor(), data)
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()
    }

    /// Get the number of live buffers created by this device.
    pub fn buffer_count(&self) -> usize {
        count_live(&self.buffers.read(), Buffer::is_released)
    }

    /// Get the number of live textures created by this device.
    pub fn texture_count(&self) -> usize {
        count_live(&self.textures.read(), Texture::is_released)
    }

    /// Get the number of live samplers created by this device.
    pub fn sampler_count(&self) -> usize {
        count_live(&self.samplers.read(), Sampler::is_released)
    }

    /// Total number of live resources.
    pub fn live_resource_count(&self) -> usize {
        self.buffer_count() + self.texture_count() + self.sampler_count()
    }

    /// Release everything still alive, newest first.
    ///
    /// Returns how many resources had not been released by their owners.
    pub fn release_all(&self) -> usize {
        let mut leaked = 0;

        for sampler in self.samplers.write().drain(..).rev() {
            if let Some(sampler) = sampler.upgrade()
                && !sampler.is_released()
            {
                log::warn!("Sampler {} {:?} leaked", sampler.id(), sampler.label());
                self.destroy_sampler(&sampler);
                leaked += 1;
            }
        }
        for texture in self.textures.write().drain(..).rev() {
            if let Some(texture) = texture.upgrade()
                && !texture.is_released()
            {
                log::warn!("Texture {} {:?} leaked", texture.id(), texture.label());
                self.destroy_texture(&texture);
                leaked += 1;
            }
        }
        for buffer in self.buffers.write().drain(..).rev() {
            if let Some(buffer) = buffer.upgrade()
                && !buffer.is_released()
            {
                log::warn!("Buffer {} {:?} leaked", buffer.id(), buffer.label());
                self.destroy_buffer(&buffer);
                leaked += 1;
            }
        }

        leaked
    }
}

fn check_live(buffer: &Buffer) -> Result<(), GraphicsError> {
    if buffer.is_released() {
        Err(GraphicsError::InvalidParameter(format!(
            "buffer {} has been released",
            buffer.id()
        )))
    } else {
        Ok(())
    }
}

fn count_live<T>(list: &[Weak<T>], is_released: impl Fn(&T) -> bool) -> usize {
    list.iter()
        .filter_map(Weak::upgrade)
        .filter(|r| !is_released(r))
        .count()
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "test device",
            DeviceCapabilities::default(),
        )
    }

    #[test]
    fn test_create_buffer() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn test_create_buffer_zero_size() {
        let device = create_test_device();
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_buffer_size_limit_clamped_to_backend() {
        let backend = Arc::new(DummyBackend::new().with_max_buffer_size(64));
        let device = GraphicsDevice::new(backend, "small", DeviceCapabilities::default());
        assert_eq!(device.capabilities().max_buffer_size, 64);
        assert!(
            device
                .create_buffer(&BufferDescriptor::new(65, BufferUsage::STORAGE))
                .is_err()
        );
    }

    #[test]
    fn test_live_buffer_limit() {
        let caps = DeviceCapabilities {
            max_buffers: 2,
            ..Default::default()
        };
        let device = GraphicsDevice::new(Arc::new(DummyBackend::new()), "limited", caps);
        let desc = BufferDescriptor::new(4, BufferUsage::STORAGE);
        let a = device.create_buffer(&desc).unwrap();
        let _b = device.create_buffer(&desc).unwrap();
        assert!(matches!(
            device.create_buffer(&desc),
            Err(GraphicsError::InvalidParameter(_))
        ));

        device.destroy_buffer(&a);
        assert!(device.create_buffer(&desc).is_ok());
    }

    #[test]
    fn test_create_texture_zero_size() {
        let device = create_test_device();
        let result = device.create_texture(&TextureDescriptor::new_2d(
            0,
            512,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_ids_unique() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        let sampler = device.create_sampler(&SamplerDescriptor::linear_clamp()).unwrap();
        assert_ne!(buffer.id(), sampler.id());
    }

    #[test]
    fn test_released_buffer_rejects_writes() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        device.destroy_buffer(&buffer);
        assert!(buffer.is_released());
        assert_eq!(device.buffer_count(), 0);
        assert!(device.write_buffer(&buffer, 0, &[1]).is_err());
    }

    #[test]
    fn test_drop_releases_backend_allocation() {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(backend.clone(), "drop", DeviceCapabilities::default());
        {
            let _buffer = device
                .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
                .unwrap();
            assert_eq!(backend.live_allocations(), 1);
        }
        assert_eq!(backend.live_allocations(), 0);
        assert_eq!(device.buffer_count(), 0);
    }

    #[test]
    fn test_release_all_reports_leaks() {
        let device = create_test_device();
        let kept = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        let _sampler = device.create_sampler(&SamplerDescriptor::nearest_clamp()).unwrap();

        assert_eq!(device.release_all(), 2);
        assert!(kept.is_released());
        assert_eq!(device.live_resource_count(), 0);
    }
}
