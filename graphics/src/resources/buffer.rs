//! GPU buffer resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::GpuBuffer;
use crate::device::GraphicsDevice;
use crate::types::{BufferDescriptor, BufferUsage};

use super::ResourceId;

/// A GPU buffer.
///
/// Created by [`GraphicsDevice::create_buffer`]. Holds a weak reference back to
/// the device so that a leaked handle cannot keep the device alive.
pub struct Buffer {
    id: ResourceId,
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    gpu: GpuBuffer,
    released: AtomicBool,
}

impl Buffer {
    pub(crate) fn new(
        id: ResourceId,
        device: Weak<GraphicsDevice>,
        descriptor: BufferDescriptor,
        gpu: GpuBuffer,
    ) -> Self {
        Self {
            id,
            device,
            descriptor,
            gpu,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The issuing device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Whether the GPU allocation has been returned to the device.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn gpu(&self) -> &GpuBuffer {
        &self.gpu
    }

    /// Marks the buffer released. Returns `false` if it already was.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.mark_released()
            && let Some(device) = self.device.upgrade()
        {
            device.backend().destroy_buffer(&self.gpu);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
