//! GPU sampler resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::GpuSampler;
use crate::device::GraphicsDevice;
use crate::types::SamplerDescriptor;

use super::ResourceId;

/// A texture sampler.
///
/// Shaders address samplers through [`Sampler::shader_index`], which is what
/// the global uniform block stores.
pub struct Sampler {
    id: ResourceId,
    device: Weak<GraphicsDevice>,
    descriptor: SamplerDescriptor,
    gpu: GpuSampler,
    released: AtomicBool,
}

impl Sampler {
    pub(crate) fn new(
        id: ResourceId,
        device: Weak<GraphicsDevice>,
        descriptor: SamplerDescriptor,
        gpu: GpuSampler,
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

    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Index used to reference this sampler from shader-visible data.
    pub fn shader_index(&self) -> u32 {
        self.id.raw() as u32
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn gpu(&self) -> &GpuSampler {
        &self.gpu
    }

    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if self.mark_released()
            && let Some(device) = self.device.upgrade()
        {
            device.backend().destroy_sampler(&self.gpu);
        }
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("id", &self.id)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
