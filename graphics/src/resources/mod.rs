//! GPU resources issued by a [`GraphicsDevice`].
//!
//! Every resource is reference counted and carries a [`ResourceId`] that is
//! unique for the lifetime of its device. Resources are released either
//! explicitly through the device (`destroy_*`) or when the last reference is
//! dropped; a released resource keeps its metadata but can no longer be used
//! for GPU work.
//!
//! [`GraphicsDevice`]: crate::device::GraphicsDevice

mod buffer;
mod sampler;
mod texture;

use std::fmt;

pub use buffer::Buffer;
pub use sampler::Sampler;
pub use texture::Texture;

/// Opaque identity of a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
