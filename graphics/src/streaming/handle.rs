//! Residency state of one streamed asset.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sandpiper_core::asset::AssetId;

use crate::device::GraphicsDevice;
use crate::resources::{Buffer, Texture};

/// Where an asset is in its journey to the GPU.
///
/// ```text
/// requested ──► loading ──┬──► resident
///     ▲                   └──► load-failed
///     └──── retry_failed ◄───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssetState {
    Requested = 0,
    Loading = 1,
    Resident = 2,
    LoadFailed = 3,
}

impl AssetState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Requested,
            1 => Self::Loading,
            2 => Self::Resident,
            _ => Self::LoadFailed,
        }
    }
}

/// GPU resource backing a resident asset.
#[derive(Debug, Clone)]
pub enum AssetResource {
    Mesh(Arc<Buffer>),
    Texture(Arc<Texture>),
}

/// A fully uploaded asset.
#[derive(Debug)]
pub struct ResidentAsset {
    pub id: AssetId,
    /// Dense index shaders use to find the asset.
    pub slot: u32,
    pub resource: AssetResource,
    /// Vertices of a mesh, zero for textures.
    pub vertex_count: u32,
}

impl ResidentAsset {
    pub(crate) fn release(&self, device: &GraphicsDevice) {
        match &self.resource {
            AssetResource::Mesh(buffer) => device.destroy_buffer(buffer),
            AssetResource::Texture(texture) => device.destroy_texture(texture),
        }
    }
}

#[derive(Debug)]
struct AssetEntry {
    id: AssetId,
    state: AtomicU8,
    resident: OnceLock<Arc<ResidentAsset>>,
    attempts: AtomicU32,
    error: Mutex<Option<String>>,
}

/// Shared handle to one asset's residency.
///
/// Every request for the same id yields a clone of the same handle.
#[derive(Debug, Clone)]
pub struct AssetHandle(Arc<AssetEntry>);

impl AssetHandle {
    pub(crate) fn new(id: AssetId) -> Self {
        Self(Arc::new(AssetEntry {
            id,
            state: AtomicU8::new(AssetState::Requested as u8),
            resident: OnceLock::new(),
            attempts: AtomicU32::new(0),
            error: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> AssetId {
        self.0.id
    }

    pub fn state(&self) -> AssetState {
        AssetState::from_raw(self.0.state.load(Ordering::Acquire))
    }

    pub fn is_resident(&self) -> bool {
        self.state() == AssetState::Resident
    }

    /// The uploaded asset, once resident.
    pub fn resident(&self) -> Option<&Arc<ResidentAsset>> {
        self.0.resident.get()
    }

    /// Load attempts made for the current request.
    pub fn attempts(&self) -> u32 {
        self.0.attempts.load(Ordering::Acquire)
    }

    /// Message of the most recent failed attempt.
    pub fn last_error(&self) -> Option<String> {
        self.0.error.lock().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn transition(&self, from: AssetState, to: AssetState) -> bool {
        self.0
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_attempts(&self, attempts: u32) {
        self.0.attempts.store(attempts, Ordering::Release);
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.0.error.lock() = Some(message);
    }

    /// Publish the uploaded asset, then mark the handle resident.
    ///
    /// Returns `false` if the handle was not loading or already published.
    pub(crate) fn publish(&self, asset: ResidentAsset) -> bool {
        if self.state() != AssetState::Loading || self.0.resident.set(Arc::new(asset)).is_err() {
            return false;
        }
        self.transition(AssetState::Loading, AssetState::Resident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceCapabilities;
    use crate::types::{BufferDescriptor, BufferUsage};

    fn resident(id: AssetId) -> ResidentAsset {
        let device = GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "handle test",
            DeviceCapabilities::default(),
        );
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::VERTEX))
            .unwrap();
        ResidentAsset {
            id,
            slot: 0,
            resource: AssetResource::Mesh(buffer),
            vertex_count: 3,
        }
    }

    #[test]
    fn test_transitions_are_compare_and_swap() {
        let handle = AssetHandle::new(AssetId::new(1));
        assert_eq!(handle.state(), AssetState::Requested);
        assert!(handle.transition(AssetState::Requested, AssetState::Loading));
        assert!(!handle.transition(AssetState::Requested, AssetState::Loading));
        assert_eq!(handle.state(), AssetState::Loading);
    }

    #[test]
    fn test_publish_requires_loading() {
        let handle = AssetHandle::new(AssetId::new(1));
        assert!(!handle.publish(resident(handle.id())));
        assert!(handle.resident().is_none());

        handle.transition(AssetState::Requested, AssetState::Loading);
        assert!(handle.publish(resident(handle.id())));
        assert!(handle.is_resident());
        assert_eq!(handle.resident().map(|r| r.vertex_count), Some(3));
    }

    #[test]
    fn test_resident_is_final() {
        let handle = AssetHandle::new(AssetId::new(1));
        handle.transition(AssetState::Requested, AssetState::Loading);
        handle.publish(resident(handle.id()));

        assert!(!handle.transition(AssetState::Loading, AssetState::LoadFailed));
        assert!(!handle.transition(AssetState::LoadFailed, AssetState::Requested));
        assert_eq!(handle.state(), AssetState::Resident);
    }
}
