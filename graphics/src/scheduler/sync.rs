//! CPU-GPU synchronization primitives.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{GpuBackend, GpuFence};

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// A fence is handed to a submission and signals once the GPU has finished
/// that work. [`FramePipeline`](super::FramePipeline) keeps one per frame slot
/// and waits on it before the slot's transient region and draw-list buffers
/// are reused.
#[derive(Clone)]
pub struct Fence {
    backend: Arc<dyn GpuBackend>,
    gpu: Arc<GpuFence>,
}

impl Fence {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, gpu: GpuFence) -> Self {
        Self {
            backend,
            gpu: Arc::new(gpu),
        }
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if self.backend.is_fence_signaled(&self.gpu) {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.backend.wait_fence(&self.gpu, timeout)
    }

    pub(crate) fn gpu(&self) -> &GpuFence {
        &self.gpu
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("gpu", &self.gpu).finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandList;
    use crate::backend::dummy::DummyBackend;

    fn fence(backend: &Arc<DummyBackend>) -> Fence {
        Fence::new(backend.clone(), backend.create_fence(false))
    }

    #[test]
    fn test_fence_unsignaled() {
        let backend = Arc::new(DummyBackend::new());
        let fence = fence(&backend);
        assert_eq!(fence.status(), FenceStatus::Unsignaled);
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_wait_timeout() {
        let backend = Arc::new(DummyBackend::new());
        let fence = fence(&backend);
        assert!(!fence.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_fence_signaled_by_submission() {
        let backend = Arc::new(DummyBackend::new());
        let fence = fence(&backend);
        backend
            .submit(&CommandList::new(), None, fence.gpu())
            .unwrap();
        assert!(fence.is_signaled());
        assert!(fence.clone().wait_timeout(Duration::ZERO));
    }
}
