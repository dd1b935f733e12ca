//! Per-frame transient memory.
//!
//! The [`TransientPool`] pre-allocates one GPU buffer and splits it into one
//! region per frame in flight. Allocations bump a write offset inside the
//! current region and are handed out as [`TransientHandle`]s stamped with the
//! pool's epoch. [`TransientPool::reset_frame`] moves to the next region and
//! advances the epoch, which invalidates every handle issued before it:
//! resolving an old handle fails with [`GraphicsError::StaleTransient`]
//! instead of reading memory that now belongs to another frame.
//!
//! ```text
//! capacity = 4096, frames_in_flight = 2
//!
//! ┌──────── region 0 ────────┬──────── region 1 ────────┐
//! │ frame 0, 2, 4, ...       │ frame 1, 3, 5, ...       │
//! └──────────────────────────┴──────────────────────────┘
//! ```

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// A transient allocation valid until the next [`TransientPool::reset_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientHandle {
    offset: u64,
    size: u64,
    epoch: u64,
}

impl TransientHandle {
    /// Byte offset into the pool buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Epoch the handle was issued in.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Ring-style arena of GPU-visible memory, reset once per frame.
///
/// # Thread Safety
///
/// Owned by the context and only touched from the render thread.
pub struct TransientPool {
    buffer: Arc<Buffer>,
    region_size: u64,
    regions: usize,
    region: usize,
    write_offset: u64,
    alignment: u64,
    epoch: u64,
}

impl TransientPool {
    /// Default alignment for allocations.
    pub const DEFAULT_ALIGNMENT: u64 = 16;

    /// Create a pool of `capacity` bytes split into `regions` frame regions.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        capacity: u64,
        regions: usize,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        Self::with_alignment(device, capacity, regions, label, Self::DEFAULT_ALIGNMENT)
    }

    pub fn with_alignment(
        device: &Arc<GraphicsDevice>,
        capacity: u64,
        regions: usize,
        label: &str,
        alignment: u64,
    ) -> Result<Self, GraphicsError> {
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }

        let regions = regions.max(1);
        let region_size = align_down(capacity / regions as u64, alignment);
        if region_size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "transient capacity {capacity} too small for {regions} regions"
            )));
        }

        let descriptor = BufferDescriptor::new(
            region_size * regions as u64,
            BufferUsage::UNIFORM | BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        )
        .with_label(label);
        let buffer = device.create_buffer(&descriptor)?;

        log::trace!(
            "Created transient pool '{}' ({} regions x {} bytes)",
            label,
            regions,
            region_size
        );

        Ok(Self {
            buffer,
            region_size,
            regions,
            region: 0,
            write_offset: 0,
            alignment,
            epoch: 1,
        })
    }

    /// Get the underlying GPU buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Bytes available to a single frame.
    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    pub fn current_region(&self) -> usize {
        self.region
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Bytes used in the current region.
    pub fn used(&self) -> u64 {
        self.write_offset
    }

    pub fn remaining(&self) -> u64 {
        self.region_size - align_up(self.write_offset, self.alignment).min(self.region_size)
    }

    /// Allocate `size` bytes valid until the next reset.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for zero-sized requests, `OutOfTransientMemory`
    /// when the current region cannot hold the request.
    pub fn allocate(&mut self, size: u64) -> Result<TransientHandle, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "transient allocation size cannot be zero".to_string(),
            ));
        }

        let aligned_offset = align_up(self.write_offset, self.alignment);
        let Some(end) = aligned_offset
            .checked_add(size)
            .filter(|end| *end <= self.region_size)
        else {
            return Err(GraphicsError::OutOfTransientMemory {
                requested: size,
                available: self.remaining(),
            });
        };
        self.write_offset = end;

        Ok(TransientHandle {
            offset: self.region as u64 * self.region_size + aligned_offset,
            size,
            epoch: self.epoch,
        })
    }

    /// Invalidate every outstanding handle and move to the next region.
    ///
    /// The caller must have waited for the fence of the frame that last used
    /// the next region.
    pub fn reset_frame(&mut self) {
        self.epoch += 1;
        self.region = (self.region + 1) % self.regions;
        self.write_offset = 0;
        log::trace!(
            "Transient pool reset (epoch {}, region {})",
            self.epoch,
            self.region
        );
    }

    /// Check that `handle` belongs to the current epoch.
    pub fn validate(&self, handle: &TransientHandle) -> Result<(), GraphicsError> {
        if handle.epoch != self.epoch {
            return Err(GraphicsError::StaleTransient {
                issued: handle.epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    /// Write `data` to the start of the allocation.
    pub fn write(
        &self,
        device: &GraphicsDevice,
        handle: &TransientHandle,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.validate(handle)?;
        if data.len() as u64 > handle.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes into transient allocation of {} bytes",
                data.len(),
                handle.size
            )));
        }
        device.write_buffer(&self.buffer, handle.offset, data)
    }

    /// Read the allocation back.
    pub fn read(
        &self,
        device: &GraphicsDevice,
        handle: &TransientHandle,
    ) -> Result<Vec<u8>, GraphicsError> {
        self.validate(handle)?;
        device.read_buffer(&self.buffer, handle.offset, handle.size)
    }

    /// Release the backing buffer.
    pub fn release(&self, device: &GraphicsDevice) {
        device.destroy_buffer(&self.buffer);
    }
}

impl std::fmt::Debug for TransientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientPool")
            .field("region_size", &self.region_size)
            .field("regions", &self.regions)
            .field("region", &self.region)
            .field("write_offset", &self.write_offset)
            .field("epoch", &self.epoch)
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[inline]
fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::device::DeviceCapabilities;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "transient test",
            DeviceCapabilities::default(),
        )
    }

    #[test]
    fn test_pool_creation() {
        let device = create_test_device();
        let pool = TransientPool::new(&device, 4096, 2, "transient").unwrap();
        assert_eq!(pool.region_size(), 2048);
        assert_eq!(pool.buffer().size(), 4096);
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.remaining(), 2048);
    }

    #[test]
    fn test_allocation_alignment() {
        let device = create_test_device();
        let mut pool = TransientPool::with_alignment(&device, 1024, 1, "t", 64).unwrap();

        let a = pool.allocate(100).unwrap();
        assert_eq!(a.offset(), 0);
        let b = pool.allocate(50).unwrap();
        assert_eq!(b.offset(), 128);
        assert_eq!(pool.used(), 178);
    }

    #[test]
    fn test_regions_alternate() {
        let device = create_test_device();
        let mut pool = TransientPool::new(&device, 4096, 2, "t").unwrap();

        assert_eq!(pool.allocate(16).unwrap().offset(), 0);
        pool.reset_frame();
        assert_eq!(pool.allocate(16).unwrap().offset(), 2048);
        pool.reset_frame();
        assert_eq!(pool.allocate(16).unwrap().offset(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let device = create_test_device();
        let mut pool = TransientPool::new(&device, 256, 2, "t").unwrap();

        pool.allocate(100).unwrap();
        let err = pool.allocate(100).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::OutOfTransientMemory {
                requested: 100,
                available: 16
            }
        ));
        assert!(matches!(
            pool.allocate(0),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_huge_request_does_not_wrap() {
        let device = create_test_device();
        let mut pool = TransientPool::new(&device, 4096, 2, "t").unwrap();

        pool.allocate(8).unwrap();
        let err = pool.allocate(u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::OutOfTransientMemory {
                requested: u64::MAX,
                available: 2032
            }
        ));
        assert_eq!(pool.used(), 8);
        assert_eq!(pool.allocate(16).unwrap().offset(), 16);
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let device = create_test_device();
        let mut pool = TransientPool::new(&device, 4096, 2, "t").unwrap();

        let handle = pool.allocate(4).unwrap();
        pool.write(&device, &handle, &[1, 2, 3, 4]).unwrap();
        assert_eq!(pool.read(&device, &handle).unwrap(), vec![1, 2, 3, 4]);

        pool.reset_frame();
        assert!(matches!(
            pool.read(&device, &handle),
            Err(GraphicsError::StaleTransient {
                issued: 1,
                current: 2
            })
        ));
        assert!(pool.write(&device, &handle, &[0]).is_err());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let device = create_test_device();
        let mut pool = TransientPool::new(&device, 4096, 2, "t").unwrap();
        let handle = pool.allocate(2).unwrap();
        assert!(pool.write(&device, &handle, &[0; 3]).is_err());
    }
}
