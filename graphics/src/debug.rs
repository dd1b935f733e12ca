//! GPU debug channel.
//!
//! Shaders write diagnostic values into the debug buffer, whose index is
//! published through the global uniform block. The render thread copies the
//! buffer back with [`DebugChannel::capture`], which queues the bytes in a
//! fixed-capacity [`ReadbackQueue`] until a consumer drains them. A full queue
//! rejects new captures rather than growing or overwriting.
//!
//! The optional debug lens is a surface-sized image for inspection passes;
//! it is recreated whenever the surface size changes.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};

/// Size of the shader-visible debug buffer in bytes.
pub const DEBUG_BUFFER_SIZE: u64 = 1024;

/// Bytes captured from the debug buffer at the end of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadbackEntry {
    pub frame: u64,
    pub data: Vec<u8>,
}

/// Bounded FIFO of pending readbacks.
#[derive(Debug)]
pub struct ReadbackQueue {
    capacity: usize,
    entries: VecDeque<ReadbackEntry>,
}

impl ReadbackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Queue an entry.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::ReadbackQueueFull`] if the consumer has not drained
    /// the queue since it filled up.
    pub fn push(&mut self, entry: ReadbackEntry) -> Result<(), GraphicsError> {
        if self.is_full() {
            return Err(GraphicsError::ReadbackQueueFull {
                capacity: self.capacity,
            });
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Take every queued entry, oldest first.
    pub fn drain(&mut self) -> Vec<ReadbackEntry> {
        self.entries.drain(..).collect()
    }
}

/// The debug buffer, its readback queue and the debug lens image.
#[derive(Debug)]
pub struct DebugChannel {
    buffer: Arc<Buffer>,
    readback: ReadbackQueue,
    lens: Option<Arc<Texture>>,
}

impl DebugChannel {
    pub fn new(
        device: &Arc<GraphicsDevice>,
        readback_capacity: usize,
        lens_size: Option<(u32, u32)>,
    ) -> Result<Self, GraphicsError> {
        let buffer = device.create_buffer(
            &BufferDescriptor::new(
                DEBUG_BUFFER_SIZE,
                BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            )
            .with_label("debug buffer"),
        )?;
        let lens = lens_size
            .map(|(width, height)| create_lens(device, width, height))
            .transpose()?;

        Ok(Self {
            buffer,
            readback: ReadbackQueue::new(readback_capacity),
            lens,
        })
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Index shaders use to address the debug buffer.
    pub fn shader_address(&self) -> u32 {
        self.buffer.id().raw() as u32
    }

    pub fn lens(&self) -> Option<&Arc<Texture>> {
        self.lens.as_ref()
    }

    pub fn readback(&self) -> &ReadbackQueue {
        &self.readback
    }

    /// Copy the debug buffer back and queue it for the consumer.
    pub fn capture(&mut self, device: &GraphicsDevice, frame: u64) -> Result<(), GraphicsError> {
        if self.readback.is_full() {
            return Err(GraphicsError::ReadbackQueueFull {
                capacity: self.readback.capacity(),
            });
        }
        let data = device.read_buffer(&self.buffer, 0, self.buffer.size())?;
        self.readback.push(ReadbackEntry { frame, data })
    }

    /// Take every pending readback.
    pub fn drain(&mut self) -> Vec<ReadbackEntry> {
        self.readback.drain()
    }

    /// Recreate the lens image for a new surface size.
    ///
    /// The old lens stays in place if the new one cannot be created.
    pub fn resize(
        &mut self,
        device: &Arc<GraphicsDevice>,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let lens = self.resized_lens(device, width, height)?;
        self.replace_lens(device, lens);
        Ok(())
    }

    /// A lens for the new size, or `None` when the lens is disabled.
    pub(crate) fn resized_lens(
        &self,
        device: &Arc<GraphicsDevice>,
        width: u32,
        height: u32,
    ) -> Result<Option<Arc<Texture>>, GraphicsError> {
        match self.lens {
            Some(_) => create_lens(device, width, height).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn replace_lens(&mut self, device: &GraphicsDevice, lens: Option<Arc<Texture>>) {
        if lens.is_none() {
            return;
        }
        if let Some(old) = std::mem::replace(&mut self.lens, lens) {
            device.destroy_texture(&old);
        }
    }

    /// Release the lens image, then the debug buffer.
    pub fn release(&mut self, device: &GraphicsDevice) {
        if let Some(lens) = self.lens.take() {
            device.destroy_texture(&lens);
        }
        device.destroy_buffer(&self.buffer);
    }
}

fn create_lens(
    device: &Arc<GraphicsDevice>,
    width: u32,
    height: u32,
) -> Result<Arc<Texture>, GraphicsError> {
    device.create_texture(
        &TextureDescriptor::new_2d(
            width.max(1),
            height.max(1),
            TextureFormat::Rgba16Float,
            TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        )
        .with_label("debug lens"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::device::DeviceCapabilities;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "debug test",
            DeviceCapabilities::default(),
        )
    }

    #[test]
    fn test_queue_rejects_when_full() {
        let mut queue = ReadbackQueue::new(2);
        for frame in 0..2 {
            queue
                .push(ReadbackEntry {
                    frame,
                    data: vec![],
                })
                .unwrap();
        }
        assert!(matches!(
            queue.push(ReadbackEntry {
                frame: 2,
                data: vec![]
            }),
            Err(GraphicsError::ReadbackQueueFull { capacity: 2 })
        ));

        let drained = queue.drain();
        assert_eq!(drained.iter().map(|e| e.frame).collect::<Vec<_>>(), [0, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capture_reads_debug_buffer() {
        let device = create_test_device();
        let mut channel = DebugChannel::new(&device, 1, None).unwrap();
        device.write_buffer(channel.buffer(), 0, &[7, 7]).unwrap();

        channel.capture(&device, 3).unwrap();
        assert!(channel.capture(&device, 4).is_err());

        let entries = channel.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].frame, 3);
        assert_eq!(&entries[0].data[..2], &[7, 7]);
        assert_eq!(entries[0].data.len() as u64, DEBUG_BUFFER_SIZE);
    }

    #[test]
    fn test_lens_follows_resize() {
        let device = create_test_device();
        let mut channel = DebugChannel::new(&device, 4, Some((64, 64))).unwrap();
        let old = channel.lens().unwrap().clone();

        channel.resize(&device, 128, 32).unwrap();
        assert!(old.is_released());
        let lens = channel.lens().unwrap();
        assert_eq!((lens.width(), lens.height()), (128, 32));

        channel.release(&device);
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_failed_resize_keeps_lens() {
        let device = create_test_device();
        let mut channel = DebugChannel::new(&device, 4, Some((64, 64))).unwrap();
        let old = channel.lens().unwrap().clone();

        let too_wide = device.capabilities().max_texture_dimension + 1;
        assert!(channel.resize(&device, too_wide, 32).is_err());
        assert!(!old.is_released());
        assert!(Arc::ptr_eq(channel.lens().unwrap(), &old));

        channel.release(&device);
        assert_eq!(device.live_resource_count(), 0);
    }
}
