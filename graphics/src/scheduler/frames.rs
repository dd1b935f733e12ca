//! Frames in flight.

use std::time::Duration;

use crate::error::GraphicsError;

use super::Fence;

/// How long a frame slot may stay busy before the device is considered hung.
pub const FRAME_SLOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages multiple frames in flight for CPU-GPU parallelism.
///
/// With N frames in flight there are N slots. Each slot owns one region of
/// the transient pool and one half of every draw-list double buffer;
/// [`begin_frame`](Self::begin_frame) waits for the slot's previous fence so
/// those can be reused safely.
///
/// ```text
/// frames_in_flight = 2
///
/// Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
/// Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
/// ```
///
/// # Thread Safety
///
/// `FramePipeline` is owned by the render thread.
#[derive(Debug)]
pub struct FramePipeline {
    /// Fences for each frame slot. `None` if slot hasn't been used yet.
    frame_fences: Vec<Option<Fence>>,
    current_slot: usize,
    frames_in_flight: usize,
    /// Total frames started.
    frame_count: u64,
}

impl FramePipeline {
    /// Create a new frame pipeline. `frames_in_flight` is clamped to at least 1.
    pub fn new(frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frame_fences: (0..frames_in_flight).map(|_| None).collect(),
            current_slot: 0,
            frames_in_flight,
            frame_count: 0,
        }
    }

    /// Begin a new frame, waiting for the current slot to become available.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DeviceLost`] if the slot's fence does not
    /// signal within `timeout`.
    pub fn begin_frame(&mut self, timeout: Duration) -> Result<(), GraphicsError> {
        if let Some(fence) = &self.frame_fences[self.current_slot]
            && !fence.wait_timeout(timeout)
        {
            log::error!(
                "Frame slot {} did not complete within {:?}",
                self.current_slot,
                timeout
            );
            return Err(GraphicsError::DeviceLost);
        }

        self.frame_count += 1;

        log::trace!(
            "Begin frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
        Ok(())
    }

    /// Record the fence of the submitted frame and advance to the next slot.
    pub fn end_frame(&mut self, fence: Fence) {
        log::trace!(
            "End frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
        self.frame_fences[self.current_slot] = Some(fence);
        self.advance();
    }

    /// Advance without a fence, for frames that submitted nothing.
    pub fn end_frame_without_submit(&mut self) {
        log::trace!(
            "End frame {} (slot {}) without submission",
            self.frame_count,
            self.current_slot
        );
        self.advance();
    }

    fn advance(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
    }

    /// Wait for all in-flight GPU work to complete.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        log::trace!("Waiting for GPU idle ({} slots)", self.frames_in_flight);
        self.frame_fences
            .iter()
            .flatten()
            .all(|fence| fence.wait_timeout(timeout))
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Get the current frame slot index.
    ///
    /// Returns a value from 0 to `frames_in_flight - 1`.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Get the total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FramePipeline {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::{CommandList, GpuBackend};
    use std::sync::Arc;

    #[test]
    fn test_slots_cycle() {
        let backend = Arc::new(DummyBackend::new());
        let mut pipeline = FramePipeline::default();
        assert_eq!(pipeline.frames_in_flight(), 2);

        for expected_slot in [0, 1, 0, 1] {
            pipeline.begin_frame(Duration::from_millis(10)).unwrap();
            assert_eq!(pipeline.current_slot(), expected_slot);
            let fence = Fence::new(backend.clone(), backend.create_fence(false));
            backend
                .submit(&CommandList::new(), None, fence.gpu())
                .unwrap();
            pipeline.end_frame(fence);
        }
        assert_eq!(pipeline.frame_count(), 4);
        assert!(pipeline.wait_idle(Duration::ZERO));
    }

    #[test]
    fn test_unsignaled_slot_times_out_as_device_lost() {
        let backend = Arc::new(DummyBackend::new());
        let mut pipeline = FramePipeline::new(1);
        pipeline.begin_frame(Duration::ZERO).unwrap();
        pipeline.end_frame(Fence::new(backend.clone(), backend.create_fence(false)));

        assert!(matches!(
            pipeline.begin_frame(Duration::from_millis(5)),
            Err(GraphicsError::DeviceLost)
        ));
    }

    #[test]
    fn test_zero_frames_clamped() {
        assert_eq!(FramePipeline::new(0).frames_in_flight(), 1);
    }
}
