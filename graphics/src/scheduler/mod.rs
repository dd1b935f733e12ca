//! Frame scheduling.
//!
//! - [`FramePipeline`] - Multiple frames in flight, one fence per slot
//! - [`Fence`] - CPU-GPU synchronization for frame completion

mod frames;
mod sync;

pub use frames::{FRAME_SLOT_TIMEOUT, FramePipeline};
pub use sync::{Fence, FenceStatus};
