//! Startup configuration.
//!
//! Plain value objects, built once before the [`GpuContext`] exists and
//! handed to the component that consumes them.
//!
//! [`GpuContext`]: crate::context::GpuContext

use std::time::Duration;

use crate::backend::BackendKind;
use crate::device::DeviceCapabilities;
use crate::swapchain::PresentMode;
use crate::types::ClearColor;

/// Default size of the per-frame transient pool in bytes.
pub const DEFAULT_TRANSIENT_CAPACITY: u64 = 4096;

/// Default number of debug readbacks held before the consumer must drain.
pub const DEFAULT_READBACK_CAPACITY: usize = 8;

/// Configuration of the device context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Device name, also the prefix of its debug labels.
    pub label: String,
    pub backend: BackendKind,
    pub frames_in_flight: usize,
    /// Total transient pool size, split evenly between frame slots.
    pub transient_capacity: u64,
    pub present_mode: PresentMode,
    /// Initial surface size in pixels.
    pub width: u32,
    pub height: u32,
    pub readback_capacity: usize,
    /// Create the debug lens image alongside the debug buffer.
    pub debug_lens: bool,
    pub capabilities: DeviceCapabilities,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            label: "sandpiper".into(),
            backend: BackendKind::Auto,
            frames_in_flight: 2,
            transient_capacity: DEFAULT_TRANSIENT_CAPACITY,
            present_mode: PresentMode::Immediate,
            width: 1280,
            height: 720,
            readback_capacity: DEFAULT_READBACK_CAPACITY,
            debug_lens: true,
            capabilities: DeviceCapabilities::default(),
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Frames the CPU may run ahead of the GPU. Clamped to at least one.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_transient_capacity(mut self, bytes: u64) -> Self {
        self.transient_capacity = bytes;
        self
    }

    pub fn with_present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_readback_capacity(mut self, capacity: usize) -> Self {
        self.readback_capacity = capacity;
        self
    }

    pub fn with_debug_lens(mut self, enabled: bool) -> Self {
        self.debug_lens = enabled;
        self
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Configuration of the frame renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Color the main pass clears the surface to.
    pub clear_color: ClearColor,
    /// Build and draw the observer camera view.
    pub observer: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: ClearColor::BLACK,
            observer: false,
        }
    }
}

impl RendererConfig {
    pub fn with_clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_observer(mut self, enabled: bool) -> Self {
        self.observer = enabled;
        self
    }
}

/// Retry schedule for asset loads.
///
/// Attempt `n` (1-based) that fails waits `initial_backoff * multiplier^(n-1)`,
/// capped at `max_backoff`, before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

/// Configuration of the asset streaming worker pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingConfig {
    /// Number of worker threads. Clamped to at least one.
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamingConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
