//! Window resize notification with debouncing.
//!
//! The window collaborator owns a clone of the [`ResizeSignal`] and calls
//! [`notify`](ResizeSignal::notify) from whatever thread receives OS resize
//! events. The renderer polls [`take`](ResizeSignal::take) once per frame.
//! Only the most recent size is kept, so a drag-resize that produces dozens of
//! events results in a single surface reconfiguration.
//!
//! ```
//! use sandpiper_graphics::resize::ResizeSignal;
//!
//! let signal = ResizeSignal::new();
//! let window_side = signal.clone();
//!
//! window_side.notify(800, 600);
//! window_side.notify(1024, 768);
//!
//! assert_eq!(signal.take(), Some((1024, 768)));
//! assert_eq!(signal.take(), None);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct PendingResize {
    size: Option<(u32, u32)>,
    last_event: Option<Instant>,
}

/// Shared, thread-safe resize notification.
#[derive(Debug, Clone, Default)]
pub struct ResizeSignal {
    pending: Arc<Mutex<PendingResize>>,
    debounce: Duration,
}

impl ResizeSignal {
    /// Create a signal that reports resizes on the next poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that only reports a resize once no new event arrived
    /// for `debounce`.
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            pending: Arc::default(),
            debounce,
        }
    }

    /// Record a new window size. Zero dimensions are clamped to one.
    pub fn notify(&self, width: u32, height: u32) {
        let size = (width.max(1), height.max(1));
        let mut pending = self.pending.lock();
        pending.size = Some(size);
        pending.last_event = Some(Instant::now());
        log::trace!("Resize event: {}x{} (pending)", size.0, size.1);
    }

    /// Whether a resize is waiting, settled or not.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().size.is_some()
    }

    /// Take the pending size if the debounce period has elapsed.
    pub fn take(&self) -> Option<(u32, u32)> {
        let mut pending = self.pending.lock();
        let settled = pending
            .last_event
            .is_some_and(|at| at.elapsed() >= self.debounce);
        if settled {
            pending.last_event = None;
            pending.size.take()
        } else {
            None
        }
    }
}

static_assertions::assert_impl_all!(ResizeSignal: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_notification_wins() {
        let signal = ResizeSignal::new();
        signal.notify(100, 100);
        signal.notify(200, 150);
        assert!(signal.is_pending());
        assert_eq!(signal.take(), Some((200, 150)));
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_zero_size_clamped() {
        let signal = ResizeSignal::new();
        signal.notify(0, 0);
        assert_eq!(signal.take(), Some((1, 1)));
    }

    #[test]
    fn test_debounce_holds_back_recent_events() {
        let signal = ResizeSignal::with_debounce(Duration::from_secs(3600));
        signal.notify(640, 480);
        assert_eq!(signal.take(), None);
        assert!(signal.is_pending());
    }

    #[test]
    fn test_notify_from_other_thread() {
        let signal = ResizeSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.notify(1280, 720))
            .join()
            .unwrap();
        assert_eq!(signal.take(), Some((1280, 720)));
    }
}
