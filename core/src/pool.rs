//! Allocation-preserving slots for per-frame data.
//!
//! Frame-rebuilt structures (compiled graphs, recorded command lists) are
//! cleared and refilled every frame. [`Pooled<T>`] keeps the value around in a
//! cleared state between uses instead of dropping it, so `Vec` capacity
//! survives from one frame to the next.
//!
//! ```
//! use sandpiper_core::pool::{Poolable, Pooled};
//!
//! #[derive(Default)]
//! struct Order {
//!     passes: Vec<u32>,
//! }
//!
//! impl Poolable for Order {
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//!     fn reset(&mut self) {
//!         self.passes.clear();
//!     }
//! }
//!
//! let mut slot = Pooled::<Order>::default();
//! slot.activate().passes.extend([2, 0, 1]);
//! slot.release();
//! assert!(slot.is_pooled());
//! assert!(slot.inner().passes.capacity() >= 3);
//! ```

/// A value that can be emptied in place and reused.
pub trait Poolable {
    /// Create an empty value.
    fn new_empty() -> Self;

    /// Clear the contents while keeping allocations.
    fn reset(&mut self);
}

/// A reusable slot that is either holding live data or parked empty.
#[derive(Debug)]
pub enum Pooled<T: Poolable> {
    /// Holds data for the current use.
    Active(T),
    /// Cleared and waiting for the next use.
    Pooled(T),
}

impl<T: Poolable> Pooled<T> {
    /// Wrap a live value.
    pub fn new(value: T) -> Self {
        Self::Active(value)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }

    /// The live value, if any.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Active(t) => Some(t),
            Self::Pooled(_) => None,
        }
    }

    /// The live value, if any.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Active(t) => Some(t),
            Self::Pooled(_) => None,
        }
    }

    /// Clear the value and park it. No-op when already parked.
    pub fn release(&mut self) {
        if let Self::Active(_) = self {
            let Self::Active(mut value) = std::mem::replace(self, Self::Pooled(T::new_empty()))
            else {
                return;
            };
            value.reset();
            *self = Self::Pooled(value);
        }
    }

    /// Mark the slot live and hand out the (possibly cleared) value.
    pub fn activate(&mut self) -> &mut T {
        if let Self::Pooled(_) = self
            && let Self::Pooled(value) = std::mem::replace(self, Self::Active(T::new_empty()))
        {
            *self = Self::Active(value);
        }
        match self {
            Self::Active(t) | Self::Pooled(t) => t,
        }
    }

    /// The stored value regardless of state.
    pub fn inner(&self) -> &T {
        match self {
            Self::Active(t) | Self::Pooled(t) => t,
        }
    }

    /// The stored value regardless of state.
    pub fn inner_mut(&mut self) -> &mut T {
        match self {
            Self::Active(t) | Self::Pooled(t) => t,
        }
    }
}

impl<T: Poolable> Default for Pooled<T> {
    fn default() -> Self {
        Self::Pooled(T::new_empty())
    }
}

impl<T> Poolable for Vec<T> {
    fn new_empty() -> Self {
        Vec::new()
    }

    fn reset(&mut self) {
        self.clear();
    }
}
