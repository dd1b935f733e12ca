//! Two-slot storage with an internal write/read parity.

/// One of the two slots of a [`DoubleBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSlot {
    A,
    B,
}

impl BufferSlot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// A producer writes one slot while a consumer reads the other.
///
/// Callers never index slots directly: the write side is reached through
/// [`current_write`](Self::current_write) and the read side through
/// [`current_read`](Self::current_read). [`swap`](Self::swap) hands the
/// written slot to the reader.
///
/// ```
/// use sandpiper_graphics::draw_list::DoubleBuffer;
///
/// let mut lists: DoubleBuffer<Vec<u32>> = DoubleBuffer::default();
/// lists.current_write_mut().push(7);
/// assert!(lists.current_read().is_empty());
///
/// lists.swap();
/// assert_eq!(lists.current_read(), &vec![7]);
/// assert!(lists.current_write().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    write: WriteParity,
}

#[derive(Debug, Clone, Copy, Default)]
struct WriteParity(bool);

impl WriteParity {
    fn slot(self) -> BufferSlot {
        if self.0 { BufferSlot::B } else { BufferSlot::A }
    }
}

impl<T> DoubleBuffer<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            write: WriteParity::default(),
        }
    }

    /// The slot the producer may write.
    pub fn write_slot(&self) -> BufferSlot {
        self.write.slot()
    }

    /// The slot last handed to the consumer.
    pub fn read_slot(&self) -> BufferSlot {
        self.write.slot().other()
    }

    pub fn current_write(&self) -> &T {
        &self.slots[self.write_slot().index()]
    }

    pub fn current_write_mut(&mut self) -> &mut T {
        &mut self.slots[self.write_slot().index()]
    }

    pub fn current_read(&self) -> &T {
        &self.slots[self.read_slot().index()]
    }

    /// Hand the write slot to the reader. Returns the slot that became readable.
    pub fn swap(&mut self) -> BufferSlot {
        let ready = self.write_slot();
        self.write = WriteParity(!self.write.0);
        ready
    }
}
