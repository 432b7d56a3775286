//! A bounded circular buffer with one put-side and one take-side lock.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

/// State owned by the take side.
struct Reader {
    /// Sequence of the next slot to consume.
    next: u64,
    /// Highest published sequence (exclusive) observed by the reader.
    published: u64,
}

/// A fixed-capacity circular buffer.
///
/// Sequences grow without bound and map to slots with `sequence & mask`. The put side owns the
/// next sequence to publish and the take side owns the next sequence to consume. The two only
/// communicate through the published `cursor` and the consumed `gating` positions, so a put and a
/// take never wait on each other.
pub struct Buffer<T> {
    slots: Box<[Mutex<Option<T>>]>,
    mask: u64,

    /// Number of published sequences.
    cursor: AtomicU64,
    /// Number of consumed sequences. The writer may not lap this position.
    gating: AtomicU64,

    /// Next sequence to publish.
    writer: Mutex<u64>,
    reader: Mutex<Reader>,
}

impl<T> Buffer<T> {
    /// Create a buffer holding `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            mask: capacity as u64 - 1,
            cursor: AtomicU64::new(0),
            gating: AtomicU64::new(0),
            writer: Mutex::new(0),
            reader: Mutex::new(Reader {
                next: 0,
                published: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Publish `item`, handing it back if there is no free slot.
    pub fn put(&self, item: T) -> Result<(), T> {
        let mut next = self.writer.lock().unwrap();
        if *next - self.gating.load(Ordering::Acquire) >= self.slots.len() as u64 {
            return Err(item);
        }
        *self.slots[(*next & self.mask) as usize].lock().unwrap() = Some(item);
        *next += 1;
        self.cursor.store(*next, Ordering::Release);
        Ok(())
    }

    /// Consume the oldest published item, if any.
    pub fn take(&self) -> Option<T> {
        let mut reader = self.reader.lock().unwrap();
        if reader.next >= reader.published {
            reader.published = self.cursor.load(Ordering::Acquire);
            if reader.next >= reader.published {
                return None;
            }
        }

        // Clear the slot so the buffer does not retain consumed items
        let item = self.slots[(reader.next & self.mask) as usize]
            .lock()
            .unwrap()
            .take();
        reader.next += 1;
        self.gating.store(reader.next, Ordering::Release);
        item
    }

    /// Number of published but unconsumed items.
    pub fn len(&self) -> usize {
        // Read gating first: it never passes the cursor
        let gating = self.gating.load(Ordering::Acquire);
        let cursor = self.cursor.load(Ordering::Acquire);
        cursor.saturating_sub(gating) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
