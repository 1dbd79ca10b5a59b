//! Network buffers and the pool contracts of the receive path.
//!
//! A [`Buffer`] is a reference-counted handle over a [`MemorySegment`]. When
//! the last handle drops, the segment returns to the [`BufferRecycler`] the
//! buffer was created with: exclusive buffers recycle to their owning
//! channel, floating buffers to the shared pool they were borrowed from.
//! Every logical owner of a buffer therefore triggers exactly one recycle by
//! dropping its handle.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed-capacity, owned region of memory backing one network buffer.
pub struct MemorySegment {
    data: Box<[u8]>,
}

impl MemorySegment {
    /// Allocate a zeroed segment with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Get the total capacity of the segment.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Get the segment contents as a byte slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get the segment contents as a mutable byte slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySegment")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Receives the memory segment of a buffer once its last handle is dropped.
pub trait BufferRecycler: Send + Sync {
    /// Return a segment to its owner.
    fn recycle(&self, segment: MemorySegment);
}

struct BufferShared {
    /// Present until stolen by [`Buffer::into_segment`].
    segment: Option<MemorySegment>,
    /// Valid data length; readable without synchronization for reporting.
    size: AtomicUsize,
    recycler: Arc<dyn BufferRecycler>,
}

impl Drop for BufferShared {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            self.recycler.recycle(segment);
        }
    }
}

/// Reference-counted network buffer.
pub struct Buffer {
    shared: Arc<BufferShared>,
}

impl Buffer {
    /// Wrap a segment with the recycler that receives it back.
    pub fn new(segment: MemorySegment, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            shared: Arc::new(BufferShared {
                segment: Some(segment),
                size: AtomicUsize::new(0),
                recycler,
            }),
        }
    }

    /// Increment the reference count and return another handle.
    #[must_use]
    pub fn retain(&self) -> Buffer {
        Buffer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drop this handle. The segment recycles once the last handle goes.
    pub fn recycle_buffer(self) {}

    /// Get the valid data length. Best-effort read, usable without holding
    /// any channel lock.
    #[inline]
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::Relaxed)
    }

    /// Set the valid data length.
    pub fn set_size(&self, size: usize) {
        debug_assert!(size <= self.capacity());
        self.shared.size.store(size, Ordering::Relaxed);
    }

    /// Get the capacity of the backing segment.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.segment.as_ref().map_or(0, MemorySegment::capacity)
    }

    /// The recycler this buffer returns to.
    #[inline]
    pub fn recycler(&self) -> &Arc<dyn BufferRecycler> {
        &self.shared.recycler
    }

    /// Whether this buffer recycles to the given recycler.
    pub fn is_recycled_by(&self, recycler: &Arc<dyn BufferRecycler>) -> bool {
        Arc::ptr_eq(&self.shared.recycler, recycler)
    }

    /// Mutable access to the backing segment, available only while this is
    /// the sole handle.
    pub fn segment_mut(&mut self) -> Option<&mut MemorySegment> {
        Arc::get_mut(&mut self.shared).and_then(|shared| shared.segment.as_mut())
    }

    /// Steal the segment without recycling it.
    ///
    /// Fails (handing the buffer back) when other handles are still alive;
    /// the segment then recycles normally once they drop.
    pub fn into_segment(self) -> std::result::Result<MemorySegment, Buffer> {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => Ok(shared
                .segment
                .take()
                .expect("segment present until the last handle drops")),
            Err(shared) => Err(Buffer { shared }),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Result of offering a pool buffer to a waiting listener.
#[derive(Debug)]
pub enum NotificationResult {
    /// The listener did not take the buffer; ownership returns to the pool.
    NotUsed(Buffer),
    /// The listener took the buffer and is waiting for more.
    UsedNeedMore,
    /// The listener took the buffer and is satisfied.
    UsedNoNeedMore,
}

impl NotificationResult {
    /// Whether the listener kept the buffer.
    #[inline]
    pub fn is_used(&self) -> bool {
        !matches!(self, NotificationResult::NotUsed(_))
    }
}

/// Listener registered on a buffer provider for availability callbacks.
///
/// Invoked from pool threads, outside the channel's I/O and task roles.
pub trait BufferListener: Send + Sync {
    /// Offer a freed pool buffer to the listener.
    fn notify_buffer_available(&self, buffer: Buffer) -> NotificationResult;
}

/// Source of floating buffers shared by the channels of a gate.
pub trait BufferProvider: Send + Sync {
    /// Request a pooled buffer; `None` when the pool is exhausted.
    fn request_buffer(&self) -> Option<Buffer>;

    /// Register a listener called once a buffer frees up. Returns `false`
    /// when the provider no longer accepts listeners.
    fn add_buffer_listener(&self, listener: Arc<dyn BufferListener>) -> bool;
}
