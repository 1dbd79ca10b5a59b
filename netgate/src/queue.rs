//! The per-channel queue of buffers available to receive network data.

use std::collections::VecDeque;

use crate::buffer::{Buffer, MemorySegment};

/// Exclusive and floating buffers available to one channel.
///
/// Not synchronized; the owning channel serializes access through its
/// buffer-state lock.
pub(crate) struct AvailableBufferQueue {
    /// Floating buffers borrowed from the shared pool.
    floating: VecDeque<Buffer>,
    /// Exclusive buffers owned by the channel.
    exclusive: VecDeque<Buffer>,
}

impl AvailableBufferQueue {
    pub(crate) fn new() -> Self {
        Self {
            floating: VecDeque::new(),
            exclusive: VecDeque::new(),
        }
    }

    /// Adds an exclusive buffer (back) into the queue and recycles one
    /// floating buffer if the number of available buffers exceeds the
    /// required amount.
    ///
    /// Returns how many buffers this call added to the queue.
    pub(crate) fn add_exclusive_buffer(&mut self, buffer: Buffer, required: usize) -> usize {
        self.exclusive.push_back(buffer);
        if self.available_size() > required {
            if let Some(floating) = self.floating.pop_front() {
                floating.recycle_buffer();
            }
            0
        } else {
            1
        }
    }

    pub(crate) fn add_floating_buffer(&mut self, buffer: Buffer) {
        self.floating.push_back(buffer);
    }

    /// Takes the floating buffer first, so borrowed pool memory returns to
    /// circulation before exclusive memory is touched.
    pub(crate) fn take_buffer(&mut self) -> Option<Buffer> {
        self.floating.pop_front().or_else(|| self.exclusive.pop_front())
    }

    /// Empties both queues: exclusive segments move into `sink` for a
    /// batched return to the gate; floating buffers are handed back so the
    /// caller can recycle them after leaving the lock.
    pub(crate) fn release_all(&mut self, sink: &mut Vec<MemorySegment>) -> Vec<Buffer> {
        for buffer in self.exclusive.drain(..) {
            match buffer.into_segment() {
                Ok(segment) => sink.push(segment),
                // A retained handle keeps the segment alive; it recycles
                // through the channel once that handle drops.
                Err(buffer) => drop(buffer),
            }
        }
        self.floating.drain(..).collect()
    }

    #[inline]
    pub(crate) fn available_size(&self) -> usize {
        self.floating.len() + self.exclusive.len()
    }

    #[inline]
    #[allow(dead_code)]
    pub(crate) fn floating_size(&self) -> usize {
        self.floating.len()
    }

    #[inline]
    #[allow(dead_code)]
    pub(crate) fn exclusive_size(&self) -> usize {
        self.exclusive.len()
    }
}
