//! Bounded pool of preallocated packet slots.
//!
//! The pool bridges the ingestion task and the reconstruction task. Empty
//! slots flow from the pool to ingestion, come back as full [`Frame`]s, and
//! return to the empty list once the reconstruction path has consumed them.
//!
//! Nothing here blocks the ingestion side: [`take_empty`](BufferPool::take_empty)
//! hands out whatever is free, possibly nothing. Only the consumer waits,
//! through [`wait_ready`](BufferPool::wait_ready).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

use crate::types::{Frame, PacketSlot, new_slot};

#[derive(Default)]
struct PoolInner {
    empty: Vec<PacketSlot>,
    full: VecDeque<Frame>,
}

/// Shared slot pool. Counts are mirrored in atomics so status reads never lock.
#[derive(Default)]
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    ready: Notify,
    capacity: AtomicUsize,
    empty_count: AtomicUsize,
    full_count: AtomicUsize,
    closed: AtomicBool,
}

impl BufferPool {
    /// An uninitialized pool holding no slots.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let pool = Self::new();
        pool.initialize(capacity);
        pool
    }

    /// Discard every slot and frame, then allocate `capacity` fresh slots.
    pub fn initialize(&self, capacity: usize) {
        let mut inner = self.lock();
        inner.full.clear();
        inner.empty = (0..capacity).map(|_| new_slot()).collect();
        self.capacity.store(capacity, Ordering::Release);
        self.closed.store(false, Ordering::Release);
        self.sync_counts(&inner);
        debug!(capacity, "Buffer pool initialized");
    }

    /// Release all slots.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.empty = Vec::new();
        inner.full.clear();
        self.capacity.store(0, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.sync_counts(&inner);
        self.ready.notify_one();
    }

    /// Take up to `max` empty slots without waiting.
    pub fn take_empty(&self, max: usize) -> Vec<PacketSlot> {
        let mut inner = self.lock();
        let n = max.min(inner.empty.len());
        let start = inner.empty.len() - n;
        let taken = inner.empty.split_off(start);
        self.sync_counts(&inner);
        taken
    }

    /// Queue received frames for the consumer.
    pub fn push_full(&self, frames: Vec<Frame>) {
        if frames.is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.full.extend(frames);
        self.sync_counts(&inner);
        drop(inner);
        self.ready.notify_one();
    }

    /// Take up to `max` queued frames in arrival order without waiting.
    pub fn pop_full(&self, max: usize) -> Vec<Frame> {
        let mut inner = self.lock();
        let n = max.min(inner.full.len());
        let frames: Vec<Frame> = inner.full.drain(..n).collect();
        self.sync_counts(&inner);
        frames
    }

    /// Return slots to the empty list; slots beyond capacity are freed.
    pub fn recycle(&self, slots: impl IntoIterator<Item = PacketSlot>) {
        let capacity = self.capacity();
        let mut inner = self.lock();
        for slot in slots {
            if inner.empty.len() + inner.full.len() < capacity {
                inner.empty.push(slot);
            }
        }
        self.sync_counts(&inner);
    }

    /// Mark the producer side finished and wake the consumer for a final drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until frames are queued or the pool is closed.
    pub async fn wait_ready(&self) {
        while self.full_pending() == 0 && !self.is_closed() {
            self.ready.notified().await;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn empty_available(&self) -> usize {
        self.empty_count.load(Ordering::Acquire)
    }

    pub fn full_pending(&self) -> usize {
        self.full_count.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_counts(&self, inner: &PoolInner) {
        self.empty_count.store(inner.empty.len(), Ordering::Release);
        self.full_count.store(inner.full.len(), Ordering::Release);
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("empty", &self.empty_available())
            .field("full", &self.full_pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketCodec;
    use crate::test_utils::PacketBuilder;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame_in(slot: PacketSlot, fsn: u16) -> Frame {
        let mut slot = slot;
        slot.copy_from_slice(&PacketBuilder::new().fsn(fsn).build());
        let header = PacketCodec::decode_header(slot.as_slice()).unwrap();
        Frame::new(header, slot, fsn as u64)
    }

    #[test]
    fn in_hand_reserve_sets_headroom() {
        for (buffer_size, per_read) in [(3300, 100), (2200, 1000), (500, 100), (800, 500)] {
            let pool = BufferPool::with_capacity(buffer_size);
            let reserve = pool.take_empty(per_read);
            assert_eq!(reserve.len(), per_read);
            assert_eq!(pool.empty_available(), buffer_size - per_read);
        }
    }

    #[test]
    fn exhausted_pool_hands_out_nothing() {
        let pool = BufferPool::with_capacity(4);
        assert_eq!(pool.take_empty(10).len(), 4);
        assert!(pool.take_empty(1).is_empty());
        assert_eq!(pool.empty_available(), 0);
    }

    #[test]
    fn frames_cycle_back_to_empty() {
        let pool = BufferPool::with_capacity(8);
        let slots = pool.take_empty(3);
        let frames: Vec<Frame> =
            slots.into_iter().zip(0u16..).map(|(s, fsn)| frame_in(s, fsn)).collect();
        pool.push_full(frames);
        assert_eq!(pool.full_pending(), 3);
        assert_eq!(pool.empty_available(), 5);

        let drained = pool.pop_full(10);
        let fsns: Vec<u16> = drained.iter().map(|f| f.header.fsn).collect();
        assert_eq!(fsns, vec![0, 1, 2]);
        pool.recycle(drained.into_iter().map(Frame::into_slot));
        assert_eq!(pool.empty_available(), 8);
        assert_eq!(pool.full_pending(), 0);
    }

    #[test]
    fn recycle_never_exceeds_capacity() {
        let pool = BufferPool::with_capacity(2);
        pool.recycle([new_slot(), new_slot()]);
        assert_eq!(pool.empty_available(), 2);
    }

    #[tokio::test]
    async fn wait_ready_wakes_on_push_and_close() {
        let pool = Arc::new(BufferPool::with_capacity(2));

        let consumer = tokio::spawn({
            let pool = pool.clone();
            async move {
                pool.wait_ready().await;
                pool.pop_full(1).len()
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let slot = pool.take_empty(1).pop().unwrap();
        pool.push_full(vec![frame_in(slot, 5)]);
        assert_eq!(consumer.await.unwrap(), 1);

        let closer = tokio::spawn({
            let pool = pool.clone();
            async move { pool.wait_ready().await }
        });
        pool.close();
        tokio::time::timeout(Duration::from_secs(1), closer).await.unwrap().unwrap();
    }

    #[test]
    fn shutdown_releases_everything() {
        let pool = BufferPool::with_capacity(16);
        pool.shutdown();
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.empty_available(), 0);
        assert!(pool.is_closed());
    }
}
