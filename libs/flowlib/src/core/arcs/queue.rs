// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::core::packet::Packet;

/// Lock-free MPSC packet queue with a one-slot consumer-side head buffer.
///
/// The producer path (`enqueue`) only touches the `SegQueue` and the length
/// counter, so a producer never blocks on the consumer. The head slot gives
/// the single consumer `peek` and `stash` without a mutex: a popped packet
/// parks there until classified.
pub(crate) struct AsyncQueue {
    queue: SegQueue<Packet>,
    /// Owned by the consumer thread; see the safety notes below.
    head: UnsafeCell<Option<Packet>>,
    /// Packets in `queue` plus the head slot.
    len: AtomicUsize,
}

// SAFETY: `head` is read and written only from the target operator's section
// thread (the single consumer). Producers go through `queue` and `len`, both
// of which are thread-safe. The engine never hands the same arc's consumer
// side to two threads.
unsafe impl Send for AsyncQueue {}
unsafe impl Sync for AsyncQueue {}

impl AsyncQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            head: UnsafeCell::new(None),
            len: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns the queue length after the push.
    pub(crate) fn enqueue(&self, packet: Packet) -> usize {
        self.queue.push(packet);
        self.len.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Consumer side only.
    pub(crate) fn dequeue(&self) -> Option<Packet> {
        // SAFETY: single consumer, see the impl-level note.
        let head = unsafe { &mut *self.head.get() };
        let packet = head.take().or_else(|| self.queue.pop());
        if packet.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        packet
    }

    /// Consumer side only. Fills the head slot if empty; the logical length
    /// does not change.
    pub(crate) fn peek(&self) -> Option<&Packet> {
        // SAFETY: single consumer, see the impl-level note.
        let head = unsafe { &mut *self.head.get() };
        if head.is_none() {
            *head = self.queue.pop();
        }
        head.as_ref()
    }

    /// Consumer side only. Return a dequeued packet to the front of the
    /// queue. The head slot must be empty, which holds right after a
    /// `dequeue` that drained it.
    pub(crate) fn stash(&self, packet: Packet) {
        // SAFETY: single consumer, see the impl-level note.
        let head = unsafe { &mut *self.head.get() };
        debug_assert!(head.is_none());
        *head = Some(packet);
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn len_estimate(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Drop everything. Consumer side only (drains the head slot).
    pub(crate) fn sweep(&self) -> usize {
        let mut dropped = 0;
        while self.dequeue().is_some() {
            dropped += 1;
        }
        dropped
    }
}

/// Rendezvous slot for synchronous arcs: a one-packet head slot fused with
/// the consumer's scheduling turn, backed by an overflow list so delivery is
/// never lossy. `offer` reports `false` whenever the consumer has not kept
/// up; that is the producer's cue to back off, but the packet is queued
/// either way.
pub(crate) struct SyncSlot {
    inner: Mutex<SlotInner>,
}

struct SlotInner {
    head: Option<Packet>,
    overflow: VecDeque<Packet>,
}

impl SyncSlot {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                head: None,
                overflow: VecDeque::new(),
            }),
        }
    }

    /// Deliver a packet. Returns `true` only when the slot was free, which
    /// means the consumer is keeping pace.
    pub(crate) fn offer(&self, packet: Packet) -> bool {
        let mut inner = self.inner.lock();
        if inner.head.is_none() && inner.overflow.is_empty() {
            inner.head = Some(packet);
            true
        } else {
            inner.overflow.push_back(packet);
            false
        }
    }

    pub(crate) fn take(&self) -> Option<Packet> {
        let mut inner = self.inner.lock();
        let packet = inner.head.take().or_else(|| inner.overflow.pop_front());
        // Keep the head primed so peeks see the next packet.
        if inner.head.is_none() {
            inner.head = inner.overflow.pop_front();
        }
        packet
    }

    /// Inspect the next packet without consuming it.
    pub(crate) fn with_head<R>(&self, f: impl FnOnce(Option<&Packet>) -> R) -> R {
        f(self.inner.lock().head.as_ref())
    }

    /// Return a taken packet to the front.
    pub(crate) fn put_back(&self, packet: Packet) {
        let mut inner = self.inner.lock();
        if let Some(head) = inner.head.take() {
            inner.overflow.push_front(head);
        }
        inner.head = Some(packet);
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.lock();
        usize::from(inner.head.is_some()) + inner.overflow.len()
    }

    /// Drop everything. Returns the count.
    pub(crate) fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = usize::from(inner.head.take().is_some()) + inner.overflow.len();
        inner.overflow.clear();
        dropped
    }
}
