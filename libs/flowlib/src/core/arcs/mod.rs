// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Arcs: the queues connecting operator ports.
//!
//! An arc owns its queue and its backpressure parameters and knows both
//! endpoints, so every enqueue/dequeue can record the scheduling
//! notifications it implies into the caller's [`Activations`] set.

pub mod queue;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::core::error::{FlowError, Result};
use crate::core::ids::{ArcId, InputPortId, OperatorId, OutputPortId};
use crate::core::packet::{ControlKind, ControlPacket, Packet};
use crate::core::scheduling::Activations;

use queue::{AsyncQueue, SyncSlot};

/// Topological role of an arc, used by graph validation.
///
/// Only `ForwardEdge` arcs participate in the acyclicity check; a cycle is
/// legal when it is closed by a `FeedbackEdge` or opened by a `CycleStart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArcKind {
    ForwardEdge,
    FeedbackEdge,
    CycleStart,
}

impl fmt::Display for ArcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArcKind::ForwardEdge => "ForwardEdge",
            ArcKind::FeedbackEdge => "FeedbackEdge",
            ArcKind::CycleStart => "CycleStart",
        };
        f.write_str(s)
    }
}

enum ArcQueue {
    Synchronous(SyncSlot),
    Asynchronous(AsyncQueue),
}

/// A directed connection from an output port to an input port.
pub struct FlowArc {
    pub(crate) id: ArcId,
    pub(crate) source: (OperatorId, OutputPortId),
    pub(crate) target: (OperatorId, InputPortId),
    pub(crate) kind: ArcKind,
    /// Backpressure threshold. Enqueues past this report the arc as full.
    pub(crate) boundary: usize,
    /// Drain level at which the consumer asks the producer for more.
    pub(crate) activation_mark: usize,
    queue: ArcQueue,
    upstream_enabled: AtomicBool,
    downstream_enabled: AtomicBool,
}

impl FlowArc {
    pub(crate) fn asynchronous(
        id: ArcId,
        source: (OperatorId, OutputPortId),
        target: (OperatorId, InputPortId),
        kind: ArcKind,
        boundary: usize,
        activation_mark: usize,
    ) -> Self {
        Self {
            id,
            source,
            target,
            kind,
            boundary,
            activation_mark,
            queue: ArcQueue::Asynchronous(AsyncQueue::new()),
            upstream_enabled: AtomicBool::new(true),
            downstream_enabled: AtomicBool::new(true),
        }
    }

    pub(crate) fn synchronous(
        id: ArcId,
        source: (OperatorId, OutputPortId),
        target: (OperatorId, InputPortId),
        kind: ArcKind,
    ) -> Self {
        Self {
            id,
            source,
            target,
            kind,
            boundary: 1,
            activation_mark: 0,
            queue: ArcQueue::Synchronous(SyncSlot::new()),
            upstream_enabled: AtomicBool::new(true),
            downstream_enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ArcId {
        self.id
    }

    pub fn kind(&self) -> ArcKind {
        self.kind
    }

    pub fn source_operator(&self) -> OperatorId {
        self.source.0
    }

    pub fn target_operator(&self) -> OperatorId {
        self.target.0
    }

    pub fn target_port(&self) -> InputPortId {
        self.target.1
    }

    /// Queue a packet, recording the downstream notifications it implies.
    ///
    /// `Ok(true)` means the arc is still within its boundary; `Ok(false)`
    /// means the packet was delivered but the arc is now full and the
    /// producer should back off.
    pub(crate) fn enqueue(&self, packet: Packet, acts: &mut Activations) -> Result<bool> {
        let queue = match &self.queue {
            ArcQueue::Asynchronous(queue) => queue,
            ArcQueue::Synchronous(_) => {
                return Err(FlowError::Unsupported(
                    "synchronous arcs deliver by rendezvous, not enqueue".to_string(),
                ))
            }
        };
        let len = queue.enqueue(packet);
        if self.downstream_enabled.load(Ordering::Acquire) {
            acts.activate(self.target.0);
            if len == self.activation_mark + 1 {
                acts.data_available(self.target.0);
            }
        }
        Ok(len <= self.boundary)
    }

    /// Rendezvous delivery on a synchronous arc. The packet is queued
    /// unconditionally; `false` means the consumer has not kept pace and the
    /// producer should back off.
    pub(crate) fn offer(&self, packet: Packet, acts: &mut Activations) -> bool {
        match &self.queue {
            ArcQueue::Synchronous(slot) => {
                let kept_pace = slot.offer(packet);
                if self.downstream_enabled.load(Ordering::Acquire) {
                    acts.activate(self.target.0);
                }
                kept_pace
            }
            ArcQueue::Asynchronous(_) => false,
        }
    }

    /// Consumer side only.
    pub(crate) fn dequeue(&self, acts: &mut Activations) -> Option<Packet> {
        match &self.queue {
            ArcQueue::Asynchronous(queue) => {
                let packet = queue.dequeue()?;
                if queue.len_estimate() <= self.activation_mark
                    && self.upstream_enabled.load(Ordering::Acquire)
                {
                    acts.data_needed(self.source.0);
                }
                Some(packet)
            }
            ArcQueue::Synchronous(slot) => {
                let packet = slot.take()?;
                if self.upstream_enabled.load(Ordering::Acquire) {
                    acts.data_needed(self.source.0);
                }
                Some(packet)
            }
        }
    }

    /// Consumer side only. Return a dequeued packet to the head.
    pub(crate) fn stash(&self, packet: Packet) {
        match &self.queue {
            ArcQueue::Asynchronous(queue) => queue.stash(packet),
            ArcQueue::Synchronous(slot) => slot.put_back(packet),
        }
    }

    /// Classify the head packet without consuming it. `None` when empty,
    /// `Some(None)` for data at the head. Consumer side only.
    pub(crate) fn head_kind(&self) -> Option<Option<ControlKind>> {
        match &self.queue {
            ArcQueue::Asynchronous(queue) => {
                queue.peek().map(|packet| packet.control().map(|c| c.kind()))
            }
            ArcQueue::Synchronous(slot) => {
                slot.with_head(|head| head.map(|packet| packet.control().map(|c| c.kind())))
            }
        }
    }

    pub fn load_estimate(&self) -> usize {
        match &self.queue {
            ArcQueue::Asynchronous(queue) => queue.len_estimate(),
            ArcQueue::Synchronous(slot) => slot.len(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.load_estimate() > self.boundary
    }

    /// Drop all queued packets. Consumer side only. Returns the count.
    pub(crate) fn sweep(&self) -> usize {
        match &self.queue {
            ArcQueue::Asynchronous(queue) => queue.sweep(),
            ArcQueue::Synchronous(slot) => slot.sweep(),
        }
    }

    /// Move all queued packets onto another arc without notifications. Used
    /// to prime feedback edges.
    pub(crate) fn transfer_to(&self, other: &FlowArc) {
        if let (ArcQueue::Asynchronous(src), ArcQueue::Asynchronous(dst)) =
            (&self.queue, &other.queue)
        {
            while let Some(packet) = src.dequeue() {
                dst.enqueue(packet);
            }
        }
    }

    /// Queue-kind-agnostic delivery used by the push path. Returns `true`
    /// while the arc accepts more, `false` when it is full (asynchronous,
    /// past the boundary) or occupied (synchronous rendezvous). Neither kind
    /// ever drops the packet.
    pub(crate) fn deliver(&self, packet: Packet, acts: &mut Activations) -> bool {
        match &self.queue {
            ArcQueue::Asynchronous(_) => match self.enqueue(packet, acts) {
                Ok(within) => within,
                Err(_) => false,
            },
            ArcQueue::Synchronous(_) => self.offer(packet, acts),
        }
    }

    /// Queue a control marker through the normal notification path. Markers
    /// ignore flow control; they are never dropped on either queue kind.
    pub(crate) fn enqueue_control(&self, ctrl: ControlPacket, acts: &mut Activations) -> Result<()> {
        match &self.queue {
            ArcQueue::Asynchronous(_) => self.enqueue(Packet::Control(ctrl), acts).map(|_| ()),
            ArcQueue::Synchronous(_) => {
                self.offer(Packet::Control(ctrl), acts);
                Ok(())
            }
        }
    }

    pub(crate) fn set_upstream_enabled(&self, enabled: bool) {
        self.upstream_enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn set_downstream_enabled(&self, enabled: bool) {
        self.downstream_enabled.store(enabled, Ordering::Release);
    }
}

impl fmt::Debug for FlowArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowArc")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("boundary", &self.boundary)
            .field("activation_mark", &self.activation_mark)
            .field("load", &self.load_estimate())
            .finish()
    }
}
