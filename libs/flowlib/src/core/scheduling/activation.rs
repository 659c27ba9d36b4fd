// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::Sender;

use crate::core::ids::{OperatorId, SectionId};
use crate::core::scheduling::section::SectionEvent;

/// Pending scheduling side effects of one operator turn.
///
/// Arc enqueues/dequeues and the epilogue record their notifications here
/// instead of touching the mailboxes directly; the set is flushed through the
/// [`ActivationRouter`] after the turn, outside the operator lock. Inserts
/// deduplicate, so a burst of enqueues onto one arc costs one event.
#[derive(Debug, Default)]
pub struct Activations {
    activate: Vec<OperatorId>,
    data_available: Vec<OperatorId>,
    data_needed: Vec<OperatorId>,
    reschedule: bool,
}

fn push_unique(set: &mut Vec<OperatorId>, op: OperatorId) {
    if !set.contains(&op) {
        set.push(op);
    }
}

impl Activations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake a downstream consumer: a packet landed on one of its arcs.
    pub fn activate(&mut self, op: OperatorId) {
        push_unique(&mut self.activate, op);
    }

    /// A consumer's arc crossed the activation mark while filling.
    pub fn data_available(&mut self, op: OperatorId) {
        push_unique(&mut self.data_available, op);
    }

    /// A producer's outgoing arc drained to the activation mark.
    pub fn data_needed(&mut self, op: OperatorId) {
        push_unique(&mut self.data_needed, op);
    }

    /// Re-enqueue the operator that just ran (quota exhaustion, meta-output
    /// completion loop).
    pub fn reschedule(&mut self) {
        self.reschedule = true;
    }

    pub fn is_empty(&self) -> bool {
        self.activate.is_empty()
            && self.data_available.is_empty()
            && self.data_needed.is_empty()
            && !self.reschedule
    }
}

/// Routes flushed activations to the owning section's mailbox.
pub struct ActivationRouter {
    /// Mailbox senders, indexed by section.
    senders: Vec<Sender<SectionEvent>>,
    /// Section assignment, indexed by operator.
    sections: Vec<SectionId>,
}

impl ActivationRouter {
    pub fn new(senders: Vec<Sender<SectionEvent>>, sections: Vec<SectionId>) -> Self {
        Self { senders, sections }
    }

    pub fn section_of(&self, op: OperatorId) -> SectionId {
        self.sections[op.index()]
    }

    pub fn section_count(&self) -> usize {
        self.senders.len()
    }

    /// Deliver an event to the section owning `op`. Send failures mean the
    /// section already exited, which only happens after teardown; the event
    /// is moot then.
    pub fn send(&self, op: OperatorId, event: SectionEvent) {
        let section = self.sections[op.index()];
        let _ = self.senders[section.index()].send(event);
    }

    /// Broadcast to every section mailbox.
    pub fn broadcast(&self, event: SectionEvent) {
        for sender in &self.senders {
            let _ = sender.send(event.clone());
        }
    }

    /// Drain an [`Activations`] set into the mailboxes. `origin` is the
    /// operator whose turn produced the set.
    pub fn flush(&self, acts: &mut Activations, origin: OperatorId) {
        for op in acts.activate.drain(..) {
            self.send(op, SectionEvent::Activate(op));
        }
        for op in acts.data_available.drain(..) {
            self.send(op, SectionEvent::DataAvailable(op));
        }
        for op in acts.data_needed.drain(..) {
            self.send(op, SectionEvent::DataNeeded(op));
        }
        if std::mem::take(&mut acts.reschedule) {
            self.send(origin, SectionEvent::Activate(origin));
        }
    }
}
