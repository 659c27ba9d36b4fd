// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use crate::core::ids::{ArcId, OperatorId, OutputPortId};
use crate::core::ports::state::PortState;

pub type FinishListener = Box<dyn FnMut(OutputPortId) + Send>;

/// Producer side of one or more arcs (fan-out broadcasts).
pub struct OutputPort {
    pub(crate) id: OutputPortId,
    pub(crate) name: String,
    pub(crate) owner: OperatorId,
    pub(crate) meta: bool,
    state: PortState,
    restore_state: PortState,
    pub(crate) outgoing: Vec<ArcId>,
    /// Cleared by `finish`: a finished port delivers nothing until the next
    /// computation reactivates it.
    pub(crate) active: bool,
    /// Whether the activation marker for the current computation has been
    /// put on the wire ahead of data.
    pub(crate) announced: bool,
    listeners: Vec<FinishListener>,
}

impl OutputPort {
    pub(crate) fn new(
        id: OutputPortId,
        name: impl Into<String>,
        owner: OperatorId,
        meta: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            meta,
            state: PortState::Init,
            restore_state: PortState::Normal,
            outgoing: Vec::new(),
            active: false,
            announced: false,
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> OutputPortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_meta(&self) -> bool {
        self.meta
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn add_finish_listener(&mut self, listener: FinishListener) {
        self.listeners.push(listener);
    }

    /// Arm the port for a computation. Resets the announcement so the first
    /// push sends a fresh activation marker downstream.
    pub(crate) fn activate(&mut self) {
        if self.state == PortState::Closed {
            return;
        }
        self.state = PortState::Normal;
        self.active = true;
        self.announced = false;
    }

    /// Park the port between computations.
    pub(crate) fn deactivate(&mut self) {
        if self.state == PortState::Init {
            self.state = PortState::Normal;
        }
        self.active = false;
        self.announced = false;
    }

    pub(crate) fn block(&mut self) {
        if self.state != PortState::Blocked && self.state != PortState::Closed {
            self.restore_state = self.state;
            self.state = PortState::Blocked;
        }
    }

    pub(crate) fn unblock(&mut self) {
        if self.state == PortState::Blocked {
            self.state = self.restore_state;
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = PortState::Closed;
        self.active = false;
    }

    /// End the current computation on this port. Fires finish listeners
    /// exactly once per computation; a second call is a no-op.
    pub(crate) fn finish(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.announced = false;
        let id = self.id;
        for listener in &mut self.listeners {
            listener(id);
        }
        true
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("meta", &self.meta)
            .field("state", &self.state)
            .field("outgoing", &self.outgoing)
            .field("active", &self.active)
            .field("announced", &self.announced)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn port() -> OutputPort {
        OutputPort::new(OutputPortId::new(0), "out", OperatorId::new(0), false)
    }

    #[test]
    fn test_finish_fires_listeners_once() {
        let mut p = port();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        p.add_finish_listener(Box::new(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));

        p.activate();
        assert!(p.finish());
        assert!(!p.finish());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Next computation fires again.
        p.activate();
        assert!(p.finish());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_activate_resets_announcement() {
        let mut p = port();
        p.activate();
        p.announced = true;
        p.finish();
        p.activate();
        assert!(!p.announced);
    }

    #[test]
    fn test_closed_port_cannot_activate() {
        let mut p = port();
        p.close();
        p.activate();
        assert!(!p.is_active());
        assert_eq!(p.state(), PortState::Closed);
    }
}
