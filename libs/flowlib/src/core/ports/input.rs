// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use crate::core::error::{FlowError, Result};
use crate::core::ids::{ArcId, InputPortId, OperatorId};
use crate::core::packet::ControlPacket;
use crate::core::ports::state::PortState;

/// What a custom control handler did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    /// Consumed; keep dequeuing.
    Handled,
    /// Not addressed to this layer; the packet is returned to the operator
    /// turn and the port backs off.
    NotMyBusiness,
    /// Consumed and the handler wants the next packet immediately.
    DequeueNext,
}

pub type CustomHandler = Box<dyn FnMut(&ControlPacket) -> ControlResponse + Send>;

/// Consumer side of an arc.
pub struct InputPort {
    pub(crate) id: InputPortId,
    pub(crate) name: String,
    pub(crate) owner: OperatorId,
    /// Meta ports carry control traffic only and are skimmed in the
    /// prologue, never polled by the algorithm.
    pub(crate) meta: bool,
    /// Upstream-controlled ports participate in completion detection; a
    /// complementary port (side input) does not hold its operator open.
    pub(crate) upstream_controlled: bool,
    state: PortState,
    restore_state: PortState,
    pub(crate) incoming: Option<ArcId>,
    pub(crate) eos_seen: bool,
    pub(crate) eos_teardown: bool,
    /// An activation marker was skimmed since the last round reset.
    pub(crate) pending_activation: bool,
    /// Priority tags skimmed out of band, drained by `poll_priority`.
    pub(crate) priority_backlog: Vec<u32>,
    custom_handler: Option<CustomHandler>,
}

impl InputPort {
    pub(crate) fn new(
        id: InputPortId,
        name: impl Into<String>,
        owner: OperatorId,
        meta: bool,
        upstream_controlled: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            meta,
            upstream_controlled,
            state: PortState::Init,
            restore_state: PortState::Normal,
            incoming: None,
            eos_seen: false,
            eos_teardown: false,
            pending_activation: false,
            priority_backlog: Vec::new(),
            custom_handler: None,
        }
    }

    pub fn id(&self) -> InputPortId {
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

    pub fn eos_seen(&self) -> bool {
        self.eos_seen
    }

    pub(crate) fn bind_arc(&mut self, arc: ArcId) -> Result<()> {
        if self.incoming.is_some() {
            return Err(FlowError::PortAlreadyConnected {
                port: self.name.clone(),
            });
        }
        self.incoming = Some(arc);
        Ok(())
    }

    pub(crate) fn set_custom_handler(&mut self, handler: CustomHandler) {
        self.custom_handler = Some(handler);
    }

    pub(crate) fn set_normal(&mut self) {
        if self.state == PortState::Init {
            self.state = PortState::Normal;
        }
    }

    /// Suspend data interactions, remembering what to restore on unblock.
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
    }

    /// Record an end-of-stream marker. The port closes; once every
    /// upstream-controlled input has closed the operator can complete.
    pub(crate) fn record_eos(&mut self, teardown: bool) {
        self.eos_seen = true;
        self.eos_teardown |= teardown;
        self.close();
    }

    /// Dispatch a `Custom` packet to the registered handler. A port with no
    /// handler receiving one is a graph construction bug.
    pub(crate) fn handle_custom(
        &mut self,
        packet: &ControlPacket,
        operator: &str,
    ) -> Result<ControlResponse> {
        match self.custom_handler.as_mut() {
            Some(handler) => Ok(handler(packet)),
            None => Err(FlowError::UnhandledControlPacket {
                operator: operator.to_string(),
                port: self.name.clone(),
                kind: packet.kind().to_string(),
            }),
        }
    }

    /// Clear per-round flags at the start of a computation.
    pub(crate) fn reset_round(&mut self) {
        self.pending_activation = false;
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("meta", &self.meta)
            .field("upstream_controlled", &self.upstream_controlled)
            .field("state", &self.state)
            .field("incoming", &self.incoming)
            .field("eos_seen", &self.eos_seen)
            .field("pending_activation", &self.pending_activation)
            .finish()
    }
}
