// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The operator abstraction: user algorithms and the context they run in.

use serde::Serialize;

use crate::core::arcs::FlowArc;
use crate::core::error::{FlowError, Result};
use crate::core::ids::{InputPortId, OperatorId, OutputPortId, SectionId};
use crate::core::packet::{ControlPacket, Packet};
use crate::core::ports::{ControlResponse, InputPort, OutputPort, PortState};
use crate::core::scheduling::{Activations, Quota};
use crate::core::state_machine::BackoffReason;

/// Scheduling class of an operator.
///
/// System sources have no upstream and live at the graph edge; system sinks
/// have no downstream. The class decides which notification directions the
/// scheduler honors for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperatorClass {
    User,
    SystemSource,
    SystemSink,
}

impl OperatorClass {
    /// Wakes for downstream demand: user operators and system sources can
    /// produce more when a consumer drains an arc.
    pub fn honors_data_needed(self) -> bool {
        matches!(self, OperatorClass::User | OperatorClass::SystemSource)
    }

    /// Wakes for upstream supply: user operators and system sinks can
    /// consume when an arc crosses its activation mark.
    pub fn honors_data_available(self) -> bool {
        matches!(self, OperatorClass::User | OperatorClass::SystemSink)
    }

    pub fn is_system(self) -> bool {
        !matches!(self, OperatorClass::User)
    }
}

/// Static description of an operator, fixed at graph build time.
#[derive(Debug, Clone)]
pub struct OperatorInfo {
    pub id: OperatorId,
    pub name: String,
    pub class: OperatorClass,
    /// Ready-set ordering hint; higher runs first. Defaults to -1.
    pub priority: i32,
    pub section: SectionId,
    pub inputs: Vec<InputPortId>,
    pub outputs: Vec<OutputPortId>,
}

/// A user computation hosted by an operator.
///
/// `prepare` runs once in the prologue, `execute` once per scheduled round,
/// `cleanup` once during teardown. All three see the same [`OperatorContext`]
/// port surface.
pub trait Algorithm: Send {
    fn prepare(&mut self, _ctx: &mut OperatorContext<'_>) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()>;

    fn cleanup(&mut self, _ctx: &mut OperatorContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Explicit completion claim. `Some(done)` overrides the engine's
    /// activity-based inference; `None` (the default) leaves the decision to
    /// the engine.
    fn is_done(&self) -> Option<bool> {
        None
    }

    /// Whether the most recent `execute` consumed the final packet it will
    /// ever need. Consulted by live-lock detection.
    fn was_last_packet(&self) -> bool {
        false
    }
}

/// Port surface handed to an [`Algorithm`] during one scheduling turn.
///
/// Every poll, push and decline charges one quantum against the turn's
/// quota; once the quota is spent, polls return `None` and pushes report
/// `false`, telling the algorithm to wind down the round.
pub struct OperatorContext<'a> {
    pub(crate) info: &'a OperatorInfo,
    pub(crate) inputs: &'a mut [InputPort],
    pub(crate) outputs: &'a mut [OutputPort],
    pub(crate) arcs: &'a [FlowArc],
    pub(crate) quota: &'a mut Quota,
    pub(crate) backoff: &'a mut Option<BackoffReason>,
    pub(crate) output_activity: &'a mut bool,
    pub(crate) acts: &'a mut Activations,
}

impl<'a> OperatorContext<'a> {
    pub fn info(&self) -> &OperatorInfo {
        self.info
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the input has seen end-of-stream.
    pub fn is_eos(&self, input: usize) -> bool {
        self.inputs[input].eos_seen
    }

    /// Whether a data packet sits at the head of the input's arc.
    pub fn has_data(&self, input: usize) -> bool {
        let Some(arc_id) = self.inputs[input].incoming else {
            return false;
        };
        matches!(self.arcs[arc_id.index()].head_kind(), Some(None))
    }

    fn set_backoff(&mut self, reason: BackoffReason) {
        match *self.backoff {
            Some(current) if current.rank() >= reason.rank() => {}
            _ => *self.backoff = Some(reason),
        }
    }

    /// Dequeue the next data packet from an input.
    ///
    /// Control markers ahead of the data are absorbed in passing: activation
    /// markers set the pending flag, end-of-stream closes the port, priority
    /// tags are parked for [`poll_priority`](Self::poll_priority), custom
    /// packets go to the port's handler. `Ok(None)` means no data this turn;
    /// the recorded backoff reason tells the epilogue why.
    pub fn poll_data(&mut self, input: usize) -> Result<Option<Packet>> {
        if !self.quota.charge() {
            return Ok(None);
        }
        let port = &mut self.inputs[input];
        if port.state() != PortState::Normal {
            self.set_backoff(BackoffReason::NullDequeue);
            return Ok(None);
        }
        let Some(arc_id) = port.incoming else {
            self.set_backoff(BackoffReason::NullDequeue);
            return Ok(None);
        };
        let arcs = self.arcs;
        let arc = &arcs[arc_id.index()];
        loop {
            let port = &mut self.inputs[input];
            match arc.dequeue(self.acts) {
                None => {
                    self.set_backoff(BackoffReason::NullDequeue);
                    return Ok(None);
                }
                Some(packet @ Packet::Data(_)) => return Ok(Some(packet)),
                Some(Packet::Control(ctrl)) => match ctrl {
                    ControlPacket::Activation => {
                        port.pending_activation = true;
                    }
                    ControlPacket::EndOfStream { teardown } => {
                        port.record_eos(teardown);
                        arc.set_upstream_enabled(false);
                        self.set_backoff(BackoffReason::NullDequeue);
                        return Ok(None);
                    }
                    ControlPacket::Priority { tag } => {
                        port.priority_backlog.push(tag);
                    }
                    ControlPacket::Custom { .. } => {
                        let name = &self.info.name;
                        match port.handle_custom(&ctrl, name)? {
                            ControlResponse::Handled | ControlResponse::DequeueNext => {}
                            ControlResponse::NotMyBusiness => {
                                arc.stash(Packet::Control(ctrl));
                                self.set_backoff(BackoffReason::MetaPriority);
                                return Ok(None);
                            }
                        }
                    }
                },
            }
        }
    }

    /// Broadcast a packet on an output.
    ///
    /// Delivery always happens; the return value is flow control. `Ok(false)`
    /// means at least one arc is past its boundary (the port blocks and the
    /// turn should wind down) or the quota is spent.
    pub fn push_data(&mut self, output: usize, packet: Packet) -> Result<bool> {
        let within_quota = self.quota.charge();
        let port = &mut self.outputs[output];
        if !port.active {
            return Err(FlowError::Runtime(format!(
                "push on inactive output '{}' of operator '{}'",
                port.name, self.info.name
            )));
        }

        // First data of a computation rides behind an activation marker.
        if !port.announced {
            for arc_id in &port.outgoing {
                self.arcs[arc_id.index()]
                    .enqueue_control(ControlPacket::Activation, self.acts)?;
            }
            port.announced = true;
        }

        let mut accepted = true;
        let count = port.outgoing.len();
        let mut packet = Some(packet);
        for (i, arc_id) in port.outgoing.iter().enumerate() {
            let item = if i + 1 < count {
                packet.as_ref().map(|p| p.deep_copy())
            } else {
                packet.take()
            };
            let Some(item) = item else { break };
            if !self.arcs[arc_id.index()].deliver(item, self.acts) {
                accepted = false;
            }
        }
        *self.output_activity = true;

        if !accepted {
            self.outputs[output].block();
            self.set_backoff(BackoffReason::FullArc);
            return Ok(false);
        }
        Ok(accepted && within_quota)
    }

    /// End the current computation on an output: an end-of-stream marker
    /// goes downstream and finish listeners fire. Idempotent within a
    /// computation.
    pub fn finish_output(&mut self, output: usize) -> Result<()> {
        let port = &mut self.outputs[output];
        if !port.finish() {
            return Ok(());
        }
        for arc_id in &port.outgoing {
            self.arcs[arc_id.index()]
                .enqueue_control(ControlPacket::EndOfStream { teardown: false }, self.acts)?;
        }
        Ok(())
    }

    /// Consume the next priority tag on an input, if one is pending or at
    /// the head of the arc. Works even while the port is blocked.
    pub fn poll_priority(&mut self, input: usize) -> Result<Option<u32>> {
        if !self.quota.charge() {
            return Ok(None);
        }
        let port = &mut self.inputs[input];
        if !port.priority_backlog.is_empty() {
            return Ok(Some(port.priority_backlog.remove(0)));
        }
        let Some(arc_id) = port.incoming else {
            return Ok(None);
        };
        let arc = &self.arcs[arc_id.index()];
        if arc.head_kind() == Some(Some(crate::core::packet::ControlKind::Priority)) {
            if let Some(Packet::Control(ControlPacket::Priority { tag })) = arc.dequeue(self.acts) {
                return Ok(Some(tag));
            }
        }
        Ok(None)
    }

    /// Suspend data intake on an input; priority packets stay visible.
    pub fn block_input(&mut self, input: usize) {
        self.inputs[input].block();
    }

    /// Restore the state the input was in when it was blocked.
    pub fn unblock_input(&mut self, input: usize) {
        self.inputs[input].unblock();
    }

    /// Voluntarily end the round without consuming or producing.
    pub fn decline(&mut self) {
        self.quota.charge();
        self.set_backoff(BackoffReason::OperatorDecision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_wakeup_policy() {
        assert!(OperatorClass::User.honors_data_needed());
        assert!(OperatorClass::User.honors_data_available());
        assert!(OperatorClass::SystemSource.honors_data_needed());
        assert!(!OperatorClass::SystemSource.honors_data_available());
        assert!(!OperatorClass::SystemSink.honors_data_needed());
        assert!(OperatorClass::SystemSink.honors_data_available());
        assert!(OperatorClass::SystemSink.is_system());
        assert!(!OperatorClass::User.is_system());
    }
}
