// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The per-operator execution state machine.
//!
//! Each scheduled turn advances an operator by exactly one transition, so a
//! section thread interleaves fairly between its operators. The cycle of a
//! healthy operator is:
//!
//! ```text
//! Init → WaitingForComputation → ExecutingMetaData → Executing
//!      → ExecutingEpilogue → { Waiting | FinishingComputation
//!                            | WaitingForComputation | CleanUp } → ... → Done
//! ```
//!
//! `ExecutingUserOp` is only ever observed from another thread while the
//! algorithm runs; a step request in that state is a reentrancy bug.

use std::fmt;

use serde::Serialize;

use crate::core::arcs::FlowArc;
use crate::core::config::EngineConfig;
use crate::core::error::{FlowError, Result};
use crate::core::operator::{Algorithm, OperatorContext, OperatorInfo};
use crate::core::packet::{ControlKind, ControlPacket, Packet};
use crate::core::ports::{ControlResponse, InputPort, OutputPort};
use crate::core::scheduling::{Activations, Quota};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperatorState {
    Init,
    WaitingForComputation,
    ExecutingMetaData,
    Executing,
    ExecutingUserOp,
    ExecutingEpilogue,
    FinishingComputation,
    Waiting,
    CleanUp,
    Done,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorState::Init => "Init",
            OperatorState::WaitingForComputation => "WaitingForComputation",
            OperatorState::ExecutingMetaData => "ExecutingMetaData",
            OperatorState::Executing => "Executing",
            OperatorState::ExecutingUserOp => "ExecutingUserOp",
            OperatorState::ExecutingEpilogue => "ExecutingEpilogue",
            OperatorState::FinishingComputation => "FinishingComputation",
            OperatorState::Waiting => "Waiting",
            OperatorState::CleanUp => "CleanUp",
            OperatorState::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Why the last round ended without progress. Recoverable by design; fatal
/// conditions go through [`FlowError`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackoffReason {
    /// An input poll came up empty.
    NullDequeue,
    /// An output arc crossed its boundary.
    FullArc,
    /// The algorithm declined the round.
    OperatorDecision,
    /// A control packet needs attention before data can flow.
    MetaPriority,
}

impl BackoffReason {
    /// Severity for merging: a more actionable reason is never overwritten
    /// by a weaker one within a round.
    pub(crate) fn rank(self) -> u8 {
        match self {
            BackoffReason::NullDequeue => 0,
            BackoffReason::OperatorDecision => 1,
            BackoffReason::FullArc => 2,
            BackoffReason::MetaPriority => 3,
        }
    }
}

impl fmt::Display for BackoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackoffReason::NullDequeue => "NullDequeue",
            BackoffReason::FullArc => "FullArc",
            BackoffReason::OperatorDecision => "OperatorDecision",
            BackoffReason::MetaPriority => "MetaPriority",
        };
        f.write_str(s)
    }
}

/// An operator's full runtime: the algorithm plus everything the state
/// machine tracks between turns. One cell per operator, locked for the
/// duration of each turn by the owning section.
pub struct OperatorExec {
    pub(crate) info: OperatorInfo,
    algorithm: Box<dyn Algorithm>,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    state: OperatorState,
    quota: Quota,
    backoff: Option<BackoffReason>,
    /// The algorithm ran at least once in the current computation.
    executed: bool,
    /// Teardown arrived before the algorithm could run this computation.
    execution_suppressed: bool,
    /// A push happened in the current scheduled round.
    output_activity: bool,
    /// The last execute round put at least one notification on the wire.
    /// Checked by live-lock detection; the accumulator itself is flushed
    /// after every transition and is useless for that by epilogue time.
    round_notified: bool,
    /// At least one computation ran to completion.
    completed_once: bool,
    /// Local teardown latch, set by a teardown end-of-stream marker or the
    /// global flag.
    teardown: bool,
    pub(crate) recorded_errors: Vec<String>,
}

impl OperatorExec {
    pub(crate) fn new(
        info: OperatorInfo,
        algorithm: Box<dyn Algorithm>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
        quota_limit: u32,
    ) -> Self {
        Self {
            info,
            algorithm,
            inputs,
            outputs,
            state: OperatorState::Init,
            quota: Quota::new(quota_limit),
            backoff: None,
            executed: false,
            execution_suppressed: false,
            output_activity: false,
            round_notified: false,
            completed_once: false,
            teardown: false,
            recorded_errors: Vec::new(),
        }
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    pub fn backoff(&self) -> Option<BackoffReason> {
        self.backoff
    }

    pub fn quota_used(&self) -> u32 {
        self.quota.used()
    }

    pub(crate) fn force_state(&mut self, state: OperatorState) {
        self.state = state;
    }

    /// Advance by exactly one transition. Returns whether the operator is
    /// immediately ready for another step; `false` means it parked and will
    /// wait for a mailbox event.
    pub(crate) fn step(
        &mut self,
        arcs: &[FlowArc],
        config: &EngineConfig,
        acts: &mut Activations,
        global_teardown: bool,
    ) -> Result<bool> {
        if global_teardown {
            self.teardown = true;
        }
        match self.state {
            OperatorState::Init => self.step_init(arcs, acts),
            OperatorState::WaitingForComputation => self.step_waiting_for_computation(arcs, acts),
            OperatorState::ExecutingMetaData => self.step_metadata(arcs, acts),
            OperatorState::Executing => self.step_execute(arcs, config, acts),
            OperatorState::ExecutingUserOp => Err(FlowError::InvalidTransition {
                operator: self.info.name.clone(),
                detail: "step requested while the algorithm is executing".to_string(),
            }),
            OperatorState::ExecutingEpilogue => self.step_epilogue(arcs, acts),
            OperatorState::FinishingComputation => {
                self.state = OperatorState::Executing;
                Ok(true)
            }
            OperatorState::Waiting => {
                self.quota.refill();
                self.backoff = None;
                // Fresh round: the completion inference in the epilogue
                // looks at this round's pushes, not the whole computation's.
                self.output_activity = false;
                for output in &mut self.outputs {
                    output.unblock();
                }
                self.state = OperatorState::ExecutingMetaData;
                Ok(true)
            }
            OperatorState::CleanUp => self.step_cleanup(arcs, acts),
            OperatorState::Done => Ok(false),
        }
    }

    fn run_algorithm<F>(&mut self, arcs: &[FlowArc], acts: &mut Activations, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Algorithm, &mut OperatorContext<'_>) -> Result<()>,
    {
        let Self {
            info,
            algorithm,
            inputs,
            outputs,
            quota,
            backoff,
            output_activity,
            ..
        } = self;
        let mut ctx = OperatorContext {
            info,
            inputs,
            outputs,
            arcs,
            quota,
            backoff,
            output_activity,
            acts,
        };
        f(algorithm.as_mut(), &mut ctx)
    }

    fn step_init(&mut self, arcs: &[FlowArc], acts: &mut Activations) -> Result<bool> {
        for input in &mut self.inputs {
            input.set_normal();
        }
        for output in &mut self.outputs {
            output.deactivate();
        }
        self.run_algorithm(arcs, acts, |alg, ctx| alg.prepare(ctx))?;
        tracing::debug!("[{}] prepared", self.info.name);
        self.state = OperatorState::WaitingForComputation;
        // Sources have nothing to wait for.
        Ok(self.inputs.is_empty())
    }

    /// Reset per-computation flags and arm the ports for a fresh round.
    fn begin_computation(&mut self) {
        self.executed = false;
        self.execution_suppressed = false;
        self.output_activity = false;
        self.round_notified = false;
        self.backoff = None;
        self.quota.refill();
        for input in &mut self.inputs {
            input.reset_round();
        }
        for output in &mut self.outputs {
            output.activate();
        }
        self.state = OperatorState::ExecutingMetaData;
    }

    fn step_waiting_for_computation(
        &mut self,
        arcs: &[FlowArc],
        _acts: &mut Activations,
    ) -> Result<bool> {
        // Teardown reaches parked operators through the prologue so any
        // markers on the arcs are still absorbed.
        if self.teardown {
            self.state = OperatorState::ExecutingMetaData;
            return Ok(true);
        }
        if self.inputs.is_empty() {
            // A source that finished a computation must not restart: it
            // would announce and finish its outputs all over again. The
            // first computation always runs, even when the algorithm starts
            // out done, so an empty source still closes its outputs.
            if self.completed_once && self.algorithm.is_done() == Some(true) {
                return Ok(false);
            }
            self.begin_computation();
            return Ok(true);
        }
        let woken = self.inputs.iter().any(|port| {
            if port.pending_activation {
                return true;
            }
            let Some(arc_id) = port.incoming else {
                return false;
            };
            matches!(
                arcs[arc_id.index()].head_kind(),
                Some(Some(ControlKind::Activation)) | Some(Some(ControlKind::EndOfStream))
            )
        });
        if woken {
            self.begin_computation();
            Ok(true)
        } else {
            // Spurious wake; stay parked.
            Ok(false)
        }
    }

    /// The prologue: drain control markers from the head of every input arc
    /// until data (or nothing) is left, then dispatch to execution or, when
    /// a teardown marker arrived, straight to the epilogue.
    fn step_metadata(&mut self, arcs: &[FlowArc], acts: &mut Activations) -> Result<bool> {
        for port in &mut self.inputs {
            let Some(arc_id) = port.incoming else {
                continue;
            };
            let arc = &arcs[arc_id.index()];
            loop {
                match arc.head_kind() {
                    None | Some(None) => break,
                    Some(Some(_)) => {}
                }
                let Some(Packet::Control(ctrl)) = arc.dequeue(acts) else {
                    break;
                };
                match ctrl {
                    ControlPacket::Activation => {
                        port.pending_activation = true;
                    }
                    ControlPacket::EndOfStream { teardown } => {
                        port.record_eos(teardown);
                        // A finished producer has no more to give; stop
                        // asking it for data.
                        arc.set_upstream_enabled(false);
                        if teardown {
                            self.teardown = true;
                        }
                    }
                    ControlPacket::Priority { tag } => {
                        port.priority_backlog.push(tag);
                    }
                    ControlPacket::Custom { .. } => {
                        match port.handle_custom(&ctrl, &self.info.name)? {
                            ControlResponse::Handled | ControlResponse::DequeueNext => {}
                            ControlResponse::NotMyBusiness => {
                                // Leave it for the algorithm's poll.
                                arc.stash(Packet::Control(ctrl));
                                break;
                            }
                        }
                    }
                }
            }
        }

        if self.teardown {
            tracing::debug!("[{}] teardown marker absorbed, suppressing execution", self.info.name);
            self.execution_suppressed = true;
            self.state = OperatorState::ExecutingEpilogue;
        } else {
            self.state = OperatorState::Executing;
        }
        Ok(true)
    }

    fn step_execute(
        &mut self,
        arcs: &[FlowArc],
        config: &EngineConfig,
        acts: &mut Activations,
    ) -> Result<bool> {
        tracing::trace!("[{}] executing", self.info.name);
        self.state = OperatorState::ExecutingUserOp;
        let result = self.run_algorithm(arcs, acts, |alg, ctx| alg.execute(ctx));
        self.state = OperatorState::ExecutingEpilogue;
        self.executed = true;
        self.round_notified = !acts.is_empty();
        if let Err(err) = result {
            if config.record_algorithm_errors {
                tracing::warn!("[{}] algorithm error recorded: {}", self.info.name, err);
                self.recorded_errors.push(err.to_string());
                self.backoff = Some(BackoffReason::OperatorDecision);
            } else {
                return Err(err);
            }
        }
        Ok(true)
    }

    /// Completion test. All upstream-controlled inputs must have closed;
    /// beyond that the algorithm's explicit claim wins, falling back to "no
    /// output activity in a round that was allowed to execute".
    pub(crate) fn is_computation_complete(&self) -> bool {
        let inputs_done = self
            .inputs
            .iter()
            .filter(|port| port.upstream_controlled && port.incoming.is_some())
            .all(|port| port.eos_seen);
        if !inputs_done {
            return false;
        }
        match self.algorithm.is_done() {
            Some(done) => done,
            None => !self.output_activity && !self.execution_suppressed,
        }
    }

    fn only_meta_outputs(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|port| port.meta)
    }

    fn inputs_complete(&self) -> bool {
        self.inputs
            .iter()
            .filter(|port| port.upstream_controlled && port.incoming.is_some())
            .all(|port| port.eos_seen)
    }

    /// The five-way verdict on a finished round, checked in order.
    fn step_epilogue(&mut self, arcs: &[FlowArc], acts: &mut Activations) -> Result<bool> {
        // 1. Teardown trumps everything.
        if self.teardown {
            self.state = OperatorState::CleanUp;
            return Ok(true);
        }

        // 2. Budget spent: yield the section, come back with a fresh quota.
        if self.quota.is_exhausted() {
            tracing::trace!("[{}] quota exhausted, rescheduling", self.info.name);
            acts.reschedule();
            self.state = OperatorState::Waiting;
            return Ok(false);
        }

        // 3. Nothing left to compute: finish the outputs and park until the
        //    next computation is announced.
        if self.is_computation_complete() {
            tracing::debug!("[{}] computation complete", self.info.name);
            self.finish_outputs(arcs, acts, false)?;
            for output in &mut self.outputs {
                output.deactivate();
            }
            self.completed_once = true;
            self.state = OperatorState::WaitingForComputation;
            return Ok(false);
        }

        // 4. Inputs are done but meta-only outputs keep the operator looping
        //    until its algorithm claims completion.
        if self.inputs_complete() && self.only_meta_outputs() {
            acts.reschedule();
            self.state = OperatorState::FinishingComputation;
            return Ok(false);
        }

        // 5. Recoverable backoff.
        match self.backoff.take() {
            Some(BackoffReason::FullArc) | Some(BackoffReason::MetaPriority) => {
                acts.reschedule();
                self.state = OperatorState::Waiting;
                Ok(false)
            }
            _ => {
                // NullDequeue, OperatorDecision or a round that did nothing
                // at all: park, after reactivating pending meta inputs.
                if !self.round_notified
                    && !self.info.class.is_system()
                    && self.executed
                    && self.algorithm.was_last_packet()
                {
                    return Err(FlowError::LiveLock {
                        operator: self.info.name.clone(),
                    });
                }
                for port in &self.inputs {
                    if !port.meta || port.eos_seen {
                        continue;
                    }
                    if let Some(arc_id) = port.incoming {
                        acts.data_needed(arcs[arc_id.index()].source_operator());
                    }
                }
                self.state = OperatorState::Waiting;
                Ok(false)
            }
        }
    }

    /// Send end-of-stream downstream and fire finish listeners on every
    /// still-active output.
    fn finish_outputs(
        &mut self,
        arcs: &[FlowArc],
        acts: &mut Activations,
        teardown: bool,
    ) -> Result<()> {
        for output in &mut self.outputs {
            // Downstream must wake even if no data was ever announced.
            let announce = !output.announced && output.active;
            if !output.finish() {
                continue;
            }
            for arc_id in &output.outgoing {
                let arc = &arcs[arc_id.index()];
                if announce {
                    arc.enqueue_control(ControlPacket::Activation, acts)?;
                }
                arc.enqueue_control(ControlPacket::EndOfStream { teardown }, acts)?;
            }
        }
        Ok(())
    }

    fn step_cleanup(&mut self, arcs: &[FlowArc], acts: &mut Activations) -> Result<bool> {
        self.run_algorithm(arcs, acts, |alg, ctx| alg.cleanup(ctx))?;
        let teardown = self.teardown;
        self.finish_outputs(arcs, acts, teardown)?;
        for output in &mut self.outputs {
            output.close();
        }
        for input in &mut self.inputs {
            input.close();
        }
        tracing::info!("[{}] done", self.info.name);
        self.state = OperatorState::Done;
        Ok(false)
    }
}

impl fmt::Debug for OperatorExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorExec")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .field("executed", &self.executed)
            .field("teardown", &self.teardown)
            .finish()
    }
}
