// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::core::arcs::FlowArc;
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::ids::{OperatorId, SectionId};
use crate::core::scheduling::activation::{ActivationRouter, Activations};
use crate::core::scheduling::priority::PriorityFn;
use crate::core::state_machine::{OperatorExec, OperatorState};

/// Mailbox traffic for one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionEvent {
    /// Run the operator's state machine.
    Activate(OperatorId),
    /// An input arc crossed its activation mark while filling.
    DataAvailable(OperatorId),
    /// An output arc drained; the producer should refill it.
    DataNeeded(OperatorId),
    /// Begin the section's exit sequence.
    Shutdown,
}

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Drive one operator until it parks. Flushes the turn's notifications
/// after every transition; the unbounded mailboxes make the sends
/// non-blocking, so holding the operator lock across them cannot deadlock.
pub(crate) fn drive_operator(
    op: OperatorId,
    cell: &Mutex<OperatorExec>,
    arcs: &[FlowArc],
    config: &EngineConfig,
    router: &ActivationRouter,
    global_teardown: bool,
) -> Result<()> {
    let mut acts = Activations::new();
    let mut exec = cell.lock();
    loop {
        let ready = exec.step(arcs, config, &mut acts, global_teardown)?;
        router.flush(&mut acts, op);
        debug_assert!(acts.is_empty());
        if !ready {
            return Ok(());
        }
    }
}

/// One worker thread's share of the graph.
pub struct SectionRunner {
    pub(crate) id: SectionId,
    pub(crate) ops: Vec<OperatorId>,
    pub(crate) receiver: Receiver<SectionEvent>,
    pub(crate) cells: Arc<Vec<Arc<Mutex<OperatorExec>>>>,
    pub(crate) arcs: Arc<Vec<FlowArc>>,
    pub(crate) router: Arc<ActivationRouter>,
    pub(crate) config: EngineConfig,
    pub(crate) teardown: Arc<AtomicBool>,
    pub(crate) priority: PriorityFn,
}

impl SectionRunner {
    fn owns(&self, op: OperatorId) -> bool {
        self.ops.contains(&op)
    }

    fn mark_ready(&self, ready: &mut Vec<OperatorId>, op: OperatorId) {
        if self.owns(op) && !ready.contains(&op) {
            ready.push(op);
        }
    }

    fn handle_event(
        &self,
        event: SectionEvent,
        ready: &mut Vec<OperatorId>,
        shutting_down: &mut bool,
    ) {
        match event {
            SectionEvent::Activate(op) => self.mark_ready(ready, op),
            SectionEvent::DataAvailable(op) => {
                let class = self.cells[op.index()].lock().info.class;
                if class.honors_data_available() {
                    self.mark_ready(ready, op);
                }
            }
            SectionEvent::DataNeeded(op) => {
                let class = self.cells[op.index()].lock().info.class;
                if class.honors_data_needed() {
                    self.mark_ready(ready, op);
                }
            }
            SectionEvent::Shutdown => *shutting_down = true,
        }
    }

    /// Pop the ready operator with the highest priority; ties go to the
    /// earliest insertion.
    fn next_ready(&self, ready: &mut Vec<OperatorId>) -> Option<OperatorId> {
        let mut best: Option<(usize, i32)> = None;
        for (i, op) in ready.iter().enumerate() {
            let priority = (self.priority)(&self.cells[op.index()].lock().info);
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((i, priority));
            }
        }
        let (i, _) = best?;
        Some(ready.remove(i))
    }

    fn all_done(&self) -> bool {
        self.ops
            .iter()
            .all(|op| self.cells[op.index()].lock().state() == OperatorState::Done)
    }

    /// The section main loop: drain the mailbox, run the best ready
    /// operator, park on the mailbox when idle. Exits when every owned
    /// operator has reached `Done` after a shutdown request.
    pub fn run(self) -> Result<()> {
        tracing::debug!("[{}] section started with {} operators", self.id, self.ops.len());
        let mut ready: Vec<OperatorId> = Vec::new();
        let mut shutting_down = false;

        loop {
            while let Ok(event) = self.receiver.try_recv() {
                self.handle_event(event, &mut ready, &mut shutting_down);
            }

            if shutting_down || self.teardown.load(Ordering::Acquire) {
                if self.all_done() {
                    break;
                }
                // Teardown markers may already sit on the arcs; make sure
                // every straggler gets a turn to absorb them.
                for op in &self.ops {
                    self.mark_ready(&mut ready, *op);
                }
            }

            if let Some(op) = self.next_ready(&mut ready) {
                if let Err(err) = drive_operator(
                    op,
                    &self.cells[op.index()],
                    &self.arcs,
                    &self.config,
                    &self.router,
                    self.teardown.load(Ordering::Acquire),
                ) {
                    tracing::error!("[{}] operator {} failed: {}", self.id, op, err);
                    return Err(err);
                }
                continue;
            }

            match self.receiver.recv_timeout(IDLE_POLL) {
                Ok(event) => self.handle_event(event, &mut ready, &mut shutting_down),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("[{}] section exited", self.id);
        Ok(())
    }
}
