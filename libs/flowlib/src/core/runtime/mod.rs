// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The engine: turns a [`FlowGraph`] into running operators.
//!
//! Two driving modes share the same state machine code. Single-threaded
//! driving (`prepare`/`run_to_idle`/`teardown`) runs every section's mailbox
//! on the caller's thread and is what most tests use. Threaded driving
//! (`start`/`stop`) spawns one worker per section.

pub mod diagnostics;

pub use diagnostics::{InputDiagnostics, OperatorDiagnostics, OutputDiagnostics};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;

use crate::core::arcs::FlowArc;
use crate::core::config::EngineConfig;
use crate::core::error::{FlowError, Result};
use crate::core::graph::FlowGraph;
use crate::core::ids::{OperatorId, SectionId};
use crate::core::operator::OperatorInfo;
use crate::core::packet::ControlPacket;
use crate::core::ports::{InputPort, OutputPort};
use crate::core::scheduling::section::drive_operator;
use crate::core::scheduling::{
    default_priority, ActivationRouter, Activations, PriorityFn, SectionEvent, SectionRunner,
};
use crate::core::state_machine::{OperatorExec, OperatorState};

/// Expected state trace of the forced teardown walk.
const TEARDOWN_TRACE: [OperatorState; 4] = [
    OperatorState::ExecutingEpilogue,
    OperatorState::CleanUp,
    OperatorState::Done,
    OperatorState::Done,
];

pub struct FlowEngine {
    config: EngineConfig,
    arcs: Arc<Vec<FlowArc>>,
    cells: Arc<Vec<Arc<Mutex<OperatorExec>>>>,
    router: Arc<ActivationRouter>,
    receivers: Vec<Option<Receiver<SectionEvent>>>,
    ops_by_section: Vec<Vec<OperatorId>>,
    prepare_order: Vec<OperatorId>,
    global_teardown: Arc<AtomicBool>,
    workers: Vec<(SectionId, JoinHandle<Result<()>>)>,
    priority: PriorityFn,
    prepared: bool,
}

impl FlowEngine {
    pub fn new(graph: FlowGraph, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let prepare_order = graph.validate_and_order()?;
        let section_count = graph.section_count();

        let FlowGraph {
            operators,
            inputs,
            outputs,
            arcs: arc_builds,
        } = graph;

        let mut arcs = Vec::with_capacity(arc_builds.len());
        for (i, build) in arc_builds.into_iter().enumerate() {
            let id = crate::core::ids::ArcId::new(i);
            if build.synchronous {
                arcs.push(FlowArc::synchronous(id, build.source, build.target, build.kind));
                continue;
            }
            let boundary = build.boundary.unwrap_or(config.arc_boundary);
            let mark = build.activation_mark.unwrap_or(config.activation_mark);
            if mark >= boundary {
                return Err(FlowError::Configuration(format!(
                    "arc {}: activation mark ({}) must be below the boundary ({})",
                    id, mark, boundary
                )));
            }
            arcs.push(FlowArc::asynchronous(
                id,
                build.source,
                build.target,
                build.kind,
                boundary,
                mark,
            ));
        }

        let mut input_arena: Vec<Option<InputPort>> = inputs.into_iter().map(Some).collect();
        let mut output_arena: Vec<Option<OutputPort>> = outputs.into_iter().map(Some).collect();

        let mut senders = Vec::with_capacity(section_count);
        let mut receivers = Vec::with_capacity(section_count);
        for _ in 0..section_count {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(Some(rx));
        }

        let mut sections = Vec::with_capacity(operators.len());
        let mut ops_by_section: Vec<Vec<OperatorId>> = vec![Vec::new(); section_count];
        let mut cells = Vec::with_capacity(operators.len());
        for (i, build) in operators.into_iter().enumerate() {
            let id = OperatorId::new(i);
            sections.push(build.section);
            ops_by_section[build.section.index()].push(id);

            let info = OperatorInfo {
                id,
                name: build.name,
                class: build.class,
                priority: build.priority,
                section: build.section,
                inputs: build.inputs.clone(),
                outputs: build.outputs.clone(),
            };
            let op_inputs = build
                .inputs
                .iter()
                .map(|pid| {
                    input_arena[pid.index()]
                        .take()
                        .ok_or_else(|| FlowError::Graph(format!("input port {} claimed twice", pid)))
                })
                .collect::<Result<Vec<_>>>()?;
            let op_outputs = build
                .outputs
                .iter()
                .map(|pid| {
                    output_arena[pid.index()]
                        .take()
                        .ok_or_else(|| FlowError::Graph(format!("output port {} claimed twice", pid)))
                })
                .collect::<Result<Vec<_>>>()?;
            cells.push(Arc::new(Mutex::new(OperatorExec::new(
                info,
                build.algorithm,
                op_inputs,
                op_outputs,
                config.operator_quota,
            ))));
        }

        let router = Arc::new(ActivationRouter::new(senders, sections));
        tracing::info!(
            "[engine] built: {} operators, {} arcs, {} sections",
            cells.len(),
            arcs.len(),
            section_count
        );

        Ok(Self {
            config,
            arcs: Arc::new(arcs),
            cells: Arc::new(cells),
            router,
            receivers,
            ops_by_section,
            prepare_order,
            global_teardown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            priority: default_priority(),
            prepared: false,
        })
    }

    /// Replace the ready-set ordering policy. Must happen before `start`.
    pub fn set_priority_fn(&mut self, priority: PriorityFn) {
        self.priority = priority;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn operator_state(&self, op: OperatorId) -> OperatorState {
        self.cells[op.index()].lock().state()
    }

    pub fn is_computation_complete(&self, op: OperatorId) -> bool {
        self.cells[op.index()].lock().is_computation_complete()
    }

    pub fn arc_load(&self, arc: crate::core::ids::ArcId) -> usize {
        self.arcs[arc.index()].load_estimate()
    }

    /// Run every operator's `Init` transition in topological order and
    /// queue the initial activations for sources.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        for &op in &self.prepare_order.clone() {
            let ready = {
                let mut acts = Activations::new();
                let mut exec = self.cells[op.index()].lock();
                let ready = exec.step(&self.arcs, &self.config, &mut acts, false)?;
                self.router.flush(&mut acts, op);
                ready
            };
            if ready {
                self.router.send(op, SectionEvent::Activate(op));
            }
        }
        self.prepared = true;
        tracing::debug!("[engine] prepared {} operators", self.prepare_order.len());
        Ok(())
    }

    /// Advance one operator by exactly one transition. Returns whether it
    /// is immediately ready for another.
    pub fn run_step(&self, op: OperatorId) -> Result<bool> {
        let mut acts = Activations::new();
        let mut exec = self.cells[op.index()].lock();
        let ready = exec.step(
            &self.arcs,
            &self.config,
            &mut acts,
            self.global_teardown.load(Ordering::Acquire),
        )?;
        self.router.flush(&mut acts, op);
        Ok(ready)
    }

    fn gate(&self, event: SectionEvent) -> Option<OperatorId> {
        match event {
            SectionEvent::Activate(op) => Some(op),
            SectionEvent::DataAvailable(op) => {
                let class = self.cells[op.index()].lock().info.class;
                class.honors_data_available().then_some(op)
            }
            SectionEvent::DataNeeded(op) => {
                let class = self.cells[op.index()].lock().info.class;
                class.honors_data_needed().then_some(op)
            }
            SectionEvent::Shutdown => None,
        }
    }

    /// Single-threaded driving: process mailbox events across all sections
    /// until the graph quiesces.
    pub fn run_to_idle(&mut self) -> Result<()> {
        let mut ready: Vec<OperatorId> = Vec::new();
        loop {
            for rx in self.receivers.iter().flatten() {
                while let Ok(event) = rx.try_recv() {
                    if let Some(op) = self.gate(event) {
                        if !ready.contains(&op) {
                            ready.push(op);
                        }
                    }
                }
            }
            // Highest priority first; ties go to the earliest insertion,
            // matching the section runner.
            let mut best: Option<(usize, i32)> = None;
            for (i, op) in ready.iter().enumerate() {
                let priority = (self.priority)(&self.cells[op.index()].lock().info);
                if best.is_none_or(|(_, p)| priority > p) {
                    best = Some((i, priority));
                }
            }
            let Some((i, _)) = best else {
                break;
            };
            let op = ready.remove(i);
            drive_operator(
                op,
                &self.cells[op.index()],
                &self.arcs,
                &self.config,
                &self.router,
                self.global_teardown.load(Ordering::Acquire),
            )?;
        }
        Ok(())
    }

    /// Prepare and drive the whole graph to quiescence on this thread.
    pub fn run(&mut self) -> Result<()> {
        self.prepare()?;
        self.run_to_idle()
    }

    fn inject_teardown_markers(&self) -> Result<()> {
        let mut acts = Activations::new();
        for arc in self.arcs.iter() {
            if self.cells[arc.target_operator().index()].lock().state() == OperatorState::Done {
                continue;
            }
            arc.enqueue_control(ControlPacket::Activation, &mut acts)?;
            arc.enqueue_control(ControlPacket::EndOfStream { teardown: true }, &mut acts)?;
        }
        // The forced walk (or the woken sections) will reach every
        // operator; the accumulated events are redundant with that.
        drop(acts);
        Ok(())
    }

    /// The strict teardown protocol, single-threaded.
    ///
    /// Teardown markers are injected on every live arc, then every operator
    /// is forced through its prologue and asserted to trace
    /// `ExecutingEpilogue → CleanUp → Done → Done`. A diverging trace is a
    /// fatal engine bug, not a recoverable condition.
    pub fn teardown(&mut self) -> Result<()> {
        tracing::info!("[engine] teardown started");
        self.global_teardown.store(true, Ordering::Release);
        self.inject_teardown_markers()?;

        for &op in &self.prepare_order.clone() {
            {
                let mut exec = self.cells[op.index()].lock();
                if exec.state() == OperatorState::Done {
                    continue;
                }
                exec.force_state(OperatorState::ExecutingMetaData);
            }
            for expected in TEARDOWN_TRACE {
                let mut acts = Activations::new();
                let found = {
                    let mut exec = self.cells[op.index()].lock();
                    exec.step(&self.arcs, &self.config, &mut acts, true)?;
                    exec.state()
                };
                if found != expected {
                    return Err(FlowError::TeardownAssertion {
                        operator: self.cells[op.index()].lock().info.name.clone(),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    });
                }
            }
        }

        let mut swept = 0;
        for arc in self.arcs.iter() {
            swept += arc.sweep();
        }
        tracing::info!("[engine] teardown complete, swept {} packets", swept);
        Ok(())
    }

    /// Spawn one worker thread per section.
    pub fn start(&mut self) -> Result<()> {
        self.prepare()?;
        for (index, receiver) in self.receivers.iter_mut().enumerate() {
            let Some(receiver) = receiver.take() else {
                return Err(FlowError::Runtime("engine already started".to_string()));
            };
            let section = SectionId(index as u32);
            let runner = SectionRunner {
                id: section,
                ops: self.ops_by_section[index].clone(),
                receiver,
                cells: Arc::clone(&self.cells),
                arcs: Arc::clone(&self.arcs),
                router: Arc::clone(&self.router),
                config: self.config.clone(),
                teardown: Arc::clone(&self.global_teardown),
                priority: Arc::clone(&self.priority),
            };
            let handle = std::thread::Builder::new()
                .name(format!("flow-{}", section))
                .spawn(move || runner.run())
                .map_err(|err| FlowError::Runtime(format!("failed to spawn section: {}", err)))?;
            self.workers.push((section, handle));
        }
        tracing::info!("[engine] started {} sections", self.workers.len());
        Ok(())
    }

    /// Stop the worker threads: raise the teardown flag, put markers on
    /// every live arc, wake all sections and join them.
    pub fn stop(&mut self) -> Result<()> {
        self.global_teardown.store(true, Ordering::Release);
        self.inject_teardown_markers()?;
        for ops in &self.ops_by_section {
            for &op in ops {
                self.router.send(op, SectionEvent::Activate(op));
            }
        }
        self.router.broadcast(SectionEvent::Shutdown);

        let mut first_error = None;
        for (section, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!("[engine] section {} failed: {}", section, err);
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(FlowError::Runtime(format!(
                        "section {} panicked",
                        section
                    )));
                }
            }
        }

        let mut swept = 0;
        for arc in self.arcs.iter() {
            swept += arc.sweep();
        }
        tracing::info!("[engine] stopped, swept {} packets", swept);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Snapshot every operator for stall debugging. Also logs the dump so
    /// it lands in the trace next to whatever got stuck.
    pub fn deadlock_analysis(&self) -> Vec<OperatorDiagnostics> {
        let dump: Vec<OperatorDiagnostics> = self
            .cells
            .iter()
            .map(|cell| {
                let exec = cell.lock();
                OperatorDiagnostics {
                    operator: exec.info.name.clone(),
                    state: exec.state(),
                    backoff: exec.backoff(),
                    quota_used: exec.quota_used(),
                    inputs: exec
                        .inputs
                        .iter()
                        .map(|port| InputDiagnostics {
                            name: port.name().to_string(),
                            state: port.state(),
                            eos_seen: port.eos_seen(),
                            arc_load: port
                                .incoming
                                .map(|arc| self.arcs[arc.index()].load_estimate()),
                        })
                        .collect(),
                    outputs: exec
                        .outputs
                        .iter()
                        .map(|port| OutputDiagnostics {
                            name: port.name().to_string(),
                            state: port.state(),
                            active: port.is_active(),
                            arc_loads: port
                                .outgoing
                                .iter()
                                .map(|arc| self.arcs[arc.index()].load_estimate())
                                .collect(),
                        })
                        .collect(),
                    errors: exec.recorded_errors.clone(),
                }
            })
            .collect();

        match serde_json::to_string_pretty(&dump) {
            Ok(json) => tracing::warn!("[engine] deadlock analysis:\n{}", json),
            Err(err) => tracing::warn!("[engine] deadlock analysis serialization failed: {}", err),
        }
        dump
    }
}
