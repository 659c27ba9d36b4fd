// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Graph construction and validation.
//!
//! [`FlowGraph`] is the build-time shape of a dataflow program: operators,
//! their ports, and the arcs between them. It is consumed by
//! [`FlowEngine::new`](crate::core::runtime::FlowEngine::new), which
//! validates it (forward-edge acyclicity via a topological sort) and turns
//! it into runnable state.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::arcs::ArcKind;
use crate::core::error::{FlowError, Result};
use crate::core::ids::{ArcId, InputPortId, OperatorId, OutputPortId, SectionId};
use crate::core::operator::{Algorithm, OperatorClass};
use crate::core::ports::input::CustomHandler;
use crate::core::ports::output::FinishListener;
use crate::core::ports::{InputPort, OutputPort};

pub(crate) struct OperatorBuild {
    pub(crate) name: String,
    pub(crate) class: OperatorClass,
    pub(crate) algorithm: Box<dyn Algorithm>,
    pub(crate) priority: i32,
    pub(crate) section: SectionId,
    pub(crate) inputs: Vec<InputPortId>,
    pub(crate) outputs: Vec<OutputPortId>,
}

pub(crate) struct ArcBuild {
    pub(crate) source: (OperatorId, OutputPortId),
    pub(crate) target: (OperatorId, InputPortId),
    pub(crate) kind: ArcKind,
    pub(crate) boundary: Option<usize>,
    pub(crate) activation_mark: Option<usize>,
    pub(crate) synchronous: bool,
}

/// Builder for a dataflow program.
#[derive(Default)]
pub struct FlowGraph {
    pub(crate) operators: Vec<OperatorBuild>,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) arcs: Vec<ArcBuild>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        class: OperatorClass,
        algorithm: Box<dyn Algorithm>,
    ) -> OperatorId {
        let id = OperatorId::new(self.operators.len());
        self.operators.push(OperatorBuild {
            name: name.into(),
            class,
            algorithm,
            priority: -1,
            section: SectionId::DEFAULT,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        id
    }

    fn add_input(
        &mut self,
        op: OperatorId,
        name: impl Into<String>,
        meta: bool,
        upstream_controlled: bool,
    ) -> InputPortId {
        let id = InputPortId::new(self.inputs.len());
        self.inputs
            .push(InputPort::new(id, name, op, meta, upstream_controlled));
        self.operators[op.index()].inputs.push(id);
        id
    }

    /// A regular data input: upstream-controlled, so the operator cannot
    /// complete before this port sees end-of-stream.
    pub fn add_input_port(&mut self, op: OperatorId, name: impl Into<String>) -> InputPortId {
        self.add_input(op, name, false, true)
    }

    /// A control-only input, skimmed in the prologue.
    pub fn add_meta_input_port(&mut self, op: OperatorId, name: impl Into<String>) -> InputPortId {
        self.add_input(op, name, true, true)
    }

    /// A side input that does not hold the operator open: completion is
    /// decided without it.
    pub fn add_complementary_input_port(
        &mut self,
        op: OperatorId,
        name: impl Into<String>,
    ) -> InputPortId {
        self.add_input(op, name, false, false)
    }

    fn add_output(&mut self, op: OperatorId, name: impl Into<String>, meta: bool) -> OutputPortId {
        let id = OutputPortId::new(self.outputs.len());
        self.outputs.push(OutputPort::new(id, name, op, meta));
        self.operators[op.index()].outputs.push(id);
        id
    }

    pub fn add_output_port(&mut self, op: OperatorId, name: impl Into<String>) -> OutputPortId {
        self.add_output(op, name, false)
    }

    pub fn add_meta_output_port(
        &mut self,
        op: OperatorId,
        name: impl Into<String>,
    ) -> OutputPortId {
        self.add_output(op, name, true)
    }

    pub fn set_custom_handler(&mut self, port: InputPortId, handler: CustomHandler) {
        self.inputs[port.index()].set_custom_handler(handler);
    }

    pub fn add_finish_listener(&mut self, port: OutputPortId, listener: FinishListener) {
        self.outputs[port.index()].add_finish_listener(listener);
    }

    fn connect_inner(
        &mut self,
        from: OutputPortId,
        to: InputPortId,
        kind: ArcKind,
        synchronous: bool,
    ) -> Result<ArcId> {
        let id = ArcId::new(self.arcs.len());
        self.inputs[to.index()].bind_arc(id)?;
        let source_op = self.outputs[from.index()].owner;
        let target_op = self.inputs[to.index()].owner;
        self.outputs[from.index()].outgoing.push(id);
        self.arcs.push(ArcBuild {
            source: (source_op, from),
            target: (target_op, to),
            kind,
            boundary: None,
            activation_mark: None,
            synchronous,
        });
        Ok(id)
    }

    /// Connect an output to an input with a buffered (asynchronous) arc.
    pub fn connect(&mut self, from: OutputPortId, to: InputPortId, kind: ArcKind) -> Result<ArcId> {
        self.connect_inner(from, to, kind, false)
    }

    /// Connect with a rendezvous (synchronous) arc: capacity one, delivery
    /// fused with the consumer's turn.
    pub fn connect_synchronous(
        &mut self,
        from: OutputPortId,
        to: InputPortId,
        kind: ArcKind,
    ) -> Result<ArcId> {
        self.connect_inner(from, to, kind, true)
    }

    pub fn set_priority(&mut self, op: OperatorId, priority: i32) {
        self.operators[op.index()].priority = priority;
    }

    pub fn set_section(&mut self, op: OperatorId, section: SectionId) {
        self.operators[op.index()].section = section;
    }

    /// Override the engine-wide backpressure parameters for one arc.
    pub fn set_arc_boundary(&mut self, arc: ArcId, boundary: usize, activation_mark: usize) {
        let build = &mut self.arcs[arc.index()];
        build.boundary = Some(boundary);
        build.activation_mark = Some(activation_mark);
    }

    /// Check forward-edge acyclicity and produce the preparation order.
    ///
    /// Feedback and cycle-start arcs legalize loops, so they are excluded
    /// from the check.
    pub(crate) fn validate_and_order(&self) -> Result<Vec<OperatorId>> {
        // Rendezvous delivery runs inside one section's turn; a synchronous
        // arc between sections would put its lock on the cross-thread path.
        for arc in &self.arcs {
            if !arc.synchronous {
                continue;
            }
            let source = &self.operators[arc.source.0.index()];
            let target = &self.operators[arc.target.0.index()];
            if source.section != target.section {
                return Err(FlowError::Graph(format!(
                    "synchronous arc from '{}' ({}) to '{}' ({}) crosses sections; use a buffered arc",
                    source.name, source.section, target.name, target.section
                )));
            }
        }

        let mut dag = DiGraph::<OperatorId, ()>::new();
        let nodes: Vec<NodeIndex> = self
            .operators
            .iter()
            .enumerate()
            .map(|(i, _)| dag.add_node(OperatorId::new(i)))
            .collect();
        for arc in &self.arcs {
            if arc.kind == ArcKind::ForwardEdge {
                dag.add_edge(nodes[arc.source.0.index()], nodes[arc.target.0.index()], ());
            }
        }
        match toposort(&dag, None) {
            Ok(order) => Ok(order.into_iter().map(|n| dag[n]).collect()),
            Err(cycle) => {
                let op = dag[cycle.node_id()];
                Err(FlowError::Graph(format!(
                    "forward-edge cycle through operator '{}'; close it with a FeedbackEdge or CycleStart arc",
                    self.operators[op.index()].name
                )))
            }
        }
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Number of sections referenced (highest index plus one).
    pub(crate) fn section_count(&self) -> usize {
        self.operators
            .iter()
            .map(|op| op.section.index() + 1)
            .max()
            .unwrap_or(1)
    }
}
