// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod algorithms;
pub mod arcs;
pub mod config;
pub mod error;
pub mod ids;
pub mod operator;
pub mod packet;
pub mod ports;
pub mod runtime;
pub mod scheduling;
pub mod state_machine;

pub mod graph;

#[cfg(test)]
mod engine_tests;

pub use algorithms::{CollectSink, FnTransform, VecSource};
pub use arcs::{ArcKind, FlowArc};
pub use config::EngineConfig;
pub use error::{FlowError, Result};
pub use graph::FlowGraph;
pub use ids::{ArcId, InputPortId, OperatorId, OutputPortId, SectionId};
pub use operator::{Algorithm, OperatorClass, OperatorContext, OperatorInfo};
pub use packet::{downcast_value, ControlKind, ControlPacket, Packet, PacketValue};
pub use ports::{ControlResponse, InputPort, OutputPort, PortState};
pub use runtime::{FlowEngine, OperatorDiagnostics};
pub use scheduling::{Activations, SectionEvent};
pub use state_machine::{BackoffReason, OperatorState};
