// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! flowlib — a quota-scheduled dataflow operator execution kernel.
//!
//! A graph of stateful **operators** connected by **arcs** (queues) is driven
//! to completion by a per-operator **state machine** under a cooperative,
//! notification-driven scheduler. Backpressure and fairness are enforced
//! without a central lock: the only structure shared between two section
//! threads is the wait-free asynchronous arc queue.

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Some internal step APIs need many parameters
#![allow(clippy::type_complexity)] // Complex types are clear in context

pub mod core;

pub use crate::core::{
    Activations,
    Algorithm,
    ArcId,
    ArcKind,
    BackoffReason,
    downcast_value,
    CollectSink,
    ControlKind,
    ControlPacket,
    ControlResponse,
    EngineConfig,
    FlowEngine,
    FlowError,
    FlowGraph,
    FnTransform,
    InputPortId,
    OperatorClass,
    OperatorContext,
    OperatorDiagnostics,
    OperatorId,
    OperatorInfo,
    OperatorState,
    OutputPortId,
    Packet,
    PacketValue,
    PortState,
    Result,
    SectionEvent,
    SectionId,
    VecSource,
};
