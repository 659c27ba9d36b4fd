// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;

use crate::core::ports::PortState;
use crate::core::state_machine::{BackoffReason, OperatorState};

/// One input port's view in a stall dump.
#[derive(Debug, Serialize)]
pub struct InputDiagnostics {
    pub name: String,
    pub state: PortState,
    pub eos_seen: bool,
    /// Load of the incoming arc, if connected.
    pub arc_load: Option<usize>,
}

/// One output port's view in a stall dump.
#[derive(Debug, Serialize)]
pub struct OutputDiagnostics {
    pub name: String,
    pub state: PortState,
    pub active: bool,
    /// Load of every outgoing arc.
    pub arc_loads: Vec<usize>,
}

/// Snapshot of one operator for deadlock analysis: enough to see who is
/// waiting on whom and why.
#[derive(Debug, Serialize)]
pub struct OperatorDiagnostics {
    pub operator: String,
    pub state: OperatorState,
    pub backoff: Option<BackoffReason>,
    pub quota_used: u32,
    pub inputs: Vec<InputDiagnostics>,
    pub outputs: Vec<OutputDiagnostics>,
    pub errors: Vec<String>,
}
