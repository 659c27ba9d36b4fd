// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Input and output ports.
//!
//! Ports are the only surface an algorithm touches: it polls inputs and
//! pushes to outputs, and the port state machine (Init → Normal →
//! Blocked/Closed) decides which interactions are legal at any moment.

pub mod input;
pub mod output;
pub mod state;

pub use input::{ControlResponse, InputPort};
pub use output::OutputPort;
pub use state::PortState;
