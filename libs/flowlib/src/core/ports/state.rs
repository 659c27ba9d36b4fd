// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use serde::Serialize;

/// Lifecycle of a port.
///
/// `Init` ports ignore traffic until the owning operator's prologue runs.
/// `Blocked` suspends data interactions but stays transparent to
/// state-independent control packets; unblocking restores the state the port
/// was in when it was blocked. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortState {
    Init,
    Normal,
    Blocked,
    Closed,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Init => "Init",
            PortState::Normal => "Normal",
            PortState::Blocked => "Blocked",
            PortState::Closed => "Closed",
        };
        f.write_str(s)
    }
}

impl PortState {
    pub fn is_closed(self) -> bool {
        self == PortState::Closed
    }
}
