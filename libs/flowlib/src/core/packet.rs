// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The packet model: tagged values flowing on arcs.
//!
//! Two classes of packet travel the same FIFO queue and are therefore
//! totally ordered with respect to each other on a given arc:
//!
//! - **Data packets** wrap an opaque user value. They support deep copy so a
//!   one-to-many broadcast can hand every consumer its own mutable copy.
//! - **Control packets** are engine markers: activation, end-of-stream, and
//!   priority "fast travelers" that stay visible even while a port is
//!   blocked.

use std::any::Any;
use std::fmt;

/// A value that can ride inside a data packet.
///
/// Blanket-implemented for every `Clone + Send + Debug + 'static` type, so
/// user algorithms never implement this by hand.
pub trait PacketValue: Any + Send + fmt::Debug {
    /// Produce an independent copy for broadcast fan-out.
    fn deep_copy(&self) -> Box<dyn PacketValue>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T> PacketValue for T
where
    T: Any + Clone + Send + fmt::Debug,
{
    fn deep_copy(&self) -> Box<dyn PacketValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Downcast a boxed packet value to a concrete type, consuming the box.
///
/// Returns `None` when the payload is of a different type.
pub fn downcast_value<T: Any>(value: Box<dyn PacketValue>) -> Option<T> {
    value.into_any().downcast::<T>().ok().map(|b| *b)
}

/// Control/meta packet kinds, used for handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Activation,
    EndOfStream,
    Priority,
    Custom,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlKind::Activation => "Activation",
            ControlKind::EndOfStream => "EndOfStream",
            ControlKind::Priority => "Priority",
            ControlKind::Custom => "Custom",
        };
        f.write_str(s)
    }
}

/// A control-plane marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// "Re-check this operator/port now." Enqueued ahead of the first data
    /// packet of a computation and by the teardown protocol.
    Activation,

    /// No further data will arrive on this arc. `teardown` tags the marker
    /// with the global teardown phase.
    EndOfStream { teardown: bool },

    /// State-independent fast traveler: must stay visible even while the
    /// port is blocked and may be skimmed mid-execution.
    Priority { tag: u32 },

    /// Binding-layer event. Requires a registered handler on the receiving
    /// port; an unmatched `Custom` packet is a fatal invariant violation.
    Custom { tag: u32 },
}

impl ControlPacket {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlPacket::Activation => ControlKind::Activation,
            ControlPacket::EndOfStream { .. } => ControlKind::EndOfStream,
            ControlPacket::Priority { .. } => ControlKind::Priority,
            ControlPacket::Custom { .. } => ControlKind::Custom,
        }
    }

    /// Whether this packet may be consumed regardless of port state and
    /// while the user algorithm is mid-execution (the "special" skim).
    pub fn is_state_independent(&self) -> bool {
        matches!(self, ControlPacket::Priority { .. })
    }
}

/// A unit flowing on an arc.
#[derive(Debug)]
pub enum Packet {
    Data(Box<dyn PacketValue>),
    Control(ControlPacket),
}

impl Packet {
    /// Wrap a user value in a data packet.
    pub fn data<T: PacketValue>(value: T) -> Self {
        Packet::Data(Box::new(value))
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Packet::Data(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Packet::Control(_))
    }

    /// Independent copy for broadcast: data payloads deep-copy, control
    /// markers clone.
    pub fn deep_copy(&self) -> Packet {
        match self {
            Packet::Data(value) => Packet::Data(value.deep_copy()),
            Packet::Control(ctrl) => Packet::Control(ctrl.clone()),
        }
    }

    /// Head classification without consuming the payload.
    pub(crate) fn control(&self) -> Option<&ControlPacket> {
        match self {
            Packet::Control(ctrl) => Some(ctrl),
            Packet::Data(_) => None,
        }
    }
}
