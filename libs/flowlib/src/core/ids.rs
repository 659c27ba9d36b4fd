// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Arena id newtypes.
//!
//! All cross-references in the graph (operator → port, port → arc, arc →
//! port) are expressed as small integer ids into arena vectors owned by the
//! engine. No back-pointers, no cyclic ownership; teardown is bulk
//! deallocation.

use std::fmt;

use serde::Serialize;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Arena index of this id.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identity of an operator in the graph arena.
    OperatorId,
    "op"
);

arena_id!(
    /// Identity of an input port.
    InputPortId,
    "in"
);

arena_id!(
    /// Identity of an output port.
    OutputPortId,
    "out"
);

arena_id!(
    /// Identity of an arc.
    ArcId,
    "arc"
);

/// Identity of an execution section (one worker thread per section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SectionId(pub u32);

impl SectionId {
    /// The default section every operator is assigned to unless moved.
    pub const DEFAULT: SectionId = SectionId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section{}", self.0)
    }
}
