// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cooperative, notification-driven scheduling.
//!
//! Operators never spin: they run when a [`SectionEvent`] lands in their
//! section's mailbox and park otherwise. Side effects of a scheduling turn
//! (activations, data-available, data-needed) are accumulated in an
//! [`Activations`] set while the operator holds its own lock and flushed to
//! the mailboxes only after the turn completes, so no mailbox send ever
//! happens under an operator lock.

pub mod activation;
pub mod priority;
pub mod quota;
pub mod section;

pub use activation::{ActivationRouter, Activations};
pub use priority::{default_priority, PriorityFn};
pub use quota::Quota;
pub use section::{SectionEvent, SectionRunner};
