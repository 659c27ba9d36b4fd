// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

/// Engine error taxonomy.
///
/// Everything here is a **fatal invariant violation** or a construction-time
/// error: an engine or graph-construction bug, not a runtime condition to
/// retry. Recoverable backoff (`FullArc`, `NullDequeue`, ...) is a scheduling
/// signal, lives in [`crate::core::state_machine::BackoffReason`] and never
/// surfaces through this type.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("invalid state transition for operator '{operator}': {detail}")]
    InvalidTransition { operator: String, detail: String },

    #[error("unhandled control packet '{kind}' on port '{port}' of operator '{operator}'")]
    UnhandledControlPacket {
        operator: String,
        port: String,
        kind: String,
    },

    #[error(
        "live-lock detected in operator '{operator}': the algorithm neither consumed nor \
         produced anything yet does not report completion"
    )]
    LiveLock { operator: String },

    #[error("teardown assertion failed for operator '{operator}': expected {expected}, found {found}")]
    TeardownAssertion {
        operator: String,
        expected: String,
        found: String,
    },

    #[error("input port '{port}' already has an incoming arc")]
    PortAlreadyConnected { port: String },

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
