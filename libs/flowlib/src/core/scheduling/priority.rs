// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::operator::OperatorInfo;

/// Pluggable ready-set ordering. Higher values run first when several
/// operators in a section are ready at once.
pub type PriorityFn = Arc<dyn Fn(&OperatorInfo) -> i32 + Send + Sync>;

/// Default policy: the static per-operator priority set at graph build time
/// (-1 unless overridden).
pub fn default_priority() -> PriorityFn {
    Arc::new(|info: &OperatorInfo| info.priority)
}
