// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use crate::core::error::{FlowError, Result};

/// Engine tuning knobs.
///
/// Every field has a serde default so partial JSON configs deserialize to the
/// documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backpressure threshold per arc, in packets. An enqueue that leaves an
    /// arc holding more than this many packets reports the arc as full and
    /// blocks the producing output port.
    pub arc_boundary: usize,

    /// Arc load at or below which a draining consumer requests upstream
    /// reactivation.
    pub activation_mark: usize,

    /// Execution quanta granted per scheduling turn. Each port interaction
    /// (poll, push, decline) charges one quantum.
    pub operator_quota: u32,

    /// When set, an error returned by a user algorithm is recorded in the
    /// operator diagnostics and the operator parks instead of aborting the
    /// section.
    pub record_algorithm_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arc_boundary: 200,
            activation_mark: 100,
            operator_quota: 1000,
            record_algorithm_errors: false,
        }
    }
}

impl EngineConfig {
    /// Small buffers and tight quotas, useful for tests that exercise
    /// backpressure and fairness without thousands of packets.
    pub fn low_latency() -> Self {
        Self {
            arc_boundary: 8,
            activation_mark: 4,
            operator_quota: 16,
            ..Default::default()
        }
    }

    /// Deep buffers for bulk throughput.
    pub fn high_throughput() -> Self {
        Self {
            arc_boundary: 1024,
            activation_mark: 512,
            operator_quota: 4096,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.arc_boundary == 0 {
            return Err(FlowError::Configuration(
                "arc_boundary must be at least 1".to_string(),
            ));
        }
        if self.activation_mark >= self.arc_boundary {
            return Err(FlowError::Configuration(format!(
                "activation_mark ({}) must be below arc_boundary ({})",
                self.activation_mark, self.arc_boundary
            )));
        }
        if self.operator_quota == 0 {
            return Err(FlowError::Configuration(
                "operator_quota must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.arc_boundary, 200);
        assert_eq!(config.activation_mark, 100);
        assert_eq!(config.operator_quota, 1000);
        assert!(!config.record_algorithm_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = EngineConfig::low_latency();
        let json = serde_json::to_string(&config).unwrap();
        let restored: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: EngineConfig = serde_json::from_str(r#"{"arc_boundary": 16}"#).unwrap();
        assert_eq!(config.arc_boundary, 16);
        assert_eq!(config.operator_quota, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.arc_boundary = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.activation_mark = 200;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.operator_quota = 0;
        assert!(config.validate().is_err());
    }
}
