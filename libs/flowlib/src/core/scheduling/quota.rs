// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Per-turn execution budget.
///
/// Every port interaction (poll, push, decline) charges one quantum. An
/// operator whose quota runs out yields its section thread and is
/// rescheduled with a fresh budget, which bounds how long one operator can
/// starve its section.
#[derive(Debug, Clone)]
pub struct Quota {
    limit: u32,
    used: u32,
}

impl Quota {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge one quantum. Returns `false` when the budget is already spent;
    /// the interaction that got `false` must not take effect.
    pub fn charge(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn refill(&mut self) {
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_charges_to_limit() {
        let mut quota = Quota::new(3);
        assert!(quota.charge());
        assert!(quota.charge());
        assert!(quota.charge());
        assert!(quota.is_exhausted());
        assert!(!quota.charge());
        assert_eq!(quota.used(), 3);
    }

    #[test]
    fn test_quota_refill() {
        let mut quota = Quota::new(1);
        assert!(quota.charge());
        assert!(quota.is_exhausted());
        quota.refill();
        assert!(!quota.is_exhausted());
        assert!(quota.charge());
    }
}
