//! Retry ledger
//!
//! Counts outbound connection attempts per device so that an unresponsive
//! peer cannot trigger an endless reconnect storm. An entry is evicted when
//! the service level connection comes up, when an attempt fails outright, or
//! when the attempt budget is exhausted.

use std::collections::HashMap;

use crate::types::DeviceId;

/// Attempts allowed before a connect request is dropped
pub const MAX_CONNECT_ATTEMPTS: u32 = 2;

/// What to do with a new outbound connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Go ahead; this will be attempt number `attempt`
    Proceed { attempt: u32 },
    /// Budget exhausted; the request is dropped and the entry purged
    Exhausted,
}

#[derive(Debug, Default, Clone)]
pub struct RetryLedger {
    attempts: HashMap<DeviceId, u32>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a connect to `device` may proceed.
    ///
    /// Creates an entry with zero attempts on first sight. Exhaustion
    /// purges the entry so the next connection cycle starts fresh.
    pub fn check(&mut self, device: &DeviceId) -> RetryDecision {
        let count = *self.attempts.entry(device.clone()).or_insert(0);
        if count >= MAX_CONNECT_ATTEMPTS {
            tracing::info!(
                "Connect to {} dropped after {} attempts",
                device,
                count
            );
            self.attempts.remove(device);
            return RetryDecision::Exhausted;
        }
        RetryDecision::Proceed { attempt: count + 1 }
    }

    /// Record that a connect was issued
    pub fn record_attempt(&mut self, device: &DeviceId) -> u32 {
        let count = self.attempts.entry(device.clone()).or_insert(0);
        *count += 1;
        tracing::debug!("Connect attempt {} recorded for {}", count, device);
        *count
    }

    pub fn attempts(&self, device: &DeviceId) -> Option<u32> {
        self.attempts.get(device).copied()
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.attempts.contains_key(device)
    }

    /// Drop the entry for `device`, returning whether one existed
    pub fn purge(&mut self, device: &DeviceId) -> bool {
        self.attempts.remove(device).is_some()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_attempt_is_dropped() {
        let device = DeviceId::new("00:11:22:33:44:55");
        let mut ledger = RetryLedger::new();

        assert_eq!(ledger.check(&device), RetryDecision::Proceed { attempt: 1 });
        ledger.record_attempt(&device);
        assert_eq!(ledger.check(&device), RetryDecision::Proceed { attempt: 2 });
        ledger.record_attempt(&device);
        assert_eq!(ledger.check(&device), RetryDecision::Exhausted);
        assert!(!ledger.contains(&device));

        // a fresh cycle starts over
        assert_eq!(ledger.check(&device), RetryDecision::Proceed { attempt: 1 });
    }

    #[test]
    fn test_purge() {
        let device = DeviceId::new("00:11:22:33:44:55");
        let mut ledger = RetryLedger::new();
        ledger.record_attempt(&device);
        assert_eq!(ledger.attempts(&device), Some(1));
        assert!(ledger.purge(&device));
        assert!(!ledger.purge(&device));
        assert!(ledger.is_empty());
    }
}
