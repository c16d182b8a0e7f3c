//! Selection policies for the worker registry.
//!
//! A policy picks one index out of an eligible-worker slice. Policies
//! never inspect health or cooldown themselves; the registry hands them
//! an already-filtered set.

use std::{fmt::Debug, sync::Arc};

mod least_loaded;
mod priority;
mod random;
mod round_robin;

pub use least_loaded::LeastLoadedPolicy;
pub use priority::PriorityPolicy;
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;

use crate::{config::PolicyKind, core::worker::Worker};

/// Core trait for selection policies.
pub trait SelectionPolicy: Send + Sync + Debug {
    /// Select one worker from the eligible set; `None` only when the set
    /// is empty. `group` keys any per-group policy state (cursors).
    fn select(&self, group: &str, workers: &[Arc<Worker>]) -> Option<usize>;

    /// Policy name for metrics and debugging.
    fn name(&self) -> &'static str;

    /// Reset any internal state (round-robin cursors).
    fn reset(&self) {}
}

/// Build the configured policy.
pub fn policy_from_kind(kind: PolicyKind) -> Arc<dyn SelectionPolicy> {
    match kind {
        PolicyKind::RoundRobin => Arc::new(RoundRobinPolicy::new()),
        PolicyKind::LeastLoaded => Arc::new(LeastLoadedPolicy::new()),
        PolicyKind::Random => Arc::new(RandomPolicy::new()),
        PolicyKind::Priority => Arc::new(PriorityPolicy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::test_support;

    fn fleet(n: usize) -> Vec<Arc<Worker>> {
        (0..n).map(|i| test_support::worker("acme", i)).collect()
    }

    #[test]
    fn every_policy_returns_in_range_indices() {
        let workers = fleet(4);
        for kind in [
            PolicyKind::RoundRobin,
            PolicyKind::LeastLoaded,
            PolicyKind::Random,
            PolicyKind::Priority,
        ] {
            let policy = policy_from_kind(kind);
            for _ in 0..50 {
                let idx = policy.select("g", &workers).unwrap();
                assert!(idx < workers.len(), "{} out of range", policy.name());
            }
        }
    }

    #[test]
    fn every_policy_handles_empty_set() {
        for kind in [
            PolicyKind::RoundRobin,
            PolicyKind::LeastLoaded,
            PolicyKind::Random,
            PolicyKind::Priority,
        ] {
            let policy = policy_from_kind(kind);
            assert!(policy.select("g", &[]).is_none());
        }
    }

    #[test]
    fn round_robin_visits_every_worker_evenly() {
        let workers = fleet(3);
        let policy = RoundRobinPolicy::new();
        let mut counts = [0usize; 3];
        for _ in 0..30 {
            counts[policy.select("g", &workers).unwrap()] += 1;
        }
        // 30 selections over 3 workers: each visited exactly 10 times.
        assert_eq!(counts, [10, 10, 10]);
    }
}
