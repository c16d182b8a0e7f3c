//! Round-robin selection: a per-group atomic cursor stepped over the
//! eligible set.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;

use super::SelectionPolicy;
use crate::core::worker::Worker;

#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_index(&self, group: &str, len: usize) -> usize {
        let cursor = self
            .cursors
            .entry(group.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        cursor.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn select(&self, group: &str, workers: &[Arc<Worker>]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }
        Some(self.next_index(group, workers.len()))
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn reset(&self) {
        self.cursors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::test_support;

    #[test]
    fn cursor_wraps_and_is_per_group() {
        let policy = RoundRobinPolicy::new();
        let workers: Vec<_> = (0..3).map(|i| test_support::worker("p", i)).collect();

        let picks: Vec<_> = (0..6)
            .map(|_| policy.select("a", &workers).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);

        // A different group starts from its own cursor.
        assert_eq!(policy.select("b", &workers), Some(0));
    }

    #[test]
    fn reset_clears_cursors() {
        let policy = RoundRobinPolicy::new();
        let workers: Vec<_> = (0..2).map(|i| test_support::worker("p", i)).collect();
        policy.select("a", &workers);
        policy.reset();
        assert_eq!(policy.select("a", &workers), Some(0));
    }
}
