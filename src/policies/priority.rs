//! Priority selection: highest-priority eligible worker, ties broken
//! round-robin.

use std::sync::Arc;

use super::{round_robin::RoundRobinPolicy, SelectionPolicy};
use crate::core::worker::Worker;

#[derive(Debug, Default)]
pub struct PriorityPolicy {
    tiebreak: RoundRobinPolicy,
}

impl PriorityPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for PriorityPolicy {
    fn select(&self, group: &str, workers: &[Arc<Worker>]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }

        let top = workers.iter().map(|w| w.spec.priority).max()?;
        let tied: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.spec.priority == top)
            .map(|(idx, _)| idx)
            .collect();

        if tied.len() == 1 {
            return Some(tied[0]);
        }
        let pick = self.tiebreak.next_index(group, tied.len());
        Some(tied[pick])
    }

    fn name(&self) -> &'static str {
        "priority"
    }

    fn reset(&self) {
        self.tiebreak.reset();
    }
}

#[cfg(test)]
mod tests {
    use gateway_protocol::provider::WireFamily;

    use super::*;
    use crate::core::worker::{test_support, Worker};

    fn worker_with_priority(id: usize, priority: u32) -> Arc<Worker> {
        let mut spec = test_support::spec("p", id, WireFamily::OpenAi);
        spec.priority = priority;
        Arc::new(Worker::new(spec))
    }

    #[test]
    fn highest_priority_wins() {
        let workers = vec![
            worker_with_priority(0, 1),
            worker_with_priority(1, 9),
            worker_with_priority(2, 3),
        ];
        let policy = PriorityPolicy::new();
        assert_eq!(policy.select("g", &workers), Some(1));
    }

    #[test]
    fn priority_ties_rotate() {
        let workers = vec![
            worker_with_priority(0, 5),
            worker_with_priority(1, 5),
            worker_with_priority(2, 1),
        ];
        let policy = PriorityPolicy::new();
        let first = policy.select("g", &workers).unwrap();
        let second = policy.select("g", &workers).unwrap();
        assert_ne!(first, second);
        assert!(first < 2 && second < 2);
    }
}
