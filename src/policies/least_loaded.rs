//! Least-loaded selection: minimum current load, ties broken
//! round-robin.

use std::sync::Arc;

use super::{round_robin::RoundRobinPolicy, SelectionPolicy};
use crate::core::worker::Worker;

#[derive(Debug, Default)]
pub struct LeastLoadedPolicy {
    tiebreak: RoundRobinPolicy,
}

impl LeastLoadedPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for LeastLoadedPolicy {
    fn select(&self, group: &str, workers: &[Arc<Worker>]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }

        let min_load = workers.iter().map(|w| w.load()).min()?;
        let tied: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.load() == min_load)
            .map(|(idx, _)| idx)
            .collect();

        if tied.len() == 1 {
            return Some(tied[0]);
        }
        let pick = self.tiebreak.next_index(group, tied.len());
        Some(tied[pick])
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn reset(&self) {
        self.tiebreak.reset();
    }
}
