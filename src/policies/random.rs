//! Uniform random selection over the eligible set.

use std::sync::Arc;

use rand::Rng;

use super::SelectionPolicy;
use crate::core::worker::Worker;

#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for RandomPolicy {
    fn select(&self, _group: &str, workers: &[Arc<Worker>]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }
        Some(rand::rng().random_range(0..workers.len()))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::test_support;

    #[test]
    fn eventually_visits_every_worker() {
        let workers: Vec<_> = (0..4).map(|i| test_support::worker("p", i)).collect();
        let policy = RandomPolicy::new();
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[policy.select("g", &workers).unwrap()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
