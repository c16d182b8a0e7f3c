//! Routing table: per-category ordered candidate lists, produced by the
//! expander.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use super::category::Category;
use crate::core::worker::Worker;

/// One candidate entry: a worker plus its route metadata.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub worker: Arc<Worker>,
    /// Concrete model this route requests from the worker.
    pub target_model: Option<String>,
    pub priority: u32,
    pub weight: u32,
    pub security_enhanced: bool,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    categories: HashMap<Category, Vec<Candidate>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: Category, candidate: Candidate) {
        self.categories.entry(category).or_default().push(candidate);
    }

    pub fn candidates(&self, category: Category) -> &[Candidate] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn categories(&self) -> impl Iterator<Item = (&Category, &Vec<Candidate>)> {
        self.categories.iter()
    }

    /// The configured model mapping for a worker within a category.
    pub fn target_model(&self, category: Category, worker_id: &str) -> Option<&str> {
        self.candidates(category)
            .iter()
            .find(|c| c.worker.worker_id() == worker_id)
            .and_then(|c| c.target_model.as_deref())
    }

    /// Serializable view for the operator surface.
    pub fn summary(&self) -> HashMap<String, Vec<RouteEntry>> {
        self.categories
            .iter()
            .map(|(category, candidates)| {
                let entries = candidates
                    .iter()
                    .map(|c| RouteEntry {
                        worker_id: c.worker.worker_id().to_string(),
                        target_model: c.target_model.clone(),
                        priority: c.priority,
                        weight: c.weight,
                        security_enhanced: c.security_enhanced,
                    })
                    .collect();
                (category.to_string(), entries)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub worker_id: String,
    pub target_model: Option<String>,
    pub priority: u32,
    pub weight: u32,
    pub security_enhanced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::test_support;

    #[test]
    fn lookup_and_model_mapping() {
        let mut table = RoutingTable::new();
        let worker = test_support::worker("acme", 0);
        table.push(
            Category::Reasoning,
            Candidate {
                worker: worker.clone(),
                target_model: Some("m-reason".to_string()),
                priority: 1,
                weight: 1,
                security_enhanced: false,
            },
        );

        assert_eq!(table.candidates(Category::Reasoning).len(), 1);
        assert!(table.candidates(Category::Default).is_empty());
        assert_eq!(
            table.target_model(Category::Reasoning, "acme:0"),
            Some("m-reason")
        );
        assert_eq!(table.target_model(Category::Reasoning, "acme:1"), None);

        let summary = table.summary();
        assert_eq!(summary["reasoning"][0].worker_id, "acme:0");
    }
}
