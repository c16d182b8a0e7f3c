//! Generation-tagged routing snapshots.
//!
//! Each request binds the live snapshot at ROUTE time and holds its Arc
//! until DONE; reload installs a new snapshot atomically and the old one
//! is freed when its last in-flight request drops it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;

use super::table::RoutingTable;

#[derive(Debug)]
pub struct RoutingSnapshot {
    pub generation: u64,
    pub table: RoutingTable,
}

#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<RoutingSnapshot>,
    generation: AtomicU64,
}

impl SnapshotStore {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(RoutingSnapshot {
                generation: 1,
                table,
            }),
            generation: AtomicU64::new(1),
        }
    }

    /// The live snapshot. Callers keep the Arc for the life of their
    /// request.
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install a new generation; returns its number. In-flight requests
    /// complete against the snapshot they bound at ROUTE.
    pub fn install(&self, table: RoutingTable) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.current
            .store(Arc::new(RoutingSnapshot { generation, table }));
        generation
    }
}
