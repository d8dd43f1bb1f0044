use std::collections::HashMap;

use crate::{error::InitError, io::topology::Topology};

/// Immutable mapping from external bus numbers to topology indices.
#[derive(Debug, Clone, Default)]
pub struct BusIndex {
    lookup: HashMap<i64, usize>,
    external: Vec<i64>,
}

impl BusIndex {
    pub fn from_topology(topology: &Topology) -> Self {
        let external: Vec<i64> = topology.buses.iter().map(|b| b.number).collect();
        let lookup = external
            .iter()
            .enumerate()
            .map(|(idx, &number)| (number, idx))
            .collect();
        Self { lookup, external }
    }

    /// Fails with [`InitError::UnknownBus`] for ids absent from the topology.
    pub fn resolve(&self, bus_id: i64) -> Result<usize, InitError> {
        self.lookup
            .get(&bus_id)
            .copied()
            .ok_or(InitError::UnknownBus(bus_id))
    }

    pub fn external_id(&self, index: usize) -> Option<i64> {
        self.external.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.external.is_empty()
    }
}
