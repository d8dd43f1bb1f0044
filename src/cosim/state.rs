use tracing::info;

use super::phase::Phase;
use crate::{
    basic::AlgebraEngine,
    error::InitError,
    io::{config::SolverOptions, topology::Topology},
};

/// Everything one phase-equivalent solve needs, owned for the whole run.
///
/// Each phase gets its own engine, network and numeric containers; nothing is
/// shared between phases.
pub struct PhaseSolverState<E: AlgebraEngine> {
    pub(crate) phase: Phase,
    pub(crate) engine: E,
    pub(crate) network: E::Network,
    pub(crate) rhs: E::Vector,
    pub(crate) jacobian: E::Matrix,
    pub(crate) solution: E::Vector,
    pub(crate) tolerance: f64,
    pub(crate) max_iterations: u32,
    pub(crate) base_mva: f64,
}

impl<E: AlgebraEngine> PhaseSolverState<E> {
    /// Builds the phase network once and allocates the iteration containers.
    pub fn initialize(
        mut engine: E,
        topology: &Topology,
        options: &SolverOptions,
        phase: Phase,
    ) -> Result<Self, InitError> {
        options.validate()?;
        let network = engine.build_network(topology)?;
        let rhs = engine.create_vector(&network);
        let solution = engine.create_vector(&network);
        let jacobian = engine.create_matrix(&network);
        info!(
            %phase,
            buses = topology.bus_count(),
            tolerance = options.tolerance,
            max_iterations = options.max_iterations,
            base_mva = options.base_mva,
            "phase solver initialized"
        );
        Ok(Self {
            phase,
            engine,
            network,
            rhs,
            jacobian,
            solution,
            tolerance: options.tolerance,
            max_iterations: options.max_iterations,
            base_mva: options.base_mva,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn base_mva(&self) -> f64 {
        self.base_mva
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn network(&self) -> &E::Network {
        &self.network
    }
}
