use crate::{
    error::{InitError, SolveError},
    io::topology::Topology,
};

/// Network model plus the numeric primitives one Newton-type iteration needs.
///
/// The co-simulation core only talks to the engine through this trait. The
/// associated types are opaque to it: a network handle, a vector and a
/// matrix. Bus indices are topology indices as resolved by
/// [`crate::cosim::BusIndex`].
pub trait AlgebraEngine {
    type Network;
    type Vector;
    type Matrix;
    /// Saved bus voltages, used to roll back a solve that did not converge.
    type Snapshot;

    /// Builds the network from a parsed topology, including the one-time
    /// admittance matrix assembly.
    fn build_network(&mut self, topology: &Topology) -> Result<Self::Network, InitError>;

    /// Allocates a right-hand side or solution vector sized to the network.
    fn create_vector(&self, network: &Self::Network) -> Self::Vector;

    /// Allocates a Jacobian container sized to the network.
    fn create_matrix(&self, network: &Self::Network) -> Self::Matrix;

    /// Replaces the constant-power load at a bus, in MW and Mvar.
    fn set_load(
        &mut self,
        network: &mut Self::Network,
        bus_index: usize,
        p_mw: f64,
        q_mvar: f64,
    ) -> Result<(), SolveError>;

    fn assemble_rhs(
        &mut self,
        network: &Self::Network,
        rhs: &mut Self::Vector,
    ) -> Result<(), SolveError>;

    fn assemble_jacobian(
        &mut self,
        network: &Self::Network,
        jacobian: &mut Self::Matrix,
    ) -> Result<(), SolveError>;

    fn zero(&self, vector: &mut Self::Vector);

    /// Solves `jacobian · solution = rhs`.
    fn solve(
        &mut self,
        jacobian: &Self::Matrix,
        rhs: &Self::Vector,
        solution: &mut Self::Vector,
    ) -> Result<(), SolveError>;

    /// Pushes a Newton step back onto the bus state.
    fn apply_solution(&mut self, network: &mut Self::Network, solution: &Self::Vector);

    fn snapshot(&self, network: &Self::Network) -> Self::Snapshot;

    fn restore(&mut self, network: &mut Self::Network, snapshot: &Self::Snapshot);

    /// Infinity norm of a right-hand side. NaN if any entry is NaN.
    fn residual_norm(&self, rhs: &Self::Vector) -> f64;

    /// Voltage at a bus as `(magnitude, angle in degrees)`.
    fn read_voltage(
        &self,
        network: &Self::Network,
        bus_index: usize,
    ) -> Result<(f64, f64), SolveError>;
}
