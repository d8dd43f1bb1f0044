mod basic;
pub mod cosim;
pub mod error;
pub mod io;
pub mod timeseries;

pub mod prelude {
    use crate::basic;
    pub use basic::*;
    pub use basic::{solver::DefaultSolver, system::NewtonNetwork};

    pub use crate::cosim::*;
    pub use crate::error::{CoSimError, FederateError, InitError, SolveError};
    pub use crate::io::{
        config::{CoSimConfig, NetworkFile, SolverOptions},
        raw::load_network,
        topology::Topology,
    };
    pub use crate::timeseries::loopback::{LoopbackFederate, ScheduledSample, load_schedule};
}
