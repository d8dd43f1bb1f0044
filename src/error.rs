use thiserror::Error;

use crate::cosim::phase::Phase;

/// Errors raised while wiring the run together. All of them are fatal and
/// surface before the federate enters executing mode.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("topology error: {0}")]
    Topology(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bus {0} not found in network topology")]
    UnknownBus(i64),
    #[error("federate error during initialization: {0}")]
    Federate(#[from] FederateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the numerical engine itself. Non-convergence is not one of them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("engine failed to assemble the right-hand side: {0}")]
    Rhs(String),
    #[error("engine failed to assemble the Jacobian: {0}")]
    Jacobian(String),
    #[error("linear solve failed: {0}")]
    LinearSolve(String),
    #[error("bus index {0} is out of range for the network")]
    BusOutOfRange(usize),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FederateError {
    #[error("unknown subscription handle {0}")]
    UnknownSubscription(usize),
    #[error("unknown publication handle {0}")]
    UnknownPublication(usize),
    #[error("federate runtime error: {0}")]
    Runtime(String),
}

/// Top-level failure of [`crate::cosim::clock::CoSimClock::run`].
#[derive(Debug, Error)]
pub enum CoSimError {
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("engine failure at bus {bus_id}, phase {phase}: {source}")]
    Solve {
        bus_id: i64,
        phase: Phase,
        #[source]
        source: SolveError,
    },
    #[error(transparent)]
    Federate(#[from] FederateError),
}
