//! Time-stepped transmission federate: feeder aggregation, per-phase
//! convergence loop, phase composition and the co-simulation clock.

pub mod aggregator;
pub mod bus_index;
pub mod clock;
pub mod convergence;
pub mod federate;
pub mod phase;
pub mod report;
pub mod state;

pub use aggregator::{BusGroup, FeederAggregator, FeederBinding, limit_power};
pub use bus_index::BusIndex;
pub use clock::{ClockState, CoSimClock, VoltagePublisher};
pub use convergence::{PhaseOutcomes, SolveOutcome};
pub use federate::{FederateRuntime, PublicationHandle, SubscriptionHandle, TimeGrant};
pub use phase::{Phase, R120, ThreePhaseComplex, compose};
pub use report::{BusStepReport, RunSummary, StepReport};
pub use state::PhaseSolverState;
