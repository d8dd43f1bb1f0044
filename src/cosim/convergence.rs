use num_complex::Complex64;
use tracing::{debug, trace};

use super::{phase::ThreePhaseComplex, state::PhaseSolverState};
use crate::{basic::AlgebraEngine, error::SolveError};

/// Result of one phase solve. Exhausting the iteration budget is reported
/// through `converged`, never as an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOutcome {
    /// Bus voltage in p.u.
    pub voltage: Complex64,
    pub converged: bool,
    /// Assemble-and-solve cycles performed, the first one included.
    pub iterations: u32,
    /// Infinity norm of the last right-hand side.
    pub residual: f64,
}

impl<E: AlgebraEngine> PhaseSolverState<E> {
    /// Injects `injected_power` (p.u.) as the load at `bus_index` and iterates
    /// until the mismatch is within tolerance or the budget is spent.
    ///
    /// The voltage at `bus_index` is always returned, converged or not. When
    /// the solve does not converge the network voltages are rolled back to
    /// where they were before the call, so the next solve starts from the
    /// last good operating point.
    pub fn solve(
        &mut self,
        bus_index: usize,
        injected_power: Complex64,
    ) -> Result<SolveOutcome, SolveError> {
        let Self {
            phase,
            engine,
            network,
            rhs,
            jacobian,
            solution,
            tolerance,
            max_iterations,
            base_mva,
        } = self;

        let saved = engine.snapshot(network);
        engine.set_load(
            network,
            bus_index,
            injected_power.re * *base_mva,
            injected_power.im * *base_mva,
        )?;

        let mut iterations = 0;
        let residual = loop {
            engine.assemble_rhs(network, rhs)?;
            engine.assemble_jacobian(network, jacobian)?;
            engine.zero(solution);
            engine.solve(jacobian, rhs, solution)?;
            iterations += 1;

            let residual = engine.residual_norm(rhs);
            trace!(%phase, bus_index, iterations, residual, "newton step");
            if residual <= *tolerance || !residual.is_finite() || iterations >= *max_iterations {
                break residual;
            }
            engine.apply_solution(network, solution);
        };
        engine.apply_solution(network, solution);

        let (magnitude, angle_deg) = engine.read_voltage(network, bus_index)?;
        let converged = residual <= *tolerance;
        if !converged {
            debug!(%phase, bus_index, residual, "rolling back voltages of unconverged solve");
            engine.restore(network, &saved);
        }
        Ok(SolveOutcome {
            voltage: Complex64::from_polar(magnitude, angle_deg.to_radians()),
            converged,
            iterations,
            residual,
        })
    }
}

/// Outcomes of the three phase solves for one bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseOutcomes {
    pub a: SolveOutcome,
    pub b: SolveOutcome,
    pub c: SolveOutcome,
}

impl PhaseOutcomes {
    pub fn voltages(&self) -> ThreePhaseComplex {
        ThreePhaseComplex::new(self.a.voltage, self.b.voltage, self.c.voltage)
    }

    pub fn all_converged(&self) -> bool {
        self.a.converged && self.b.converged && self.c.converged
    }

    pub fn iter(&self) -> impl Iterator<Item = &SolveOutcome> {
        [&self.a, &self.b, &self.c].into_iter()
    }
}
