use std::fmt;

use tabled::{Table, Tabled, settings::Style};

use super::{
    convergence::PhaseOutcomes,
    phase::{Phase, ThreePhaseComplex},
};

/// A float printed with a fixed number of decimal places.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// Table row for one bus and phase of a step.
#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
pub(crate) struct PhaseResTable {
    pub(crate) Bus: i64,
    pub(crate) Phase: Phase,
    pub(crate) P_pu: FloatWrapper,
    pub(crate) Q_pu: FloatWrapper,
    pub(crate) Vm_pu: FloatWrapper,
    pub(crate) Va_deg: FloatWrapper,
    pub(crate) Iter: u32,
    pub(crate) Residual: String,
    pub(crate) Converged: bool,
}

/// What happened at one bus during one time step.
#[derive(Debug, Clone, PartialEq)]
pub struct BusStepReport {
    pub bus_id: i64,
    /// Aggregated feeder power in p.u.
    pub injected: ThreePhaseComplex,
    /// Composed ABC voltages in p.u.
    pub voltages: ThreePhaseComplex,
    pub outcomes: PhaseOutcomes,
    /// Number of phases actually published.
    pub published: usize,
}

impl BusStepReport {
    pub fn converged(&self) -> bool {
        self.outcomes.all_converged()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Granted time in seconds.
    pub time: f64,
    pub buses: Vec<BusStepReport>,
}

impl StepReport {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            buses: Vec::new(),
        }
    }

    pub fn converged(&self) -> bool {
        self.buses.iter().all(BusStepReport::converged)
    }

    /// Renders the step as a markdown table, one row per bus and phase.
    pub fn to_table(&self) -> String {
        let mut rows = Vec::with_capacity(self.buses.len() * 3);
        for bus in &self.buses {
            for (phase, outcome) in Phase::ALL.into_iter().zip(bus.outcomes.iter()) {
                let s = bus.injected[phase];
                let v = bus.voltages[phase];
                rows.push(PhaseResTable {
                    Bus: bus.bus_id,
                    Phase: phase,
                    P_pu: FloatWrapper::new(s.re, 4),
                    Q_pu: FloatWrapper::new(s.im, 4),
                    Vm_pu: FloatWrapper::new(v.norm(), 5),
                    Va_deg: FloatWrapper::new(v.arg().to_degrees(), 3),
                    Iter: outcome.iterations,
                    Residual: format!("{:.2e}", outcome.residual),
                    Converged: outcome.converged,
                });
            }
        }
        Table::new(rows).with(Style::markdown()).to_string()
    }
}

/// Returned by [`crate::cosim::CoSimClock::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Last granted time in seconds.
    pub granted_time: f64,
    pub steps: usize,
    /// Phase solves that ended on the iteration budget.
    pub unconverged_solves: usize,
}

#[cfg(test)]
mod tests {
    use num_complex::Complex64;

    use super::*;
    use crate::cosim::{
        convergence::SolveOutcome,
        phase::{R120, balanced},
    };

    #[test]
    fn test_table_has_row_per_phase() {
        let outcome = SolveOutcome {
            voltage: Complex64::new(1.0, 0.0),
            converged: true,
            iterations: 2,
            residual: 3.2e-9,
        };
        let mut report = StepReport::new(1.0);
        report.buses.push(BusStepReport {
            bus_id: 7,
            injected: ThreePhaseComplex::splat(Complex64::new(0.3, 0.06)),
            voltages: balanced(R120),
            outcomes: PhaseOutcomes {
                a: outcome,
                b: outcome,
                c: SolveOutcome {
                    converged: false,
                    ..outcome
                },
            },
            published: 3,
        });
        assert!(!report.converged());
        let table = report.to_table();
        assert_eq!(table.lines().count(), 5);
        assert!(table.contains("| 7 "));
        assert!(table.contains("-120.000"));
        assert!(table.contains("3.20e-9"));
    }
}
