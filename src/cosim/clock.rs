use std::{collections::VecDeque, time::Instant};

use num_complex::Complex64;
use tracing::{debug, info, warn};

use super::{
    aggregator::{BusGroup, FeederAggregator, FeederBinding},
    bus_index::BusIndex,
    convergence::{PhaseOutcomes, SolveOutcome},
    federate::{FederateRuntime, PublicationHandle, TimeGrant},
    phase::{Phase, R120, ThreePhaseComplex, balanced, compose},
    report::{BusStepReport, RunSummary, StepReport},
    state::PhaseSolverState,
};
use crate::{
    basic::AlgebraEngine,
    error::{CoSimError, FederateError, InitError},
    io::{config::CoSimConfig, raw::load_network, topology::Topology},
};

/// Unit of published voltages.
pub const VOLTAGE_UNITS: &str = "V";

/// Step reports kept by default; older ones are dropped first.
pub const DEFAULT_REPORT_HISTORY: usize = 256;

/// Slack, relative to the period, when checking the next target against the
/// horizon.
const HORIZON_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Uninitialized,
    ExecutingMode,
    TimeRequested,
    Aggregating,
    Solving,
    Composing,
    Publishing,
    Finalized,
}

/// The three voltage publications of one bus group.
#[derive(Debug, Clone)]
pub struct VoltagePublisher {
    bus_id: i64,
    handles: [PublicationHandle; 3],
}

impl VoltagePublisher {
    /// Registers `{prefix}Va`, `{prefix}Vb` and `{prefix}Vc`.
    pub fn register<R: FederateRuntime>(
        runtime: &mut R,
        bus_id: i64,
        prefix: &str,
    ) -> Result<Self, FederateError> {
        let mut register = |phase: Phase| {
            let key = format!("{prefix}V{}", phase.letter());
            runtime.register_publication(&key, VOLTAGE_UNITS)
        };
        let handles = [
            register(Phase::A)?,
            register(Phase::B)?,
            register(Phase::C)?,
        ];
        Ok(Self { bus_id, handles })
    }

    /// Publishes every finite phase and returns how many were sent.
    pub fn publish<R: FederateRuntime>(
        &self,
        runtime: &mut R,
        voltages: ThreePhaseComplex,
    ) -> Result<usize, FederateError> {
        let mut sent = 0;
        for (phase, value) in voltages.iter() {
            if !value.is_finite() {
                warn!(bus = self.bus_id, %phase, "non-finite voltage not published");
                continue;
            }
            runtime.publish(self.handles[phase.index()], value)?;
            sent += 1;
        }
        Ok(sent)
    }
}

/// Drives the time-stepped loop: aggregate feeder power, solve each phase,
/// compose and publish, then ask for the next step.
pub struct CoSimClock<E: AlgebraEngine, R: FederateRuntime> {
    state: ClockState,
    runtime: R,
    phases: [PhaseSolverState<E>; 3],
    groups: Vec<BusGroup>,
    publishers: Vec<VoltagePublisher>,
    aggregator: FeederAggregator,
    rotation: Complex64,
    ln_magnitude: f64,
    total_time: f64,
    period: f64,
    granted_time: f64,
    steps: usize,
    reports: VecDeque<StepReport>,
    report_history: usize,
    unconverged_solves: usize,
}

impl<E: AlgebraEngine, R: FederateRuntime> CoSimClock<E, R> {
    /// Initializes the three phase solvers and registers every subscription
    /// and publication. Nothing here is retried; any failure aborts the run.
    pub fn new(
        config: &CoSimConfig,
        topology: &Topology,
        mut engine_factory: impl FnMut(Phase) -> E,
        mut runtime: R,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let options = config.solver_options()?;
        let period = runtime.period();
        if !(period.is_finite() && period > 0.0) {
            return Err(InitError::Config(format!(
                "federate period must be positive, got {period}"
            )));
        }

        let mut init = |phase: Phase| {
            PhaseSolverState::initialize(engine_factory(phase), topology, &options, phase)
        };
        let phases = [init(Phase::A)?, init(Phase::B)?, init(Phase::C)?];

        let bus_index = BusIndex::from_topology(topology);
        let mut groups = Vec::with_capacity(config.bus_groups.len());
        let mut publishers = Vec::with_capacity(config.bus_groups.len());
        for group in &config.bus_groups {
            let index = bus_index.resolve(group.bus_id)?;
            let feeders = group
                .feeders
                .iter()
                .map(|name| FeederBinding::register(&mut runtime, name))
                .collect::<Result<Vec<_>, _>>()?;
            publishers.push(VoltagePublisher::register(
                &mut runtime,
                group.bus_id,
                &group.publication_prefix,
            )?);
            info!(
                bus = group.bus_id,
                feeders = feeders.len(),
                prefix = %group.publication_prefix,
                "bus group bound"
            );
            groups.push(BusGroup {
                bus_id: group.bus_id,
                bus_index: index,
                feeders,
            });
        }

        Ok(Self {
            state: ClockState::Uninitialized,
            runtime,
            phases,
            groups,
            publishers,
            aggregator: FeederAggregator::new(
                config.max_apparent_power(),
                config.feeder_power_base(),
            ),
            rotation: R120,
            ln_magnitude: config.ln_magnitude(),
            total_time: config.total_time,
            period,
            granted_time: 0.0,
            steps: 0,
            reports: VecDeque::new(),
            report_history: DEFAULT_REPORT_HISTORY,
            unconverged_solves: 0,
        })
    }

    /// Loads the configured network file and builds the clock.
    pub fn from_config(
        config: &CoSimConfig,
        engine_factory: impl FnMut(Phase) -> E,
        runtime: R,
    ) -> Result<Self, InitError> {
        let options = config.solver_options()?;
        let topology = load_network(&config.network_file()?, options.phase_shift_sign)?;
        Self::new(config, &topology, engine_factory, runtime)
    }

    /// Keeps at most `limit` step reports; zero keeps none.
    pub fn with_report_history(mut self, limit: usize) -> Self {
        self.report_history = limit;
        self
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn granted_time(&self) -> f64 {
        self.granted_time
    }

    /// The most recent step reports, oldest first.
    pub fn reports(&self) -> &VecDeque<StepReport> {
        &self.reports
    }

    /// Hands the retained reports to the caller.
    pub fn take_reports(&mut self) -> Vec<StepReport> {
        self.reports.drain(..).collect()
    }

    fn record(&mut self, report: StepReport) {
        self.steps += 1;
        if self.report_history == 0 {
            return;
        }
        while self.reports.len() >= self.report_history {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    fn next_step_within_horizon(&self) -> bool {
        self.granted_time + self.period <= self.total_time + HORIZON_EPSILON * self.period
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn phase_state(&self, phase: Phase) -> &PhaseSolverState<E> {
        &self.phases[phase.index()]
    }

    /// Runs until the horizon is reached or the runtime terminates, then
    /// finalizes the federate.
    pub fn run(&mut self) -> Result<RunSummary, CoSimError> {
        if self.state != ClockState::Uninitialized {
            return Err(FederateError::Runtime(format!(
                "clock cannot run from state {:?}",
                self.state
            ))
            .into());
        }
        let result = self.execute();
        if result.is_err() {
            if let Err(err) = self.runtime.finalize() {
                warn!(%err, "finalize after failure also failed");
            }
            self.state = ClockState::Finalized;
        }
        result
    }

    fn execute(&mut self) -> Result<RunSummary, CoSimError> {
        self.runtime.enter_executing_mode()?;
        self.state = ClockState::ExecutingMode;
        info!(
            total_time = self.total_time,
            period = self.period,
            groups = self.groups.len(),
            "entered executing mode"
        );

        let initial = balanced(self.rotation).scale(self.ln_magnitude);
        for publisher in &self.publishers {
            publisher.publish(&mut self.runtime, initial)?;
        }

        while self.next_step_within_horizon() {
            let target = self.granted_time + self.period;
            self.state = ClockState::TimeRequested;
            match self.runtime.request_time(target)? {
                TimeGrant::Terminated => {
                    info!(time = self.granted_time, "federate runtime terminated the run");
                    break;
                }
                TimeGrant::Granted(time) if time <= self.granted_time => {
                    return Err(FederateError::Runtime(format!(
                        "granted time {time} does not advance past {}",
                        self.granted_time
                    ))
                    .into());
                }
                TimeGrant::Granted(time) => self.granted_time = time,
            }
            debug!(time = self.granted_time, "time granted");
            let report = self.step()?;
            self.record(report);
        }

        self.runtime.finalize()?;
        self.state = ClockState::Finalized;
        let summary = RunSummary {
            granted_time: self.granted_time,
            steps: self.steps,
            unconverged_solves: self.unconverged_solves,
        };
        info!(
            granted_time = summary.granted_time,
            steps = summary.steps,
            unconverged = summary.unconverged_solves,
            "co-simulation finished"
        );
        Ok(summary)
    }

    /// One granted time step over every bus group.
    fn step(&mut self) -> Result<StepReport, CoSimError> {
        let Self {
            state,
            runtime,
            phases,
            groups,
            publishers,
            aggregator,
            rotation,
            ln_magnitude,
            granted_time,
            unconverged_solves,
            ..
        } = self;
        let mut report = StepReport::new(*granted_time);

        for (group, publisher) in groups.iter_mut().zip(publishers.iter()) {
            *state = ClockState::Aggregating;
            let injected = aggregator.aggregate(group, &*runtime)?;
            debug!(
                bus = group.bus_id,
                a = %injected.a,
                b = %injected.b,
                c = %injected.c,
                "feeder power aggregated"
            );

            *state = ClockState::Solving;
            let bus_id = group.bus_id;
            let bus_index = group.bus_index;
            let mut solve = |phase: Phase| -> Result<SolveOutcome, CoSimError> {
                let started = Instant::now();
                let outcome = phases[phase.index()]
                    .solve(bus_index, injected[phase])
                    .map_err(|source| CoSimError::Solve {
                        bus_id,
                        phase,
                        source,
                    })?;
                debug!(
                    bus = bus_id,
                    %phase,
                    iterations = outcome.iterations,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "phase solved"
                );
                if !outcome.converged {
                    *unconverged_solves += 1;
                    warn!(
                        bus = bus_id,
                        %phase,
                        iterations = outcome.iterations,
                        residual = outcome.residual,
                        "power flow did not converge, using best available voltage"
                    );
                }
                Ok(outcome)
            };
            let outcomes = PhaseOutcomes {
                a: solve(Phase::A)?,
                b: solve(Phase::B)?,
                c: solve(Phase::C)?,
            };

            *state = ClockState::Composing;
            let voltages = compose(
                outcomes.a.voltage,
                outcomes.b.voltage,
                outcomes.c.voltage,
                *rotation,
            );

            *state = ClockState::Publishing;
            let published = publisher.publish(runtime, voltages.scale(*ln_magnitude))?;
            report.buses.push(BusStepReport {
                bus_id,
                injected,
                voltages,
                outcomes,
                published,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic::{NewtonEngine, solver::DefaultSolver},
        io::{
            config::{BusGroupConfig, PowerflowOptions},
            topology::tests::three_bus,
        },
        timeseries::loopback::{LoopbackFederate, ScheduledSample},
    };

    fn config(groups: Vec<BusGroupConfig>, total_time: f64) -> CoSimConfig {
        config_with(groups, total_time, PowerflowOptions::default())
    }

    fn config_with(
        groups: Vec<BusGroupConfig>,
        total_time: f64,
        powerflow: PowerflowOptions,
    ) -> CoSimConfig {
        CoSimConfig {
            federate_name: "gridpack".into(),
            total_time,
            ln_magnitude: Some(2.0),
            max_apparent_power: None,
            feeder_power_base: None,
            bus_groups: groups,
            powerflow,
            base_dir: None,
        }
    }

    fn group(bus_id: i64, feeders: &[&str], prefix: &str) -> BusGroupConfig {
        BusGroupConfig {
            bus_id,
            feeders: feeders.iter().map(|f| f.to_string()).collect(),
            publication_prefix: prefix.into(),
        }
    }

    fn clock(
        config: &CoSimConfig,
        runtime: LoopbackFederate,
    ) -> Result<CoSimClock<NewtonEngine<DefaultSolver>, LoopbackFederate>, InitError> {
        CoSimClock::new(config, &three_bus(), |_| NewtonEngine::default(), runtime)
    }

    fn feeder_samples(names: &[&str], at: f64, s: Complex64) -> Vec<ScheduledSample> {
        let mut samples = Vec::new();
        for name in names {
            for phase in Phase::ALL {
                samples.push(ScheduledSample {
                    execute_at: at,
                    key: format!("{name}/S{}", phase.letter()),
                    re: s.re,
                    im: s.im,
                });
            }
        }
        samples
    }

    #[test]
    fn test_three_feeders_end_to_end() {
        let names = ["f1", "f2", "f3"];
        let runtime = LoopbackFederate::new(1.0).with_schedule(feeder_samples(
            &names,
            1.0,
            Complex64::new(0.1e8, 0.02e8),
        ));
        let cfg = config(vec![group(2, &names, "")], 3.0);
        let mut clock = clock(&cfg, runtime).unwrap();
        assert_eq!(clock.state(), ClockState::Uninitialized);

        let summary = clock.run().unwrap();
        assert_eq!(clock.state(), ClockState::Finalized);
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.granted_time, 3.0);
        assert_eq!(summary.unconverged_solves, 0);

        let report = &clock.reports()[0];
        let bus = &report.buses[0];
        for (_, s) in bus.injected.iter() {
            assert!((s - Complex64::new(0.3, 0.06)).norm() < 1e-12);
        }
        assert!(bus.converged());
        assert_eq!(bus.published, 3);

        // identical networks and loads give identical phase-equivalent voltages
        let va = bus.outcomes.a.voltage;
        assert!(va.is_finite());
        assert!((bus.voltages.b - va * R120).norm() < 1e-9);
        assert!((bus.voltages.c - va * R120 * R120).norm() < 1e-9);

        // initial balanced set, then one publication per step, scaled by lnMagnitude
        let published = clock.runtime().published("Va").unwrap();
        assert_eq!(published.len(), 4);
        assert_eq!(published[0], (0.0, Complex64::new(2.0, 0.0)));
        assert!((published[1].1 - va * 2.0).norm() < 1e-9);
        let vb = clock.runtime().published("Vb").unwrap();
        assert!((vb[0].1 - R120 * 2.0).norm() < 1e-12);
    }

    #[test]
    fn test_stale_feeder_keeps_driving_load() {
        // samples only arrive at t = 1; later steps reuse them
        let runtime = LoopbackFederate::new(1.0).with_schedule(feeder_samples(
            &["f1"],
            1.0,
            Complex64::new(0.2e8, 0.05e8),
        ));
        let cfg = config(vec![group(2, &["f1"], "")], 3.0);
        let mut clock = clock(&cfg, runtime).unwrap();
        clock.run().unwrap();
        let reports = clock.reports();
        assert_eq!(reports.len(), 3);
        for report in reports {
            assert!((report.buses[0].injected.a - Complex64::new(0.2, 0.05)).norm() < 1e-12);
        }
        // warm start: later steps begin at the solved point
        assert_eq!(reports[2].buses[0].outcomes.a.iterations, 1);
    }

    #[test]
    fn test_stops_when_next_step_exceeds_horizon() {
        let runtime = LoopbackFederate::new(0.4);
        let cfg = config(vec![group(2, &["f1"], "")], 1.0);
        let mut clock = clock(&cfg, runtime).unwrap();
        let summary = clock.run().unwrap();
        assert_eq!(summary.steps, 2);
        assert!((summary.granted_time - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_fractional_period_reaches_horizon() {
        let runtime = LoopbackFederate::new(0.1);
        let cfg = config(vec![group(2, &["f1"], "")], 0.3);
        let mut clock = clock(&cfg, runtime).unwrap();
        let summary = clock.run().unwrap();
        assert_eq!(summary.steps, 3);
        assert!((summary.granted_time - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_unconverged_steps_keep_running() {
        let powerflow = PowerflowOptions {
            tolerance: Some(1e-300),
            max_iteration: Some(2),
            ..Default::default()
        };
        let runtime = LoopbackFederate::new(1.0).with_schedule(feeder_samples(
            &["f1"],
            1.0,
            Complex64::new(0.2e8, 0.05e8),
        ));
        let cfg = config_with(vec![group(2, &["f1"], "")], 3.0, powerflow);
        let mut clock = clock(&cfg, runtime).unwrap();
        let summary = clock.run().unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.unconverged_solves, 3 * summary.steps);
        assert_eq!(clock.state(), ClockState::Finalized);
        for report in clock.reports() {
            assert!(!report.converged());
            assert_eq!(report.buses[0].published, 3);
            assert_eq!(report.buses[0].outcomes.a.iterations, 2);
        }
        // initial balanced set plus one best-effort publication per step
        let published = clock.runtime().published("Va").unwrap();
        assert_eq!(published.len(), 1 + summary.steps);
        assert!(published.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_report_history_is_bounded() {
        let cfg = config(vec![group(2, &["f1"], "")], 5.0);
        let mut clock = clock(&cfg, LoopbackFederate::new(1.0))
            .unwrap()
            .with_report_history(2);
        let summary = clock.run().unwrap();
        assert_eq!(summary.steps, 5);
        let times: Vec<f64> = clock.reports().iter().map(|r| r.time).collect();
        assert_eq!(times, vec![4.0, 5.0]);
        assert_eq!(clock.take_reports().len(), 2);
        assert!(clock.reports().is_empty());
    }

    #[test]
    fn test_terminated_by_runtime() {
        let runtime = LoopbackFederate::new(1.0).terminate_after(2.0);
        let cfg = config(vec![group(2, &["f1"], "")], 10.0);
        let mut clock = clock(&cfg, runtime).unwrap();
        let summary = clock.run().unwrap();
        assert_eq!(summary.steps, 2);
        assert_eq!(clock.state(), ClockState::Finalized);
        assert!(clock.runtime().is_finalized());
        assert!(clock.run().is_err());
    }

    #[test]
    fn test_per_bus_publication_prefix() {
        let cfg = config(
            vec![group(2, &["f1"], "bus2/"), group(3, &["f2"], "bus3/")],
            1.0,
        );
        let mut clock = clock(&cfg, LoopbackFederate::new(1.0)).unwrap();
        clock.run().unwrap();
        for key in ["bus2/Va", "bus2/Vb", "bus2/Vc", "bus3/Va", "bus3/Vc"] {
            assert_eq!(clock.runtime().published(key).unwrap().len(), 2, "{key}");
        }
        assert!(clock.runtime().published("Va").is_none());
    }

    #[test]
    fn test_unknown_bus_aborts_initialization() {
        let cfg = config(vec![group(42, &["f1"], "")], 1.0);
        let result = clock(&cfg, LoopbackFederate::new(1.0));
        assert!(matches!(result, Err(InitError::UnknownBus(42))));
    }

    #[test]
    fn test_bad_period_rejected() {
        let cfg = config(vec![group(2, &["f1"], "")], 1.0);
        let result = clock(&cfg, LoopbackFederate::new(0.0));
        assert!(matches!(result, Err(InitError::Config(_))));
    }

    #[test]
    fn test_non_finite_phase_not_published() {
        let publisher_runtime = &mut LoopbackFederate::new(1.0);
        let publisher = VoltagePublisher::register(publisher_runtime, 2, "").unwrap();
        publisher_runtime.enter_executing_mode().unwrap();
        let voltages = ThreePhaseComplex::new(
            Complex64::new(1.0, 0.0),
            Complex64::new(f64::NAN, 0.0),
            Complex64::new(0.5, 0.5),
        );
        let sent = publisher.publish(publisher_runtime, voltages).unwrap();
        assert_eq!(sent, 2);
        assert!(publisher_runtime.published("Vb").unwrap().is_empty());
        assert_eq!(publisher_runtime.published("Vc").unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_loads_network() {
        let dir = env!("CARGO_MANIFEST_DIR");
        let cfg = CoSimConfig::from_file(format!("{dir}/cases/cosim.json")).unwrap();
        let clock = CoSimClock::from_config(
            &cfg,
            |_| NewtonEngine::<DefaultSolver>::default(),
            LoopbackFederate::new(1.0),
        )
        .unwrap();
        assert_eq!(clock.phase_state(Phase::C).phase(), Phase::C);
        assert_eq!(clock.state(), ClockState::Uninitialized);
    }
}
