use num_complex::Complex64;
use tracing::{debug, trace};

use super::{
    federate::{FederateRuntime, SubscriptionHandle},
    phase::{Phase, ThreePhaseComplex},
};
use crate::error::FederateError;

/// Unit feeders report their power in.
pub const FEEDER_POWER_UNITS: &str = "VA";

/// Subscriptions of one distribution feeder plus the staleness fallback.
#[derive(Debug, Clone)]
pub struct FeederBinding {
    pub feeder_name: String,
    pub subscriptions: [SubscriptionHandle; 3],
    /// Last accepted value per phase, in the feeder's native unit.
    pub last_known: ThreePhaseComplex,
}

impl FeederBinding {
    /// Registers `{feeder}/Sa`, `{feeder}/Sb` and `{feeder}/Sc`.
    pub fn register<R: FederateRuntime>(
        runtime: &mut R,
        feeder_name: &str,
    ) -> Result<Self, FederateError> {
        let mut subscribe = |phase: Phase| {
            let key = format!("{feeder_name}/S{}", phase.letter());
            runtime.register_subscription(&key, FEEDER_POWER_UNITS)
        };
        let subscriptions = [
            subscribe(Phase::A)?,
            subscribe(Phase::B)?,
            subscribe(Phase::C)?,
        ];
        Ok(Self {
            feeder_name: feeder_name.to_owned(),
            subscriptions,
            last_known: ThreePhaseComplex::default(),
        })
    }

    /// Overwrites `last_known` with every fresh subscription value; stale
    /// phases keep their previous value.
    pub fn refresh<R: FederateRuntime>(&mut self, runtime: &R) -> Result<(), FederateError> {
        for phase in Phase::ALL {
            let handle = self.subscriptions[phase.index()];
            if runtime.subscription_is_fresh(handle)? {
                self.last_known[phase] = runtime.subscription_value(handle)?;
            } else {
                trace!(feeder = %self.feeder_name, %phase, "stale subscription, keeping last value");
            }
        }
        Ok(())
    }
}

/// A transmission bus and the feeders that load it.
#[derive(Debug, Clone)]
pub struct BusGroup {
    pub bus_id: i64,
    /// Topology index resolved once at start-up.
    pub bus_index: usize,
    pub feeders: Vec<FeederBinding>,
}

/// Turns feeder subscriptions into the per-phase power injected at a bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeederAggregator {
    /// Admission limit per feeder and phase, in p.u.
    pub max_apparent_power: f64,
    /// Native units per p.u.
    pub power_base: f64,
}

impl FeederAggregator {
    pub fn new(max_apparent_power: f64, power_base: f64) -> Self {
        Self {
            max_apparent_power,
            power_base,
        }
    }

    /// Refreshes every feeder of the group, converts to p.u., clamps each
    /// value and sums per phase.
    pub fn aggregate<R: FederateRuntime>(
        &self,
        group: &mut BusGroup,
        runtime: &R,
    ) -> Result<ThreePhaseComplex, FederateError> {
        let mut total = ThreePhaseComplex::default();
        for feeder in &mut group.feeders {
            feeder.refresh(runtime)?;
            let clamped = feeder.last_known.map(|s| {
                let limited = limit_power(s / self.power_base, self.max_apparent_power);
                if limited != s / self.power_base {
                    debug!(feeder = %feeder.feeder_name, s = %s, "feeder power clamped");
                }
                limited
            });
            total += clamped;
        }
        Ok(total)
    }
}

/// Scales `s` down to magnitude `max` when it exceeds it, keeping its angle.
pub fn limit_power(s: Complex64, max: f64) -> Complex64 {
    let magnitude = s.norm();
    if magnitude > max {
        s * (max / magnitude)
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::loopback::LoopbackFederate;

    #[test]
    fn test_limit_power() {
        let s = limit_power(Complex64::new(2.0, 0.0), 1.0);
        assert_eq!(s, Complex64::new(1.0, 0.0));

        let under = Complex64::new(0.3, -0.4);
        assert_eq!(limit_power(under, 1.0), under);

        let over = Complex64::new(3.0, 4.0);
        let clamped = limit_power(over, 1.0);
        assert!((clamped.norm() - 1.0).abs() < 1e-12);
        assert!((clamped.arg() - over.arg()).abs() < 1e-12);
    }

    fn group_with(runtime: &mut LoopbackFederate, feeders: &[&str]) -> BusGroup {
        BusGroup {
            bus_id: 2,
            bus_index: 1,
            feeders: feeders
                .iter()
                .map(|name| FeederBinding::register(runtime, name).unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_register_keys() {
        let mut runtime = LoopbackFederate::new(1.0);
        let group = group_with(&mut runtime, &["gld_1"]);
        assert_eq!(group.feeders[0].feeder_name, "gld_1");
        assert_eq!(
            runtime.subscription_keys(),
            vec!["gld_1/Sa", "gld_1/Sb", "gld_1/Sc"]
        );
    }

    #[test]
    fn test_three_feeders_sum() {
        let mut runtime = LoopbackFederate::new(1.0);
        let mut group = group_with(&mut runtime, &["f1", "f2", "f3"]);
        let s = Complex64::new(0.1e8, 0.02e8);
        for name in ["f1", "f2", "f3"] {
            for phase in Phase::ALL {
                runtime
                    .inject(&format!("{name}/S{}", phase.letter()), s)
                    .unwrap();
            }
        }
        let total = FeederAggregator::new(1.0, 1e8)
            .aggregate(&mut group, &runtime)
            .unwrap();
        for (_, v) in total.iter() {
            assert!((v - Complex64::new(0.3, 0.06)).norm() < 1e-12);
        }
    }

    #[test]
    fn test_stale_value_is_kept() {
        let mut runtime = LoopbackFederate::new(1.0);
        let mut group = group_with(&mut runtime, &["f1"]);
        let aggregator = FeederAggregator::new(1.0, 1e8);
        runtime.inject("f1/Sa", Complex64::new(0.5e8, 0.1e8)).unwrap();
        runtime.inject("f1/Sb", Complex64::new(0.2e8, 0.0)).unwrap();
        let first = aggregator.aggregate(&mut group, &runtime).unwrap();
        assert!((first.a - Complex64::new(0.5, 0.1)).norm() < 1e-12);
        assert_eq!(first.c, Complex64::new(0.0, 0.0));

        // next grant clears freshness, only phase B gets a new sample
        runtime.enter_executing_mode().unwrap();
        runtime.request_time(1.0).unwrap();
        runtime.inject("f1/Sb", Complex64::new(0.4e8, 0.0)).unwrap();
        let second = aggregator.aggregate(&mut group, &runtime).unwrap();
        assert!((second.a - Complex64::new(0.5, 0.1)).norm() < 1e-12);
        assert!((second.b - Complex64::new(0.4, 0.0)).norm() < 1e-12);
        assert_eq!(group.feeders[0].last_known.a, Complex64::new(0.5e8, 0.1e8));
    }

    #[test]
    fn test_clamp_applies_per_feeder() {
        let mut runtime = LoopbackFederate::new(1.0);
        let mut group = group_with(&mut runtime, &["f1", "f2"]);
        runtime.inject("f1/Sa", Complex64::new(2.0e8, 0.0)).unwrap();
        runtime.inject("f2/Sa", Complex64::new(0.5e8, 0.0)).unwrap();
        let total = FeederAggregator::new(1.0, 1e8)
            .aggregate(&mut group, &runtime)
            .unwrap();
        assert!((total.a - Complex64::new(1.5, 0.0)).norm() < 1e-12);
    }
}
