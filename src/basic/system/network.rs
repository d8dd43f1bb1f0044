use std::collections::HashMap;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::admittance::{BranchAdmittance, create_y_bus};
use crate::{
    error::{InitError, SolveError},
    io::topology::{BusKind, Topology},
};

/// Single-phase network prepared for Newton-Raphson.
///
/// Buses are stored in solver order: PV buses first, then PQ buses, then the
/// buses whose voltage is held fixed (slack and isolated). `to_perm` maps a
/// topology index to its solver position, `from_perm` maps back.
#[derive(Debug, Clone)]
pub struct NewtonNetwork {
    pub(crate) y_bus: CscMatrix<Complex64>,
    /// Scheduled generation in p.u.
    pub(crate) s_gen: DVector<Complex64>,
    /// Load in p.u.
    pub(crate) s_load: DVector<Complex64>,
    pub(crate) v: DVector<Complex64>,
    pub(crate) v_m: DVector<f64>,
    pub(crate) v_a: DVector<f64>,
    pub(crate) npv: usize,
    pub(crate) npq: usize,
    pub(crate) to_perm: Vec<usize>,
    pub(crate) from_perm: Vec<usize>,
    pub(crate) s_base: f64,
}

impl NewtonNetwork {
    pub fn from_topology(topology: &Topology) -> Result<Self, InitError> {
        topology.validate()?;
        let nbus = topology.bus_count();
        let lookup: HashMap<i64, usize> = topology
            .buses
            .iter()
            .enumerate()
            .map(|(idx, bus)| (bus.number, idx))
            .collect();
        let index_of = |number: i64| {
            lookup
                .get(&number)
                .copied()
                .ok_or(InitError::UnknownBus(number))
        };

        let mut has_gen = vec![false; nbus];
        for generator in &topology.generators {
            has_gen[index_of(generator.bus)?] = true;
        }

        let mut pv = Vec::new();
        let mut pq = Vec::new();
        let mut fixed = Vec::new();
        for (idx, bus) in topology.buses.iter().enumerate() {
            match bus.kind {
                BusKind::Pv if has_gen[idx] => pv.push(idx),
                BusKind::Pv | BusKind::Pq => pq.push(idx),
                BusKind::Slack | BusKind::Isolated => fixed.push(idx),
            }
        }
        let (npv, npq) = (pv.len(), pq.len());
        let from_perm: Vec<usize> = pv.into_iter().chain(pq).chain(fixed).collect();
        let mut to_perm = vec![0; nbus];
        for (pos, &idx) in from_perm.iter().enumerate() {
            to_perm[idx] = pos;
        }

        let s_base = topology.base_mva;
        let mut shunts = vec![Complex64::new(0.0, 0.0); nbus];
        let mut v_m = DVector::zeros(nbus);
        let mut v_a = DVector::zeros(nbus);
        for (idx, bus) in topology.buses.iter().enumerate() {
            let pos = to_perm[idx];
            shunts[pos] = Complex64::new(bus.gs_mw, bus.bs_mvar) / s_base;
            v_m[pos] = if bus.vm_pu > 0.0 { bus.vm_pu } else { 1.0 };
            v_a[pos] = bus.va_deg.to_radians();
        }

        let mut s_gen = DVector::from_element(nbus, Complex64::new(0.0, 0.0));
        for generator in &topology.generators {
            let idx = index_of(generator.bus)?;
            let pos = to_perm[idx];
            s_gen[pos] += Complex64::new(generator.p_mw, generator.q_mvar) / s_base;
            // PV buses sit at the front of the solver order
            let regulated = topology.buses[idx].kind == BusKind::Slack || pos < npv;
            if regulated && generator.vm_setpoint_pu > 0.0 {
                v_m[pos] = generator.vm_setpoint_pu;
            }
        }

        let mut s_load = DVector::from_element(nbus, Complex64::new(0.0, 0.0));
        for load in &topology.loads {
            let pos = to_perm[index_of(load.bus)?];
            s_load[pos] += Complex64::new(load.p_mw, load.q_mvar) / s_base;
        }

        let mut branches = Vec::with_capacity(topology.branches.len());
        for branch in &topology.branches {
            let (f, t) = (index_of(branch.from)?, index_of(branch.to)?);
            let isolated = |idx: usize| topology.buses[idx].kind == BusKind::Isolated;
            if isolated(f) || isolated(t) {
                continue;
            }
            branches.push((to_perm[f], to_perm[t], BranchAdmittance::from_record(branch)));
        }
        let y_bus = create_y_bus(&shunts, branches);

        let v = v_m.zip_map(&v_a, |m, a| Complex64::from_polar(m, a));
        Ok(Self {
            y_bus,
            s_gen,
            s_load,
            v,
            v_m,
            v_a,
            npv,
            npq,
            to_perm,
            from_perm,
            s_base,
        })
    }

    pub fn bus_count(&self) -> usize {
        self.v.len()
    }

    pub fn npv(&self) -> usize {
        self.npv
    }

    pub fn npq(&self) -> usize {
        self.npq
    }

    /// Length of the Newton state vector: angles of PV and PQ buses followed
    /// by magnitudes of PQ buses.
    pub fn state_len(&self) -> usize {
        self.npv + 2 * self.npq
    }

    pub fn s_base(&self) -> f64 {
        self.s_base
    }

    pub fn y_bus(&self) -> &CscMatrix<Complex64> {
        &self.y_bus
    }

    /// Solver position of a bus given by its topology index.
    pub fn position(&self, bus_index: usize) -> Result<usize, SolveError> {
        self.to_perm
            .get(bus_index)
            .copied()
            .ok_or(SolveError::BusOutOfRange(bus_index))
    }

    pub fn voltage(&self, bus_index: usize) -> Result<Complex64, SolveError> {
        Ok(self.v[self.position(bus_index)?])
    }

    /// Bus voltages in topology order.
    pub fn voltages(&self) -> DVector<Complex64> {
        DVector::from_fn(self.bus_count(), |idx, _| self.v[self.to_perm[idx]])
    }

    /// Replaces the load at a bus, given in MW/Mvar.
    pub fn set_load(&mut self, bus_index: usize, s_mva: Complex64) -> Result<(), SolveError> {
        let pos = self.position(bus_index)?;
        self.s_load[pos] = s_mva / self.s_base;
        Ok(())
    }

    /// Load at a bus in MW/Mvar.
    pub fn load(&self, bus_index: usize) -> Result<Complex64, SolveError> {
        Ok(self.s_load[self.position(bus_index)?] * self.s_base)
    }

    /// Complex power mismatch `V∘conj(Y V) - (S_gen - S_load)` in solver order.
    pub fn mismatch(&self) -> DVector<Complex64> {
        let i_bus = &self.y_bus * &self.v;
        let s_calc = self.v.component_mul(&i_bus.conjugate());
        s_calc - (&self.s_gen - &self.s_load)
    }

    /// Copies the bus voltages so a failed solve can be rolled back.
    pub fn voltage_snapshot(&self) -> VoltageSnapshot {
        VoltageSnapshot {
            v: self.v.clone(),
            v_m: self.v_m.clone(),
            v_a: self.v_a.clone(),
        }
    }

    pub fn restore_voltages(&mut self, snapshot: &VoltageSnapshot) {
        self.v.copy_from(&snapshot.v);
        self.v_m.copy_from(&snapshot.v_m);
        self.v_a.copy_from(&snapshot.v_a);
    }
}

/// Bus voltages of a [`NewtonNetwork`] in solver order.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSnapshot {
    v: DVector<Complex64>,
    v_m: DVector<f64>,
    v_a: DVector<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::topology::tests::three_bus;

    #[test]
    fn test_bus_ordering() {
        let net = NewtonNetwork::from_topology(&three_bus()).unwrap();
        assert_eq!(net.npv(), 1);
        assert_eq!(net.npq(), 1);
        // bus 3 (PV), bus 2 (PQ), bus 1 (slack)
        assert_eq!(net.from_perm, vec![2, 1, 0]);
        assert_eq!(net.to_perm, vec![2, 1, 0]);
        assert_eq!(net.state_len(), 3);
    }

    #[test]
    fn test_initial_voltages_follow_setpoints() {
        let mut topo = three_bus();
        topo.buses[2].vm_pu = 0.95;
        let net = NewtonNetwork::from_topology(&topo).unwrap();
        let v = net.voltages();
        assert!((v[0].norm() - 1.02).abs() < 1e-12);
        assert!((v[1].norm() - 1.0).abs() < 1e-12);
        assert!((v[2].norm() - 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_pv_without_generator_is_pq() {
        let mut topo = three_bus();
        topo.generators.truncate(1);
        let net = NewtonNetwork::from_topology(&topo).unwrap();
        assert_eq!(net.npv(), 0);
        assert_eq!(net.npq(), 2);
    }

    #[test]
    fn test_set_load_replaces() {
        let mut net = NewtonNetwork::from_topology(&three_bus()).unwrap();
        assert!((net.load(1).unwrap() - Complex64::new(10.0, 2.0)).norm() < 1e-12);
        net.set_load(1, Complex64::new(30.0, 6.0)).unwrap();
        assert!((net.load(1).unwrap() - Complex64::new(30.0, 6.0)).norm() < 1e-12);
        assert_eq!(net.set_load(7, Complex64::new(1.0, 0.0)), Err(SolveError::BusOutOfRange(7)));
    }

    #[test]
    fn test_isolated_bus_branches_dropped() {
        let mut topo = three_bus();
        topo.buses[1].kind = BusKind::Isolated;
        let net = NewtonNetwork::from_topology(&topo).unwrap();
        // only the 1-3 line remains, so bus 2 carries just its diagonal entry
        let pos = net.position(1).unwrap();
        let off_diag = net
            .y_bus()
            .triplet_iter()
            .filter(|(r, c, _)| (*r == pos) != (*c == pos))
            .count();
        assert_eq!(off_diag, 0);
    }

    #[test]
    fn test_restore_voltages() {
        let mut net = NewtonNetwork::from_topology(&three_bus()).unwrap();
        let saved = net.voltage_snapshot();
        net.v.fill(Complex64::new(1e10, -3e9));
        net.v_m.fill(1e10);
        net.v_a.fill(2.0);
        net.restore_voltages(&saved);
        assert_eq!(net.voltage_snapshot(), saved);
        assert!((net.voltage(0).unwrap() - Complex64::new(1.02, 0.0)).norm() < 1e-12);
    }
}
