use std::f64::consts::PI;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::{
    dsbus_dv::build_jacobian,
    engine::AlgebraEngine,
    solver::{DefaultSolver, Solve},
    system::{NewtonNetwork, VoltageSnapshot},
};
use crate::{
    error::{InitError, SolveError},
    io::topology::Topology,
};

/// Polar Newton-Raphson power flow engine over a sparse LU backend.
#[derive(Default)]
pub struct NewtonEngine<S: Solve = DefaultSolver> {
    solver: S,
}

impl<S: Solve> NewtonEngine<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }
}

impl<S: Solve> AlgebraEngine for NewtonEngine<S> {
    type Network = NewtonNetwork;
    type Vector = DVector<f64>;
    type Matrix = CscMatrix<f64>;
    type Snapshot = VoltageSnapshot;

    fn build_network(&mut self, topology: &Topology) -> Result<NewtonNetwork, InitError> {
        self.solver.reset();
        NewtonNetwork::from_topology(topology)
    }

    fn create_vector(&self, network: &NewtonNetwork) -> DVector<f64> {
        DVector::zeros(network.state_len())
    }

    fn create_matrix(&self, network: &NewtonNetwork) -> CscMatrix<f64> {
        CscMatrix::zeros(network.state_len(), network.state_len())
    }

    fn set_load(
        &mut self,
        network: &mut NewtonNetwork,
        bus_index: usize,
        p_mw: f64,
        q_mvar: f64,
    ) -> Result<(), SolveError> {
        network.set_load(bus_index, Complex64::new(p_mw, q_mvar))
    }

    fn assemble_rhs(
        &mut self,
        network: &NewtonNetwork,
        rhs: &mut DVector<f64>,
    ) -> Result<(), SolveError> {
        if rhs.len() != network.state_len() {
            return Err(SolveError::Rhs(format!(
                "vector of length {} for a state of length {}",
                rhs.len(),
                network.state_len()
            )));
        }
        let mis = network.mismatch();
        assemble_f(rhs, network.npv + network.npq, &mis, network.npv);
        Ok(())
    }

    fn assemble_jacobian(
        &mut self,
        network: &NewtonNetwork,
        jacobian: &mut CscMatrix<f64>,
    ) -> Result<(), SolveError> {
        let n = network.state_len();
        if jacobian.nrows() != n || jacobian.ncols() != n {
            return Err(SolveError::Jacobian(format!(
                "{}x{} matrix for a state of length {n}",
                jacobian.nrows(),
                jacobian.ncols()
            )));
        }
        *jacobian = build_jacobian(&network.y_bus, &network.v, network.npv, network.npq);
        Ok(())
    }

    fn zero(&self, vector: &mut DVector<f64>) {
        vector.fill(0.0);
    }

    fn solve(
        &mut self,
        jacobian: &CscMatrix<f64>,
        rhs: &DVector<f64>,
        solution: &mut DVector<f64>,
    ) -> Result<(), SolveError> {
        if solution.len() != rhs.len() {
            return Err(SolveError::LinearSolve(format!(
                "solution of length {} for a right-hand side of length {}",
                solution.len(),
                rhs.len()
            )));
        }
        solution.copy_from(rhs);
        if solution.is_empty() {
            return Ok(());
        }
        self.solver.solve(jacobian, solution.as_mut_slice())
    }

    fn apply_solution(&mut self, network: &mut NewtonNetwork, solution: &DVector<f64>) {
        update_v(network, solution);
    }

    fn snapshot(&self, network: &NewtonNetwork) -> VoltageSnapshot {
        network.voltage_snapshot()
    }

    fn restore(&mut self, network: &mut NewtonNetwork, snapshot: &VoltageSnapshot) {
        network.restore_voltages(snapshot);
    }

    fn residual_norm(&self, rhs: &DVector<f64>) -> f64 {
        rhs.iter().fold(0.0, |acc: f64, x| {
            if acc.is_nan() || x.is_nan() {
                f64::NAN
            } else {
                acc.max(x.abs())
            }
        })
    }

    fn read_voltage(
        &self,
        network: &NewtonNetwork,
        bus_index: usize,
    ) -> Result<(f64, f64), SolveError> {
        let v = network.voltage(bus_index)?;
        Ok((v.norm(), v.arg().to_degrees()))
    }
}

#[inline(always)]
fn assemble_f(f: &mut DVector<f64>, n_bus: usize, mis: &DVector<Complex64>, npv: usize) {
    let num_state = f.len();
    f.rows_range_mut(0..n_bus)
        .zip_apply(&mis.rows_range(0..n_bus), |a, b| *a = b.re);
    f.rows_range_mut(n_bus..num_state)
        .zip_apply(&mis.rows_range(npv..n_bus), |a, b| *a = b.im);
}

#[inline(always)]
fn update_v(network: &mut NewtonNetwork, dx: &DVector<f64>) {
    let npv = network.npv;
    let n_bus = npv + network.npq;
    let num_state = dx.len();
    network
        .v_a
        .rows_range_mut(0..n_bus)
        .zip_apply(&dx.rows_range(0..n_bus), |a, b| {
            *a -= b;
            *a = a.rem_euclid(2.0 * PI);
        });
    network
        .v_m
        .rows_range_mut(npv..n_bus)
        .zip_apply(&dx.rows_range(n_bus..num_state), |a, b| *a -= b);
    let NewtonNetwork { v, v_m, v_a, .. } = network;
    v.zip_zip_apply(&*v_m, &*v_a, |e, vm, va| *e = Complex64::from_polar(vm, va));
}
