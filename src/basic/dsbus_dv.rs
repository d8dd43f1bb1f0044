use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

/// Partial derivatives of the bus power injections for one admittance entry.
///
/// Returns `(dS_dVa, dS_dVm)` at position `(r, c)`, excluding the diagonal
/// current term that [`build_jacobian`] adds once per bus.
#[allow(non_snake_case)]
#[inline(always)]
fn dSbus_dV_entry(
    y: Complex64,
    v_r: Complex64,
    v_c: Complex64,
    vnorm_c: Complex64,
) -> (Complex64, Complex64) {
    let dS_dVa = -Complex64::i() * v_r * (y * v_c).conj();
    let dS_dVm = v_r * (y * vnorm_c).conj();
    (dS_dVa, dS_dVm)
}

/// Builds the reduced polar Newton-Raphson Jacobian straight from `Ybus`.
///
/// Buses must be in solver order (PV, PQ, fixed). Rows are `[P(PV,PQ); Q(PQ)]`
/// and columns `[θ(PV,PQ); |V|(PQ)]`:
///
/// ```text
/// J = | Re dS/dθ   Re dS/d|V| |
///     | Im dS/dθ   Im dS/d|V| |
/// ```
///
/// The derivatives are the complex-matrix forms from MatPower:
///  R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and
///  their Derivatives using Complex Matrix Notation", MATPOWER
///  Technical Note 2, February 2010.
///
/// The sparsity pattern depends only on `Ybus`, never on the voltages, so a
/// cached symbolic factorization stays valid across iterations.
#[allow(non_snake_case)]
pub fn build_jacobian(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    npv: usize,
    npq: usize,
) -> CscMatrix<f64> {
    let n_bus = npv + npq;
    let dim = n_bus + npq;
    let v_norm = v.map(|e| if e.norm() > 0.0 { e / e.norm() } else { e });
    let i_bus = y_bus * v;

    let mut jac = CooMatrix::new(dim, dim);
    let mut place = |r: usize, c: usize, dS_dVa: Complex64, dS_dVm: Complex64| {
        if r >= n_bus || c >= n_bus {
            return;
        }
        jac.push(r, c, dS_dVa.re);
        if c >= npv {
            jac.push(r, n_bus + c - npv, dS_dVm.re);
        }
        if r >= npv {
            jac.push(n_bus + r - npv, c, dS_dVa.im);
            if c >= npv {
                jac.push(n_bus + r - npv, n_bus + c - npv, dS_dVm.im);
            }
        }
    };

    for (r, c, y) in y_bus.triplet_iter() {
        let (dS_dVa, dS_dVm) = dSbus_dV_entry(*y, v[r], v[c], v_norm[c]);
        place(r, c, dS_dVa, dS_dVm);
    }
    for k in 0..n_bus {
        let dS_dVa = Complex64::i() * v[k] * i_bus[k].conj();
        let dS_dVm = i_bus[k].conj() * v_norm[k];
        place(k, k, dS_dVa, dS_dVm);
    }
    CscMatrix::from(&jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::system::NewtonNetwork;
    use crate::io::topology::tests::three_bus;

    /// Mismatch vector `[Re ΔS(PV,PQ); Im ΔS(PQ)]` at the given voltages.
    fn mismatch(net: &NewtonNetwork, v: &DVector<Complex64>) -> DVector<f64> {
        let s = v.component_mul(&(&net.y_bus * v).conjugate());
        let n_bus = net.npv + net.npq;
        let mut f = DVector::zeros(net.state_len());
        for k in 0..n_bus {
            f[k] = s[k].re;
        }
        for k in net.npv..n_bus {
            f[n_bus + k - net.npv] = s[k].im;
        }
        f
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let net = NewtonNetwork::from_topology(&three_bus()).unwrap();
        let n_bus = net.npv + net.npq;
        // perturb away from the flat start so every term is exercised
        let v = net.v.map(|e| e * Complex64::from_polar(1.0, 0.05));
        let jac = nalgebra::DMatrix::from(&build_jacobian(&net.y_bus, &v, net.npv, net.npq));
        let h = 1e-7;
        for col in 0..net.state_len() {
            let mut vp = v.clone();
            if col < n_bus {
                vp[col] *= Complex64::from_polar(1.0, h);
            } else {
                let k = col - n_bus + net.npv;
                let scale = (vp[k].norm() + h) / vp[k].norm();
                vp[k] *= scale;
            }
            let fd = (mismatch(&net, &vp) - mismatch(&net, &v)) / h;
            for row in 0..net.state_len() {
                assert!(
                    (fd[row] - jac[(row, col)]).abs() < 1e-4,
                    "J[{row},{col}] = {} but finite difference gives {}",
                    jac[(row, col)],
                    fd[row]
                );
            }
        }
    }

    #[test]
    fn test_pattern_independent_of_voltage() {
        let net = NewtonNetwork::from_topology(&three_bus()).unwrap();
        let a = build_jacobian(&net.y_bus, &net.v, net.npv, net.npq);
        let v = net.v.map(|e| e * 0.9);
        let b = build_jacobian(&net.y_bus, &v, net.npv, net.npq);
        assert_eq!(a.col_offsets(), b.col_offsets());
        assert_eq!(a.row_indices(), b.row_indices());
    }
}
