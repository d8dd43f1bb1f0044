use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

use crate::io::topology::BranchRecord;

/// Two-port admittances of a branch π-equivalent in p.u.
///
/// `yff`/`ytt` are the self terms at the from/to ends and `yft`/`ytf` the
/// mutual terms, so that `[If; It] = [yff yft; ytf ytt] [Vf; Vt]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchAdmittance {
    pub yff: Complex64,
    pub yft: Complex64,
    pub ytf: Complex64,
    pub ytt: Complex64,
}

impl BranchAdmittance {
    /// Builds the π-model with an ideal off-nominal transformer at the from end.
    pub fn from_record(branch: &BranchRecord) -> Self {
        let ys = Complex64::new(1.0, 0.0) / Complex64::new(branch.r_pu, branch.x_pu);
        let ratio = if branch.tap_ratio == 0.0 {
            1.0
        } else {
            branch.tap_ratio
        };
        let tap = Complex64::from_polar(ratio, branch.shift_deg.to_radians());
        let ytt = ys + Complex64::new(0.0, branch.b_pu / 2.0);
        Self {
            yff: ytt / (ratio * ratio),
            yft: -ys / tap.conj(),
            ytf: -ys / tap,
            ytt,
        }
    }
}

/// Assembles the nodal admittance matrix.
///
/// `branches` yields `(from, to, admittance)` with bus positions already mapped
/// to the target ordering; `shunts` holds the per-bus shunt admittance in the
/// same ordering. The diagonal is always stored so the pattern of every
/// derived Jacobian is independent of the operating point.
pub fn create_y_bus(
    shunts: &[Complex64],
    branches: impl IntoIterator<Item = (usize, usize, BranchAdmittance)>,
) -> CscMatrix<Complex64> {
    let n = shunts.len();
    let mut coo = CooMatrix::new(n, n);
    for (idx, y) in shunts.iter().enumerate() {
        coo.push(idx, idx, *y);
    }
    for (f, t, y) in branches {
        coo.push(f, f, y.yff);
        coo.push(f, t, y.yft);
        coo.push(t, f, y.ytf);
        coo.push(t, t, y.ytt);
    }
    // duplicates are summed
    CscMatrix::from(&coo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(r: f64, x: f64, b: f64) -> BranchRecord {
        BranchRecord {
            from: 1,
            to: 2,
            r_pu: r,
            x_pu: x,
            b_pu: b,
            tap_ratio: 1.0,
            shift_deg: 0.0,
        }
    }

    #[test]
    fn test_line_is_symmetric() {
        let y = BranchAdmittance::from_record(&line(0.01, 0.1, 0.2));
        assert!((y.yft - y.ytf).norm() < 1e-12);
        assert!((y.yff - y.ytt).norm() < 1e-12);
        let ys = 1.0 / Complex64::new(0.01, 0.1);
        assert!((y.yff - ys - Complex64::new(0.0, 0.1)).norm() < 1e-12);
    }

    #[test]
    fn test_phase_shifter_is_lossless_rotation() {
        let mut br = line(0.0, 0.1, 0.0);
        br.shift_deg = 30.0;
        let y = BranchAdmittance::from_record(&br);
        // |yft| == |ytf| but their angles differ by twice the shift
        assert!((y.yft.norm() - y.ytf.norm()).abs() < 1e-12);
        let diff = (y.yft.arg() - y.ytf.arg()).to_degrees();
        assert!((diff.abs() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_y_bus_rows_sum_to_shunt() {
        let y = BranchAdmittance::from_record(&line(0.02, 0.06, 0.0));
        let shunts = [Complex64::new(0.0, 0.05), Complex64::new(0.0, 0.0)];
        let y_bus = create_y_bus(&shunts, [(0, 1, y)]);
        let mut row_sum = [Complex64::new(0.0, 0.0); 2];
        for (r, _, v) in y_bus.triplet_iter() {
            row_sum[r] += v;
        }
        assert!((row_sum[0] - shunts[0]).norm() < 1e-12);
        assert!(row_sum[1].norm() < 1e-12);
    }
}
