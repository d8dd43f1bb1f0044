use nalgebra_sparse::CscMatrix;
use rsparse::{
    self,
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::Solve;
use crate::error::SolveError;

#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
    dim: usize,
}

impl Solve for RSparseSolver {
    /// Solves the sparse linear system with a left-looking LU from rsparse.
    fn solve(&mut self, jacobian: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), SolveError> {
        let n = jacobian.nrows();
        if jacobian.ncols() != n || b.len() != n {
            return Err(SolveError::LinearSolve(format!(
                "dimension mismatch: {}x{} matrix, rhs of length {}",
                jacobian.nrows(),
                jacobian.ncols(),
                b.len()
            )));
        }
        let a = data::Sprs {
            m: n,
            n,
            i: jacobian.row_indices().to_vec(),
            p: jacobian.col_offsets().iter().map(|&v| v as isize).collect(),
            x: jacobian.values().to_vec(),
            nzmax: jacobian.nnz(),
        };
        if self.dim != n {
            self.symbolic = None;
            self.dim = n;
        }
        let s = self.symbolic.get_or_insert_with(|| sqr(&a, 1, false));
        self.x.resize(n, 0.0);
        let x = &mut self.x;

        let num = lu(&a, s, 1e-6)
            .map_err(|_| SolveError::LinearSolve("LU factorization failed".into()))?;
        ipvec(&num.pinv, b, &mut x[..]); // x = P*b
        lsolve(&num.l, x); // x = L\x
        usolve(&num.u, x); // x = U\x
        ipvec(&s.q, x, b); // b = Q*x

        Ok(())
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.dim = 0;
    }
}

fn ipvec_identity<T: Numeric<T>>(b: &[T], x: &mut [T]) {
    x.copy_from_slice(b);
}

fn ipvec_perm<T: Numeric<T>>(p: &[isize], b: &[T], x: &mut [T]) {
    for k in 0..b.len() {
        x[p[k] as usize] = b[k];
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => ipvec_perm(pvec, b, x),
        None => ipvec_identity(b, x),
    }
}
