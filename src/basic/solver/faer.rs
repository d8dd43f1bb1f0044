use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use nalgebra_sparse::CscMatrix;

use super::Solve as PoSolve;
use crate::error::SolveError;

#[derive(Default)]
pub struct FaerSolver {
    symbolic: Option<SymbolicLu<usize>>,
    dim: usize,
}

impl PoSolve for FaerSolver {
    /// Solves the sparse linear system with faer's supernodal LU.
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
        // nalgebra-sparse keeps offsets monotone and row indices sorted and in range.
        let s = unsafe {
            SymbolicSparseColMatRef::new_unchecked(
                n,
                n,
                jacobian.col_offsets(),
                None,
                jacobian.row_indices(),
            )
        };
        let mat = SparseColMatRef::new(s, jacobian.values());
        if self.dim != n {
            self.symbolic = None;
            self.dim = n;
        }
        let symbolic = match self.symbolic.take() {
            Some(symbolic) => symbolic,
            None => SymbolicLu::try_new(s)
                .map_err(|_| SolveError::LinearSolve("faer symbolic factorization failed".into()))?,
        };
        let lu = Lu::try_new_with_symbolic(symbolic.clone(), mat)
            .map_err(|_| SolveError::LinearSolve("faer numeric factorization failed".into()))?;
        self.symbolic = Some(symbolic);

        let rhs = MatMut::from_column_major_slice_mut(b, n, 1);
        lu.solve_in_place(rhs);
        Ok(())
    }

    fn reset(&mut self) {
        self.symbolic = None;
        self.dim = 0;
    }
}
