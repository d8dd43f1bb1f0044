use nalgebra_sparse::CscMatrix;

use crate::error::SolveError;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

/// A trait for solving sparse linear systems.
pub trait Solve {
    /// Solves `jacobian * x = b` in place, leaving `x` in `b`.
    ///
    /// Implementations may cache the symbolic factorization between calls as
    /// long as the sparsity pattern and dimension do not change.
    fn solve(&mut self, jacobian: &CscMatrix<f64>, b: &mut [f64]) -> Result<(), SolveError>;

    /// Drops any cached factorization.
    fn reset(&mut self) {}
}
