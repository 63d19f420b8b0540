//! Linear-solve strategies for Jacobian systems.
//!
//! The Newton solver and the steady-state sensitivities factor the model
//! Jacobian once per point and then solve one or more right-hand sides.
//! [`select_strategy`] picks between a dense LU and a sparse Krylov solver
//! based on the configured [`LinearSolver`] and the system size.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use sensode_core::{LinearSolver, Model, ModelContext, NewtonOptions};

use crate::error::{Error, Result};
use crate::gmres::{GmresConfig, solve_gmres};
use crate::linear::{self, rcond_from_lu_diagonal};
use crate::operator::SparseOperator;

/// A way of solving `J * v = rhs` for the model Jacobian `J`.
pub trait LinearSolveStrategy: Send {
    /// Which solver this strategy implements.
    fn kind(&self) -> LinearSolver;

    /// Assemble and factor the Jacobian at `(t, x)`.
    fn prepare(&mut self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Result<()>;

    /// Solve with the most recently prepared Jacobian.
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>>;

    /// Solve for every column of `rhs`.
    fn solve_matrix(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut out = DMatrix::zeros(rhs.nrows(), rhs.ncols());
        for j in 0..rhs.ncols() {
            let col = self.solve(&rhs.column(j).into_owned())?;
            out.set_column(j, &col);
        }
        Ok(out)
    }

    /// Whether the prepared Jacobian is numerically singular.
    fn is_singular(&self) -> bool;
}

/// Dense LU factorization.
#[derive(Debug)]
pub struct DenseStrategy {
    jacobian: DMatrix<f64>,
    lu: Option<LU<f64, Dyn, Dyn>>,
    rcond: f64,
}

impl Default for DenseStrategy {
    fn default() -> Self {
        Self {
            jacobian: DMatrix::zeros(0, 0),
            lu: None,
            rcond: 0.0,
        }
    }
}

impl DenseStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap reciprocal condition estimate of the prepared Jacobian.
    pub fn rcond(&self) -> f64 {
        self.rcond
    }
}

impl LinearSolveStrategy for DenseStrategy {
    fn kind(&self) -> LinearSolver {
        LinearSolver::Dense
    }

    fn prepare(&mut self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Result<()> {
        let jacobian = model.jacobian(ctx, t, x);
        if jacobian.nrows() != x.len() || jacobian.ncols() != x.len() {
            return Err(Error::DimensionMismatch {
                expected: x.len(),
                actual: jacobian.nrows(),
            });
        }
        let lu = jacobian.clone().lu();
        self.rcond = rcond_from_lu_diagonal(&lu.u().diagonal());
        self.lu = Some(lu);
        self.jacobian = jacobian;
        Ok(())
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let lu = self.lu.as_ref().ok_or(Error::SingularMatrix)?;
        if rhs.len() != self.jacobian.nrows() {
            return Err(Error::DimensionMismatch {
                expected: self.jacobian.nrows(),
                actual: rhs.len(),
            });
        }
        lu.solve(rhs).ok_or(Error::SingularMatrix)
    }

    fn is_singular(&self) -> bool {
        linear::is_singular(&self.jacobian, self.rcond)
    }
}

/// Sparse Jacobian solved by restarted GMRES, with a dense LU fallback.
#[derive(Debug)]
pub struct SparseStrategy {
    operator: Option<SparseOperator>,
    triplets: Vec<(usize, usize, f64)>,
    n: usize,
    config: GmresConfig,
}

impl SparseStrategy {
    pub fn new(config: GmresConfig) -> Self {
        Self {
            operator: None,
            triplets: Vec::new(),
            n: 0,
            config,
        }
    }

    fn assemble_dense(&self) -> DMatrix<f64> {
        let mut matrix = DMatrix::zeros(self.n, self.n);
        for &(row, col, value) in &self.triplets {
            matrix[(row, col)] += value;
        }
        matrix
    }
}

impl LinearSolveStrategy for SparseStrategy {
    fn kind(&self) -> LinearSolver {
        LinearSolver::Sparse
    }

    fn prepare(&mut self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Result<()> {
        let triplets = model.jacobian_sparse(ctx, t, x);
        let n = x.len();
        let operator = SparseOperator::from_triplets(n, &triplets).ok_or_else(|| Error::DimensionMismatch {
            expected: n,
            actual: triplets.iter().map(|&(r, c, _)| r.max(c) + 1).max().unwrap_or(0),
        })?;
        self.operator = Some(operator);
        self.triplets = triplets;
        self.n = n;
        Ok(())
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let op = self.operator.as_ref().ok_or(Error::SingularMatrix)?;
        if rhs.len() != self.n {
            return Err(Error::DimensionMismatch {
                expected: self.n,
                actual: rhs.len(),
            });
        }
        let result = solve_gmres(op, rhs.as_slice(), &self.config);
        if result.converged {
            return Ok(DVector::from_vec(result.x));
        }
        // GMRES didn't converge - fall back to direct LU
        log::debug!(
            "GMRES stopped after {} iterations (residual {:.3e}), falling back to LU",
            result.iterations,
            result.residual
        );
        linear::solve_dense(&self.assemble_dense(), rhs)
    }

    fn is_singular(&self) -> bool {
        let dense = self.assemble_dense();
        let lu = dense.clone().lu();
        linear::is_singular(&dense, rcond_from_lu_diagonal(&lu.u().diagonal()))
    }
}

/// Pick the linear-solve strategy for a system with `nx` states.
pub fn select_strategy(solver: LinearSolver, nx: usize, options: &NewtonOptions) -> Box<dyn LinearSolveStrategy> {
    let use_sparse = match solver {
        LinearSolver::Dense => false,
        LinearSolver::Sparse => true,
        LinearSolver::Auto => nx >= options.sparse_threshold,
    };
    if use_sparse {
        let config = GmresConfig {
            max_iter: options.max_linear_steps,
            ..GmresConfig::default()
        };
        Box::new(SparseStrategy::new(config))
    } else {
        Box::new(DenseStrategy::new())
    }
}
