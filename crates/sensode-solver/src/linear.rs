//! Dense linear system solvers and conditioning estimates.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Threshold used for singularity diagnosis: `eps^(2/3)`.
pub fn singularity_precision() -> f64 {
    f64::EPSILON.powf(2.0 / 3.0)
}

/// Solve a linear system Ax = b using LU decomposition.
pub fn solve_dense(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    check_square(a, b.len())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

/// Solve AX = B for a matrix right-hand side.
pub fn solve_dense_matrix(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_square(a, b.nrows())?;
    a.clone().lu().solve(b).ok_or(Error::SingularMatrix)
}

/// Minimum-norm least-squares solution of AX = B via the SVD.
///
/// Used where a singular system should still yield a usable answer.
pub fn solve_least_squares(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_square(a, b.nrows())?;
    let eps = singularity_precision() * a.amax().max(1.0);
    a.clone().svd(true, true).solve(b, eps).map_err(|_| Error::SingularMatrix)
}

fn check_square(a: &DMatrix<f64>, rhs_len: usize) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if a.nrows() != rhs_len {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: rhs_len,
        });
    }
    Ok(())
}

/// Cheap reciprocal condition estimate from the diagonal of the LU factor.
///
/// Returns `min|u_ii| / max|u_ii|`; 0 for an exactly singular factor and 1
/// for an empty matrix.
pub fn rcond_from_lu_diagonal(u_diag: &DVector<f64>) -> f64 {
    if u_diag.is_empty() {
        return 1.0;
    }
    let max = u_diag.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if max == 0.0 {
        return 0.0;
    }
    let min = u_diag.iter().fold(f64::INFINITY, |m, v| m.min(v.abs()));
    min / max
}

/// 2-norm condition number from the singular values.
pub fn condition_number(a: &DMatrix<f64>) -> f64 {
    if a.is_empty() {
        return 1.0;
    }
    let sv = a.clone().singular_values();
    let max = sv.max();
    let min = sv.min();
    if min == 0.0 { f64::INFINITY } else { max / min }
}

/// Two-stage singularity test: the cheap `rcond` flags, the condition number confirms.
pub fn is_singular(a: &DMatrix<f64>, rcond: f64) -> bool {
    let precision = singularity_precision();
    if rcond >= precision {
        return false;
    }
    condition_number(a) > 1.0 / precision
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_solve_simple() {
        // 2x + y = 5
        // x + 3y = 6
        // Solution: x = 1.8, y = 1.4
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let b = dvector![5.0, 6.0];

        let x = solve_dense(&a, &b).unwrap();

        assert!((x[0] - 1.8).abs() < 1e-10);
        assert!((x[1] - 1.4).abs() < 1e-10);
    }

    #[test]
    fn test_singular_matrix() {
        let a = dmatrix![1.0, 2.0; 2.0, 4.0]; // Singular (row 2 = 2 * row 1)
        let b = dvector![1.0, 2.0];

        let result = solve_dense(&a, &b);
        assert!(matches!(result, Err(Error::SingularMatrix)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = dmatrix![1.0, 2.0; 3.0, 4.0];
        let b = dvector![1.0, 2.0, 3.0];

        let result = solve_dense(&a, &b);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_solve_matrix_rhs() {
        let a = dmatrix![2.0, 0.0; 0.0, 4.0];
        let b = dmatrix![2.0, 4.0; 4.0, 8.0];
        let x = solve_dense_matrix(&a, &b).unwrap();
        assert_eq!(x, dmatrix![1.0, 2.0; 1.0, 2.0]);
    }

    #[test]
    fn test_least_squares_on_singular() {
        let a = dmatrix![1.0, 1.0; 1.0, 1.0];
        let b = dmatrix![2.0; 2.0];
        let x = solve_least_squares(&a, &b).unwrap();
        assert!((x[(0, 0)] - 1.0).abs() < 1e-10);
        assert!((x[(1, 0)] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_rcond_and_condition() {
        assert_eq!(rcond_from_lu_diagonal(&dvector![2.0, -4.0]), 0.5);
        assert_eq!(rcond_from_lu_diagonal(&dvector![0.0, 0.0]), 0.0);
        let a = dmatrix![1.0, 0.0; 0.0, 1e-3];
        assert!((condition_number(&a) - 1e3).abs() < 1e-6);
    }

    #[test]
    fn test_two_stage_singularity() {
        let singular = dmatrix![1.0, -1.0; -1.0, 1.0];
        assert!(is_singular(&singular, 0.0));
        // A well-conditioned matrix is never reported, even on a bad rcond.
        let fine = dmatrix![1.0, 0.0; 0.0, 1.0];
        assert!(!is_singular(&fine, 0.0));
        assert!(!is_singular(&singular, 1.0));
    }
}
