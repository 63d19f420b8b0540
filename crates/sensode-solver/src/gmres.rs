//! Restarted GMRES for real linear systems.
//!
//! Solves A*x = b where A is represented by a [`RealOperator`] trait object.
//! Used by the sparse linear-solve strategy of the Newton solver.

use crate::operator::RealOperator;

/// GMRES solver configuration.
#[derive(Debug, Clone)]
pub struct GmresConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Convergence tolerance (relative residual).
    pub tol: f64,
    /// Restart parameter (Krylov subspace dimension before restart).
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-8,
            restart: 30,
        }
    }
}

/// Result of a GMRES solve.
#[derive(Debug, Clone)]
pub struct GmresResult {
    /// Solution vector.
    pub x: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final relative residual.
    pub residual: f64,
    /// Whether the solver converged.
    pub converged: bool,
}

/// Solve A*x = b using restarted GMRES with modified Gram-Schmidt.
///
/// A right-hand side of the wrong length yields a non-converged result.
pub fn solve_gmres(op: &dyn RealOperator, b: &[f64], config: &GmresConfig) -> GmresResult {
    let n = op.dim();
    if b.len() != n {
        return GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: f64::NAN,
            converged: false,
        };
    }

    let b_norm = norm(b);
    if b_norm < 1e-30 {
        return GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let mut x = vec![0.0; n];
    let mut total_iter = 0;

    while total_iter < config.max_iter {
        let r = residual(op, b, &x);
        let r_norm = norm(&r);
        if r_norm / b_norm < config.tol {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: r_norm / b_norm,
                converged: true,
            };
        }

        // Arnoldi process
        let m = config.restart.min(n).max(1);
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        let mut h = vec![vec![0.0; m + 1]; m];
        v.push(r.iter().map(|ri| ri / r_norm).collect());

        let mut g = vec![0.0; m + 1];
        g[0] = r_norm;
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;

            let mut w = vec![0.0; n];
            op.apply(&v[k], &mut w);

            for j in 0..=k {
                let hij = dot(&v[j], &w);
                h[k][j] = hij;
                for (wi, vji) in w.iter_mut().zip(&v[j]) {
                    *wi -= hij * vji;
                }
            }

            let w_norm = norm(&w);
            h[k][k + 1] = w_norm;

            // Apply previous Givens rotations to column k
            for j in 0..k {
                let temp = cs[j] * h[k][j] + sn[j] * h[k][j + 1];
                h[k][j + 1] = -sn[j] * h[k][j] + cs[j] * h[k][j + 1];
                h[k][j] = temp;
            }

            let (c, s) = givens_rotation(h[k][k], h[k][k + 1]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k][k + 1];
            h[k][k + 1] = 0.0;

            g[k + 1] = -s * g[k];
            g[k] *= c;

            k += 1;
            if w_norm < 1e-30 {
                // Lucky breakdown
                break;
            }
            v.push(w.iter().map(|wi| wi / w_norm).collect());

            if g[k].abs() / b_norm < config.tol {
                break;
            }
        }

        // Back-substitution for H*y = g
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            if h[i][i].abs() > 1e-30 {
                y[i] = sum / h[i][i];
            }
        }
        for (i, yi) in y.iter().enumerate() {
            for (xj, vij) in x.iter_mut().zip(&v[i]) {
                *xj += vij * yi;
            }
        }
    }

    let final_res = norm(&residual(op, b, &x)) / b_norm;
    GmresResult {
        x,
        iterations: total_iter,
        residual: final_res,
        converged: final_res < config.tol,
    }
}

fn residual(op: &dyn RealOperator, b: &[f64], x: &[f64]) -> Vec<f64> {
    let mut ax = vec![0.0; b.len()];
    op.apply(x, &mut ax);
    b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Givens rotation zeroing `b` in `(a, b)`.
fn givens_rotation(a: f64, b: f64) -> (f64, f64) {
    if b.abs() < 1e-30 {
        return (1.0, 0.0);
    }
    let r = a.hypot(b);
    (a / r, b / r)
}
