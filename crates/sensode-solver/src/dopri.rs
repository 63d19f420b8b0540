//! Dormand-Prince 5(4) reference integrator.
//!
//! An explicit adaptive Runge-Kutta method implementing [`Integrator`].
//! Forward sensitivities are integrated together with the state as one
//! augmented vector `[x; vec(sx)]` under a common error control. Roots are
//! located by bisection on the cubic Hermite interpolant of the last step.
//! When adjoint sensitivities are requested the forward trajectory is kept
//! as Hermite nodes, split into segments at every restart, and used to
//! evaluate the state during the backward pass.

use nalgebra::{DMatrix, DVector};
use sensode_core::{Error as CoreError, Model, ModelContext, RootDirection, SolverOptions};

use crate::error::{Error, IntegrationErrorKind, Result};
use crate::integrator::{Integrator, IntegratorStats, SolveStatus};

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Error weights (5th - 4th order)
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const MAX_BISECTIONS: usize = 200;
/// Roots returned this many times in a row at one instant count as clustering.
const MAX_CLUSTERED_ROOTS: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Tolerances {
    rtol: f64,
    atol: f64,
    max_steps: usize,
}

struct TrialStep {
    y: DVector<f64>,
    k7: DVector<f64>,
    err: f64,
}

fn trial_step<F>(f: &F, t: f64, y: &DVector<f64>, k1: &DVector<f64>, h: f64, tol: &Tolerances) -> TrialStep
where
    F: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    let k2 = f(t + C2 * h, &(y + k1 * (h * A21)));
    let k3 = f(t + C3 * h, &(y + (k1 * A31 + &k2 * A32) * h));
    let k4 = f(t + C4 * h, &(y + (k1 * A41 + &k2 * A42 + &k3 * A43) * h));
    let k5 = f(t + C5 * h, &(y + (k1 * A51 + &k2 * A52 + &k3 * A53 + &k4 * A54) * h));
    let k6 = f(t + h, &(y + (k1 * A61 + &k2 * A62 + &k3 * A63 + &k4 * A64 + &k5 * A65) * h));

    let y5 = y + (k1 * B1 + &k3 * B3 + &k4 * B4 + &k5 * B5 + &k6 * B6) * h;
    let k7 = f(t + h, &y5);
    let y_err = (k1 * E1 + &k3 * E3 + &k4 * E4 + &k5 * E5 + &k6 * E6 + &k7 * E7) * h;
    let err = error_norm(&y_err, y, &y5, tol);

    TrialStep { y: y5, k7, err }
}

/// Weighted RMS norm of the local error estimate; NaN if anything is non-finite.
fn error_norm(y_err: &DVector<f64>, y_old: &DVector<f64>, y_new: &DVector<f64>, tol: &Tolerances) -> f64 {
    if y_err.is_empty() {
        return 0.0;
    }
    if !y_new.iter().all(|v| v.is_finite()) {
        return f64::NAN;
    }
    let sum: f64 = y_err
        .iter()
        .zip(y_old.iter().zip(y_new.iter()))
        .map(|(e, (a, b))| {
            let sc = tol.atol + tol.rtol * a.abs().max(b.abs());
            (e / sc).powi(2)
        })
        .sum();
    (sum / y_err.len() as f64).sqrt()
}

fn step_factor(err: f64) -> f64 {
    if err == 0.0 {
        return MAX_FACTOR;
    }
    (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
}

fn min_step(t: f64, t_end: f64) -> f64 {
    (16.0 * f64::EPSILON * t.abs().max(t_end.abs())).max(f64::MIN_POSITIVE)
}

/// Initial step size (Hairer, Norsett and Wanner).
fn initial_step<F>(f: &F, t: f64, y: &DVector<f64>, f0: &DVector<f64>, span: f64, tol: &Tolerances) -> f64
where
    F: Fn(f64, &DVector<f64>) -> DVector<f64>,
{
    if y.is_empty() {
        return span;
    }
    let n = y.len() as f64;
    let sc = y.map(|v| tol.atol + tol.rtol * v.abs());
    let d0 = (y.component_div(&sc).norm_squared() / n).sqrt();
    let d1 = (f0.component_div(&sc).norm_squared() / n).sqrt();
    let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 }.min(span);

    let f1 = f(t + h0, &(y + f0 * h0));
    let d2 = ((&f1 - f0).component_div(&sc).norm_squared() / n).sqrt() / h0;
    let h1 = if d1.max(d2) <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(0.2)
    };
    (100.0 * h0).min(h1).min(span)
}

/// Cubic Hermite interpolation between `(t0, y0, f0)` and `(t1, y1, f1)`.
fn hermite(
    t0: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    t1: f64,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    t: f64,
) -> DVector<f64> {
    let h = t1 - t0;
    if h == 0.0 {
        return y1.clone();
    }
    let s = (t - t0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    y0 * h00 + f0 * (h10 * h) + y1 * h01 + f1 * (h11 * h)
}

/// Sign-change test of one root function over a step.
fn crossing(g_old: f64, g_new: f64) -> RootDirection {
    if g_old < 0.0 && g_new >= 0.0 {
        RootDirection::Rising
    } else if g_old > 0.0 && g_new <= 0.0 {
        RootDirection::Falling
    } else {
        RootDirection::None
    }
}

fn root_mask(g_old: &DVector<f64>, g_new: &DVector<f64>) -> Vec<RootDirection> {
    g_old.iter().zip(g_new.iter()).map(|(&a, &b)| crossing(a, b)).collect()
}

fn pack(x: &DVector<f64>, sx: Option<&DMatrix<f64>>) -> DVector<f64> {
    match sx {
        Some(sx) => DVector::from_iterator(x.len() + sx.len(), x.iter().chain(sx.iter()).copied()),
        None => x.clone(),
    }
}

fn forward_rhs(
    model: &dyn Model,
    ctx: &ModelContext,
    t: f64,
    y: &DVector<f64>,
    nx: usize,
    nplist: Option<usize>,
) -> DVector<f64> {
    let x = y.rows(0, nx).into_owned();
    let xdot = model.xdot(ctx, t, &x);
    match nplist {
        Some(np) => {
            let sx = DMatrix::from_column_slice(nx, np, &y.as_slice()[nx..]);
            let sxdot = model.sxdot(ctx, t, &x, &sx);
            pack(&xdot, Some(&sxdot))
        }
        None => xdot,
    }
}

/// A stored point of the forward trajectory.
#[derive(Debug, Clone)]
struct Node {
    t: f64,
    x: DVector<f64>,
    xdot: DVector<f64>,
}

/// Forward trajectory, one segment per smooth stretch between restarts.
#[derive(Debug, Clone, Default)]
struct Trajectory {
    segments: Vec<Vec<Node>>,
}

impl Trajectory {
    fn start_segment(&mut self, node: Node) {
        self.segments.push(vec![node]);
    }

    fn push(&mut self, node: Node) {
        match self.segments.last_mut() {
            Some(segment) => segment.push(node),
            None => self.start_segment(node),
        }
    }

    /// Latest segment covering `t`.
    fn segment_for(&self, t: f64) -> Option<&[Node]> {
        self.segments
            .iter()
            .rev()
            .find(|seg| match (seg.first(), seg.last()) {
                (Some(first), Some(last)) => first.t <= t && t <= last.t,
                _ => false,
            })
            .map(|seg| seg.as_slice())
    }
}

fn interpolate(segment: &[Node], t: f64) -> DVector<f64> {
    let idx = segment.partition_point(|n| n.t < t);
    if idx == 0 {
        return segment[0].x.clone();
    }
    if idx == segment.len() {
        return segment[idx - 1].x.clone();
    }
    let (a, b) = (&segment[idx - 1], &segment[idx]);
    hermite(a.t, &a.x, &a.xdot, b.t, &b.x, &b.xdot, t)
}

/// Adaptive Dormand-Prince 5(4) integrator.
#[derive(Debug, Clone)]
pub struct DormandPrince {
    t: f64,
    x: DVector<f64>,
    sx: Option<DMatrix<f64>>,
    /// Derivative of the augmented state at `t`.
    k1: DVector<f64>,
    h: f64,
    tstop: Option<f64>,
    tol: Tolerances,
    nroots: usize,
    roots: DVector<f64>,
    root_info: Vec<RootDirection>,
    last_root: Option<f64>,
    clustered_roots: usize,
    stats: IntegratorStats,
    trajectory: Option<Trajectory>,

    tb: f64,
    xb: DVector<f64>,
    xqb: DVector<f64>,
    kb: Option<DVector<f64>>,
    hb: f64,
    tol_b: Tolerances,
    stats_b: IntegratorStats,
}

impl Default for DormandPrince {
    fn default() -> Self {
        Self::new()
    }
}

impl DormandPrince {
    pub fn new() -> Self {
        let options = SolverOptions::default();
        Self {
            t: 0.0,
            x: DVector::zeros(0),
            sx: None,
            k1: DVector::zeros(0),
            h: 0.0,
            tstop: None,
            tol: Tolerances {
                rtol: options.rtol,
                atol: options.atol,
                max_steps: options.max_steps,
            },
            nroots: 0,
            roots: DVector::zeros(0),
            root_info: Vec::new(),
            last_root: None,
            clustered_roots: 0,
            stats: IntegratorStats::default(),
            trajectory: None,
            tb: 0.0,
            xb: DVector::zeros(0),
            xqb: DVector::zeros(0),
            kb: None,
            hb: 0.0,
            tol_b: Tolerances {
                rtol: options.rtol_b,
                atol: options.atol_b,
                max_steps: options.max_steps_b,
            },
            stats_b: IntegratorStats::default(),
        }
    }

    fn nplist(&self) -> Option<usize> {
        self.sx.as_ref().map(|sx| sx.ncols())
    }

    fn unpack_into_state(&mut self, y: &DVector<f64>) {
        let nx = self.x.len();
        self.x = y.rows(0, nx).into_owned();
        if let Some(sx) = self.sx.as_mut() {
            sx.copy_from_slice(&y.as_slice()[nx..]);
        }
    }

    fn refresh_derivative(&mut self, model: &dyn Model, ctx: &ModelContext) {
        let y = pack(&self.x, self.sx.as_ref());
        self.k1 = forward_rhs(model, ctx, self.t, &y, self.x.len(), self.nplist());
        self.stats.rhs_evals += 1;
    }

    fn record_node(&mut self, new_segment: bool) {
        let nx = self.x.len();
        if let Some(trajectory) = self.trajectory.as_mut() {
            let node = Node {
                t: self.t,
                x: self.x.clone(),
                xdot: self.k1.rows(0, nx).into_owned(),
            };
            if new_segment {
                trajectory.start_segment(node);
            } else {
                trajectory.push(node);
            }
        }
    }

    fn evaluate_roots(&self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let g = model.root(ctx, t, x);
        g.rows(0, self.nroots.min(g.len())).into_owned()
    }

    /// Bisection for the earliest root inside `[t0, t1]`.
    ///
    /// Returns the right end of the final bracket, the interpolated state
    /// there and the root values.
    #[allow(clippy::too_many_arguments)]
    fn locate_root(
        &self,
        model: &dyn Model,
        ctx: &ModelContext,
        t0: f64,
        y0: &DVector<f64>,
        f0: &DVector<f64>,
        t1: f64,
        y1: &DVector<f64>,
        f1: &DVector<f64>,
        g1: DVector<f64>,
    ) -> (f64, DVector<f64>, DVector<f64>) {
        let nx = self.x.len();
        let tol_t = 4.0 * f64::EPSILON * t0.abs().max(t1.abs()).max(t1 - t0);
        let mut lo = t0;
        let mut g_lo = self.roots.clone();
        let mut hi = t1;
        let mut y_hi = y1.clone();
        let mut g_hi = g1;

        for _ in 0..MAX_BISECTIONS {
            if hi - lo <= tol_t {
                break;
            }
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            let y_mid = hermite(t0, y0, f0, t1, y1, f1, mid);
            let g_mid = self.evaluate_roots(model, ctx, mid, &y_mid.rows(0, nx).into_owned());
            if root_mask(&g_lo, &g_mid).iter().any(|d| d.is_fired()) {
                hi = mid;
                y_hi = y_mid;
                g_hi = g_mid;
            } else {
                lo = mid;
                g_lo = g_mid;
            }
        }
        (hi, y_hi, g_hi)
    }
}

impl Integrator for DormandPrince {
    fn setup(
        &mut self,
        model: &dyn Model,
        ctx: &ModelContext,
        t0: f64,
        x0: &DVector<f64>,
        sx0: Option<&DMatrix<f64>>,
        options: &SolverOptions,
    ) -> Result<()> {
        if let Some(sx0) = sx0 {
            if sx0.nrows() != x0.len() {
                return Err(Error::DimensionMismatch {
                    expected: x0.len(),
                    actual: sx0.nrows(),
                });
            }
        }
        *self = Self::new();
        self.tol = Tolerances {
            rtol: options.rtol,
            atol: options.atol,
            max_steps: options.max_steps,
        };
        self.tol_b = Tolerances {
            rtol: options.rtol_b,
            atol: options.atol_b,
            max_steps: options.max_steps_b,
        };
        self.t = t0;
        self.x = x0.clone();
        self.sx = sx0.cloned();
        if options.adjoint_sensitivities() {
            self.trajectory = Some(Trajectory::default());
        }
        self.refresh_derivative(model, ctx);
        self.record_node(true);
        Ok(())
    }

    fn reinit(&mut self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Result<()> {
        if x.len() != self.x.len() {
            return Err(Error::DimensionMismatch {
                expected: self.x.len(),
                actual: x.len(),
            });
        }
        self.t = t;
        self.x = x.clone();
        self.h = 0.0;
        self.refresh_derivative(model, ctx);
        if self.nroots > 0 {
            self.roots = self.evaluate_roots(model, ctx, t, x);
        }
        self.record_node(true);
        Ok(())
    }

    fn sens_reinit(&mut self, model: &dyn Model, ctx: &ModelContext, sx: &DMatrix<f64>) -> Result<()> {
        match self.sx.as_mut() {
            Some(current) if current.shape() == sx.shape() => current.copy_from(sx),
            Some(current) => {
                return Err(Error::DimensionMismatch {
                    expected: current.len(),
                    actual: sx.len(),
                });
            }
            None => self.sx = Some(sx.clone()),
        }
        self.refresh_derivative(model, ctx);
        Ok(())
    }

    fn set_root_finding(&mut self, model: &dyn Model, ctx: &ModelContext, nroots: usize) {
        self.nroots = nroots;
        self.root_info = vec![RootDirection::None; nroots];
        self.roots = if nroots > 0 {
            self.evaluate_roots(model, ctx, self.t, &self.x)
        } else {
            DVector::zeros(0)
        };
    }

    fn set_stop_time(&mut self, tstop: f64) {
        self.tstop = Some(tstop);
    }

    fn solve(&mut self, model: &dyn Model, ctx: &ModelContext, tout: f64) -> Result<SolveStatus> {
        let t_end = match self.tstop {
            Some(tstop) if tstop < tout => tstop,
            _ => tout,
        };
        let nx = self.x.len();
        let nplist = self.nplist();
        let rhs = |t: f64, y: &DVector<f64>| forward_rhs(model, ctx, t, y, nx, nplist);
        let mut y = pack(&self.x, self.sx.as_ref());
        let mut steps = 0;

        while self.t < t_end {
            if steps >= self.tol.max_steps {
                return Err(Error::Integration {
                    t: self.t,
                    kind: IntegrationErrorKind::TooMuchWork,
                });
            }
            let remaining = t_end - self.t;
            if self.h == 0.0 {
                self.h = initial_step(&rhs, self.t, &y, &self.k1, remaining, &self.tol);
                self.stats.rhs_evals += 1;
            }
            let hmin = min_step(self.t, t_end);
            let mut h = self.h.min(remaining);
            let last = h >= remaining - hmin;
            if last {
                h = remaining;
            }

            let trial = trial_step(&rhs, self.t, &y, &self.k1, h, &self.tol);
            self.stats.rhs_evals += 6;

            if !(trial.err <= 1.0) {
                self.stats.err_test_fails += 1;
                let finite = trial.err.is_finite();
                self.h = h * if finite { step_factor(trial.err).min(1.0) } else { MIN_FACTOR };
                if self.h < hmin {
                    let kind = if finite {
                        IntegrationErrorKind::StepSizeTooSmall
                    } else {
                        IntegrationErrorKind::NonFiniteValue
                    };
                    return Err(Error::Integration { t: self.t, kind });
                }
                continue;
            }

            steps += 1;
            self.stats.steps += 1;
            let t_old = self.t;
            let t_new = if last { t_end } else { self.t + h };
            let grown = h * step_factor(trial.err);
            self.h = if last && h < self.h { self.h.max(grown) } else { grown };

            if self.nroots > 0 {
                let g_new = self.evaluate_roots(model, ctx, t_new, &trial.y.rows(0, nx).into_owned());
                if root_mask(&self.roots, &g_new).iter().any(|d| d.is_fired()) {
                    let (t_root, y_root, g_root) =
                        self.locate_root(model, ctx, t_old, &y, &self.k1, t_new, &trial.y, &trial.k7, g_new);
                    self.root_info = root_mask(&self.roots, &g_root);
                    self.roots = g_root;

                    if self.last_root.is_some_and(|t| (t_root - t).abs() <= hmin) {
                        self.clustered_roots += 1;
                        if self.clustered_roots >= MAX_CLUSTERED_ROOTS {
                            return Err(Error::Integration {
                                t: t_root,
                                kind: IntegrationErrorKind::RootClustering,
                            });
                        }
                    } else {
                        self.clustered_roots = 0;
                    }
                    self.last_root = Some(t_root);

                    self.t = t_root;
                    self.unpack_into_state(&y_root);
                    self.refresh_derivative(model, ctx);
                    self.record_node(false);
                    return Ok(SolveStatus::Root);
                }
                self.roots = g_new;
            }

            self.t = t_new;
            y = trial.y;
            self.k1 = trial.k7;
            self.unpack_into_state(&y);
            self.record_node(false);
        }
        Ok(SolveStatus::Reached)
    }

    fn time(&self) -> f64 {
        self.t
    }

    fn state(&self) -> &DVector<f64> {
        &self.x
    }

    fn sensitivities(&self) -> Option<&DMatrix<f64>> {
        self.sx.as_ref()
    }

    fn root_info(&self) -> &[RootDirection] {
        &self.root_info
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn setup_backward(
        &mut self,
        model: &dyn Model,
        ctx: &ModelContext,
        t: f64,
        xb: &DVector<f64>,
        xqb: &DVector<f64>,
    ) -> Result<()> {
        let _ = (model, ctx);
        if self.trajectory.as_ref().is_none_or(|tr| tr.segments.is_empty()) {
            return Err(Error::Setup(CoreError::InvalidOptions(
                "backward integration requires a stored forward trajectory".into(),
            )));
        }
        self.stats_b = IntegratorStats::default();
        self.reinit_backward(t, xb, xqb)
    }

    fn reinit_backward(&mut self, t: f64, xb: &DVector<f64>, xqb: &DVector<f64>) -> Result<()> {
        self.tb = t;
        self.xb = xb.clone();
        self.xqb = xqb.clone();
        self.kb = None;
        self.hb = 0.0;
        Ok(())
    }

    fn solve_backward(&mut self, model: &dyn Model, ctx: &ModelContext, tout: f64) -> Result<()> {
        if tout >= self.tb {
            return Ok(());
        }
        let backward_error = |t: f64, kind| Error::IntegrationBackward { t, kind };
        let segment = self
            .trajectory
            .as_ref()
            .and_then(|tr| tr.segment_for(0.5 * (tout + self.tb)))
            .ok_or_else(|| {
                Error::Setup(CoreError::InvalidOptions(format!(
                    "no forward trajectory covers [{tout}, {}]",
                    self.tb
                )))
            })?;

        let nxb = self.xb.len();
        let rhs = |t: f64, y: &DVector<f64>| {
            let x = interpolate(segment, t);
            let xb = y.rows(0, nxb).into_owned();
            let xbdot = model.xbdot(ctx, t, &x, &xb);
            let qbdot = model.qbdot(ctx, t, &x, &xb);
            DVector::from_iterator(y.len(), xbdot.iter().copied().chain(qbdot.iter().map(|v| -v)))
        };

        let mut y = DVector::from_iterator(nxb + self.xqb.len(), self.xb.iter().chain(self.xqb.iter()).copied());
        let mut k1 = match self.kb.take() {
            Some(k) => k,
            None => {
                self.stats_b.rhs_evals += 1;
                rhs(self.tb, &y)
            }
        };
        let mut steps = 0;

        while self.tb > tout {
            if steps >= self.tol_b.max_steps {
                return Err(backward_error(self.tb, IntegrationErrorKind::TooMuchWork));
            }
            let remaining = self.tb - tout;
            if self.hb == 0.0 {
                let reversed = |t: f64, y: &DVector<f64>| -rhs(-t, y);
                self.hb = initial_step(&reversed, -self.tb, &y, &(-&k1), remaining, &self.tol_b);
                self.stats_b.rhs_evals += 1;
            }
            let hmin = min_step(self.tb, tout);
            let mut h = self.hb.min(remaining);
            let last = h >= remaining - hmin;
            if last {
                h = remaining;
            }

            let trial = trial_step(&rhs, self.tb, &y, &k1, -h, &self.tol_b);
            self.stats_b.rhs_evals += 6;

            if !(trial.err <= 1.0) {
                self.stats_b.err_test_fails += 1;
                let finite = trial.err.is_finite();
                self.hb = h * if finite { step_factor(trial.err).min(1.0) } else { MIN_FACTOR };
                if self.hb < hmin {
                    let kind = if finite {
                        IntegrationErrorKind::StepSizeTooSmall
                    } else {
                        IntegrationErrorKind::NonFiniteValue
                    };
                    return Err(backward_error(self.tb, kind));
                }
                continue;
            }

            steps += 1;
            self.stats_b.steps += 1;
            let grown = h * step_factor(trial.err);
            self.hb = if last && h < self.hb { self.hb.max(grown) } else { grown };
            self.tb = if last { tout } else { self.tb - h };
            y = trial.y;
            k1 = trial.k7;
            self.xb = y.rows(0, nxb).into_owned();
            self.xqb = y.rows(nxb, y.len() - nxb).into_owned();
        }
        self.kb = Some(k1);
        Ok(())
    }

    fn backward_time(&self) -> f64 {
        self.tb
    }

    fn backward_state(&self) -> &DVector<f64> {
        &self.xb
    }

    fn backward_quadrature(&self) -> &DVector<f64> {
        &self.xqb
    }

    fn stats_backward(&self) -> IntegratorStats {
        self.stats_b
    }
}
