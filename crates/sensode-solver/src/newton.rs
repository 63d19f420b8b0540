//! Damped Newton solver for steady states `xdot(x) = 0`.

use nalgebra::{DMatrix, DVector};
use sensode_core::{DampingFactorMode, LinearSolver, Model, ModelContext, NewtonOptions};

use crate::error::{Error, NewtonFailure, Result};
use crate::linear::solve_least_squares;
use crate::solver_select::{LinearSolveStrategy, select_strategy};

/// Steady states are searched at this time for non-autonomous models.
const STEADY_STATE_TIME: f64 = 0.0;

/// Iterate of one Newton solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonState {
    /// Current iterate.
    pub x: DVector<f64>,
    /// Right-hand side at `x`.
    pub residual: DVector<f64>,
    /// Weighted RMS norm of `residual`.
    pub wrms: f64,
    /// Damping factor applied to the next step.
    pub damping: f64,
    /// Last Newton direction.
    pub delta: DVector<f64>,
    /// Iterations so far (accepted and rejected).
    pub iterations: usize,
    need_direction: bool,
}

/// Outcome of a single [`NewtonSolver::iterate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStep {
    /// The damped step reduced the residual and was taken.
    Accepted,
    /// The damped step did not reduce the residual; damping was halved.
    Rejected,
    /// The residual norm is below 1.
    Converged,
}

/// Weighted RMS norm of `f` with tolerances scaled by `x`.
pub fn weighted_rms(f: &DVector<f64>, x: &DVector<f64>, atol: f64, rtol: f64) -> f64 {
    if f.is_empty() {
        return 0.0;
    }
    let sum: f64 = f
        .iter()
        .zip(x.iter())
        .map(|(fi, xi)| {
            let w = fi / (atol + rtol * xi.abs());
            w * w
        })
        .sum();
    (sum / f.len() as f64).sqrt()
}

/// Damped Newton iteration on the model right-hand side.
pub struct NewtonSolver<'a> {
    model: &'a dyn Model,
    options: NewtonOptions,
    strategy: Box<dyn LinearSolveStrategy>,
}

impl<'a> NewtonSolver<'a> {
    /// Create a solver; the linear-solve strategy is chosen once here.
    pub fn new(model: &'a dyn Model, linear_solver: LinearSolver, options: &NewtonOptions) -> Self {
        let nx = model.dimensions().nx;
        Self {
            model,
            options: options.clone(),
            strategy: select_strategy(linear_solver, nx, options),
        }
    }

    /// Kind of the selected linear-solve strategy.
    pub fn linear_solver(&self) -> LinearSolver {
        self.strategy.kind()
    }

    fn norm(&self, f: &DVector<f64>, x: &DVector<f64>) -> f64 {
        weighted_rms(f, x, self.options.atol, self.options.rtol)
    }

    /// Initial state of a solve from `x0` with damping 1.
    pub fn start(&self, ctx: &ModelContext, x0: &DVector<f64>) -> NewtonState {
        let residual = self.model.xdot(ctx, STEADY_STATE_TIME, x0);
        let wrms = self.norm(&residual, x0);
        NewtonState {
            x: x0.clone(),
            delta: DVector::zeros(x0.len()),
            residual,
            wrms,
            damping: 1.0,
            iterations: 0,
            need_direction: true,
        }
    }

    /// Newton direction at `x`: solves `J * delta = -f(x)`.
    pub fn get_step(&mut self, ctx: &ModelContext, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.strategy.prepare(self.model, ctx, STEADY_STATE_TIME, x)?;
        let rhs = -self.model.xdot(ctx, STEADY_STATE_TIME, x);
        self.strategy
            .solve(&rhs)
            .map_err(|_| Error::Newton(NewtonFailure::LinearSolve))
    }

    /// Perform one damped Newton iteration.
    ///
    /// A step that does not decrease the residual norm is rejected and the
    /// damping halved. When halving would take the damping below the
    /// configured lower bound the solve has diverged and an error is
    /// returned; the stored damping is left at its last valid value.
    pub fn iterate(&mut self, ctx: &ModelContext, state: &mut NewtonState) -> Result<NewtonStep> {
        if state.wrms < 1.0 {
            return Ok(NewtonStep::Converged);
        }
        if state.need_direction {
            state.delta = self.get_step(ctx, &state.x)?;
            state.need_direction = false;
        }
        state.iterations += 1;

        let x_trial = &state.x + &state.delta * state.damping;
        let f_trial = self.model.xdot(ctx, STEADY_STATE_TIME, &x_trial);
        let wrms_trial = self.norm(&f_trial, &x_trial);

        let damped = self.options.damping_factor_mode == DampingFactorMode::On;
        if !damped || wrms_trial < state.wrms {
            state.x = x_trial;
            state.residual = f_trial;
            state.wrms = wrms_trial;
            state.need_direction = true;
            if damped {
                state.damping = (2.0 * state.damping).min(1.0);
            }
            log::debug!(
                "Newton iteration {}: accepted, wrms = {:.3e}",
                state.iterations,
                state.wrms
            );
            if state.wrms < 1.0 {
                return Ok(NewtonStep::Converged);
            }
            return Ok(NewtonStep::Accepted);
        }

        let halved = state.damping / 2.0;
        if halved < self.options.damping_factor_lower_bound {
            return Err(Error::Newton(NewtonFailure::DampingBelowBound { damping: halved }));
        }
        state.damping = halved;
        log::debug!(
            "Newton iteration {}: rejected, damping = {:.3e}",
            state.iterations,
            state.damping
        );
        Ok(NewtonStep::Rejected)
    }

    /// Iterate from `x0` until convergence.
    pub fn solve(&mut self, ctx: &ModelContext, x0: &DVector<f64>) -> Result<NewtonState> {
        let mut state = self.start(ctx, x0);
        self.solve_from(ctx, &mut state)?;
        Ok(state)
    }

    /// Iterate `state` until convergence or `max_steps`.
    ///
    /// On failure `state` keeps the last accepted iterate and the number of
    /// iterations spent.
    pub fn solve_from(&mut self, ctx: &ModelContext, state: &mut NewtonState) -> Result<()> {
        loop {
            if self.iterate(ctx, state)? == NewtonStep::Converged {
                return Ok(());
            }
            if state.iterations >= self.options.max_steps {
                return Err(Error::Newton(NewtonFailure::MaxStepsExceeded {
                    steps: state.iterations,
                }));
            }
        }
    }

    /// Steady-state sensitivities `sx = -J^{-1} * dxdot/dp` (`nx x nplist`).
    ///
    /// A singular Jacobian only produces a warning; the minimum-norm
    /// solution is returned in that case.
    pub fn compute_sensitivities(&mut self, ctx: &ModelContext, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.strategy.prepare(self.model, ctx, STEADY_STATE_TIME, x)?;
        let rhs = -ctx.select(&self.model.dxdotdp(ctx, STEADY_STATE_TIME, x));
        if self.strategy.is_singular() {
            log::warn!("Jacobian is singular at steady state, sensitivities may be inaccurate");
        }
        match self.strategy.solve_matrix(&rhs) {
            Ok(sx) if sx.iter().all(|v| v.is_finite()) => Ok(sx),
            _ => solve_least_squares(&self.model.jacobian(ctx, STEADY_STATE_TIME, x), &rhs),
        }
    }
}
