//! Pre-equilibration: steady state and steady-state sensitivities.
//!
//! Newton is tried first. When it diverges the state is pushed towards the
//! steady state by forward simulation over growing horizons and Newton is
//! retried from there, up to `max_tries` attempts.

use nalgebra::{DMatrix, DVector};
use sensode_core::{
    Model, ModelContext, NewtonDiagnostics, SensitivityOrder, SolverOptions, SteadyStateStatus,
};

use crate::error::{Error, NewtonFailure, Result};
use crate::integrator::Integrator;
use crate::newton::{NewtonSolver, weighted_rms};

/// Simulation horizons `10^0 .. 10^MAX_HORIZON_EXPONENT` between Newton attempts.
const MAX_HORIZON_EXPONENT: i32 = 6;

/// A steady state and, if requested, its sensitivities.
#[derive(Debug, Clone, PartialEq)]
pub struct SteadyState {
    pub x: DVector<f64>,
    /// `-J^{-1} dxdot/dp` (`nx x nplist`).
    pub sx: Option<DMatrix<f64>>,
}

/// Steady-state search for one model and option set.
pub struct SteadyStateProblem<'a> {
    model: &'a dyn Model,
    options: &'a SolverOptions,
}

impl<'a> SteadyStateProblem<'a> {
    pub fn new(model: &'a dyn Model, options: &'a SolverOptions) -> Self {
        Self { model, options }
    }

    fn residual_norm(&self, ctx: &ModelContext, x: &DVector<f64>) -> f64 {
        let newton = &self.options.newton;
        weighted_rms(&self.model.xdot(ctx, 0.0, x), x, newton.atol, newton.rtol)
    }

    /// Find a steady state from `x0`.
    ///
    /// `diagnostics` is filled on success and on failure.
    pub fn solve(
        &self,
        ctx: &ModelContext,
        x0: &DVector<f64>,
        integrator: &mut dyn Integrator,
        sensitivities: bool,
        diagnostics: &mut NewtonDiagnostics,
    ) -> Result<SteadyState> {
        let mut newton = NewtonSolver::new(self.model, self.options.linear_solver, &self.options.newton);
        let max_tries = self.options.newton.max_tries;
        let mut x = x0.clone();
        diagnostics.steps.clear();
        diagnostics.status = SteadyStateStatus::Failed;
        let mut failure = NewtonFailure::MaxStepsExceeded { steps: 0 };

        for attempt in 0..max_tries {
            match self.newton_attempt(&mut newton, ctx, &x) {
                Ok((state, iterations)) => {
                    diagnostics.steps.push(iterations);
                    diagnostics.status = if attempt == 0 {
                        SteadyStateStatus::Newton
                    } else {
                        SteadyStateStatus::SimulationThenNewton
                    };
                    x = state;
                    break;
                }
                Err((err, iterations)) => {
                    diagnostics.steps.push(iterations);
                    log::debug!("Newton attempt {} failed: {err}", attempt + 1);
                    match err {
                        Error::Newton(f) => failure = f,
                        other => return Err(other),
                    }
                }
            }
            if attempt + 1 == max_tries {
                break;
            }
            match self.simulate(ctx, &x, integrator) {
                Ok((state, reached)) => {
                    x = state;
                    if reached {
                        diagnostics.status = SteadyStateStatus::Simulation;
                        break;
                    }
                }
                Err(err) => {
                    log::debug!("Steady-state simulation failed: {err}");
                    break;
                }
            }
        }

        diagnostics.wrms = self.residual_norm(ctx, &x);
        if diagnostics.status == SteadyStateStatus::Failed {
            return Err(Error::Newton(failure));
        }
        log::debug!(
            "Steady state found ({:?}) after {:?} Newton iterations",
            diagnostics.status,
            diagnostics.steps
        );

        let sx = if sensitivities {
            Some(newton.compute_sensitivities(ctx, &x)?)
        } else {
            None
        };
        Ok(SteadyState { x, sx })
    }

    /// One Newton solve; the iteration count is returned on both paths.
    fn newton_attempt(
        &self,
        newton: &mut NewtonSolver<'_>,
        ctx: &ModelContext,
        x0: &DVector<f64>,
    ) -> std::result::Result<(DVector<f64>, usize), (Error, usize)> {
        let mut state = newton.start(ctx, x0);
        match newton.solve_from(ctx, &mut state) {
            Ok(()) => Ok((state.x, state.iterations)),
            Err(err) => Err((err, state.iterations)),
        }
    }

    /// Simulate over growing horizons; stops early once the residual norm is below 1.
    fn simulate(
        &self,
        ctx: &ModelContext,
        x0: &DVector<f64>,
        integrator: &mut dyn Integrator,
    ) -> Result<(DVector<f64>, bool)> {
        let options = SolverOptions {
            sensitivity_order: SensitivityOrder::None,
            ..self.options.clone()
        };
        integrator.setup(self.model, ctx, 0.0, x0, None, &options)?;
        integrator.set_root_finding(self.model, ctx, 0);
        for k in 0..=MAX_HORIZON_EXPONENT {
            let tout = 10f64.powi(k);
            integrator.set_stop_time(tout);
            integrator.solve(self.model, ctx, tout)?;
            let wrms = self.residual_norm(ctx, integrator.state());
            log::debug!("Steady-state simulation to t = {tout}: wrms = {wrms:.3e}");
            if wrms < 1.0 {
                return Ok((integrator.state().clone(), true));
            }
        }
        Ok((integrator.state().clone(), false))
    }
}
