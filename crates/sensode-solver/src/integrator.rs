//! The time-stepper contract consumed by the forward and backward drivers.

use nalgebra::{DMatrix, DVector};
use sensode_core::{Model, ModelContext, RootDirection, SolverOptions};

use crate::error::Result;

/// Why a forward [`Integrator::solve`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The requested output time (or the stop time) was reached.
    Reached,
    /// A root function changed sign; see [`Integrator::root_info`].
    Root,
}

/// Cumulative work counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegratorStats {
    pub steps: usize,
    pub rhs_evals: usize,
    pub err_test_fails: usize,
}

/// An adaptive time-stepper with root finding, forward sensitivities and
/// backward (adjoint) integration.
///
/// The model and context are passed to every call that evaluates the
/// right-hand side, so the heaviside state seen by the integrator is always
/// the one currently owned by the driver.
pub trait Integrator: Send {
    /// Start a forward problem at `t0`.
    ///
    /// `sx0` enables forward sensitivities. The forward trajectory is
    /// stored when the options request adjoint sensitivities.
    fn setup(
        &mut self,
        model: &dyn Model,
        ctx: &ModelContext,
        t0: f64,
        x0: &DVector<f64>,
        sx0: Option<&DMatrix<f64>>,
        options: &SolverOptions,
    ) -> Result<()>;

    /// Restart at `t` from a new state, keeping sensitivities.
    fn reinit(&mut self, model: &dyn Model, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Result<()>;

    /// Replace the forward sensitivities after a restart.
    fn sens_reinit(&mut self, model: &dyn Model, ctx: &ModelContext, sx: &DMatrix<f64>) -> Result<()>;

    /// Watch `nroots` root functions (0 disables root finding).
    fn set_root_finding(&mut self, model: &dyn Model, ctx: &ModelContext, nroots: usize);

    /// Never step past `tstop`.
    fn set_stop_time(&mut self, tstop: f64);

    /// Advance towards `tout`, stopping early at roots.
    fn solve(&mut self, model: &dyn Model, ctx: &ModelContext, tout: f64) -> Result<SolveStatus>;

    fn time(&self) -> f64;

    fn state(&self) -> &DVector<f64>;

    /// Forward sensitivities, if enabled.
    fn sensitivities(&self) -> Option<&DMatrix<f64>>;

    /// Directions of the roots found by the last `solve` returning [`SolveStatus::Root`].
    fn root_info(&self) -> &[RootDirection];

    /// Make the initial state consistent with algebraic constraints.
    ///
    /// Explicit ODE integrators have nothing to do.
    fn calc_consistent_ic(&mut self, model: &dyn Model, ctx: &ModelContext) -> Result<()> {
        let _ = (model, ctx);
        Ok(())
    }

    fn stats(&self) -> IntegratorStats;

    /// Start the backward problem at `t` with adjoint state `xb` and quadratures `xqb`.
    fn setup_backward(
        &mut self,
        model: &dyn Model,
        ctx: &ModelContext,
        t: f64,
        xb: &DVector<f64>,
        xqb: &DVector<f64>,
    ) -> Result<()>;

    /// Restart the backward problem after a discontinuity.
    fn reinit_backward(&mut self, t: f64, xb: &DVector<f64>, xqb: &DVector<f64>) -> Result<()>;

    /// Integrate the adjoint state and quadratures backward to `tout`.
    fn solve_backward(&mut self, model: &dyn Model, ctx: &ModelContext, tout: f64) -> Result<()>;

    fn backward_time(&self) -> f64;

    fn backward_state(&self) -> &DVector<f64>;

    fn backward_quadrature(&self) -> &DVector<f64>;

    fn stats_backward(&self) -> IntegratorStats;
}
