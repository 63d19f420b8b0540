//! A clock that fires an event every `k0` time units.

use nalgebra::{DMatrix, DVector};
use sensode_core::{Model, ModelContext, ModelDimensions};

/// Periodic event model.
///
/// States: `x0` phase (`dx0/dt = 1`), `x1` decaying counter
/// (`dx1/dt = -p0 * x1`). The root `x0 - k0` fires when the phase reaches
/// the period; the bolus resets the phase and adds `k1` to the counter.
/// Observable: the counter. Event observable: the counter just before
/// the bolus.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodicCounter;

impl PeriodicCounter {
    /// Number of events in `(t0, t]` for period `period` starting at phase 0.
    pub fn firings(period: f64, t0: f64, t: f64) -> usize {
        ((t - t0) / period).floor().max(0.0) as usize
    }
}

impl Model for PeriodicCounter {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(2, 1, 1)
            .with_events(1, 1)
            .with_fixed_parameters(2)
    }

    fn name(&self) -> &str {
        "periodic_counter"
    }

    fn z2event(&self) -> Vec<usize> {
        vec![0]
    }

    fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
        DVector::from_vec(vec![0.0, 1.0])
    }

    fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![1.0, -ctx.p[0] * x[1]])
    }

    fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, -ctx.p[0]])
    }

    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 1, &[0.0, -x[1]])
    }

    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, x[1])
    }

    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[0.0, 1.0])
    }

    fn root(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, x[0] - ctx.k[0])
    }

    fn droot_dx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[1.0, 0.0])
    }

    fn z(&self, _ctx: &ModelContext, _ie: usize, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, x[1])
    }

    fn dzdx(&self, _ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[0.0, 1.0])
    }

    fn delta_x(&self, ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![-ctx.k[0], ctx.k[1]])
    }
}
