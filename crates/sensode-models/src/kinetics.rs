//! Mass-action kinetics with a steady state.

use nalgebra::{DMatrix, DVector};
use sensode_core::{Model, ModelContext, ModelDimensions};

/// Constant production and first-order degradation.
///
/// `dx/dt = p0 - p1 * x`, `x(0) = k0`. The steady state is `p0 / p1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductionDegradation;

impl ProductionDegradation {
    pub fn steady_state(production: f64, degradation: f64) -> f64 {
        production / degradation
    }
}

impl Model for ProductionDegradation {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(1, 1, 2).with_fixed_parameters(1)
    }

    fn name(&self) -> &str {
        "production_degradation"
    }

    fn x0(&self, ctx: &ModelContext) -> DVector<f64> {
        DVector::from_element(1, ctx.k[0])
    }

    fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, ctx.p[0] - ctx.p[1] * x[0])
    }

    fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, -ctx.p[1])
    }

    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[1.0, -x[0]])
    }

    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }
}

/// Reversible conversion `A <-> B`.
///
/// Forward rate `p0`, backward rate `p1`, `A(0) = p2`, `B(0) = 0`.
/// Both species are observed; the observable noise is `p3`. The total
/// `A + B` is conserved, so the Jacobian is singular.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReversibleConversion;

impl Model for ReversibleConversion {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(2, 2, 4)
    }

    fn name(&self) -> &str {
        "reversible_conversion"
    }

    fn x0(&self, ctx: &ModelContext) -> DVector<f64> {
        DVector::from_vec(vec![ctx.p[2], 0.0])
    }

    fn dx0dp(&self, _ctx: &ModelContext, _x0: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 4, &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        let flux = ctx.p[0] * x[0] - ctx.p[1] * x[1];
        DVector::from_vec(vec![-flux, flux])
    }

    fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        let (kf, kr) = (ctx.p[0], ctx.p[1]);
        DMatrix::from_row_slice(2, 2, &[-kf, kr, kf, -kr])
    }

    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let (a, b) = (x[0], x[1]);
        DMatrix::from_row_slice(2, 4, &[-a, b, 0.0, 0.0, a, -b, 0.0, 0.0])
    }

    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }

    fn sigma_y(&self, ctx: &ModelContext, _t: f64) -> DVector<f64> {
        DVector::from_element(2, ctx.p[3])
    }

    fn dsigma_ydp(&self, _ctx: &ModelContext, _t: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 4, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}
