//! First-order decay, with and without a timed bolus.

use nalgebra::{DMatrix, DVector};
use sensode_core::{Model, ModelContext, ModelDimensions};

/// `dx/dt = -p0 * x`, `x(0) = 1`, observed directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDecay;

impl LinearDecay {
    /// Closed-form state at `t` for rate `k`.
    pub fn solution(k: f64, t: f64) -> f64 {
        (-k * t).exp()
    }
}

impl Model for LinearDecay {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(1, 1, 1)
    }

    fn name(&self) -> &str {
        "linear_decay"
    }

    fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
        DVector::from_element(1, 1.0)
    }

    fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, -ctx.p[0] * x[0])
    }

    fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, -ctx.p[0])
    }

    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, -x[0])
    }

    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }
}

/// Linear decay with a bolus of `k1` added at `t = k0`.
///
/// Parameters: `p0` decay rate. Fixed parameters: `k0` event time,
/// `k1` bolus size. The event observable is the state just before the
/// bolus.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayWithBolus;

impl DecayWithBolus {
    /// Closed-form state at `t` for rate `k`, event time `tau` and bolus `b`.
    pub fn solution(k: f64, tau: f64, b: f64, t: f64) -> f64 {
        let x = (-k * t).exp();
        if t < tau { x } else { x + b * (-k * (t - tau)).exp() }
    }
}

impl Model for DecayWithBolus {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(1, 1, 1)
            .with_events(1, 1)
            .with_fixed_parameters(2)
    }

    fn name(&self) -> &str {
        "decay_with_bolus"
    }

    fn z2event(&self) -> Vec<usize> {
        vec![0]
    }

    fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
        DVector::from_element(1, 1.0)
    }

    fn xdot(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64> {
        LinearDecay.xdot(ctx, t, x)
    }

    fn jacobian(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        LinearDecay.jacobian(ctx, t, x)
    }

    fn dxdotdp(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        LinearDecay.dxdotdp(ctx, t, x)
    }

    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }

    fn root(&self, ctx: &ModelContext, t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, t - ctx.k[0])
    }

    fn droot_dt(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, 1.0)
    }

    fn z(&self, _ctx: &ModelContext, _ie: usize, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }

    fn dzdx(&self, _ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }

    fn delta_x(&self, ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, ctx.k[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(p: f64, k: Vec<f64>) -> ModelContext {
        ModelContext::new(vec![p], k, vec![0], 1)
    }

    #[test]
    fn test_decay_rhs() {
        let ctx = context(2.0, vec![]);
        let x = DVector::from_element(1, 3.0);
        assert_eq!(LinearDecay.xdot(&ctx, 0.0, &x)[0], -6.0);
        assert_eq!(LinearDecay.dxdotdp(&ctx, 0.0, &x)[(0, 0)], -3.0);
        assert_eq!(LinearDecay.jacobian(&ctx, 0.0, &x)[(0, 0)], -2.0);
    }

    #[test]
    fn test_bolus_event() {
        let model = DecayWithBolus;
        let ctx = context(1.0, vec![0.5, 1.0]);
        let x = DVector::from_element(1, 0.6);
        assert_eq!(model.root(&ctx, 0.25, &x)[0], -0.25);
        assert_eq!(model.delta_x(&ctx, 0, 0.5, &x)[0], 1.0);
        // time-triggered: the event time does not move with the state
        let stau = model.stau(&ctx, 0, 0.5, &x, &DMatrix::from_element(1, 1, -0.3), &DVector::from_element(1, -0.6));
        assert_eq!(stau[0], 0.0);
    }

    #[test]
    fn test_closed_form_jump() {
        let before = DecayWithBolus::solution(1.0, 0.5, 1.0, 0.5 - 1e-12);
        let after = DecayWithBolus::solution(1.0, 0.5, 1.0, 0.5);
        assert!((after - before - 1.0).abs() < 1e-9);
    }
}
