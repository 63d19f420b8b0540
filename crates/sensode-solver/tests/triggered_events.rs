//! Gradients through events whose time depends on the parameters.

use nalgebra::{DMatrix, DVector};
use sensode_core::{
    ExpData, Model, ModelContext, ModelDimensions, SensitivityMethod, SimulationParameters,
    SimulationStatus, SolverOptions,
};
use sensode_solver::run_simulation;

const RTOL: f64 = 1e-10;
const ATOL: f64 = 1e-12;

/// `x' = p (1 + h0)`, from `x = 0` until `x` reaches 1, where `k0` is added
/// and the growth rate doubles.
///
/// With `tau = 1/p`: `x(t) = k0 - 1 + 2 p t` after the event, so `dx/dp = 2t`.
struct SwitchedGrowth;

impl Model for SwitchedGrowth {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(1, 1, 1).with_events(1, 0).with_fixed_parameters(1)
    }
    fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
        DVector::zeros(1)
    }
    fn xdot(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, ctx.p[0] * (1.0 + ctx.h[0]))
    }
    fn jacobian(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(1, 1)
    }
    fn dxdotdp(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, 1.0 + ctx.h[0])
    }
    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }
    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }
    fn root(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, x[0] - 1.0)
    }
    fn droot_dx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, 1.0)
    }
    fn delta_x(&self, ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, ctx.k[0])
    }
}

/// `x' = p`, `y' = h1`. When `x` reaches 1, `y` jumps by 1 and crosses
/// `y = 0.5`, a secondary event that switches on `y' = 1`.
///
/// `y(t) = 1 + t - 1/p` after the event, so `dy/dp = 1/p^2`.
struct ChainedSwitch;

impl Model for ChainedSwitch {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(2, 1, 1).with_events(2, 0)
    }
    fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
        DVector::zeros(2)
    }
    fn xdot(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![ctx.p[0], ctx.h[1]])
    }
    fn jacobian(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(2, 2)
    }
    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_column_slice(2, 1, &[1.0, 0.0])
    }
    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, x[1])
    }
    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[0.0, 1.0])
    }
    fn root(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[0] - 1.0, x[1] - 0.5])
    }
    fn droot_dx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }
    fn delta_x(&self, _ctx: &ModelContext, ie: usize, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
        if ie == 0 {
            DVector::from_vec(vec![0.0, 1.0])
        } else {
            DVector::zeros(2)
        }
    }
}

fn single_point(m: f64) -> ExpData {
    let mut edata = ExpData::new(1, 1, 0, 10);
    edata.set_observed_data(&[m]).unwrap();
    edata.set_uniform_data_std_dev(1.0).unwrap();
    edata
}

fn run(model: &dyn Model, p: f64, edata: &ExpData, method: SensitivityMethod) -> (f64, f64, f64) {
    let params = SimulationParameters::new(vec![p], vec![2.0]).with_fixed_parameters(vec![0.5; model.dimensions().nk]);
    let options = match method {
        SensitivityMethod::None => SolverOptions::default(),
        method => SolverOptions::first_order(method),
    }
    .with_tolerances(RTOL, ATOL);
    let rdata = run_simulation(model, &params, &options, Some(edata)).unwrap();
    assert_eq!(rdata.status, SimulationStatus::Success);
    let sllh = rdata.sllh.get(0).copied().unwrap_or(f64::NAN);
    (rdata.y[(0, 0)], rdata.llh, sllh)
}

fn finite_difference(model: &dyn Model, p: f64, edata: &ExpData) -> f64 {
    let h = 1e-5;
    let (_, plus, _) = run(model, p + h, edata, SensitivityMethod::None);
    let (_, minus, _) = run(model, p - h, edata, SensitivityMethod::None);
    (plus - minus) / (2.0 * h)
}

fn assert_close(actual: f64, expected: f64, tol: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tol * expected.abs().max(1.0),
        "{what}: {actual} vs {expected}"
    );
}

#[test]
fn test_state_triggered_event_gradient() {
    let (p, k, t, m) = (1.0, 0.5, 2.0, 0.5);
    let edata = single_point(m);
    let x = k - 1.0 + 2.0 * p * t;
    let expected = -(x - m) * 2.0 * t;

    let fd = finite_difference(&SwitchedGrowth, p, &edata);
    assert_close(fd, expected, 1e-5, "finite difference");
    for method in [SensitivityMethod::Forward, SensitivityMethod::Adjoint] {
        let (y, _, sllh) = run(&SwitchedGrowth, p, &edata, method);
        assert_close(y, x, 1e-8, "x(2)");
        assert_close(sllh, expected, 1e-6, &format!("{method:?} gradient"));
    }
}

#[test]
fn test_secondary_event_shares_primary_event_time() {
    let (p, t, m) = (2.0, 2.0, 1.0);
    let edata = single_point(m);
    let y = 1.0 + t - 1.0 / p;
    let expected = -(y - m) / (p * p);

    let fd = finite_difference(&ChainedSwitch, p, &edata);
    assert_close(fd, expected, 1e-5, "finite difference");
    for method in [SensitivityMethod::Forward, SensitivityMethod::Adjoint] {
        let (y_end, _, sllh) = run(&ChainedSwitch, p, &edata, method);
        assert_close(y_end, y, 1e-8, "y(2)");
        assert!(sllh != 0.0, "{method:?}: secondary jump dropped");
        assert_close(sllh, expected, 1e-6, &format!("{method:?} gradient"));
    }
}
