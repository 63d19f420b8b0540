//! Second-order gradients from a hand-augmented decay model.

use nalgebra::{DMatrix, DVector};
use sensode_core::{
    ExpData, Model, ModelContext, ModelDimensions, SensitivityMethod, SensitivityOrder,
    SimulationParameters, SimulationStatus, SolverOptions, noise,
};
use sensode_solver::run_simulation;

const T: f64 = 1.5;

/// `x' = -p x` with `x(0) = p`, augmented with `s = dx/dp`.
///
/// States and observables are `(x, s)`; the second likelihood row is the
/// directional derivative `dJ/dy * s`. The adjoint blocks are ordered
/// first-order adjoint first, so `xbdot` and `qbdot` are given explicitly.
struct AugmentedDecay;

impl Model for AugmentedDecay {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions::new(2, 2, 1).with_second_order(2)
    }
    fn x0(&self, ctx: &ModelContext) -> DVector<f64> {
        DVector::from_vec(vec![ctx.p[0], 1.0])
    }
    fn dx0dp(&self, _ctx: &ModelContext, _x0: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_column_slice(2, 1, &[1.0, 0.0])
    }
    fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        let p = ctx.p[0];
        DVector::from_vec(vec![-p * x[0], -x[0] - p * x[1]])
    }
    fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        let p = ctx.p[0];
        DMatrix::from_row_slice(2, 2, &[-p, 0.0, -1.0, -p])
    }
    fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_column_slice(2, 1, &[-x[0], -x[1]])
    }
    fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }
    fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }
    fn djydy(&self, iy: usize, y: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> DMatrix<f64> {
        let mut d = DMatrix::zeros(2, 2);
        d[(0, iy)] = noise::gaussian_nllh_dy(y[iy], sigma[iy], m);
        d[(1, iy)] = y[iy + 1] / sigma[iy].powi(2);
        d[(1, iy + 1)] = d[(0, iy)];
        d
    }
    fn xbdot(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>, xb: &DVector<f64>) -> DVector<f64> {
        let p = ctx.p[0];
        DVector::from_vec(vec![p * xb[0], p * xb[1] + xb[0]])
    }
    fn qbdot(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>, xb: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![-x[0] * xb[0], -x[0] * xb[1] - x[1] * xb[0]])
    }
}

fn solution(p: f64) -> (f64, f64, f64) {
    let e = (-p * T).exp();
    (p * e, e * (1.0 - p * T), -T * e * (2.0 - p * T))
}

/// Data generated by the same model at `p = 1`.
fn reference_data() -> ExpData {
    let params = SimulationParameters::new(vec![1.0], vec![T]);
    let rdata = run_simulation(&AugmentedDecay, &params, &SolverOptions::default(), None).unwrap();
    let edata = ExpData::from_return_data(&rdata, 1, 0, 1.0, 1.0).unwrap();
    assert_eq!(edata.ny_true(), 1);
    assert!((edata.observed_data[(0, 0)] - solution(1.0).0).abs() < 1e-7);
    edata
}

fn simulate(p: f64, edata: &ExpData, method: SensitivityMethod, order: SensitivityOrder) -> (f64, f64) {
    let params = SimulationParameters::new(vec![p], vec![T]);
    let options = SolverOptions {
        sensitivity_order: order,
        ..SolverOptions::first_order(method).with_tolerances(1e-10, 1e-12)
    };
    let rdata = run_simulation(&AugmentedDecay, &params, &options, Some(edata)).unwrap();
    assert_eq!(rdata.status, SimulationStatus::Success);
    let s2llh = rdata.s2llh.get((0, 0)).copied().unwrap_or(f64::NAN);
    (rdata.sllh[0], s2llh)
}

#[test]
fn test_second_order_matches_finite_difference_of_gradient() {
    let p = 0.8;
    let edata = reference_data();
    let m = edata.observed_data[(0, 0)];
    let (x, dx, d2x) = solution(p);
    let expected_sllh = -(x - m) * dx;
    let expected_s2llh = -(dx * dx + (x - m) * d2x);

    let h = 1e-5;
    let (plus, _) = simulate(p + h, &edata, SensitivityMethod::Forward, SensitivityOrder::First);
    let (minus, _) = simulate(p - h, &edata, SensitivityMethod::Forward, SensitivityOrder::First);
    let fd = (plus - minus) / (2.0 * h);
    assert!((fd - expected_s2llh).abs() < 1e-5, "fd {fd} vs {expected_s2llh}");

    for method in [SensitivityMethod::Forward, SensitivityMethod::Adjoint] {
        let (sllh, s2llh) = simulate(p, &edata, method, SensitivityOrder::Second);
        assert!((sllh - expected_sllh).abs() < 1e-7, "{method:?} sllh {sllh} vs {expected_sllh}");
        assert!((s2llh - fd).abs() < 1e-5, "{method:?} s2llh {s2llh} vs fd {fd}");
        assert!((s2llh - expected_s2llh).abs() < 1e-7, "{method:?} s2llh {s2llh}");
    }
}

#[test]
fn test_first_order_run_has_no_second_order_block() {
    let edata = reference_data();
    let params = SimulationParameters::new(vec![0.8], vec![T]);
    let options = SolverOptions::first_order(SensitivityMethod::Adjoint);
    let rdata = run_simulation(&AugmentedDecay, &params, &options, Some(&edata)).unwrap();
    assert_eq!(rdata.s2llh.len(), 0);
    assert!(rdata.sllh[0].is_finite());
}
