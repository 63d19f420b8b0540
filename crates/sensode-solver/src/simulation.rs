//! Top-level simulation call.
//!
//! Validates the setup, computes the initial state (optionally by
//! pre-equilibration), runs the forward pass and, for the adjoint method,
//! the backward pass, then rescales every derivative to the optimizer
//! parameterization. Setup errors are returned as `Err`; every other
//! failure is reported through [`ReturnData::status`] with the likelihood
//! and its gradients set to NaN.

use nalgebra::{DMatrix, DVector};
use sensode_core::{ExpData, Model, ModelContext, ReturnData, SensitivityOrder, SimulationParameters, SimulationStatus, SolverOptions};

use crate::backward::BackwardProblem;
use crate::dopri::DormandPrince;
use crate::error::Result;
use crate::forward::ForwardProblem;
use crate::integrator::Integrator;
use crate::steadystate::SteadyStateProblem;

/// Simulate `model` with the reference integrator.
pub fn run_simulation(
    model: &dyn Model,
    params: &SimulationParameters,
    options: &SolverOptions,
    edata: Option<&ExpData>,
) -> Result<ReturnData> {
    let mut integrator = DormandPrince::new();
    run_simulation_with(model, &mut integrator, params, options, edata)
}

/// Simulate `model` with a caller-supplied integrator.
pub fn run_simulation_with(
    model: &dyn Model,
    integrator: &mut dyn Integrator,
    params: &SimulationParameters,
    options: &SolverOptions,
    edata: Option<&ExpData>,
) -> Result<ReturnData> {
    let dims = model.dimensions();
    options.validate()?;
    params.validate(&dims)?;
    if let Some(edata) = edata {
        edata.validate(&dims, params.timepoints.len(), options.nmaxevent)?;
    }

    let mut ctx = params.context(&dims);
    let mut rdata = ReturnData::new(&dims, &params.timepoints, ctx.nplist(), options, edata.is_some());

    match simulate(model, integrator, params, options, edata, &mut ctx, &mut rdata) {
        Ok(()) => {
            rdata.status = SimulationStatus::Success;
            log::debug!("Simulation of {} finished, llh = {}", model.name(), rdata.llh);
        }
        Err(err) if err.is_setup_failure() => return Err(err),
        Err(err) => {
            log::warn!("Simulation of {} failed: {err}", model.name());
            rdata.status = err.status();
            rdata.invalidate_likelihood();
        }
    }

    rdata.apply_chain_rule(ctx.p.as_slice(), &params.scaling, &ctx.plist);
    Ok(rdata)
}

fn simulate(
    model: &dyn Model,
    integrator: &mut dyn Integrator,
    params: &SimulationParameters,
    options: &SolverOptions,
    edata: Option<&ExpData>,
    ctx: &mut ModelContext,
    rdata: &mut ReturnData,
) -> Result<()> {
    let dims = model.dimensions();
    let sensi = options.sensitivity_order >= SensitivityOrder::First;

    let (mut x0, mut sx0) = match &params.initial_states {
        Some(x0) => (DVector::from_column_slice(x0), DMatrix::zeros(dims.nx, ctx.nplist())),
        None => {
            let x0 = model.x0(ctx);
            let sx0 = ctx.select(&model.dx0dp(ctx, &x0));
            (x0, sx0)
        }
    };

    if options.preequilibration {
        let problem = SteadyStateProblem::new(model, options);
        let steady = problem.solve(ctx, &x0, integrator, sensi, &mut rdata.newton)?;
        rdata.x_ss.copy_from(&steady.x);
        x0 = steady.x;
        if let Some(sx_ss) = steady.sx {
            rdata.sx_ss.copy_from(&sx_ss);
            sx0 = sx_ss;
        }
    }

    rdata.x0.copy_from(&x0);
    if sensi {
        rdata.sx0.copy_from(&sx0);
    }

    let fsa_sx0 = options.forward_sensitivities().then(|| sx0.clone());
    let mut forward = ForwardProblem::new(model, options, edata, params.t0, x0, fsa_sx0);
    forward.run(integrator, ctx, rdata)?;

    let skip_backward = dims.nx == 0 || ctx.nplist() == 0 || edata.is_none();
    if options.adjoint_sensitivities() && !skip_backward {
        let mut backward = BackwardProblem::new(model, params.t0, forward.into_result(), ctx.nplist());
        backward.run(integrator, ctx, rdata, &sx0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use nalgebra::DVector;
    use sensode_core::{ModelDimensions, ParameterScaling, SensitivityMethod};

    /// dx/dt = -p0 * x, x(0) = p1, y = x.
    struct Decay;

    impl Model for Decay {
        fn dimensions(&self) -> ModelDimensions {
            ModelDimensions::new(1, 1, 2)
        }
        fn x0(&self, ctx: &ModelContext) -> DVector<f64> {
            DVector::from_element(1, ctx.p[1])
        }
        fn dx0dp(&self, _ctx: &ModelContext, _x0: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0])
        }
        fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            x * -ctx.p[0]
        }
        fn jacobian(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, -ctx.p[0])
        }
        fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 2, &[-x[0], 0.0])
        }
        fn y(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            x.clone()
        }
        fn dydx(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(1, 1)
        }
    }

    fn data() -> ExpData {
        let mut edata = ExpData::new(2, 1, 0, 10);
        edata.set_observed_data(&[0.5, 0.2]).unwrap();
        edata.set_uniform_data_std_dev(0.1).unwrap();
        edata
    }

    /// -llh for p0, p1 in closed form.
    fn expected_gradient(p0: f64, p1: f64) -> [f64; 2] {
        let mut g = [0.0; 2];
        for (t, m) in [(1.0f64, 0.5), (2.0, 0.2)] {
            let x = p1 * (-p0 * t).exp();
            let r = (x - m) / 0.01;
            g[0] -= r * (-t * x);
            g[1] -= r * (-p0 * t).exp();
        }
        g
    }

    #[test]
    fn test_forward_and_adjoint_agree() {
        let params = SimulationParameters::new(vec![0.7, 1.2], vec![1.0, 2.0]);
        let edata = data();
        let expected = expected_gradient(0.7, 1.2);
        for method in [SensitivityMethod::Forward, SensitivityMethod::Adjoint] {
            let options = SolverOptions::first_order(method).with_tolerances(1e-10, 1e-12);
            let rdata = run_simulation(&Decay, &params, &options, Some(&edata)).unwrap();
            assert_eq!(rdata.status, SimulationStatus::Success);
            for ip in 0..2 {
                assert!(
                    (rdata.sllh[ip] - expected[ip]).abs() < 1e-5 * expected[ip].abs().max(1.0),
                    "{method:?}: sllh[{ip}] = {}, expected {}",
                    rdata.sllh[ip],
                    expected[ip]
                );
            }
            assert!((rdata.sx0[(0, 1)] - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn test_log10_scaling_rescales_gradient() {
        let params =
            SimulationParameters::new(vec![0.7, 1.2], vec![1.0, 2.0]).with_uniform_scaling(ParameterScaling::Log10);
        let options = SolverOptions::first_order(SensitivityMethod::Forward).with_tolerances(1e-10, 1e-12);
        let rdata = run_simulation(&Decay, &params, &options, Some(&data())).unwrap();
        let expected = expected_gradient(0.7, 1.2);
        let ln10 = std::f64::consts::LN_10;
        assert!((rdata.sllh[0] - expected[0] * ln10 * 0.7).abs() < 1e-5);
        assert!((rdata.sllh[1] - expected[1] * ln10 * 1.2).abs() < 1e-5);
    }

    #[test]
    fn test_plist_subset() {
        let params = SimulationParameters::new(vec![0.7, 1.2], vec![1.0, 2.0]).with_plist(vec![1]);
        let options = SolverOptions::first_order(SensitivityMethod::Adjoint).with_tolerances(1e-10, 1e-12);
        let rdata = run_simulation(&Decay, &params, &options, Some(&data())).unwrap();
        assert_eq!(rdata.sllh.len(), 1);
        let expected = expected_gradient(0.7, 1.2);
        assert!((rdata.sllh[0] - expected[1]).abs() < 1e-5 * expected[1].abs().max(1.0));
    }

    #[test]
    fn test_setup_failure_is_an_error() {
        let params = SimulationParameters::new(vec![0.7], vec![1.0]);
        let result = run_simulation(&Decay, &params, &SolverOptions::default(), None);
        assert!(matches!(result, Err(Error::Setup(_))));
    }

    #[test]
    fn test_integration_failure_is_reported() {
        let params = SimulationParameters::new(vec![0.7, 1.2], vec![1.0, 100.0]);
        let options = SolverOptions {
            max_steps: 3,
            ..SolverOptions::first_order(SensitivityMethod::Forward)
        };
        let rdata = run_simulation(&Decay, &params, &options, Some(&data())).unwrap();
        assert_eq!(rdata.status, SimulationStatus::IntegrationFailure);
        assert!(rdata.llh.is_nan());
        assert!(rdata.sllh.iter().all(|v| v.is_nan()));
        assert!(rdata.x[(1, 0)].is_nan(), "unreached timepoints stay invalid");
    }

    #[test]
    fn test_without_data_llh_is_nan() {
        let params = SimulationParameters::new(vec![0.7, 1.2], vec![1.0]);
        let rdata = run_simulation(&Decay, &params, &SolverOptions::default(), None).unwrap();
        assert_eq!(rdata.status, SimulationStatus::Success);
        assert!(rdata.llh.is_nan());
        assert!((rdata.x[(0, 0)] - 1.2 * (-0.7f64).exp()).abs() < 1e-7);
    }

    #[test]
    fn test_initial_state_override() {
        let mut params = SimulationParameters::new(vec![0.7, 1.2], vec![0.0]);
        params.initial_states = Some(vec![3.0]);
        let options = SolverOptions::first_order(SensitivityMethod::Forward);
        let rdata = run_simulation(&Decay, &params, &options, None).unwrap();
        assert_eq!(rdata.x[(0, 0)], 3.0);
        assert_eq!(rdata.sx0[(0, 1)], 0.0);
    }
}
