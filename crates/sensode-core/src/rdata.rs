//! Simulation results.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::model::ModelDimensions;
use crate::options::{SensitivityMethod, SensitivityOrder, SolverOptions};
use crate::scaling::{self, ParameterScaling};

/// Outcome of a simulation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    #[default]
    NotRun,
    Success,
    /// Forward integration failed; outputs after the failure are NaN.
    IntegrationFailure,
    /// Backward integration failed; gradients are NaN.
    IntegrationFailureBackward,
    /// No steady state could be found.
    NewtonFailure,
    /// Two primary events at the same time.
    StuckEvent,
    /// Secondary events nested deeper than the configured bound.
    EventRecursionLimit,
    /// A root function was exactly zero at the start time.
    EventAtInitialTime,
    /// A linear system could not be solved.
    LinearSolveFailure,
}

impl SimulationStatus {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotRun => "not run",
            Self::Success => "success",
            Self::IntegrationFailure => "integration failure",
            Self::IntegrationFailureBackward => "backward integration failure",
            Self::NewtonFailure => "Newton failure",
            Self::StuckEvent => "stuck event",
            Self::EventRecursionLimit => "event recursion limit",
            Self::EventAtInitialTime => "event at initial time",
            Self::LinearSolveFailure => "linear solve failure",
        }
    }
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How the steady state was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteadyStateStatus {
    #[default]
    NotRun,
    /// Newton converged from the initial state.
    Newton,
    /// Forward simulation reached the steady state.
    Simulation,
    /// Newton converged after a simulation restart.
    SimulationThenNewton,
    Failed,
}

/// Diagnostics of the pre-equilibration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewtonDiagnostics {
    pub status: SteadyStateStatus,
    /// Newton iterations of each attempt.
    pub steps: Vec<usize>,
    /// Weighted residual norm at the returned state.
    pub wrms: f64,
}

/// Everything a simulation produces.
///
/// Sensitivity blocks are `n x nplist` matrices, one per timepoint (or per
/// event slot for event outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnData {
    pub ts: Vec<f64>,
    /// States (`nt x nx`).
    pub x: DMatrix<f64>,
    /// State sensitivities per timepoint (forward method only).
    pub sx: Vec<DMatrix<f64>>,
    /// Observables (`nt x ny`).
    pub y: DMatrix<f64>,
    pub sigmay: DMatrix<f64>,
    pub sy: Vec<DMatrix<f64>>,
    pub ssigmay: Vec<DMatrix<f64>>,
    /// Weighted residuals (`nt x ny_true`).
    pub res: DMatrix<f64>,
    pub chi2: f64,
    /// Event observables (`nmaxevent x nz`).
    pub z: DMatrix<f64>,
    pub sigmaz: DMatrix<f64>,
    /// Root values written by the final fill pass (`nmaxevent x nz`).
    pub rz: DMatrix<f64>,
    pub sz: Vec<DMatrix<f64>>,
    pub ssigmaz: Vec<DMatrix<f64>>,
    pub srz: Vec<DMatrix<f64>>,
    pub x0: DVector<f64>,
    pub sx0: DMatrix<f64>,
    /// Pre-equilibration steady state.
    pub x_ss: DVector<f64>,
    pub sx_ss: DMatrix<f64>,
    /// Jacobian at the final state.
    pub jacobian: DMatrix<f64>,
    /// Right-hand side at the final state.
    pub xdot: DVector<f64>,
    pub llh: f64,
    pub sllh: DVector<f64>,
    /// Second-order block (`nplist x (nj - 1)`).
    pub s2llh: DMatrix<f64>,
    pub numsteps: Vec<usize>,
    pub numrhsevals: Vec<usize>,
    pub numerrtestfails: Vec<usize>,
    pub numsteps_b: Vec<usize>,
    pub numrhsevals_b: Vec<usize>,
    pub numerrtestfails_b: Vec<usize>,
    pub newton: NewtonDiagnostics,
    pub status: SimulationStatus,
    pub sensitivity_order: SensitivityOrder,
    pub sensitivity_method: SensitivityMethod,
}

impl ReturnData {
    /// Allocate NaN-filled outputs for a simulation.
    pub fn new(
        dims: &ModelDimensions,
        timepoints: &[f64],
        nplist: usize,
        options: &SolverOptions,
        has_data: bool,
    ) -> Self {
        let nt = timepoints.len();
        let nan = |r: usize, c: usize| DMatrix::from_element(r, c, f64::NAN);
        let sensi = options.sensitivity_order >= SensitivityOrder::First;
        let fsa = options.forward_sensitivities();
        let nmaxevent = options.nmaxevent;
        let blocks = |count: usize, rows: usize, wanted: bool| {
            if wanted {
                vec![nan(rows, nplist); count]
            } else {
                Vec::new()
            }
        };
        let nj2 = if options.sensitivity_order >= SensitivityOrder::Second {
            dims.nj.saturating_sub(1)
        } else {
            0
        };
        let likelihood_init = if has_data { 0.0 } else { f64::NAN };

        Self {
            ts: timepoints.to_vec(),
            x: nan(nt, dims.nx),
            sx: blocks(nt, dims.nx, fsa),
            y: nan(nt, dims.ny),
            sigmay: nan(nt, dims.ny),
            sy: blocks(nt, dims.ny, fsa),
            ssigmay: blocks(nt, dims.ny, fsa),
            res: nan(nt, dims.ny_true),
            chi2: likelihood_init,
            z: nan(nmaxevent, dims.nz),
            sigmaz: nan(nmaxevent, dims.nz),
            rz: nan(nmaxevent, dims.nz),
            sz: blocks(nmaxevent, dims.nz, fsa),
            ssigmaz: blocks(nmaxevent, dims.nz, fsa),
            srz: blocks(nmaxevent, dims.nz, fsa),
            x0: DVector::from_element(dims.nx, f64::NAN),
            sx0: if sensi { nan(dims.nx, nplist) } else { DMatrix::zeros(0, 0) },
            x_ss: DVector::from_element(dims.nx, f64::NAN),
            sx_ss: if sensi { nan(dims.nx, nplist) } else { DMatrix::zeros(0, 0) },
            jacobian: nan(dims.nx, dims.nx),
            xdot: DVector::from_element(dims.nx, f64::NAN),
            llh: likelihood_init,
            sllh: DVector::from_element(if sensi { nplist } else { 0 }, likelihood_init),
            s2llh: DMatrix::from_element(if nj2 > 0 { nplist } else { 0 }, nj2, likelihood_init),
            numsteps: vec![0; nt],
            numrhsevals: vec![0; nt],
            numerrtestfails: vec![0; nt],
            numsteps_b: vec![0; nt],
            numrhsevals_b: vec![0; nt],
            numerrtestfails_b: vec![0; nt],
            newton: NewtonDiagnostics::default(),
            status: SimulationStatus::NotRun,
            sensitivity_order: options.sensitivity_order,
            sensitivity_method: options.sensitivity_method,
        }
    }

    /// Number of timepoints.
    pub fn nt(&self) -> usize {
        self.ts.len()
    }

    /// Mark likelihood, residual norm and gradients as unavailable.
    pub fn invalidate_likelihood(&mut self) {
        self.llh = f64::NAN;
        self.chi2 = f64::NAN;
        self.sllh.fill(f64::NAN);
        self.s2llh.fill(f64::NAN);
    }

    /// Convert every derivative from model-space to optimizer-space.
    ///
    /// `p` are the model-space parameter values, `scaling` their scalings
    /// (empty for identity) and `plist` the sensitivity parameter indices.
    pub fn apply_chain_rule(&mut self, p: &[f64], scaling: &[ParameterScaling], plist: &[usize]) {
        if scaling::is_identity(scaling) {
            return;
        }
        let pcoef = scaling::chain_rule_factors(p, scaling, plist);

        for (ip, c) in pcoef.iter().enumerate() {
            if ip < self.sllh.len() {
                self.sllh[ip] *= c;
            }
        }

        let full_second_order = self.s2llh.ncols() == p.len();
        for ip in 0..self.s2llh.nrows() {
            for j in 0..self.s2llh.ncols() {
                if full_second_order {
                    let s = scaling.get(j).copied().unwrap_or_default();
                    self.s2llh[(ip, j)] *= pcoef[ip] * s.chain_rule_factor(p[j]);
                    if plist[ip] == j {
                        self.s2llh[(ip, j)] += self.sllh[ip] * s.second_order_coefficient();
                    }
                } else {
                    self.s2llh[(ip, j)] *= pcoef[ip];
                }
            }
        }

        let blocks = self
            .sx
            .iter_mut()
            .chain(self.sy.iter_mut())
            .chain(self.ssigmay.iter_mut())
            .chain(self.sz.iter_mut())
            .chain(self.ssigmaz.iter_mut())
            .chain(self.srz.iter_mut())
            .chain(std::iter::once(&mut self.sx0))
            .chain(std::iter::once(&mut self.sx_ss));
        for block in blocks {
            scale_columns(block, &pcoef);
        }
    }
}

fn scale_columns(block: &mut DMatrix<f64>, pcoef: &[f64]) {
    if block.ncols() != pcoef.len() {
        return;
    }
    for (j, &c) in pcoef.iter().enumerate() {
        block.column_mut(j).scale_mut(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SensitivityMethod;
    use std::f64::consts::LN_10;

    fn forward_options() -> SolverOptions {
        SolverOptions::first_order(SensitivityMethod::Forward)
    }

    #[test]
    fn test_new_shapes() {
        let dims = ModelDimensions::new(2, 1, 3).with_events(1, 1);
        let rdata = ReturnData::new(&dims, &[0.0, 1.0], 2, &forward_options(), true);
        assert_eq!(rdata.x.shape(), (2, 2));
        assert_eq!(rdata.sx.len(), 2);
        assert_eq!(rdata.sx[0].shape(), (2, 2));
        assert_eq!(rdata.z.nrows(), 10);
        assert_eq!(rdata.llh, 0.0);
        assert_eq!(rdata.sllh.len(), 2);
        assert!(rdata.x[(1, 1)].is_nan());
        assert_eq!(rdata.s2llh.len(), 0);
    }

    #[test]
    fn test_no_data_means_nan_likelihood() {
        let dims = ModelDimensions::new(1, 1, 1);
        let rdata = ReturnData::new(&dims, &[1.0], 1, &forward_options(), false);
        assert!(rdata.llh.is_nan());
        assert!(rdata.sllh[0].is_nan());
    }

    #[test]
    fn test_adjoint_allocates_no_state_sensitivities() {
        let dims = ModelDimensions::new(1, 1, 1);
        let options = SolverOptions::first_order(SensitivityMethod::Adjoint);
        let rdata = ReturnData::new(&dims, &[1.0], 1, &options, true);
        assert!(rdata.sx.is_empty());
        assert_eq!(rdata.sllh.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let dims = ModelDimensions::new(1, 1, 1);
        let mut rdata = ReturnData::new(&dims, &[0.0, 1.0], 1, &forward_options(), true);
        rdata.x[(0, 0)] = 1.0;
        rdata.llh = -2.0;
        rdata.invalidate_likelihood();
        assert_eq!(rdata.x[(0, 0)], 1.0);
        assert!(rdata.llh.is_nan());
        assert!(rdata.sllh[0].is_nan());
    }

    #[test]
    fn test_chain_rule_first_order() {
        let dims = ModelDimensions::new(1, 1, 2);
        let mut rdata = ReturnData::new(&dims, &[1.0], 2, &forward_options(), true);
        rdata.sllh = DVector::from_vec(vec![2.0, 3.0]);
        rdata.sx[0] = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let p = [5.0, 4.0];
        let scaling = [ParameterScaling::Log10, ParameterScaling::Ln];
        rdata.apply_chain_rule(&p, &scaling, &[0, 1]);

        assert!((rdata.sllh[0] - 2.0 * LN_10 * 5.0).abs() < 1e-12);
        assert!((rdata.sllh[1] - 12.0).abs() < 1e-12);
        assert!((rdata.sx[0][(0, 0)] - LN_10 * 5.0).abs() < 1e-12);
        assert!((rdata.sx[0][(0, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_chain_rule_identity_is_noop() {
        let dims = ModelDimensions::new(1, 1, 1);
        let mut rdata = ReturnData::new(&dims, &[1.0], 1, &forward_options(), true);
        rdata.sllh[0] = 7.0;
        rdata.apply_chain_rule(&[3.0], &[ParameterScaling::None], &[0]);
        assert_eq!(rdata.sllh[0], 7.0);
        rdata.apply_chain_rule(&[3.0], &[], &[0]);
        assert_eq!(rdata.sllh[0], 7.0);
    }

    #[test]
    fn test_chain_rule_full_second_order() {
        // L(p) = p^3 with ln scaling: dL/dq = 3p^3, d2L/dq2 = 9p^3
        let dims = ModelDimensions::new(2, 2, 1).with_second_order(2);
        let options = SolverOptions {
            sensitivity_order: SensitivityOrder::Second,
            ..forward_options()
        };
        let mut rdata = ReturnData::new(&dims, &[1.0], 1, &options, true);
        let p = 1.5_f64;
        rdata.sllh[0] = 3.0 * p * p;
        rdata.s2llh[(0, 0)] = 6.0 * p;
        rdata.apply_chain_rule(&[p], &[ParameterScaling::Ln], &[0]);
        assert!((rdata.sllh[0] - 3.0 * p.powi(3)).abs() < 1e-12);
        assert!((rdata.s2llh[(0, 0)] - 9.0 * p.powi(3)).abs() < 1e-12);
    }
}
