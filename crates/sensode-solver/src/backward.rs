//! Backward (adjoint) pass.
//!
//! Integrates the adjoint state and quadratures from the last timepoint
//! back to `t0`, stopping at every data point and every ledger entry. Data
//! points add the state derivative of their likelihood to `xB`; ledger
//! entries replay the event in reverse: adjoint and quadrature boluses,
//! the event-observable likelihood and the inverse heaviside update.
//! At `t0` the quadratures and the initial-state sensitivities are
//! combined into the likelihood gradient.

use nalgebra::{DMatrix, DVector};
use sensode_core::{EventInstant, Model, ModelContext, ReturnData};

use crate::error::Result;
use crate::forward::ForwardResult;
use crate::integrator::Integrator;
use crate::ledger::{EventLedger, EventRecord, LedgerEntry};
use crate::output::add_state_derivative;

/// Driver of one backward pass.
pub struct BackwardProblem<'a> {
    model: &'a dyn Model,
    t0: f64,
    ledger: EventLedger,
    djydx: Vec<Option<DMatrix<f64>>>,
    xb: DVector<f64>,
    xqb: DVector<f64>,
    /// Event-time boluses of secondary events, added once their primary is replayed.
    deferred_xb: DVector<f64>,
}

impl<'a> BackwardProblem<'a> {
    pub fn new(model: &'a dyn Model, t0: f64, forward: ForwardResult, nplist: usize) -> Self {
        let dims = model.dimensions();
        Self {
            model,
            t0,
            ledger: forward.ledger,
            djydx: forward.djydx,
            xb: DVector::zeros(dims.nx),
            xqb: DVector::zeros(nplist * dims.nj),
            deferred_xb: DVector::zeros(dims.nx),
        }
    }

    /// Adjoint state at the current stop.
    pub fn adjoint_state(&self) -> &DVector<f64> {
        &self.xb
    }

    /// Adjoint quadratures at the current stop.
    pub fn quadrature(&self) -> &DVector<f64> {
        &self.xqb
    }

    /// Ledger entries not yet replayed.
    pub fn remaining_events(&self) -> usize {
        self.ledger.len()
    }

    /// Run the backward pass and add the adjoint gradient to `rdata`.
    ///
    /// `ctx` must carry the heaviside state at the end of the forward
    /// pass; it is restored to the initial heaviside state on success.
    /// `sx0` are the initial-state sensitivities (`nx x nplist`).
    pub fn run(
        &mut self,
        integrator: &mut dyn Integrator,
        ctx: &mut ModelContext,
        rdata: &mut ReturnData,
        sx0: &DMatrix<f64>,
    ) -> Result<()> {
        let ts = rdata.ts.clone();
        let Some(&t_last) = ts.last() else {
            return Ok(());
        };
        let nx_true = self.model.dimensions().nx_true;

        integrator.setup_backward(self.model, ctx, t_last, &self.xb, &self.xqb)?;
        let mut it = ts.len();
        let mut t = t_last;

        loop {
            let t_data = it.checked_sub(1).map(|i| ts[i]);
            let t_event = self.ledger.last_time();
            let t_next = match (t_data, t_event) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };

            if t_next < t {
                integrator.solve_backward(self.model, ctx, t_next)?;
                self.xb.copy_from(integrator.backward_state());
                self.xqb.copy_from(integrator.backward_quadrature());
                t = t_next;
            }

            if t_event == Some(t_next) {
                if let Some(entry) = self.ledger.pop() {
                    self.replay_event(ctx, &entry);
                }
                if self.ledger.last_time() != Some(t_next) {
                    self.xb += &self.deferred_xb;
                    self.deferred_xb.fill(0.0);
                }
            } else {
                it -= 1;
                if let Some(djydx) = self.djydx.get(it).and_then(Option::as_ref) {
                    add_state_derivative(&mut self.xb, djydx, nx_true);
                }
                let stats = integrator.stats_backward();
                rdata.numsteps_b[it] = stats.steps;
                rdata.numrhsevals_b[it] = stats.rhs_evals;
                rdata.numerrtestfails_b[it] = stats.err_test_fails;
                log::debug!("Backward data point at t = {t} (timepoint {it})");
            }
            integrator.reinit_backward(t, &self.xb, &self.xqb)?;
        }

        if self.t0 < t {
            integrator.solve_backward(self.model, ctx, self.t0)?;
            self.xb.copy_from(integrator.backward_state());
            self.xqb.copy_from(integrator.backward_quadrature());
        }
        self.combine_gradient(rdata, sx0);
        Ok(())
    }

    /// Undo one ledger entry on the adjoint state.
    fn replay_event(&mut self, ctx: &mut ModelContext, entry: &LedgerEntry) {
        if let LedgerEntry::Recorded(record) = entry {
            log::debug!("Backward event at t = {}", record.time);
            self.apply_boluses(ctx, record);
        }
        ctx.revert_roots(entry.mask());
    }

    /// Adjoint and quadrature boluses, all computed from the incoming `xB`.
    ///
    /// A secondary event is timed by its primary's root, so its adjoint
    /// state bolus acts on the adjoint from before the primary event and is
    /// deferred until the whole cascade has been replayed.
    fn apply_boluses(&mut self, ctx: &ModelContext, record: &EventRecord) {
        let nx_true = self.model.dimensions().nx_true;
        let xb_old = self.xb.clone();
        for (ie, dir) in record.mask.iter().enumerate() {
            if !dir.is_fired() {
                continue;
            }
            let ev = EventInstant {
                timing: record.timing(ie),
                ..EventInstant::primary(ie, record.time, &record.x, &record.xdot, &record.xdot_old)
            };
            let delta = self.model.delta_xb(ctx, &ev, &xb_old);
            if record.is_secondary() {
                self.deferred_xb += delta;
            } else {
                self.xb += delta;
            }
            self.xqb += self.model.delta_qb(ctx, &ev, &xb_old);
        }
        if let Some(djzdx) = record.djzdx.as_ref() {
            add_state_derivative(&mut self.xb, djzdx, nx_true);
        }
    }

    /// `sllh -= xB(t0)^T sx0 + xQB`, with the cross terms of the
    /// second-order directions for the `s2llh` block.
    fn combine_gradient(&self, rdata: &mut ReturnData, sx0: &DMatrix<f64>) {
        let dims = self.model.dimensions();
        let nx_true = dims.nx_true;
        let nplist = sx0.ncols();
        for ip in 0..nplist {
            let first: f64 = (0..nx_true).map(|ix| self.xb[ix] * sx0[(ix, ip)]).sum();
            if let Some(s) = rdata.sllh.get_mut(ip) {
                *s -= first + self.xqb[ip];
            }
            for ij in 1..dims.nj {
                if ip >= rdata.s2llh.nrows() || ij - 1 >= rdata.s2llh.ncols() {
                    continue;
                }
                let cross: f64 = (0..nx_true)
                    .map(|ix| {
                        self.xb[ix + ij * nx_true] * sx0[(ix, ip)] + self.xb[ix] * sx0[(ix + ij * nx_true, ip)]
                    })
                    .sum();
                rdata.s2llh[(ip, ij - 1)] -= cross + self.xqb[ip + ij * nplist];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dopri::DormandPrince;
    use crate::forward::ForwardProblem;
    use sensode_core::{ExpData, ModelDimensions, RootDirection, SensitivityMethod, SolverOptions};

    /// dx/dt = -p0 * x with a time event at t = k0 adding k1 to x.
    struct KickedDecay;

    impl Model for KickedDecay {
        fn dimensions(&self) -> ModelDimensions {
            ModelDimensions::new(1, 1, 1).with_events(1, 0).with_fixed_parameters(2)
        }
        fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
            DVector::from_element(1, 1.0)
        }
        fn xdot(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            x * -ctx.p[0]
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
        fn root(&self, ctx: &ModelContext, t: f64, _x: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, t - ctx.k[0])
        }
        fn droot_dt(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, 1.0)
        }
        fn delta_x(&self, ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, ctx.k[1])
        }
    }

    /// Gradient of -llh for data m = 0, sigma = 1 at t = 1 with the forward
    /// and backward drivers wired by hand.
    fn adjoint_gradient(p: f64, kick: f64) -> (f64, f64) {
        let model = KickedDecay;
        let options = SolverOptions::first_order(SensitivityMethod::Adjoint).with_tolerances(1e-10, 1e-12);
        let mut edata = ExpData::new(1, 1, 0, options.nmaxevent);
        edata.set_observed_data(&[0.0]).unwrap();
        edata.set_uniform_data_std_dev(1.0).unwrap();

        let mut ctx = ModelContext::new(vec![p], vec![0.5, kick], vec![0], 1);
        let mut rdata = ReturnData::new(&model.dimensions(), &[1.0], 1, &options, true);
        let mut integrator = DormandPrince::new();
        let mut forward = ForwardProblem::new(&model, &options, Some(&edata), 0.0, model.x0(&ctx), None);
        forward.run(&mut integrator, &mut ctx, &mut rdata).unwrap();
        let x_end = forward.state()[0];
        let h_after = ctx.h[0];

        let sx0 = DMatrix::zeros(1, 1);
        let mut backward = BackwardProblem::new(&model, 0.0, forward.into_result(), 1);
        backward.run(&mut integrator, &mut ctx, &mut rdata, &sx0).unwrap();
        assert_eq!(backward.remaining_events(), 0, "every ledger entry is consumed");
        assert_eq!(h_after, 1.0);
        assert_eq!(ctx.h[0], 0.0, "heaviside restored by the replay");
        assert!(integrator.stats_backward().steps > 0);
        (rdata.sllh[0], x_end)
    }

    #[test]
    fn test_adjoint_gradient_through_bolus() {
        // x(1) = e^{-p} + kick * e^{-p/2}; llh = -0.5 ln(2 pi) - 0.5 x(1)^2
        let (p, kick) = (1.0, 1.0);
        let (sllh, x_end) = adjoint_gradient(p, kick);
        let expected_x = (-p).exp() + kick * (-p / 2.0).exp();
        assert!((x_end - expected_x).abs() < 1e-8, "x(1) = {x_end}, expected {expected_x}");
        let dxdp = -(-p).exp() - 0.5 * kick * (-p / 2.0).exp();
        let expected = -expected_x * dxdp;
        assert!(
            (sllh - expected).abs() < 1e-6 * expected.abs(),
            "sllh = {sllh}, expected {expected}"
        );
    }

    #[test]
    fn test_bolus_changes_gradient() {
        let (with_bolus, _) = adjoint_gradient(1.0, 1.0);
        let (without, _) = adjoint_gradient(1.0, 0.0);
        let e = (-1.0f64).exp();
        // without the bolus: -x * dx/dp = e^{-2}
        assert!((without - e * e).abs() < 1e-7);
        let delta = with_bolus - without;
        let expected_delta = 1.5 * (-1.5f64).exp() + 0.5 * e;
        assert!((delta - expected_delta).abs() < 1e-6, "delta = {delta}, expected {expected_delta}");
    }

    #[test]
    fn test_overflow_entries_only_revert_heaviside() {
        let model = KickedDecay;
        let mut ledger = EventLedger::new(1, 0);
        ledger.record(EventRecord {
            time: 0.5,
            mask: vec![RootDirection::Rising],
            x: DVector::zeros(1),
            xdot: DVector::zeros(1),
            xdot_old: DVector::zeros(1),
            djzdx: Some(DMatrix::from_element(1, 1, 7.0)),
            trigger: None,
        });
        let forward = ForwardResult {
            ledger,
            djydx: vec![None],
            event_slots: vec![0],
            t: 1.0,
            x: DVector::zeros(1),
        };
        let mut backward = BackwardProblem::new(&model, 0.0, forward, 1);
        let mut ctx = ModelContext::new(vec![1.0], vec![0.5, 1.0], vec![0], 1);
        ctx.h[0] = 1.0;
        let entry = backward.ledger.pop().unwrap();
        backward.replay_event(&mut ctx, &entry);
        assert_eq!(ctx.h[0], 0.0);
        assert_eq!(backward.adjoint_state()[0], 0.0);
    }
}
