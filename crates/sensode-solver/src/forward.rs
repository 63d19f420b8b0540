//! Forward pass over the output times with event handling.
//!
//! The driver owns the live state (and forward sensitivities) between
//! integrator calls. At every root reported by the integrator it writes
//! event outputs, snapshots the pre-event state into the [`EventLedger`],
//! flips the heaviside indicators, applies state and sensitivity boluses
//! and follows secondary events triggered by those boluses before
//! restarting the integrator.

use nalgebra::{DMatrix, DVector};
use sensode_core::{EventInstant, EventTiming, ExpData, Model, ModelContext, ReturnData, RootDirection, SolverOptions};

use crate::error::{Error, Result};
use crate::integrator::{Integrator, SolveStatus};
use crate::ledger::{EventLedger, EventRecord, EventTrigger};
use crate::output::{write_data_point, write_event_output};

/// What the backward pass needs from a finished forward pass.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub ledger: EventLedger,
    /// State derivative of each timepoint's likelihood (adjoint only).
    pub djydx: Vec<Option<DMatrix<f64>>>,
    /// Occupied event output slots per event index, fill pass included.
    pub event_slots: Vec<usize>,
    /// Final time.
    pub t: f64,
    /// Final state.
    pub x: DVector<f64>,
}

/// Event time of a primary occurrence, shared by its secondary events.
struct PrimaryTiming {
    trigger: EventTrigger,
    /// Event-time sensitivity, forward sensitivities only.
    stau: Option<DVector<f64>>,
}

/// Driver of one forward simulation.
pub struct ForwardProblem<'a> {
    model: &'a dyn Model,
    options: &'a SolverOptions,
    edata: Option<&'a ExpData>,
    ledger: EventLedger,
    event_slots: Vec<usize>,
    djydx: Vec<Option<DMatrix<f64>>>,
    t: f64,
    x: DVector<f64>,
    sx: Option<DMatrix<f64>>,
    last_event_time: Option<f64>,
}

impl<'a> ForwardProblem<'a> {
    /// Prepare a forward pass from `(t0, x0)`.
    ///
    /// `sx0` enables forward sensitivities and must be `None` for the
    /// adjoint method.
    pub fn new(
        model: &'a dyn Model,
        options: &'a SolverOptions,
        edata: Option<&'a ExpData>,
        t0: f64,
        x0: DVector<f64>,
        sx0: Option<DMatrix<f64>>,
    ) -> Self {
        let ne = model.dimensions().ne;
        Self {
            model,
            options,
            edata,
            ledger: EventLedger::new(ne, options.nmaxevent),
            event_slots: vec![0; ne],
            djydx: Vec::new(),
            t: t0,
            x: x0,
            sx: sx0,
            last_event_time: None,
        }
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn sensitivities(&self) -> Option<&DMatrix<f64>> {
        self.sx.as_ref()
    }

    pub fn into_result(self) -> ForwardResult {
        ForwardResult {
            ledger: self.ledger,
            djydx: self.djydx,
            event_slots: self.event_slots,
            t: self.t,
            x: self.x,
        }
    }

    /// Set the heaviside indicators from the sign of the roots at the start time.
    fn init_heaviside(&self, ctx: &mut ModelContext) -> Result<()> {
        let ne = self.model.dimensions().ne;
        if ne == 0 {
            return Ok(());
        }
        let g = self.model.root(ctx, self.t, &self.x);
        for ie in 0..ne {
            let value = g.get(ie).copied().unwrap_or(f64::NAN);
            if value == 0.0 {
                return Err(Error::EventAtInitialTime { index: ie, t: self.t });
            }
            ctx.h[ie] = if value > 0.0 { 1.0 } else { 0.0 };
        }
        Ok(())
    }

    /// Integrate over all timepoints of `rdata`, writing outputs as they are reached.
    ///
    /// On failure everything written up to the last successful stop is kept.
    pub fn run(&mut self, integrator: &mut dyn Integrator, ctx: &mut ModelContext, rdata: &mut ReturnData) -> Result<()> {
        let dims = self.model.dimensions();
        let ts = rdata.ts.clone();
        self.djydx = vec![None; ts.len()];
        self.init_heaviside(ctx)?;

        if dims.nx > 0 {
            integrator.setup(self.model, ctx, self.t, &self.x, self.sx.as_ref(), self.options)?;
            integrator.calc_consistent_ic(self.model, ctx)?;
            if dims.ne > 0 {
                integrator.set_root_finding(self.model, ctx, dims.ne);
            }
            if let Some(&t_last) = ts.last() {
                integrator.set_stop_time(t_last);
            }
        }

        for (it, &tout) in ts.iter().enumerate() {
            if tout > self.t {
                if dims.nx > 0 {
                    self.advance(integrator, ctx, rdata, tout)?;
                } else {
                    self.t = tout;
                }
            }
            if dims.nx > 0 {
                let stats = integrator.stats();
                rdata.numsteps[it] = stats.steps;
                rdata.numrhsevals[it] = stats.rhs_evals;
                rdata.numerrtestfails[it] = stats.err_test_fails;
            }
            self.djydx[it] = write_data_point(
                self.model,
                ctx,
                self.options,
                self.edata,
                rdata,
                it,
                tout,
                &self.x,
                self.sx.as_ref(),
            );
            log::debug!("Output at t = {tout} (timepoint {it})");
        }

        if !ts.is_empty() {
            self.fill_events(ctx, rdata);
        }
        rdata.jacobian = self.model.jacobian(ctx, self.t, &self.x);
        rdata.xdot = self.model.xdot(ctx, self.t, &self.x);
        Ok(())
    }

    /// Integrate to `tout`, handling every root on the way.
    fn advance(
        &mut self,
        integrator: &mut dyn Integrator,
        ctx: &mut ModelContext,
        rdata: &mut ReturnData,
        tout: f64,
    ) -> Result<()> {
        loop {
            let status = integrator.solve(self.model, ctx, tout)?;
            self.t = integrator.time();
            self.x.copy_from(integrator.state());
            if let (Some(sx), Some(live)) = (integrator.sensitivities(), self.sx.as_mut()) {
                live.copy_from(sx);
            }
            match status {
                SolveStatus::Reached => return Ok(()),
                SolveStatus::Root => {
                    let mask = integrator.root_info().to_vec();
                    self.handle_event(integrator, ctx, rdata, mask)?;
                }
            }
        }
    }

    /// Process a primary event and every secondary event it triggers.
    ///
    /// Secondary events are worked off iteratively; nesting deeper than
    /// `max_event_recursion` is an error.
    pub fn handle_event(
        &mut self,
        integrator: &mut dyn Integrator,
        ctx: &mut ModelContext,
        rdata: &mut ReturnData,
        mask: Vec<RootDirection>,
    ) -> Result<()> {
        let t = self.t;
        if self.last_event_time == Some(t) {
            return Err(Error::StuckEvent { t });
        }
        self.last_event_time = Some(t);

        let timing = self.primary_timing(ctx, &mask);
        let mut pending = self.apply_event(ctx, rdata, &mask, None);
        let mut depth = 0;
        while let Some(secondary) = pending {
            depth += 1;
            if depth > self.options.max_event_recursion {
                return Err(Error::EventRecursion { depth, t });
            }
            log::debug!("Secondary event at t = {t} (depth {depth})");
            pending = self.apply_event(ctx, rdata, &secondary, timing.as_ref());
        }

        integrator.reinit(self.model, ctx, t, &self.x)?;
        if let Some(sx) = self.sx.as_ref() {
            integrator.sens_reinit(self.model, ctx, sx)?;
        }
        Ok(())
    }

    /// Snapshot the first fired root of a primary occurrence.
    fn primary_timing(&self, ctx: &ModelContext, mask: &[RootDirection]) -> Option<PrimaryTiming> {
        let ie = mask.iter().position(|dir| dir.is_fired())?;
        let xdot = self.model.xdot(ctx, self.t, &self.x);
        let stau = self
            .sx
            .as_ref()
            .map(|sx| self.model.stau(ctx, ie, self.t, &self.x, sx, &xdot));
        Some(PrimaryTiming {
            trigger: EventTrigger {
                ie,
                x: self.x.clone(),
                xdot,
            },
            stau,
        })
    }

    /// Apply one occurrence; returns the mask of secondary events it triggers.
    ///
    /// `primary` is `None` for the primary occurrence, whose fired roots
    /// time themselves, and the primary's timing for a secondary one.
    fn apply_event(
        &mut self,
        ctx: &mut ModelContext,
        rdata: &mut ReturnData,
        mask: &[RootDirection],
        primary: Option<&PrimaryTiming>,
    ) -> Option<Vec<RootDirection>> {
        let model = self.model;
        let t = self.t;
        let nmaxevent = self.options.nmaxevent;
        let fired: Vec<usize> = (0..mask.len()).filter(|&ie| mask[ie].is_fired()).collect();
        log::debug!("Event at t = {t}: indices {fired:?}");

        let g_old = model.root(ctx, t, &self.x);

        let mut djzdx: Option<DMatrix<f64>> = None;
        for &ie in &fired {
            if mask[ie] != RootDirection::Rising {
                continue;
            }
            let slot = self.event_slots[ie];
            if slot >= nmaxevent || self.ledger.count(ie) >= nmaxevent {
                continue;
            }
            let out = write_event_output(
                model,
                ctx,
                self.options,
                self.edata,
                rdata,
                ie,
                slot,
                t,
                &self.x,
                self.sx.as_ref(),
                false,
            );
            if let Some(d) = out {
                djzdx = Some(match djzdx {
                    Some(acc) => acc + d,
                    None => d,
                });
            }
            self.event_slots[ie] += 1;
        }

        let x_old = self.x.clone();
        let xdot_old = model.xdot(ctx, t, &self.x);
        let stau: Vec<(usize, DVector<f64>)> = match self.sx.as_ref() {
            Some(sx) => fired
                .iter()
                .map(|&ie| match primary.and_then(|timing| timing.stau.as_ref()) {
                    Some(stau) => (ie, stau.clone()),
                    None => (ie, model.stau(ctx, ie, t, &x_old, sx, &xdot_old)),
                })
                .collect(),
            None => Vec::new(),
        };

        ctx.apply_roots(mask);
        for &ie in &fired {
            if mask[ie] == RootDirection::Rising {
                let delta = model.delta_x(ctx, ie, t, &self.x);
                self.x += delta;
            }
        }
        let xdot = model.xdot(ctx, t, &self.x);

        if let Some(sx) = self.sx.as_mut() {
            for (ie, stau) in &stau {
                let mut ev = EventInstant::primary(*ie, t, &x_old, &xdot, &xdot_old);
                if let Some(timing) = primary {
                    ev.timing = EventTiming {
                        ie: timing.trigger.ie,
                        x: &timing.trigger.x,
                        xdot: &timing.trigger.xdot,
                    };
                }
                let delta = model.delta_sx(ctx, &ev, sx, stau);
                *sx += delta;
            }
        }

        self.ledger.record(EventRecord {
            time: t,
            mask: mask.to_vec(),
            x: x_old,
            xdot,
            xdot_old,
            djzdx,
            trigger: primary.map(|timing| timing.trigger.clone()),
        });

        let g_new = model.root(ctx, t, &self.x);
        let secondary: Vec<RootDirection> = (0..mask.len())
            .map(|ie| {
                let (a, b) = (g_old[ie], g_new[ie]);
                if mask[ie].is_fired() || a * b >= 0.0 {
                    RootDirection::None
                } else if a < b {
                    RootDirection::Rising
                } else {
                    RootDirection::Falling
                }
            })
            .collect();
        secondary.iter().any(|d| d.is_fired()).then_some(secondary)
    }

    /// Write one event output slot per event index with free slots at the final time.
    fn fill_events(&mut self, ctx: &ModelContext, rdata: &mut ReturnData) {
        let dims = self.model.dimensions();
        if dims.nz == 0 {
            return;
        }
        let mut djdx: Option<DMatrix<f64>> = None;
        for ie in 0..dims.ne {
            let slot = self.event_slots[ie];
            if slot >= self.options.nmaxevent {
                continue;
            }
            let out = write_event_output(
                self.model,
                ctx,
                self.options,
                self.edata,
                rdata,
                ie,
                slot,
                self.t,
                &self.x,
                self.sx.as_ref(),
                true,
            );
            if let Some(d) = out {
                djdx = Some(match djdx {
                    Some(acc) => acc + d,
                    None => d,
                });
            }
            self.event_slots[ie] += 1;
        }
        if let (Some(d), Some(last)) = (djdx, self.djydx.last_mut()) {
            *last = Some(match last.take() {
                Some(acc) => acc + d,
                None => d,
            });
        }
    }
}
