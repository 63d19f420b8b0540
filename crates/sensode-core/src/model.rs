//! The model contract.
//!
//! A [`Model`] bundles the callbacks a generated model provides: right-hand
//! side, Jacobians, observables, event roots, boluses and their parameter
//! derivatives. Functions named `d*dp` return one column per model
//! parameter (`np` columns); the engine selects the `plist` columns it
//! needs through [`ModelContext::select`]. Functions that take state
//! sensitivities or adjoint states work on the `plist` selection directly.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::noise;

/// Sizes of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelDimensions {
    /// Number of solver states (including second-order augmentation).
    pub nx: usize,
    /// Number of states of the original (non-augmented) system.
    pub nx_true: usize,
    /// Number of observables.
    pub ny: usize,
    /// Number of observables of the original system.
    pub ny_true: usize,
    /// Number of event observables.
    pub nz: usize,
    /// Number of event observables of the original system.
    pub nz_true: usize,
    /// Number of event (root) functions.
    pub ne: usize,
    /// Number of model parameters.
    pub np: usize,
    /// Number of fixed parameters.
    pub nk: usize,
    /// 1 + number of second-order directions.
    pub nj: usize,
}

impl ModelDimensions {
    /// Dimensions of a plain first-order model without events.
    pub fn new(nx: usize, ny: usize, np: usize) -> Self {
        Self {
            nx,
            nx_true: nx,
            ny,
            ny_true: ny,
            nz: 0,
            nz_true: 0,
            ne: 0,
            np,
            nk: 0,
            nj: 1,
        }
    }

    /// Set the number of event functions and event observables.
    pub fn with_events(mut self, ne: usize, nz: usize) -> Self {
        self.ne = ne;
        self.nz = nz;
        self.nz_true = nz / self.nj.max(1);
        self
    }

    /// Set the number of fixed parameters.
    pub fn with_fixed_parameters(mut self, nk: usize) -> Self {
        self.nk = nk;
        self
    }

    /// Declare a second-order augmented system with `nj - 1` extra directions.
    ///
    /// `nx`, `ny` and `nz` stay the augmented sizes; the `*_true` sizes are
    /// derived by dividing by `nj`.
    pub fn with_second_order(mut self, nj: usize) -> Self {
        let nj = nj.max(1);
        self.nj = nj;
        self.nx_true = self.nx / nj;
        self.ny_true = self.ny / nj;
        self.nz_true = self.nz / nj;
        self
    }
}

/// Which way a root function crossed zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootDirection {
    #[default]
    None,
    /// Crossed from negative to positive.
    Rising,
    /// Crossed from positive to negative.
    Falling,
}

impl RootDirection {
    /// Heaviside increment associated with the direction.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Rising => 1.0,
            Self::Falling => -1.0,
        }
    }

    /// True for [`RootDirection::Rising`] and [`RootDirection::Falling`].
    pub fn is_fired(self) -> bool {
        self != Self::None
    }
}

/// Per-simulation context passed by reference to every model call.
///
/// Holds the unscaled parameters, fixed parameters, the sensitivity
/// parameter selection and the heaviside indicators of the event functions.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelContext {
    /// Model parameters in model space.
    pub p: DVector<f64>,
    /// Fixed parameters.
    pub k: DVector<f64>,
    /// Indices of the parameters sensitivities are computed for.
    pub plist: Vec<usize>,
    /// Heaviside indicator per event function.
    pub h: DVector<f64>,
}

impl ModelContext {
    pub fn new(p: Vec<f64>, k: Vec<f64>, plist: Vec<usize>, ne: usize) -> Self {
        Self {
            p: DVector::from_vec(p),
            k: DVector::from_vec(k),
            plist,
            h: DVector::zeros(ne),
        }
    }

    /// Number of model parameters.
    pub fn np(&self) -> usize {
        self.p.len()
    }

    /// Number of sensitivity parameters.
    pub fn nplist(&self) -> usize {
        self.plist.len()
    }

    /// Select the `plist` columns of a full parameter derivative.
    pub fn select(&self, full: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(full.nrows(), self.plist.len(), |i, j| full[(i, self.plist[j])])
    }

    /// Select the `plist` entries of a full parameter gradient.
    pub fn select_row(&self, full: &DMatrix<f64>, row: usize) -> DVector<f64> {
        DVector::from_fn(self.plist.len(), |j, _| full[(row, self.plist[j])])
    }

    /// Forward heaviside update: `h += mask`.
    pub fn apply_roots(&mut self, mask: &[RootDirection]) {
        for (h, dir) in self.h.iter_mut().zip(mask) {
            *h += dir.as_f64();
        }
    }

    /// Backward heaviside update: `h -= mask`.
    pub fn revert_roots(&mut self, mask: &[RootDirection]) {
        for (h, dir) in self.h.iter_mut().zip(mask) {
            *h -= dir.as_f64();
        }
    }
}

/// Forward quantities at an event occurrence, as seen by the bolus functions.
#[derive(Debug, Clone, Copy)]
pub struct EventInstant<'a> {
    /// Event function index.
    pub ie: usize,
    /// Event time.
    pub t: f64,
    /// State before any bolus of this occurrence.
    pub x: &'a DVector<f64>,
    /// Right-hand side after the event.
    pub xdot: &'a DVector<f64>,
    /// Right-hand side before the event.
    pub xdot_old: &'a DVector<f64>,
    /// Root that fixed the event time.
    pub timing: EventTiming<'a>,
}

/// The root crossing that fixed the time of an occurrence.
///
/// For a primary event this is the event itself; secondary events triggered
/// by its boluses happen at the same time and share it.
#[derive(Debug, Clone, Copy)]
pub struct EventTiming<'a> {
    /// Root function index.
    pub ie: usize,
    /// State just before the primary event.
    pub x: &'a DVector<f64>,
    /// Right-hand side just before the primary event.
    pub xdot: &'a DVector<f64>,
}

impl<'a> EventInstant<'a> {
    /// Instant of a primary event, timed by its own root.
    pub fn primary(
        ie: usize,
        t: f64,
        x: &'a DVector<f64>,
        xdot: &'a DVector<f64>,
        xdot_old: &'a DVector<f64>,
    ) -> Self {
        Self {
            ie,
            t,
            x,
            xdot,
            xdot_old,
            timing: EventTiming { ie, x, xdot: xdot_old },
        }
    }
}

/// Callbacks of a simulated model.
///
/// Only the right-hand side, its Jacobian, its parameter derivative, the
/// initial state and the observables are required. The event and adjoint
/// defaults are exact for boluses that do not depend on state or
/// parameters; models with other boluses override them. Adjoint defaults
/// assume `nj == 1`.
pub trait Model: Send + Sync {
    fn dimensions(&self) -> ModelDimensions;

    fn name(&self) -> &str {
        "model"
    }

    /// Event function index of each event observable.
    fn z2event(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Initial state.
    fn x0(&self, ctx: &ModelContext) -> DVector<f64>;

    /// Parameter derivative of the initial state (`nx x np`).
    fn dx0dp(&self, ctx: &ModelContext, x0: &DVector<f64>) -> DMatrix<f64> {
        let _ = x0;
        DMatrix::zeros(self.dimensions().nx, ctx.np())
    }

    /// Right-hand side `f(t, x)`.
    fn xdot(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64>;

    /// Dense Jacobian `df/dx`.
    fn jacobian(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64>;

    /// Sparse Jacobian as `(row, col, value)` triplets.
    fn jacobian_sparse(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> Vec<(usize, usize, f64)> {
        let j = self.jacobian(ctx, t, x);
        let mut triplets = Vec::new();
        for col in 0..j.ncols() {
            for row in 0..j.nrows() {
                let v = j[(row, col)];
                if v != 0.0 {
                    triplets.push((row, col, v));
                }
            }
        }
        triplets
    }

    /// Parameter derivative of the right-hand side (`nx x np`).
    fn dxdotdp(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64>;

    /// Right-hand side of the forward sensitivity system (`nx x nplist`).
    fn sxdot(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>, sx: &DMatrix<f64>) -> DMatrix<f64> {
        self.jacobian(ctx, t, x) * sx + ctx.select(&self.dxdotdp(ctx, t, x))
    }

    /// Observables.
    fn y(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64>;

    /// State derivative of the observables (`ny x nx`).
    fn dydx(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64>;

    /// Parameter derivative of the observables (`ny x np`).
    fn dydp(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let _ = (t, x);
        DMatrix::zeros(self.dimensions().ny, ctx.np())
    }

    /// Observable standard deviations.
    fn sigma_y(&self, ctx: &ModelContext, t: f64) -> DVector<f64> {
        let _ = (ctx, t);
        DVector::from_element(self.dimensions().ny, 1.0)
    }

    /// Parameter derivative of the observable standard deviations (`ny x np`).
    fn dsigma_ydp(&self, ctx: &ModelContext, t: f64) -> DMatrix<f64> {
        let _ = t;
        DMatrix::zeros(self.dimensions().ny, ctx.np())
    }

    /// Event root functions.
    fn root(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let _ = (ctx, t, x);
        DVector::zeros(self.dimensions().ne)
    }

    /// State derivative of the root functions (`ne x nx`).
    fn droot_dx(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let _ = (ctx, t, x);
        let dims = self.dimensions();
        DMatrix::zeros(dims.ne, dims.nx)
    }

    /// Parameter derivative of the root functions (`ne x np`).
    fn droot_dp(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let _ = (t, x);
        DMatrix::zeros(self.dimensions().ne, ctx.np())
    }

    /// Explicit time derivative of the root functions.
    fn droot_dt(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let _ = (ctx, t, x);
        DVector::zeros(self.dimensions().ne)
    }

    /// Event observables for event `ie` (entries of other events are ignored).
    fn z(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let _ = (ctx, ie, t, x);
        DVector::zeros(self.dimensions().nz)
    }

    /// State derivative of the event observables (`nz x nx`).
    fn dzdx(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let _ = (ctx, ie, t, x);
        let dims = self.dimensions();
        DMatrix::zeros(dims.nz, dims.nx)
    }

    /// Parameter derivative of the event observables (`nz x np`).
    fn dzdp(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let _ = (ie, t, x);
        DMatrix::zeros(self.dimensions().nz, ctx.np())
    }

    /// Regularization output: the root value of event `ie` for its observables.
    fn rz(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let g = self.root(ctx, t, x);
        let z2event = self.z2event();
        DVector::from_fn(self.dimensions().nz, |iz, _| {
            if z2event.get(iz) == Some(&ie) { g[ie] } else { 0.0 }
        })
    }

    /// State derivative of [`Model::rz`] (`nz x nx`).
    fn drzdx(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let dg = self.droot_dx(ctx, t, x);
        let z2event = self.z2event();
        let dims = self.dimensions();
        DMatrix::from_fn(dims.nz, dims.nx, |iz, ix| {
            if z2event.get(iz) == Some(&ie) { dg[(ie, ix)] } else { 0.0 }
        })
    }

    /// Parameter derivative of [`Model::rz`] (`nz x np`).
    fn drzdp(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let dg = self.droot_dp(ctx, t, x);
        let z2event = self.z2event();
        DMatrix::from_fn(self.dimensions().nz, ctx.np(), |iz, ip| {
            if z2event.get(iz) == Some(&ie) { dg[(ie, ip)] } else { 0.0 }
        })
    }

    /// Event observable standard deviations.
    fn sigma_z(&self, ctx: &ModelContext, t: f64) -> DVector<f64> {
        let _ = (ctx, t);
        DVector::from_element(self.dimensions().nz, 1.0)
    }

    /// Parameter derivative of the event observable standard deviations (`nz x np`).
    fn dsigma_zdp(&self, ctx: &ModelContext, t: f64) -> DMatrix<f64> {
        let _ = t;
        DMatrix::zeros(self.dimensions().nz, ctx.np())
    }

    /// State bolus applied when event `ie` fires rising.
    fn delta_x(&self, ctx: &ModelContext, ie: usize, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let _ = (ctx, ie, t, x);
        DVector::zeros(self.dimensions().nx)
    }

    /// Event-time sensitivity `d tau / dp` (length `nplist`).
    ///
    /// `x`, `sx` and `xdot` are taken just before the event.
    fn stau(
        &self,
        ctx: &ModelContext,
        ie: usize,
        t: f64,
        x: &DVector<f64>,
        sx: &DMatrix<f64>,
        xdot: &DVector<f64>,
    ) -> DVector<f64> {
        let gx = self.droot_dx(ctx, t, x).row(ie).transpose();
        let gp = ctx.select_row(&self.droot_dp(ctx, t, x), ie);
        let denom = gx.dot(xdot) + self.droot_dt(ctx, t, x)[ie];
        if denom == 0.0 {
            return DVector::zeros(ctx.nplist());
        }
        -(sx.transpose() * gx + gp) / denom
    }

    /// Sensitivity bolus (`nx x nplist`) for event `ev.ie`.
    fn delta_sx(
        &self,
        ctx: &ModelContext,
        ev: &EventInstant<'_>,
        sx: &DMatrix<f64>,
        stau: &DVector<f64>,
    ) -> DMatrix<f64> {
        let _ = (ctx, sx);
        (ev.xdot_old - ev.xdot) * stau.transpose()
    }

    /// Adjoint state bolus for event `ev.ie`.
    ///
    /// The event-time shift is taken from the root in `ev.timing`.
    fn delta_xb(&self, ctx: &ModelContext, ev: &EventInstant<'_>, xb: &DVector<f64>) -> DVector<f64> {
        let timing = &ev.timing;
        let gx = self.droot_dx(ctx, ev.t, timing.x).row(timing.ie).transpose();
        let denom = gx.dot(timing.xdot) + self.droot_dt(ctx, ev.t, timing.x)[timing.ie];
        if denom == 0.0 {
            return DVector::zeros(xb.len());
        }
        let jump = (ev.xdot_old - ev.xdot).dot(xb);
        gx * (-jump / denom)
    }

    /// Adjoint quadrature bolus (length `nplist * nj`) for event `ev.ie`.
    fn delta_qb(&self, ctx: &ModelContext, ev: &EventInstant<'_>, xb: &DVector<f64>) -> DVector<f64> {
        let timing = &ev.timing;
        let gx = self.droot_dx(ctx, ev.t, timing.x).row(timing.ie).transpose();
        let gp = ctx.select_row(&self.droot_dp(ctx, ev.t, timing.x), timing.ie);
        let denom = gx.dot(timing.xdot) + self.droot_dt(ctx, ev.t, timing.x)[timing.ie];
        if denom == 0.0 {
            return DVector::zeros(ctx.nplist() * self.dimensions().nj);
        }
        let jump = (ev.xdot_old - ev.xdot).dot(xb);
        gp * (-jump / denom)
    }

    /// Right-hand side of the adjoint system: `-J^T xB`.
    fn xbdot(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>, xb: &DVector<f64>) -> DVector<f64> {
        -(self.jacobian(ctx, t, x).transpose() * xb)
    }

    /// Integrand of the adjoint quadratures: `dxdotdp^T xB` (length `nplist * nj`).
    fn qbdot(&self, ctx: &ModelContext, t: f64, x: &DVector<f64>, xb: &DVector<f64>) -> DVector<f64> {
        ctx.select(&self.dxdotdp(ctx, t, x)).transpose() * xb
    }

    /// Negative log-likelihood of observable `iy`.
    fn jy(&self, iy: usize, y: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> f64 {
        noise::gaussian_nllh(y[iy], sigma[iy], m)
    }

    /// Derivative of [`Model::jy`] with respect to the observables (`nj x ny`).
    fn djydy(&self, iy: usize, y: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.ny);
        d[(0, iy)] = noise::gaussian_nllh_dy(y[iy], sigma[iy], m);
        d
    }

    /// Derivative of [`Model::jy`] with respect to the standard deviations (`nj x ny`).
    fn djydsigma(&self, iy: usize, y: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.ny);
        d[(0, iy)] = noise::gaussian_nllh_dsigma(y[iy], sigma[iy], m);
        d
    }

    /// Negative log-likelihood of event observable `iz`.
    fn jz(&self, iz: usize, z: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> f64 {
        noise::gaussian_nllh(z[iz], sigma[iz], m)
    }

    /// Derivative of [`Model::jz`] with respect to the event observables (`nj x nz`).
    fn djzdz(&self, iz: usize, z: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.nz);
        d[(0, iz)] = noise::gaussian_nllh_dy(z[iz], sigma[iz], m);
        d
    }

    /// Derivative of [`Model::jz`] with respect to the standard deviations (`nj x nz`).
    fn djzdsigma(&self, iz: usize, z: &DVector<f64>, sigma: &DVector<f64>, m: f64) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.nz);
        d[(0, iz)] = noise::gaussian_nllh_dsigma(z[iz], sigma[iz], m);
        d
    }

    /// Regularization likelihood of the root output `iz`, measured against zero.
    fn jrz(&self, iz: usize, rz: &DVector<f64>, sigma: &DVector<f64>) -> f64 {
        noise::gaussian_nllh(rz[iz], sigma[iz], 0.0)
    }

    /// Derivative of [`Model::jrz`] with respect to the root outputs (`nj x nz`).
    fn djrzdrz(&self, iz: usize, rz: &DVector<f64>, sigma: &DVector<f64>) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.nz);
        d[(0, iz)] = noise::gaussian_nllh_dy(rz[iz], sigma[iz], 0.0);
        d
    }

    /// Derivative of [`Model::jrz`] with respect to the standard deviations (`nj x nz`).
    fn djrzdsigma(&self, iz: usize, rz: &DVector<f64>, sigma: &DVector<f64>) -> DMatrix<f64> {
        let dims = self.dimensions();
        let mut d = DMatrix::zeros(dims.nj, dims.nz);
        d[(0, iz)] = noise::gaussian_nllh_dsigma(rz[iz], sigma[iz], 0.0);
        d
    }
}
