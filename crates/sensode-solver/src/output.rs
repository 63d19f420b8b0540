//! Observable and event outputs with their likelihood contributions.
//!
//! Every function here writes into [`ReturnData`] and accumulates the
//! negative log-likelihood. Forward sensitivities are turned into output
//! sensitivities and gradient contributions on the spot; for the adjoint
//! method only the explicit parameter part is accumulated and the state
//! derivative of the likelihood is returned for the backward pass.

use nalgebra::{DMatrix, DVector};
use sensode_core::noise;
use sensode_core::{ExpData, Model, ModelContext, ReturnData, SolverOptions};

/// Subtract a `1 x nplist` contribution of likelihood row `ij` from the gradient.
fn subtract_gradient(rdata: &mut ReturnData, ij: usize, contribution: &DMatrix<f64>) {
    for (ip, c) in contribution.iter().enumerate() {
        if ij == 0 {
            if let Some(s) = rdata.sllh.get_mut(ip) {
                *s -= c;
            }
        } else if ip < rdata.s2llh.nrows() && ij - 1 < rdata.s2llh.ncols() {
            rdata.s2llh[(ip, ij - 1)] -= c;
        }
    }
}

/// Add a `nj x nx` state derivative of the likelihood to an adjoint state.
///
/// Row `ij` lands in the block `ij * nx_true ..` of `xb`.
pub fn add_state_derivative(xb: &mut DVector<f64>, djdx: &DMatrix<f64>, nx_true: usize) {
    for ij in 0..djdx.nrows() {
        for ix in 0..nx_true.min(djdx.ncols()) {
            if let Some(v) = xb.get_mut(ix + ij * nx_true) {
                *v += djdx[(ij, ix)];
            }
        }
    }
}

/// Write observables, sigmas and residuals at timepoint `it`.
///
/// Returns the state derivative of the timepoint's negative
/// log-likelihood (`nj x nx`) when adjoint sensitivities are requested
/// and data is present.
#[allow(clippy::too_many_arguments)]
pub fn write_data_point(
    model: &dyn Model,
    ctx: &ModelContext,
    options: &SolverOptions,
    edata: Option<&ExpData>,
    rdata: &mut ReturnData,
    it: usize,
    t: f64,
    x: &DVector<f64>,
    sx: Option<&DMatrix<f64>>,
) -> Option<DMatrix<f64>> {
    let dims = model.dimensions();
    rdata.x.set_row(it, &x.transpose());

    let y = model.y(ctx, t, x);
    let mut sigma = model.sigma_y(ctx, t);
    let mut sigma_from_data = vec![false; dims.ny];
    if let Some(edata) = edata {
        for iy in 0..dims.ny_true {
            if edata.is_set_observed_data_std_dev(it, iy) {
                sigma[iy] = edata.observed_data_std_dev[(it, iy)];
                sigma_from_data[iy] = true;
            }
        }
    }
    rdata.y.set_row(it, &y.transpose());
    rdata.sigmay.set_row(it, &sigma.transpose());

    let measured: Vec<usize> = match edata {
        Some(edata) => {
            for iy in 0..dims.ny_true {
                rdata.res[(it, iy)] = if edata.is_set_observed_data(it, iy) {
                    noise::residual(y[iy], sigma[iy], edata.observed_data[(it, iy)])
                } else {
                    0.0
                };
                rdata.chi2 += rdata.res[(it, iy)].powi(2);
            }
            (0..dims.ny_true).filter(|&iy| edata.is_set_observed_data(it, iy)).collect()
        }
        None => Vec::new(),
    };
    if let Some(edata) = edata {
        for &iy in &measured {
            rdata.llh -= model.jy(iy, &y, &sigma, edata.observed_data[(it, iy)]);
        }
    }

    let fsa = options.forward_sensitivities();
    let asa = options.adjoint_sensitivities();
    if !fsa && !asa {
        return None;
    }

    let dydp = ctx.select(&model.dydp(ctx, t, x));
    let mut dsigmadp = ctx.select(&model.dsigma_ydp(ctx, t));
    for (iy, from_data) in sigma_from_data.iter().enumerate() {
        if *from_data {
            dsigmadp.row_mut(iy).fill(0.0);
        }
    }

    if fsa {
        let sx = sx?;
        let sy = model.dydx(ctx, t, x) * sx + &dydp;
        if let Some(block) = rdata.sx.get_mut(it) {
            block.copy_from(sx);
        }
        if let Some(edata) = edata {
            for &iy in &measured {
                let m = edata.observed_data[(it, iy)];
                let djydy = model.djydy(iy, &y, &sigma, m);
                let djydsigma = model.djydsigma(iy, &y, &sigma, m);
                for ij in 0..dims.nj {
                    let c = djydy.rows(ij, 1) * &sy + djydsigma.rows(ij, 1) * &dsigmadp;
                    subtract_gradient(rdata, ij, &c);
                }
            }
        }
        if let Some(block) = rdata.sy.get_mut(it) {
            *block = sy;
        }
        if let Some(block) = rdata.ssigmay.get_mut(it) {
            *block = dsigmadp;
        }
        return None;
    }

    let edata = edata?;
    let dydx = model.dydx(ctx, t, x);
    let mut djydx = DMatrix::zeros(dims.nj, dims.nx);
    for &iy in &measured {
        let m = edata.observed_data[(it, iy)];
        let djydy = model.djydy(iy, &y, &sigma, m);
        let djydsigma = model.djydsigma(iy, &y, &sigma, m);
        for ij in 0..dims.nj {
            let c = djydy.rows(ij, 1) * &dydp + djydsigma.rows(ij, 1) * &dsigmadp;
            subtract_gradient(rdata, ij, &c);
        }
        djydx += djydy * &dydx;
    }
    Some(djydx)
}

/// Write the event observables of event `ie` into slot `slot`.
///
/// With `fill` set the call comes from the final fill pass and also adds
/// the regularization likelihood of the root value. Returns the state
/// derivative of the slot's negative log-likelihood (`nj x nx`) when
/// adjoint sensitivities are requested and data is present.
#[allow(clippy::too_many_arguments)]
pub fn write_event_output(
    model: &dyn Model,
    ctx: &ModelContext,
    options: &SolverOptions,
    edata: Option<&ExpData>,
    rdata: &mut ReturnData,
    ie: usize,
    slot: usize,
    t: f64,
    x: &DVector<f64>,
    sx: Option<&DMatrix<f64>>,
    fill: bool,
) -> Option<DMatrix<f64>> {
    let dims = model.dimensions();
    if slot >= rdata.z.nrows() {
        return None;
    }
    let z2event = model.z2event();
    let own: Vec<usize> = (0..dims.nz).filter(|&iz| z2event.get(iz) == Some(&ie)).collect();
    if own.is_empty() {
        return None;
    }

    let z = model.z(ctx, ie, t, x);
    let rz = model.rz(ctx, ie, t, x);
    let mut sigma = model.sigma_z(ctx, t);
    let mut sigma_from_data = vec![false; dims.nz];
    if let Some(edata) = edata {
        for &iz in own.iter().filter(|&&iz| iz < dims.nz_true) {
            if edata.is_set_observed_events_std_dev(slot, iz) {
                sigma[iz] = edata.observed_events_std_dev[(slot, iz)];
                sigma_from_data[iz] = true;
            }
        }
    }
    for &iz in &own {
        rdata.z[(slot, iz)] = z[iz];
        rdata.rz[(slot, iz)] = rz[iz];
        rdata.sigmaz[(slot, iz)] = sigma[iz];
    }

    let measured: Vec<usize> = match edata {
        Some(edata) => own
            .iter()
            .copied()
            .filter(|&iz| iz < dims.nz_true && edata.is_set_observed_events(slot, iz))
            .collect(),
        None => Vec::new(),
    };
    if let Some(edata) = edata {
        for &iz in &measured {
            rdata.llh -= model.jz(iz, &z, &sigma, edata.observed_events[(slot, iz)]);
            if fill {
                rdata.llh -= model.jrz(iz, &rz, &sigma);
            }
        }
    }

    let fsa = options.forward_sensitivities();
    let asa = options.adjoint_sensitivities();
    if !fsa && !asa {
        return None;
    }

    let dzdp = ctx.select(&model.dzdp(ctx, ie, t, x));
    let drzdp = ctx.select(&model.drzdp(ctx, ie, t, x));
    let mut dsigmadp = ctx.select(&model.dsigma_zdp(ctx, t));
    for (iz, from_data) in sigma_from_data.iter().enumerate() {
        if *from_data {
            dsigmadp.row_mut(iz).fill(0.0);
        }
    }

    if fsa {
        let sx = sx?;
        let sz = model.dzdx(ctx, ie, t, x) * sx + &dzdp;
        let srz = model.drzdx(ctx, ie, t, x) * sx + &drzdp;
        if let Some(edata) = edata {
            for &iz in &measured {
                let m = edata.observed_events[(slot, iz)];
                let djzdz = model.djzdz(iz, &z, &sigma, m);
                let djzdsigma = model.djzdsigma(iz, &z, &sigma, m);
                for ij in 0..dims.nj {
                    let mut c = djzdz.rows(ij, 1) * &sz + djzdsigma.rows(ij, 1) * &dsigmadp;
                    if fill {
                        c += model.djrzdrz(iz, &rz, &sigma).rows(ij, 1) * &srz
                            + model.djrzdsigma(iz, &rz, &sigma).rows(ij, 1) * &dsigmadp;
                    }
                    subtract_gradient(rdata, ij, &c);
                }
            }
        }
        for &iz in &own {
            if let Some(block) = rdata.sz.get_mut(slot) {
                block.set_row(iz, &sz.row(iz));
            }
            if let Some(block) = rdata.srz.get_mut(slot) {
                block.set_row(iz, &srz.row(iz));
            }
            if let Some(block) = rdata.ssigmaz.get_mut(slot) {
                block.set_row(iz, &dsigmadp.row(iz));
            }
        }
        return None;
    }

    let edata = edata?;
    let dzdx = model.dzdx(ctx, ie, t, x);
    let drzdx = model.drzdx(ctx, ie, t, x);
    let mut djzdx = DMatrix::zeros(dims.nj, dims.nx);
    for &iz in &measured {
        let m = edata.observed_events[(slot, iz)];
        let djzdz = model.djzdz(iz, &z, &sigma, m);
        let djzdsigma = model.djzdsigma(iz, &z, &sigma, m);
        for ij in 0..dims.nj {
            let c = djzdz.rows(ij, 1) * &dzdp + djzdsigma.rows(ij, 1) * &dsigmadp;
            subtract_gradient(rdata, ij, &c);
        }
        djzdx += djzdz * &dzdx;
        if fill {
            let djrzdrz = model.djrzdrz(iz, &rz, &sigma);
            let djrzdsigma = model.djrzdsigma(iz, &rz, &sigma);
            for ij in 0..dims.nj {
                let c = djrzdrz.rows(ij, 1) * &drzdp + djrzdsigma.rows(ij, 1) * &dsigmadp;
                subtract_gradient(rdata, ij, &c);
            }
            djzdx += djrzdrz * &drzdx;
        }
    }
    Some(djzdx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensode_core::{ModelDimensions, SensitivityMethod};

    /// y = p0 * x, one event observable z = x for event 0.
    struct Scaled;

    impl Model for Scaled {
        fn dimensions(&self) -> ModelDimensions {
            ModelDimensions::new(1, 1, 1).with_events(1, 1)
        }
        fn z2event(&self) -> Vec<usize> {
            vec![0]
        }
        fn x0(&self, _ctx: &ModelContext) -> DVector<f64> {
            DVector::from_element(1, 1.0)
        }
        fn xdot(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            -x
        }
        fn jacobian(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, -1.0)
        }
        fn dxdotdp(&self, _ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::zeros(1, 1)
        }
        fn y(&self, ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            x * ctx.p[0]
        }
        fn dydx(&self, ctx: &ModelContext, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, ctx.p[0])
        }
        fn dydp(&self, _ctx: &ModelContext, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, x[0])
        }
        fn z(&self, _ctx: &ModelContext, _ie: usize, _t: f64, x: &DVector<f64>) -> DVector<f64> {
            x.clone()
        }
        fn dzdx(&self, _ctx: &ModelContext, _ie: usize, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(1, 1)
        }
    }

    fn setup(method: SensitivityMethod, with_data: bool) -> (ModelContext, SolverOptions, Option<ExpData>, ReturnData) {
        let ctx = ModelContext::new(vec![2.0], vec![], vec![0], 1);
        let options = SolverOptions::first_order(method);
        let edata = with_data.then(|| {
            let mut edata = ExpData::new(1, 1, 1, options.nmaxevent);
            edata.set_observed_data(&[1.0]).unwrap();
            edata.set_uniform_data_std_dev(0.5).unwrap();
            edata.observed_events[(0, 0)] = 0.5;
            edata.observed_events_std_dev[(0, 0)] = 1.0;
            edata
        });
        let rdata = ReturnData::new(&Scaled.dimensions(), &[1.0], 1, &options, with_data);
        (ctx, options, edata, rdata)
    }

    #[test]
    fn test_data_point_forward() {
        let (ctx, options, edata, mut rdata) = setup(SensitivityMethod::Forward, true);
        let x = DVector::from_element(1, 3.0);
        let sx = DMatrix::from_element(1, 1, 0.5);
        let out = write_data_point(&Scaled, &ctx, &options, edata.as_ref(), &mut rdata, 0, 1.0, &x, Some(&sx));
        assert!(out.is_none());
        assert_eq!(rdata.y[(0, 0)], 6.0);
        assert_eq!(rdata.sigmay[(0, 0)], 0.5);
        // res = (6 - 1) / 0.5
        assert!((rdata.res[(0, 0)] - 10.0).abs() < 1e-12);
        assert!((rdata.chi2 - 100.0).abs() < 1e-12);
        let expected_llh = -noise::gaussian_nllh(6.0, 0.5, 1.0);
        assert!((rdata.llh - expected_llh).abs() < 1e-12);
        // sy = p * sx + x = 2 * 0.5 + 3
        assert!((rdata.sy[0][(0, 0)] - 4.0).abs() < 1e-12);
        // dJ/dy = (y - m) / sigma^2 = 20
        assert!((rdata.sllh[0] + 20.0 * 4.0).abs() < 1e-10);
        assert_eq!(rdata.ssigmay[0][(0, 0)], 0.0);
    }

    #[test]
    fn test_data_point_adjoint_splits_explicit_part() {
        let (ctx, options, edata, mut rdata) = setup(SensitivityMethod::Adjoint, true);
        let x = DVector::from_element(1, 3.0);
        let djydx = write_data_point(&Scaled, &ctx, &options, edata.as_ref(), &mut rdata, 0, 1.0, &x, None)
            .expect("adjoint returns the state derivative");
        // explicit: dJ/dy * dy/dp = 20 * 3
        assert!((rdata.sllh[0] + 60.0).abs() < 1e-10);
        // state part: dJ/dy * dy/dx = 20 * 2
        assert!((djydx[(0, 0)] - 40.0).abs() < 1e-10);
        assert!(rdata.sx.is_empty());
    }

    #[test]
    fn test_data_point_without_data() {
        let (ctx, options, _, mut rdata) = setup(SensitivityMethod::Adjoint, false);
        let x = DVector::from_element(1, 3.0);
        let out = write_data_point(&Scaled, &ctx, &options, None, &mut rdata, 0, 1.0, &x, None);
        assert!(out.is_none());
        assert_eq!(rdata.x[(0, 0)], 3.0);
        assert!(rdata.llh.is_nan());
        assert!(rdata.res[(0, 0)].is_nan());
    }

    #[test]
    fn test_event_output_and_fill_regularization() {
        let (ctx, options, edata, mut rdata) = setup(SensitivityMethod::Adjoint, true);
        let x = DVector::from_element(1, 2.0);
        let djzdx = write_event_output(
            &Scaled, &ctx, &options, edata.as_ref(), &mut rdata, 0, 0, 0.5, &x, None, false,
        )
        .unwrap();
        assert_eq!(rdata.z[(0, 0)], 2.0);
        assert_eq!(rdata.rz[(0, 0)], 0.0);
        // dJz/dz = (z - m) / sigma^2 = 1.5
        assert!((djzdx[(0, 0)] - 1.5).abs() < 1e-12);
        let llh_event = rdata.llh;

        let mut filled = rdata.clone();
        filled.llh = 0.0;
        write_event_output(&Scaled, &ctx, &options, edata.as_ref(), &mut filled, 0, 0, 1.0, &x, None, true);
        let jrz = noise::gaussian_nllh(0.0, 1.0, 0.0);
        assert!((filled.llh - (llh_event - jrz)).abs() < 1e-12);
    }

    #[test]
    fn test_event_slot_out_of_range_is_ignored() {
        let (ctx, options, edata, mut rdata) = setup(SensitivityMethod::Forward, true);
        let x = DVector::from_element(1, 2.0);
        let slot = options.nmaxevent;
        let out = write_event_output(
            &Scaled, &ctx, &options, edata.as_ref(), &mut rdata, 0, slot, 0.5, &x, None, false,
        );
        assert!(out.is_none());
        assert_eq!(rdata.llh, 0.0);
    }

    #[test]
    fn test_add_state_derivative_blocks() {
        let mut xb = DVector::zeros(4);
        let djdx = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 9.0, 9.0, 3.0, 4.0, 9.0, 9.0]);
        add_state_derivative(&mut xb, &djdx, 2);
        assert_eq!(xb.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
