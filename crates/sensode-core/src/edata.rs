//! Experimental data.
//!
//! Missing measurements are NaN. A NaN standard deviation means the model's
//! own sigma is used for that entry.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, check_len};
use crate::model::ModelDimensions;
use crate::rdata::ReturnData;

/// Measurements for one simulation condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpData {
    /// Observable measurements (`nt x ny_true`).
    pub observed_data: DMatrix<f64>,
    /// Standard deviations of the observable measurements (`nt x ny_true`).
    pub observed_data_std_dev: DMatrix<f64>,
    /// Event observable measurements (`nmaxevent x nz_true`).
    pub observed_events: DMatrix<f64>,
    /// Standard deviations of the event measurements (`nmaxevent x nz_true`).
    pub observed_events_std_dev: DMatrix<f64>,
}

impl ExpData {
    /// Empty data: every entry unmeasured.
    pub fn new(nt: usize, ny_true: usize, nz_true: usize, nmaxevent: usize) -> Self {
        Self {
            observed_data: DMatrix::from_element(nt, ny_true, f64::NAN),
            observed_data_std_dev: DMatrix::from_element(nt, ny_true, f64::NAN),
            observed_events: DMatrix::from_element(nmaxevent, nz_true, f64::NAN),
            observed_events_std_dev: DMatrix::from_element(nmaxevent, nz_true, f64::NAN),
        }
    }

    /// Synthetic data from a simulation result: the simulated outputs become
    /// the measurements, with constant standard deviations.
    pub fn from_return_data(rdata: &ReturnData, ny_true: usize, nz_true: usize, sigma_y: f64, sigma_z: f64) -> Result<Self> {
        check_positive("sigma_y", sigma_y)?;
        check_positive("sigma_z", sigma_z)?;
        let nt = rdata.ts.len();
        let nmaxevent = rdata.z.nrows();
        if ny_true > rdata.y.ncols() || nz_true > rdata.z.ncols() {
            return Err(Error::InvalidData(format!(
                "requested {ny_true} observables and {nz_true} event observables, simulation has {} and {}",
                rdata.y.ncols(),
                rdata.z.ncols()
            )));
        }
        let mut edata = Self::new(nt, ny_true, nz_true, nmaxevent);
        edata.observed_data = rdata.y.columns(0, ny_true).into_owned();
        edata.observed_data_std_dev.fill(sigma_y);
        edata.observed_events = rdata.z.columns(0, nz_true).into_owned();
        edata.observed_events_std_dev.fill(sigma_z);
        Ok(edata)
    }

    /// Number of timepoints.
    pub fn nt(&self) -> usize {
        self.observed_data.nrows()
    }

    pub fn ny_true(&self) -> usize {
        self.observed_data.ncols()
    }

    pub fn nz_true(&self) -> usize {
        self.observed_events.ncols()
    }

    pub fn nmaxevent(&self) -> usize {
        self.observed_events.nrows()
    }

    /// Set all observable measurements from a row-major slice (`nt x ny_true`).
    pub fn set_observed_data(&mut self, values: &[f64]) -> Result<()> {
        check_len("observed_data", self.observed_data.len(), values.len())?;
        self.observed_data = DMatrix::from_row_slice(self.nt(), self.ny_true(), values);
        Ok(())
    }

    /// Set the measurements of observable `iy` for all timepoints.
    pub fn set_observed_data_for(&mut self, iy: usize, values: &[f64]) -> Result<()> {
        check_len("observed_data column", self.nt(), values.len())?;
        check_index("observable", iy, self.ny_true())?;
        for (it, &v) in values.iter().enumerate() {
            self.observed_data[(it, iy)] = v;
        }
        Ok(())
    }

    /// Set all observable standard deviations from a row-major slice.
    pub fn set_observed_data_std_dev(&mut self, values: &[f64]) -> Result<()> {
        check_len("observed_data_std_dev", self.observed_data_std_dev.len(), values.len())?;
        for &v in values {
            check_positive("observed_data_std_dev", v)?;
        }
        self.observed_data_std_dev = DMatrix::from_row_slice(self.nt(), self.ny_true(), values);
        Ok(())
    }

    /// Use one standard deviation for every observable measurement.
    pub fn set_uniform_data_std_dev(&mut self, sigma: f64) -> Result<()> {
        check_positive("observed_data_std_dev", sigma)?;
        self.observed_data_std_dev.fill(sigma);
        Ok(())
    }

    /// Set all event measurements from a row-major slice (`nmaxevent x nz_true`).
    pub fn set_observed_events(&mut self, values: &[f64]) -> Result<()> {
        check_len("observed_events", self.observed_events.len(), values.len())?;
        self.observed_events = DMatrix::from_row_slice(self.nmaxevent(), self.nz_true(), values);
        Ok(())
    }

    /// Set all event standard deviations from a row-major slice.
    pub fn set_observed_events_std_dev(&mut self, values: &[f64]) -> Result<()> {
        check_len("observed_events_std_dev", self.observed_events_std_dev.len(), values.len())?;
        for &v in values {
            check_positive("observed_events_std_dev", v)?;
        }
        self.observed_events_std_dev = DMatrix::from_row_slice(self.nmaxevent(), self.nz_true(), values);
        Ok(())
    }

    pub fn is_set_observed_data(&self, it: usize, iy: usize) -> bool {
        !self.observed_data[(it, iy)].is_nan()
    }

    pub fn is_set_observed_data_std_dev(&self, it: usize, iy: usize) -> bool {
        !self.observed_data_std_dev[(it, iy)].is_nan()
    }

    pub fn is_set_observed_events(&self, ie: usize, iz: usize) -> bool {
        !self.observed_events[(ie, iz)].is_nan()
    }

    pub fn is_set_observed_events_std_dev(&self, ie: usize, iz: usize) -> bool {
        !self.observed_events_std_dev[(ie, iz)].is_nan()
    }

    /// Check the data shape against a model and a simulation setup.
    pub fn validate(&self, dims: &ModelDimensions, nt: usize, nmaxevent: usize) -> Result<()> {
        check_len("data timepoints", nt, self.nt())?;
        check_len("data observables", dims.ny_true, self.ny_true())?;
        check_len("data event observables", dims.nz_true, self.nz_true())?;
        if dims.nz_true > 0 {
            check_len("data nmaxevent", nmaxevent, self.nmaxevent())?;
        }
        let bad_sigma = self
            .observed_data_std_dev
            .iter()
            .chain(self.observed_events_std_dev.iter())
            .any(|&s| !s.is_nan() && s <= 0.0);
        if bad_sigma {
            return Err(Error::InvalidData("standard deviations must be positive".into()));
        }
        Ok(())
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_nan() || value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidData(format!("{name} must be positive, got {value}")))
    }
}

fn check_index(what: &str, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::InvalidData(format!("{what} index {index} out of range ({len})")))
    }
}
