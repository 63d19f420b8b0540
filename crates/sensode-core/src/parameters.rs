//! Per-simulation parameter settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result, check_len};
use crate::model::{ModelContext, ModelDimensions};
use crate::scaling::{self, ParameterScaling};

/// Everything that distinguishes one simulation of a model from another.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Parameter values in optimizer space.
    pub parameters: Vec<f64>,
    /// Scaling of each parameter; empty means identity for all.
    pub scaling: Vec<ParameterScaling>,
    /// Fixed (non-estimated) parameters.
    pub fixed_parameters: Vec<f64>,
    /// Parameters to compute sensitivities for; empty means all.
    pub plist: Vec<usize>,
    /// Start time.
    pub t0: f64,
    /// Output times, non-decreasing, all `>= t0`.
    pub timepoints: Vec<f64>,
    /// Overrides the model's initial state.
    pub initial_states: Option<Vec<f64>>,
}

impl SimulationParameters {
    /// Parameters given directly in model space.
    pub fn new(parameters: Vec<f64>, timepoints: Vec<f64>) -> Self {
        Self {
            parameters,
            timepoints,
            ..Default::default()
        }
    }

    /// Set one scaling for every parameter, converting the stored values.
    pub fn with_uniform_scaling(mut self, scaling: ParameterScaling) -> Self {
        let model_values = self.unscaled();
        self.scaling = vec![scaling; model_values.len()];
        self.parameters = scaling::scale(&model_values, &self.scaling);
        self
    }

    pub fn with_fixed_parameters(mut self, k: Vec<f64>) -> Self {
        self.fixed_parameters = k;
        self
    }

    pub fn with_plist(mut self, plist: Vec<usize>) -> Self {
        self.plist = plist;
        self
    }

    /// Parameter values in model space.
    pub fn unscaled(&self) -> Vec<f64> {
        scaling::unscale(&self.parameters, &self.scaling)
    }

    /// Scaling of parameter `ip`.
    pub fn scaling_of(&self, ip: usize) -> ParameterScaling {
        self.scaling.get(ip).copied().unwrap_or_default()
    }

    /// The effective sensitivity parameter list.
    pub fn effective_plist(&self) -> Vec<usize> {
        if self.plist.is_empty() {
            (0..self.parameters.len()).collect()
        } else {
            self.plist.clone()
        }
    }

    /// Build the model context for a simulation with these settings.
    pub fn context(&self, dims: &ModelDimensions) -> ModelContext {
        ModelContext::new(
            self.unscaled(),
            self.fixed_parameters.clone(),
            self.effective_plist(),
            dims.ne,
        )
    }

    /// Check the settings against the model dimensions.
    pub fn validate(&self, dims: &ModelDimensions) -> Result<()> {
        check_len("parameters", dims.np, self.parameters.len())?;
        if !self.scaling.is_empty() {
            check_len("scaling", dims.np, self.scaling.len())?;
        }
        check_len("fixed_parameters", dims.nk, self.fixed_parameters.len())?;
        if let Some(ip) = self.plist.iter().find(|&&ip| ip >= dims.np) {
            return Err(Error::InvalidParameters(format!(
                "plist entry {ip} out of range for {} parameters",
                dims.np
            )));
        }
        if let Some(x0) = &self.initial_states {
            check_len("initial_states", dims.nx, x0.len())?;
        }
        if !self.t0.is_finite() {
            return Err(Error::InvalidParameters("t0 must be finite".into()));
        }
        let mut previous = self.t0;
        for &t in &self.timepoints {
            if !t.is_finite() {
                return Err(Error::InvalidParameters(format!("timepoint {t} is not finite")));
            }
            if t < previous {
                return Err(Error::InvalidParameters(format!(
                    "timepoints must be non-decreasing and >= t0 ({t} after {previous})"
                )));
            }
            previous = t;
        }
        if self.unscaled().iter().any(|p| !p.is_finite()) {
            return Err(Error::InvalidParameters("parameters must be finite".into()));
        }
        Ok(())
    }

    /// Parse settings from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading simulation parameters from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}
