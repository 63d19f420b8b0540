//! Parameter scaling and chain-rule rescaling.
//!
//! Optimizers usually work on log-transformed parameters while models are
//! written in their native parameterization. [`unscale`] maps optimizer
//! values to model values once before a simulation; [`chain_rule_factor`]
//! gives the multiplicative factor that converts a derivative computed in
//! model space into the derivative the optimizer sees.

use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Parameterization of a single parameter as seen by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterScaling {
    /// Optimizer value equals model value.
    #[default]
    None,
    /// Optimizer value is `log10(p)`.
    Log10,
    /// Optimizer value is `ln(p)`.
    Ln,
}

impl ParameterScaling {
    /// Parse from string (for configuration files).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "none" | "lin" | "linear" => Some(Self::None),
            "log10" => Some(Self::Log10),
            "ln" | "log" => Some(Self::Ln),
            _ => None,
        }
    }

    /// Get the scaling name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Log10 => "log10",
            Self::Ln => "ln",
        }
    }

    /// Map an optimizer value to the model value.
    pub fn unscale(&self, value: f64) -> f64 {
        match self {
            Self::None => value,
            Self::Log10 => 10f64.powf(value),
            Self::Ln => value.exp(),
        }
    }

    /// Map a model value to the optimizer value.
    pub fn scale(&self, value: f64) -> f64 {
        match self {
            Self::None => value,
            Self::Log10 => value.log10(),
            Self::Ln => value.ln(),
        }
    }

    /// `dp/dq` for model value `p` and optimizer value `q`.
    pub fn chain_rule_factor(&self, model_value: f64) -> f64 {
        match self {
            Self::None => 1.0,
            Self::Log10 => LN_10 * model_value,
            Self::Ln => model_value,
        }
    }

    /// Ratio `(d2p/dq2) / (dp/dq)`, the coefficient of the first-order term
    /// in the second-order chain rule.
    pub fn second_order_coefficient(&self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Log10 => LN_10,
            Self::Ln => 1.0,
        }
    }
}

impl std::fmt::Display for ParameterScaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Unscale a whole parameter vector.
///
/// An empty `scaling` slice means identity for every parameter.
pub fn unscale(values: &[f64], scaling: &[ParameterScaling]) -> Vec<f64> {
    if scaling.is_empty() {
        return values.to_vec();
    }
    values
        .iter()
        .zip(scaling)
        .map(|(&v, s)| s.unscale(v))
        .collect()
}

/// Scale a whole parameter vector (inverse of [`unscale`]).
pub fn scale(values: &[f64], scaling: &[ParameterScaling]) -> Vec<f64> {
    if scaling.is_empty() {
        return values.to_vec();
    }
    values
        .iter()
        .zip(scaling)
        .map(|(&v, s)| s.scale(v))
        .collect()
}

/// Chain-rule factors for the parameters selected by `plist`.
pub fn chain_rule_factors(model_values: &[f64], scaling: &[ParameterScaling], plist: &[usize]) -> Vec<f64> {
    plist
        .iter()
        .map(|&ip| {
            scaling
                .get(ip)
                .copied()
                .unwrap_or_default()
                .chain_rule_factor(model_values[ip])
        })
        .collect()
}

/// True when no parameter carries a non-identity scaling.
pub fn is_identity(scaling: &[ParameterScaling]) -> bool {
    scaling.iter().all(|s| *s == ParameterScaling::None)
}
