//! Solver configuration.
//!
//! Options are plain serde structs with `#[serde(default)]`, so a JSON file
//! only needs to name the fields that differ from the defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Order of sensitivities to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityOrder {
    #[default]
    None,
    First,
    Second,
}

/// How sensitivities are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMethod {
    #[default]
    None,
    /// Forward sensitivity equations integrated alongside the state.
    Forward,
    /// Backward adjoint integration seeded from the likelihood.
    Adjoint,
}

/// Linear solver used for Newton steps and steady-state sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolver {
    /// Dense LU factorization.
    #[default]
    Dense,
    /// Sparse Jacobian, Krylov solve with direct fallback.
    Sparse,
    /// Dense below [`NewtonOptions::sparse_threshold`], sparse above.
    Auto,
}

impl LinearSolver {
    /// Parse from string (for configuration files).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "dense" | "lu" => Some(Self::Dense),
            "sparse" | "klu" | "gmres" => Some(Self::Sparse),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Get the solver name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for LinearSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether Newton steps are damped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DampingFactorMode {
    #[default]
    On,
    Off,
}

/// Newton solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    /// Maximum Newton iterations per attempt.
    pub max_steps: usize,
    /// Maximum Krylov iterations per linear solve (sparse strategy).
    pub max_linear_steps: usize,
    /// Damping on or off.
    pub damping_factor_mode: DampingFactorMode,
    /// Smallest damping factor before the attempt is declared diverged.
    pub damping_factor_lower_bound: f64,
    /// Relative tolerance of the steady-state residual.
    pub rtol: f64,
    /// Absolute tolerance of the steady-state residual.
    pub atol: f64,
    /// Number of attempts (Newton, then simulation + Newton, ...).
    pub max_tries: usize,
    /// System size from which [`LinearSolver::Auto`] picks the sparse strategy.
    pub sparse_threshold: usize,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            max_steps: 40,
            max_linear_steps: 100,
            damping_factor_mode: DampingFactorMode::On,
            damping_factor_lower_bound: 1e-8,
            rtol: 1e-8,
            atol: 1e-12,
            max_tries: 2,
            sparse_threshold: 500,
        }
    }
}

/// Integration and sensitivity settings for one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub sensitivity_order: SensitivityOrder,
    pub sensitivity_method: SensitivityMethod,
    /// Relative tolerance of the forward integration.
    pub rtol: f64,
    /// Absolute tolerance of the forward integration.
    pub atol: f64,
    /// Relative tolerance of the backward integration.
    pub rtol_b: f64,
    /// Absolute tolerance of the backward integration.
    pub atol_b: f64,
    /// Maximum integrator steps per forward stop.
    pub max_steps: usize,
    /// Maximum integrator steps per backward stop.
    pub max_steps_b: usize,
    /// Maximum recorded occurrences per event function.
    pub nmaxevent: usize,
    /// Maximum nesting of secondary events at one instant.
    pub max_event_recursion: usize,
    pub linear_solver: LinearSolver,
    /// Solve for a steady state before the time course.
    pub preequilibration: bool,
    pub newton: NewtonOptions,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            sensitivity_order: SensitivityOrder::None,
            sensitivity_method: SensitivityMethod::Forward,
            rtol: 1e-8,
            atol: 1e-16,
            rtol_b: 1e-8,
            atol_b: 1e-16,
            max_steps: 10_000,
            max_steps_b: 10_000,
            nmaxevent: 10,
            max_event_recursion: 32,
            linear_solver: LinearSolver::Dense,
            preequilibration: false,
            newton: NewtonOptions::default(),
        }
    }
}

impl SolverOptions {
    /// Options requesting first-order sensitivities with the given method.
    pub fn first_order(method: SensitivityMethod) -> Self {
        Self {
            sensitivity_order: SensitivityOrder::First,
            sensitivity_method: method,
            ..Default::default()
        }
    }

    /// Set forward and backward tolerances at once.
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self.rtol_b = rtol;
        self.atol_b = atol;
        self
    }

    /// Set the per-event-function occurrence cap.
    pub fn with_nmaxevent(mut self, nmaxevent: usize) -> Self {
        self.nmaxevent = nmaxevent;
        self
    }

    /// True if forward sensitivities are integrated.
    pub fn forward_sensitivities(&self) -> bool {
        self.sensitivity_order >= SensitivityOrder::First
            && self.sensitivity_method == SensitivityMethod::Forward
    }

    /// True if an adjoint pass follows the forward pass.
    pub fn adjoint_sensitivities(&self) -> bool {
        self.sensitivity_order >= SensitivityOrder::First
            && self.sensitivity_method == SensitivityMethod::Adjoint
    }

    /// Parse options from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading solver options from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check ranges and consistency.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("rtol", self.rtol),
            ("rtol_b", self.rtol_b),
            ("newton.rtol", self.newton.rtol),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(Error::InvalidOptions(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("atol", self.atol),
            ("atol_b", self.atol_b),
            ("newton.atol", self.newton.atol),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::InvalidOptions(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.max_steps == 0 || self.max_steps_b == 0 {
            return Err(Error::InvalidOptions("step limits must be positive".into()));
        }
        if self.max_event_recursion == 0 {
            return Err(Error::InvalidOptions("max_event_recursion must be positive".into()));
        }
        let bound = self.newton.damping_factor_lower_bound;
        if !(bound > 0.0 && bound < 1.0) {
            return Err(Error::InvalidOptions(format!(
                "newton.damping_factor_lower_bound must be in (0, 1), got {bound}"
            )));
        }
        if self.newton.max_tries == 0 {
            return Err(Error::InvalidOptions("newton.max_tries must be positive".into()));
        }
        if self.sensitivity_order > SensitivityOrder::None
            && self.sensitivity_method == SensitivityMethod::None
        {
            return Err(Error::InvalidOptions(
                "sensitivities requested without a sensitivity method".into(),
            ));
        }
        Ok(())
    }
}
