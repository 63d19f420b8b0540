//! Error types for sensode-solver.

use sensode_core::SimulationStatus;
use thiserror::Error;

/// Why an integration call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationErrorKind {
    /// The per-call step limit was reached.
    TooMuchWork,
    /// The step size dropped below the resolvable minimum.
    StepSizeTooSmall,
    /// The right-hand side produced NaN or infinity.
    NonFiniteValue,
    /// Roots were found repeatedly at the same instant.
    RootClustering,
}

impl std::fmt::Display for IntegrationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TooMuchWork => "too much work",
            Self::StepSizeTooSmall => "step size too small",
            Self::NonFiniteValue => "non-finite value",
            Self::RootClustering => "root clustering",
        };
        f.write_str(s)
    }
}

/// Why the Newton solver gave up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewtonFailure {
    /// Damping would have dropped below the configured lower bound.
    DampingBelowBound { damping: f64 },
    /// The iteration limit was reached without convergence.
    MaxStepsExceeded { steps: usize },
    /// The Newton direction could not be computed.
    LinearSolve,
}

impl std::fmt::Display for NewtonFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DampingBelowBound { damping } => {
                write!(f, "damping factor {damping:e} below lower bound")
            }
            Self::MaxStepsExceeded { steps } => write!(f, "no convergence after {steps} steps"),
            Self::LinearSolve => f.write_str("linear solve failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix")]
    SingularMatrix,

    #[error("convergence failed after {iterations} iterations")]
    ConvergenceFailed { iterations: usize },

    #[error("invalid matrix dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("setup failure: {0}")]
    Setup(#[from] sensode_core::Error),

    #[error("forward integration failed at t = {t}: {kind}")]
    Integration { t: f64, kind: IntegrationErrorKind },

    #[error("backward integration failed at t = {t}: {kind}")]
    IntegrationBackward { t: f64, kind: IntegrationErrorKind },

    #[error("steady state not found: {0}")]
    Newton(NewtonFailure),

    #[error("stuck event at t = {t}")]
    StuckEvent { t: f64 },

    #[error("secondary events nested {depth} levels deep at t = {t}")]
    EventRecursion { depth: usize, t: f64 },

    #[error("simulation started in an event: root {index} is zero at t = {t}")]
    EventAtInitialTime { index: usize, t: f64 },
}

impl Error {
    /// Status reported in the result when this error ends a simulation.
    pub fn status(&self) -> SimulationStatus {
        match self {
            Self::SingularMatrix | Self::ConvergenceFailed { .. } | Self::DimensionMismatch { .. } => {
                SimulationStatus::LinearSolveFailure
            }
            Self::Setup(_) => SimulationStatus::NotRun,
            Self::Integration { .. } => SimulationStatus::IntegrationFailure,
            Self::IntegrationBackward { .. } => SimulationStatus::IntegrationFailureBackward,
            Self::Newton(_) => SimulationStatus::NewtonFailure,
            Self::StuckEvent { .. } => SimulationStatus::StuckEvent,
            Self::EventRecursion { .. } => SimulationStatus::EventRecursionLimit,
            Self::EventAtInitialTime { .. } => SimulationStatus::EventAtInitialTime,
        }
    }

    /// True for failures that abort the call instead of being reported in the result.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
