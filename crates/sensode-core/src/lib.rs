//! Core data model for Sensode.
//!
//! This crate provides the model contract, parameter scaling, solver
//! options, experimental data and simulation results shared by the
//! solver and the model library.

pub mod edata;
pub mod error;
pub mod model;
pub mod noise;
pub mod options;
pub mod parameters;
pub mod rdata;
pub mod scaling;

pub use edata::ExpData;
pub use error::{Error, Result};
pub use model::{EventInstant, EventTiming, Model, ModelContext, ModelDimensions, RootDirection};
pub use options::{
    DampingFactorMode, LinearSolver, NewtonOptions, SensitivityMethod, SensitivityOrder,
    SolverOptions,
};
pub use parameters::SimulationParameters;
pub use rdata::{NewtonDiagnostics, ReturnData, SimulationStatus, SteadyStateStatus};
pub use scaling::ParameterScaling;
