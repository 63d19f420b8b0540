//! # Sensode
//!
//! ODE simulation with forward and adjoint sensitivity analysis.
//!
//! Sensode provides:
//! - Forward integration of parameterized ODE models with discrete events
//! - Forward and adjoint gradients of a Gaussian log-likelihood
//! - Optimizer-space parameter scalings (linear, `log10`, `ln`)
//! - Steady-state pre-equilibration by damped Newton iteration
//!
//! ## Quick Start
//!
//! ```rust
//! use sensode::prelude::*;
//!
//! let params = SimulationParameters::new(vec![1.0], vec![1.0]);
//! let mut edata = ExpData::new(1, 1, 0, 10);
//! edata.set_observed_data(&[0.5]).unwrap();
//! edata.set_uniform_data_std_dev(0.1).unwrap();
//!
//! let options = SolverOptions::first_order(SensitivityMethod::Adjoint);
//! let rdata = run_simulation(&LinearDecay, &params, &options, Some(&edata)).unwrap();
//! assert!(rdata.status.is_success());
//! println!("llh = {}, gradient = {}", rdata.llh, rdata.sllh[0]);
//! ```
//!
//! ## Configuration
//!
//! Options and parameters load from JSON:
//!
//! ```rust
//! use sensode::prelude::*;
//!
//! let options = SolverOptions::from_json_str(
//!     r#"{ "sensitivity_order": "first", "sensitivity_method": "adjoint", "rtol": 1e-6 }"#,
//! )
//! .unwrap();
//! assert!(options.adjoint_sensitivities());
//! ```

pub use sensode_core as core;
pub use sensode_models as models;
pub use sensode_solver as solver;

pub use sensode_core::{
    Error as CoreError, EventInstant, EventTiming, ExpData, LinearSolver, Model, ModelContext, ModelDimensions,
    NewtonDiagnostics, NewtonOptions, ParameterScaling, ReturnData, RootDirection,
    SensitivityMethod, SensitivityOrder, SimulationParameters, SimulationStatus, SolverOptions,
    SteadyStateStatus,
};

pub use sensode_solver::{
    BatchConfig, Condition, DormandPrince, Error as SolverError, Integrator, run_simulation,
    run_simulation_with, run_simulations, total_llh,
};

pub use sensode_models::{
    DecayWithBolus, LinearDecay, PeriodicCounter, ProductionDegradation, ReversibleConversion,
};

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Re-export of nalgebra's dynamic matrix type.
pub use nalgebra::DMatrix;

/// Prelude module containing commonly used types and traits.
///
/// ```rust
/// use sensode::prelude::*;
/// ```
pub mod prelude {
    // Model contract
    pub use crate::{Model, ModelContext, ModelDimensions, RootDirection};

    // Setup
    pub use crate::{
        ExpData, ParameterScaling, SensitivityMethod, SensitivityOrder, SimulationParameters,
        SolverOptions,
    };

    // Results
    pub use crate::{ReturnData, SimulationStatus};

    // Entry points
    pub use crate::{BatchConfig, Condition, run_simulation, run_simulations};

    // Reference models
    pub use crate::{DecayWithBolus, LinearDecay};

    // Common external types
    pub use crate::{DMatrix, DVector};
}
