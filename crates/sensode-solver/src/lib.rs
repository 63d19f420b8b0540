//! Simulation and sensitivity engine for Sensode.
//!
//! This crate provides:
//! - Forward integration with event detection, boluses and secondary events
//! - Forward and adjoint (backward) sensitivity analysis
//! - Newton steady-state search with damping and simulation fallback
//! - Dense and sparse (GMRES) linear solve strategies
//! - Parallel simulation of independent conditions

pub mod backward;
pub mod batch;
pub mod dopri;
pub mod error;
pub mod forward;
pub mod gmres;
pub mod integrator;
pub mod ledger;
pub mod linear;
pub mod newton;
pub mod operator;
pub mod output;
pub mod simulation;
pub mod solver_select;
pub mod steadystate;

pub use backward::BackwardProblem;
pub use batch::{BatchConfig, Condition, run_simulations, total_llh};
pub use dopri::DormandPrince;
pub use error::{Error, IntegrationErrorKind, NewtonFailure, Result};
pub use forward::{ForwardProblem, ForwardResult};
pub use gmres::{GmresConfig, GmresResult, solve_gmres};
pub use integrator::{Integrator, IntegratorStats, SolveStatus};
pub use ledger::{EventLedger, EventRecord, EventTrigger, LedgerEntry};
pub use newton::{NewtonSolver, NewtonState, NewtonStep, weighted_rms};
pub use operator::{RealOperator, SparseOperator};
pub use simulation::{run_simulation, run_simulation_with};
pub use solver_select::{DenseStrategy, LinearSolveStrategy, SparseStrategy, select_strategy};
pub use steadystate::{SteadyState, SteadyStateProblem};
