//! Reference models for Sensode.
//!
//! Hand-written implementations of the [`sensode_core::Model`] contract,
//! in the form a model generator would emit them:
//! - Linear decay, with and without a timed bolus
//! - A periodic event clock driving a decaying counter
//! - Production/degradation and reversible conversion kinetics

pub mod counter;
pub mod decay;
pub mod kinetics;

pub use counter::PeriodicCounter;
pub use decay::{DecayWithBolus, LinearDecay};
pub use kinetics::{ProductionDegradation, ReversibleConversion};
