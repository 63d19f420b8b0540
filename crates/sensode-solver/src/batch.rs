//! Parallel simulation of independent conditions using rayon.
//!
//! Each condition gets its own integrator, so runs share nothing but the
//! model and options. Results come back in input order.

use rayon::prelude::*;
use sensode_core::{ExpData, Model, ReturnData, SimulationParameters, SolverOptions};

use crate::error::Result;
use crate::simulation::run_simulation;

/// Configuration for batch execution.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Minimum conditions to use parallel execution (below this, sequential is faster).
    pub min_points_for_parallel: usize,
    /// Chunk size for work distribution. None = auto (rayon default).
    pub chunk_size: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_points_for_parallel: 4,
            chunk_size: None,
        }
    }
}

impl BatchConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn with_min_parallel(mut self, min: usize) -> Self {
        self.min_points_for_parallel = min;
        self
    }
}

/// One condition of a batch: its parameters and optional data.
#[derive(Debug, Clone, Copy)]
pub struct Condition<'a> {
    pub params: &'a SimulationParameters,
    pub edata: Option<&'a ExpData>,
}

/// Simulate every condition, in parallel when worthwhile.
///
/// A setup error in one condition does not stop the others; each result is
/// reported in its own slot.
pub fn run_simulations(
    model: &dyn Model,
    conditions: &[Condition<'_>],
    options: &SolverOptions,
    config: &BatchConfig,
) -> Vec<Result<ReturnData>> {
    let total = conditions.len();
    let use_parallel = total >= config.min_points_for_parallel && rayon::current_num_threads() > 1;
    let run = |c: &Condition<'_>| run_simulation(model, c.params, options, c.edata);

    if !use_parallel {
        return conditions.iter().map(run).collect();
    }

    log::info!(
        "Simulating {} conditions of {} in parallel ({} threads)",
        total,
        model.name(),
        rayon::current_num_threads()
    );

    match config.chunk_size {
        Some(size) => conditions
            .par_chunks(size.max(1))
            .flat_map_iter(|chunk| chunk.iter().map(run).collect::<Vec<_>>())
            .collect(),
        None => conditions.par_iter().map(run).collect(),
    }
}

/// Total log-likelihood of a batch; NaN if any condition failed.
pub fn total_llh(results: &[Result<ReturnData>]) -> f64 {
    results
        .iter()
        .map(|r| match r {
            Ok(rdata) if rdata.status.is_success() => rdata.llh,
            _ => f64::NAN,
        })
        .sum()
}
