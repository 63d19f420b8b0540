//! Error types for sensode-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A buffer does not have the size implied by the model dimensions.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Solver options are inconsistent or out of range.
    #[error("invalid solver options: {0}")]
    InvalidOptions(String),

    /// Simulation parameters (values, scalings, plist, timepoints) are malformed.
    #[error("invalid simulation parameters: {0}")]
    InvalidParameters(String),

    /// Experimental data is malformed (e.g. non-positive standard deviation).
    #[error("invalid experimental data: {0}")]
    InvalidData(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Check that a buffer has the expected length.
pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
