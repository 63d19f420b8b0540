//! Gaussian noise model.
//!
//! Negative log-likelihood of a measurement `m` of a value `y` with standard
//! deviation `sigma`, and its partial derivatives. These back the default
//! noise functions of [`crate::Model`].

use std::f64::consts::PI;

/// `0.5 * ln(2*pi*sigma^2) + 0.5 * ((y - m) / sigma)^2`
pub fn gaussian_nllh(y: f64, sigma: f64, m: f64) -> f64 {
    let r = (y - m) / sigma;
    0.5 * (2.0 * PI * sigma * sigma).ln() + 0.5 * r * r
}

/// Derivative of [`gaussian_nllh`] with respect to `y`.
pub fn gaussian_nllh_dy(y: f64, sigma: f64, m: f64) -> f64 {
    (y - m) / (sigma * sigma)
}

/// Derivative of [`gaussian_nllh`] with respect to `sigma`.
pub fn gaussian_nllh_dsigma(y: f64, sigma: f64, m: f64) -> f64 {
    let r = (y - m) / sigma;
    1.0 / sigma - r * r / sigma
}

/// Weighted residual `(y - m) / sigma`.
pub fn residual(y: f64, sigma: f64, m: f64) -> f64 {
    (y - m) / sigma
}
