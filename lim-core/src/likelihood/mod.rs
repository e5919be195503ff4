//! Likelihood moment providers.
//!
//! EP touches a likelihood only through the tilted normalizer
//!
//!   Z_i(mu, s2) = integral of p(y_i | f) N(f | mu, s2) df
//!
//! and the first two derivatives of `log Z_i` with respect to the cavity
//! mean `mu`. Any type that can produce these three numbers for a sample
//! index can drive [`crate::ep::ExpFamEp`].

pub mod binomial;
pub mod poisson;
pub mod quadrature;

pub use binomial::{Bernoulli, Binomial};
pub use poisson::Poisson;
pub use quadrature::{LogDensity, QuadratureConfig, QuadratureError, TiltedMoments};

use crate::ep::EpError;

/// Likelihood family of a moment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikelihoodKind {
    Bernoulli,
    Binomial,
    Poisson,
}

/// `log Z` and its first two derivatives in the cavity mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub log_zeroth: f64,
    pub dlog_dmean: f64,
    pub d2log_dmean2: f64,
}

impl Moments {
    /// Convert tilted mean and variance into derivatives of `log Z`.
    ///
    /// `d log Z / d mu = (m_hat - mu) / s2` and
    /// `d2 log Z / d mu2 = (v_hat - s2) / s2^2`.
    pub fn from_tilted(tilted: &TiltedMoments, cavity_mean: f64, cavity_variance: f64) -> Self {
        Self {
            log_zeroth: tilted.log_zeroth,
            dlog_dmean: (tilted.mean - cavity_mean) / cavity_variance,
            d2log_dmean2: (tilted.variance - cavity_variance) / (cavity_variance * cavity_variance),
        }
    }

    pub fn tilted_mean(&self, cavity_mean: f64, cavity_variance: f64) -> f64 {
        cavity_mean + cavity_variance * self.dlog_dmean
    }

    pub fn tilted_variance(&self, cavity_variance: f64) -> f64 {
        cavity_variance + cavity_variance * cavity_variance * self.d2log_dmean2
    }

    pub fn is_finite(&self) -> bool {
        self.log_zeroth.is_finite() && self.dlog_dmean.is_finite() && self.d2log_dmean2.is_finite()
    }
}

/// Source of tilted moments for each sample.
pub trait MomentProvider {
    fn kind(&self) -> LikelihoodKind;

    fn n_samples(&self) -> usize;

    /// Moments of `p(y_i | f) N(f | cavity_mean, cavity_variance)`.
    fn moments(
        &self,
        index: usize,
        cavity_mean: f64,
        cavity_variance: f64,
    ) -> Result<Moments, EpError>;
}

/// Shared validation for count phenotypes.
pub(crate) fn check_count(index: usize, value: f64, what: &str) -> Result<(), EpError> {
    if !value.is_finite() {
        return Err(EpError::InvalidPhenotype {
            index,
            reason: format!("{} is not finite", what),
        });
    }
    if value < 0.0 {
        return Err(EpError::InvalidPhenotype {
            index,
            reason: format!("{} = {} is negative", what, value),
        });
    }
    Ok(())
}

/// `ln(n!)` through the factorial table for integral counts, `ln Gamma(n + 1)` otherwise.
pub(crate) fn ln_factorial(n: f64) -> f64 {
    if n.fract() == 0.0 && n < u64::MAX as f64 {
        statrs::function::factorial::ln_factorial(n as u64)
    } else {
        statrs::function::gamma::ln_gamma(n + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moments_roundtrip_through_tilted() {
        let tilted = TiltedMoments {
            log_zeroth: -1.2,
            mean: 0.4,
            variance: 0.3,
        };
        let m = Moments::from_tilted(&tilted, 0.1, 0.8);
        assert!((m.tilted_mean(0.1, 0.8) - 0.4).abs() < 1e-14);
        assert!((m.tilted_variance(0.8) - 0.3).abs() < 1e-14);
        assert!(m.is_finite());
    }

    #[test]
    fn test_ln_factorial() {
        assert_eq!(ln_factorial(0.0), 0.0);
        assert!((ln_factorial(5.0) - 120f64.ln()).abs() < 1e-12);
        assert!((ln_factorial(2.5) - statrs::function::gamma::ln_gamma(3.5)).abs() < 1e-14);
    }
}
