//! Poisson counts with a log link: `log p(k | f) = k f - e^f - ln k!`.

use super::quadrature::{tilted_moments, LogDensity, QuadratureConfig};
use super::{check_count, ln_factorial, LikelihoodKind, MomentProvider, Moments};
use crate::ep::EpError;

#[derive(Debug, Clone)]
pub struct Poisson {
    counts: Vec<f64>,
    log_factorials: Vec<f64>,
    quadrature: QuadratureConfig,
}

impl Poisson {
    pub fn new(counts: Vec<f64>) -> Result<Self, EpError> {
        for (i, &k) in counts.iter().enumerate() {
            check_count(i, k, "count")?;
        }
        let log_factorials = counts.iter().map(|&k| ln_factorial(k)).collect();
        Ok(Self {
            counts,
            log_factorials,
            quadrature: QuadratureConfig::default(),
        })
    }

    pub fn with_quadrature(mut self, quadrature: QuadratureConfig) -> Self {
        self.quadrature = quadrature;
        self
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn log_likelihood(&self, i: usize, f: f64) -> LogDensity {
        let rate = f.exp();
        let k = self.counts[i];
        LogDensity {
            value: k * f - rate - self.log_factorials[i],
            d1: k - rate,
            d2: -rate,
        }
    }
}

impl MomentProvider for Poisson {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Poisson
    }

    fn n_samples(&self) -> usize {
        self.counts.len()
    }

    fn moments(
        &self,
        index: usize,
        cavity_mean: f64,
        cavity_variance: f64,
    ) -> Result<Moments, EpError> {
        let tilted = tilted_moments(
            |f| self.log_likelihood(index, f),
            cavity_mean,
            cavity_variance,
            &self.quadrature,
        )
        .map_err(|source| EpError::Moments { index, source })?;
        Ok(Moments::from_tilted(&tilted, cavity_mean, cavity_variance))
    }
}
