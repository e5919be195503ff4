//! Binomial and Bernoulli likelihoods with a logit link.
//!
//! `log p(k | n, f) = ln C(n, k) + k f - n ln(1 + e^f)`

use super::quadrature::{tilted_moments, LogDensity, QuadratureConfig};
use super::{check_count, ln_factorial, LikelihoodKind, MomentProvider, Moments};
use crate::ep::EpError;
use crate::util::math::{sigmoid, softplus};

/// Successes out of a per-sample number of trials.
#[derive(Debug, Clone)]
pub struct Binomial {
    nsuccesses: Vec<f64>,
    ntrials: Vec<f64>,
    log_binom_coef: Vec<f64>,
    quadrature: QuadratureConfig,
}

impl Binomial {
    pub fn new(nsuccesses: Vec<f64>, ntrials: Vec<f64>) -> Result<Self, EpError> {
        if nsuccesses.len() != ntrials.len() {
            return Err(EpError::DimensionMismatch {
                what: "number of trials",
                expected: nsuccesses.len(),
                got: ntrials.len(),
            });
        }
        for (i, (&k, &n)) in nsuccesses.iter().zip(&ntrials).enumerate() {
            check_count(i, k, "number of successes")?;
            check_count(i, n, "number of trials")?;
            if k > n {
                return Err(EpError::InvalidPhenotype {
                    index: i,
                    reason: format!("{} successes out of {} trials", k, n),
                });
            }
        }
        let log_binom_coef = nsuccesses
            .iter()
            .zip(&ntrials)
            .map(|(&k, &n)| ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k))
            .collect();

        Ok(Self {
            nsuccesses,
            ntrials,
            log_binom_coef,
            quadrature: QuadratureConfig::default(),
        })
    }

    pub fn with_quadrature(mut self, quadrature: QuadratureConfig) -> Self {
        self.quadrature = quadrature;
        self
    }

    pub fn nsuccesses(&self) -> &[f64] {
        &self.nsuccesses
    }

    pub fn ntrials(&self) -> &[f64] {
        &self.ntrials
    }

    /// Log-likelihood of sample `i` at latent value `f`.
    pub fn log_likelihood(&self, i: usize, f: f64) -> LogDensity {
        let k = self.nsuccesses[i];
        let n = self.ntrials[i];
        let p = sigmoid(f);
        LogDensity {
            value: self.log_binom_coef[i] + k * f - n * softplus(f),
            d1: k - n * p,
            d2: -n * p * (1.0 - p),
        }
    }
}

impl MomentProvider for Binomial {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Binomial
    }

    fn n_samples(&self) -> usize {
        self.nsuccesses.len()
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

/// Binary outcomes; a binomial with a single trial per sample.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    inner: Binomial,
}

impl Bernoulli {
    pub fn new(outcomes: Vec<f64>) -> Result<Self, EpError> {
        if let Some(i) = outcomes.iter().position(|&y| y != 0.0 && y != 1.0) {
            return Err(EpError::InvalidPhenotype {
                index: i,
                reason: format!("outcome {} is not 0 or 1", outcomes[i]),
            });
        }
        let n = outcomes.len();
        Ok(Self {
            inner: Binomial::new(outcomes, vec![1.0; n])?,
        })
    }

    pub fn with_quadrature(self, quadrature: QuadratureConfig) -> Self {
        Self {
            inner: self.inner.with_quadrature(quadrature),
        }
    }

    pub fn outcomes(&self) -> &[f64] {
        self.inner.nsuccesses()
    }
}

impl MomentProvider for Bernoulli {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Bernoulli
    }

    fn n_samples(&self) -> usize {
        self.inner.n_samples()
    }

    fn moments(
        &self,
        index: usize,
        cavity_mean: f64,
        cavity_variance: f64,
    ) -> Result<Moments, EpError> {
        self.inner.moments(index, cavity_mean, cavity_variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// Brute-force `log Z` on a wide fine grid.
    fn reference_log_z(lik: &Binomial, i: usize, mu: f64, s2: f64) -> f64 {
        let sd = s2.sqrt();
        let h = sd / 2000.0;
        let mut total = 0.0;
        for j in -40_000..=40_000 {
            let f = mu + j as f64 * h;
            let log_gauss = -0.5 * (f - mu).powi(2) / s2 - 0.5 * (2.0 * PI * s2).ln();
            total += (lik.log_likelihood(i, f).value + log_gauss).exp();
        }
        (total * h).ln()
    }

    #[test]
    fn test_log_likelihood_includes_binomial_coefficient() {
        let lik = Binomial::new(vec![2.0], vec![5.0]).unwrap();
        let p: f64 = 0.3;
        let f = (p / (1.0 - p)).ln();
        let expected = (10.0 * p.powi(2) * (1.0 - p).powi(3)).ln();
        assert!((lik.log_likelihood(0, f).value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let lik = Binomial::new(vec![3.0], vec![7.0]).unwrap();
        let f = 0.35;
        let h = 1e-5;
        let d = lik.log_likelihood(0, f);
        let fd1 = (lik.log_likelihood(0, f + h).value - lik.log_likelihood(0, f - h).value) / (2.0 * h);
        let fd2 = (lik.log_likelihood(0, f + h).d1 - lik.log_likelihood(0, f - h).d1) / (2.0 * h);
        assert!((d.d1 - fd1).abs() < 1e-7);
        assert!((d.d2 - fd2).abs() < 1e-7);
    }

    #[test]
    fn test_moments_match_brute_force() {
        let lik = Binomial::new(vec![0.0, 4.0, 9.0], vec![3.0, 10.0, 9.0]).unwrap();
        for (i, &(mu, s2)) in [(0.2, 1.5), (-1.0, 0.3), (2.0, 4.0)].iter().enumerate() {
            let m = lik.moments(i, mu, s2).unwrap();
            let reference = reference_log_z(&lik, i, mu, s2);
            assert!(
                (m.log_zeroth - reference).abs() < 1e-7,
                "sample {}: {} vs {}",
                i,
                m.log_zeroth,
                reference
            );
        }
    }

    #[test]
    fn test_dlogz_matches_finite_difference() {
        let lik = Binomial::new(vec![4.0], vec![10.0]).unwrap();
        let (mu, s2, h) = (-0.3, 0.7, 1e-4);
        let m = lik.moments(0, mu, s2).unwrap();
        let up = lik.moments(0, mu + h, s2).unwrap();
        let down = lik.moments(0, mu - h, s2).unwrap();
        let fd1 = (up.log_zeroth - down.log_zeroth) / (2.0 * h);
        let fd2 = (up.log_zeroth - 2.0 * m.log_zeroth + down.log_zeroth) / (h * h);
        assert!((m.dlog_dmean - fd1).abs() < 1e-6);
        assert!((m.d2log_dmean2 - fd2).abs() < 1e-4);
        // log-concave likelihood shrinks the variance
        assert!(m.tilted_variance(s2) < s2);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        assert!(matches!(
            Binomial::new(vec![3.0], vec![2.0]),
            Err(EpError::InvalidPhenotype { index: 0, .. })
        ));
        assert!(Binomial::new(vec![-1.0], vec![2.0]).is_err());
        assert!(Binomial::new(vec![f64::NAN], vec![2.0]).is_err());
        assert!(matches!(
            Binomial::new(vec![1.0, 0.0], vec![2.0]),
            Err(EpError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Bernoulli::new(vec![0.0, 1.0, 0.5]),
            Err(EpError::InvalidPhenotype { index: 2, .. })
        ));
    }

    #[test]
    fn test_bernoulli_matches_single_trial_binomial() {
        let bern = Bernoulli::new(vec![1.0, 0.0]).unwrap();
        let bin = Binomial::new(vec![1.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(bern.kind(), LikelihoodKind::Bernoulli);
        for i in 0..2 {
            let a = bern.moments(i, 0.4, 1.1).unwrap();
            let b = bin.moments(i, 0.4, 1.1).unwrap();
            assert_eq!(a, b);
        }
    }
}
