//! The EP fixed-point loop and its hyperparameter state.
//!
//! Model: `f ~ N(M beta, v ((1 - delta) Q0 S0 Q0' + delta I))` and
//! `y_i | f_i ~ p(y_i | f_i)`. Each sweep computes all cavities from the
//! current joint posterior, updates every site from the tilted moments and
//! then refactors the posterior once. Results of the last converged run are
//! cached against the `(v, delta, beta)` they were computed for, so
//! repeated reads never re-run EP.

use lim_linalg::{DenseMatrix, QsDecomposition};
use tracing::{debug, warn};

use super::lml::{evaluate, LmlTerms};
use super::posterior::SpectralPosterior;
use super::site::{Cavity, SiteLik, SiteUpdate};
use super::EpError;
use crate::likelihood::MomentProvider;

/// Where a run starts from after the hyperparameters changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteInit {
    /// Reuse the sites of the previous run.
    #[default]
    WarmStart,
    /// Start every run from zero sites.
    Reset,
}

/// Configuration for the EP iterations.
#[derive(Debug, Clone)]
pub struct EpConfig {
    /// Maximum number of sweeps.
    pub max_iterations: usize,
    /// Convergence tolerance on the largest absolute site change.
    pub tolerance: f64,
    /// Smallest damping factor reached by halving.
    pub min_damping: f64,
    /// Site state used when a run starts at new hyperparameters.
    pub site_init: SiteInit,
}

impl Default for EpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
            min_damping: 1.0 / 64.0,
            site_init: SiteInit::WarmStart,
        }
    }
}

/// Outcome of the last run; `damping` is the factor in effect when it stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvergenceStatus {
    Converged {
        iterations: usize,
        max_change: f64,
        damping: f64,
    },
    NotConverged {
        iterations: usize,
        max_change: f64,
        damping: f64,
    },
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged { .. })
    }

    pub fn iterations(&self) -> usize {
        match *self {
            ConvergenceStatus::Converged { iterations, .. }
            | ConvergenceStatus::NotConverged { iterations, .. } => iterations,
        }
    }

    pub fn damping(&self) -> f64 {
        match *self {
            ConvergenceStatus::Converged { damping, .. }
            | ConvergenceStatus::NotConverged { damping, .. } => damping,
        }
    }
}

/// Everything read off a finished run.
#[derive(Debug, Clone)]
pub(super) struct FitState {
    pub(super) v: f64,
    pub(super) delta: f64,
    pub(super) beta: Vec<f64>,
    pub(super) status: ConvergenceStatus,
    pub(super) mean: Vec<f64>,
    pub(super) variance: Vec<f64>,
    pub(super) terms: LmlTerms,
    pub(super) beta_gradient: Vec<f64>,
}

impl FitState {
    fn matches(&self, v: f64, delta: f64, beta: &[f64]) -> bool {
        self.v == v && self.delta == delta && self.beta == beta
    }
}

/// Expectation Propagation for an exponential-family likelihood with a
/// QS-decomposed covariance.
pub struct ExpFamEp<'qs, L: MomentProvider> {
    likelihood: L,
    covariates: DenseMatrix,
    qs: &'qs QsDecomposition,
    v: f64,
    delta: f64,
    beta: Vec<f64>,
    sites: SiteLik,
    config: EpConfig,
    fit: Option<FitState>,
    ep_runs: usize,
}

impl<'qs, L: MomentProvider> ExpFamEp<'qs, L> {
    /// Starts at `v = 1`, `delta = 0.5`, `beta = 0` with zero sites.
    pub fn new(
        likelihood: L,
        covariates: DenseMatrix,
        qs: &'qs QsDecomposition,
    ) -> Result<Self, EpError> {
        let n = qs.n_samples();
        if likelihood.n_samples() != n {
            return Err(EpError::DimensionMismatch {
                what: "phenotype",
                expected: n,
                got: likelihood.n_samples(),
            });
        }
        if covariates.nrows() != n {
            return Err(EpError::DimensionMismatch {
                what: "covariate rows",
                expected: n,
                got: covariates.nrows(),
            });
        }
        if !covariates.is_finite() {
            return Err(EpError::NonFiniteCovariates);
        }
        let p = covariates.ncols();

        Ok(Self {
            likelihood,
            covariates,
            qs,
            v: 1.0,
            delta: 0.5,
            beta: vec![0.0; p],
            sites: SiteLik::zeros(n),
            config: EpConfig::default(),
            fit: None,
            ep_runs: 0,
        })
    }

    pub fn with_config(mut self, config: EpConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EpConfig {
        &self.config
    }

    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    pub fn covariates(&self) -> &DenseMatrix {
        &self.covariates
    }

    pub fn qs(&self) -> &'qs QsDecomposition {
        self.qs
    }

    pub fn n_samples(&self) -> usize {
        self.qs.n_samples()
    }

    /// Number of times the fixed-point loop has been entered.
    pub fn ep_runs(&self) -> usize {
        self.ep_runs
    }

    pub fn sites(&self) -> &SiteLik {
        &self.sites
    }

    pub fn v(&self) -> f64 {
        self.v
    }

    pub fn set_v(&mut self, v: f64) -> Result<(), EpError> {
        if !v.is_finite() || v <= 0.0 {
            return Err(EpError::InvalidHyperparameter {
                name: "v",
                value: v,
                reason: "must be finite and positive",
            });
        }
        self.v = v;
        Ok(())
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<(), EpError> {
        if !(0.0..=1.0).contains(&delta) {
            return Err(EpError::InvalidHyperparameter {
                name: "delta",
                value: delta,
                reason: "must lie in [0, 1]",
            });
        }
        self.delta = delta;
        Ok(())
    }

    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    pub fn set_beta(&mut self, beta: &[f64]) -> Result<(), EpError> {
        if beta.len() != self.covariates.ncols() {
            return Err(EpError::DimensionMismatch {
                what: "beta",
                expected: self.covariates.ncols(),
                got: beta.len(),
            });
        }
        if let Some(&b) = beta.iter().find(|b| !b.is_finite()) {
            return Err(EpError::InvalidHyperparameter {
                name: "beta",
                value: b,
                reason: "must be finite",
            });
        }
        self.beta.copy_from_slice(beta);
        Ok(())
    }

    /// Genetic variance `v (1 - delta)`.
    pub fn sigma2_b(&self) -> f64 {
        self.v * (1.0 - self.delta)
    }

    /// Environmental variance `v delta`.
    pub fn sigma2_epsilon(&self) -> f64 {
        self.v * self.delta
    }

    /// Share of the latent variance explained by `Q0 S0 Q0'`.
    pub fn heritability(&self) -> f64 {
        self.sigma2_b() / (self.sigma2_b() + self.sigma2_epsilon())
    }

    /// Convergence status of the run at the current hyperparameters.
    pub fn status(&mut self) -> Result<ConvergenceStatus, EpError> {
        Ok(self.ensure_fit()?.status)
    }

    pub fn posterior_mean(&mut self) -> Result<Vec<f64>, EpError> {
        Ok(self.ensure_fit()?.mean.clone())
    }

    pub fn posterior_variance(&mut self) -> Result<Vec<f64>, EpError> {
        Ok(self.ensure_fit()?.variance.clone())
    }

    /// Run EP at the current hyperparameters with an explicit budget and
    /// cache the result.
    pub fn run(
        &mut self,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<ConvergenceStatus, EpError> {
        self.fit = None;
        let state = self.iterate(max_iterations, tolerance)?;
        let status = state.status;
        self.fit = Some(state);
        Ok(status)
    }

    pub(super) fn ensure_fit(&mut self) -> Result<&FitState, EpError> {
        let state = match self.fit.take() {
            Some(fit) if fit.matches(self.v, self.delta, &self.beta) => fit,
            _ => self.iterate(self.config.max_iterations, self.config.tolerance)?,
        };
        Ok(self.fit.insert(state))
    }

    fn posterior(&self) -> Result<SpectralPosterior<'qs>, EpError> {
        SpectralPosterior::new(self.qs, self.v, self.delta, self.sites.tau())
    }

    fn iterate(&mut self, max_iterations: usize, tolerance: f64) -> Result<FitState, EpError> {
        let n = self.n_samples();
        if self.config.site_init == SiteInit::Reset {
            self.sites.reset();
        }
        self.ep_runs += 1;

        let prior_mean = self.covariates.mat_vec(&self.beta);
        let mut cavity = Cavity::zeros(n);
        let mut damping = 1.0;
        let mut previous_change = f64::INFINITY;
        let mut status = ConvergenceStatus::NotConverged {
            iterations: 0,
            max_change: f64::INFINITY,
            damping,
        };

        for iter in 0..max_iterations {
            let posterior = self.posterior()?;
            let mean = posterior.mean(&prior_mean, self.sites.eta());
            let variance = posterior.diag();
            cavity.update(&mean, &variance, &self.sites);

            let mut max_change: f64 = 0.0;
            let (mut skipped, mut rejected) = (0usize, 0usize);
            for i in 0..n {
                if !cavity.is_proper(i) {
                    skipped += 1;
                    debug!(
                        "Skipping site {}: cavity precision {:.3e}",
                        i,
                        cavity.tau()[i]
                    );
                    continue;
                }
                let (cavity_mean, cavity_variance) = (cavity.mean(i), cavity.variance(i));
                let moments = self.likelihood.moments(i, cavity_mean, cavity_variance)?;
                if !moments.is_finite() {
                    return Err(EpError::NonFinite("tilted moments"));
                }

                let tilted_variance = moments.tilted_variance(cavity_variance);
                let tilted_mean = moments.tilted_mean(cavity_mean, cavity_variance);
                let tau_new = 1.0 / tilted_variance - cavity.tau()[i];
                let eta_new = tilted_mean / tilted_variance - cavity.eta()[i];

                match self.sites.update(i, tau_new, eta_new, damping) {
                    SiteUpdate::Accepted { change } => max_change = max_change.max(change),
                    SiteUpdate::Rejected { tau } => {
                        rejected += 1;
                        debug!("Rejected update of site {}: precision {:.3e}", i, tau)
                    }
                }
            }

            debug!(
                "EP sweep {}: max site change {:.3e}, damping {}, {} rejected, {} skipped",
                iter + 1,
                max_change,
                damping,
                rejected,
                skipped
            );

            // rejected or skipped sites block convergence
            if max_change < tolerance && rejected == 0 && skipped == 0 {
                status = ConvergenceStatus::Converged {
                    iterations: iter + 1,
                    max_change,
                    damping,
                };
                break;
            }
            status = ConvergenceStatus::NotConverged {
                iterations: iter + 1,
                max_change,
                damping,
            };
            if max_change > previous_change && damping > self.config.min_damping {
                damping = (damping * 0.5).max(self.config.min_damping);
                debug!("Site changes grew; damping reduced to {}", damping);
            }
            previous_change = max_change;
        }

        match status {
            ConvergenceStatus::Converged { iterations, .. } => debug!(
                "EP converged after {} sweeps (v={:.6}, delta={:.6})",
                iterations, self.v, self.delta
            ),
            ConvergenceStatus::NotConverged {
                iterations,
                max_change,
                ..
            } => warn!(
                "EP did not converge after {} sweeps (max site change {:.3e})",
                iterations, max_change
            ),
        }

        self.finalize(prior_mean, status)
    }

    /// Recompute posterior, cavities and normalizers from the final sites.
    fn finalize(
        &self,
        prior_mean: Vec<f64>,
        status: ConvergenceStatus,
    ) -> Result<FitState, EpError> {
        let n = self.n_samples();
        let posterior = self.posterior()?;
        let mean = posterior.mean(&prior_mean, self.sites.eta());
        let variance = posterior.diag();
        let mut cavity = Cavity::zeros(n);
        cavity.update(&mean, &variance, &self.sites);

        let mut log_zeroth = vec![0.0; n];
        for i in 0..n {
            if !cavity.is_proper(i) {
                return Err(EpError::ImproperCavity {
                    index: i,
                    tau: cavity.tau()[i],
                });
            }
            log_zeroth[i] = self
                .likelihood
                .moments(i, cavity.mean(i), cavity.variance(i))?
                .log_zeroth;
        }

        let terms = evaluate(
            &posterior,
            self.qs,
            &self.sites,
            &cavity,
            &log_zeroth,
            &prior_mean,
        );
        if !terms.lml.is_finite() {
            return Err(EpError::NonFinite("log marginal likelihood"));
        }
        let beta_gradient = self.covariates.t_mat_vec(&terms.b);

        Ok(FitState {
            v: self.v,
            delta: self.delta,
            beta: self.beta.clone(),
            status,
            mean,
            variance,
            terms,
            beta_gradient,
        })
    }
}
