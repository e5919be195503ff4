#![allow(clippy::needless_range_loop)]
//! Linear mixed model with a Gaussian likelihood in the QS eigenbasis.
//!
//! `y ~ N(M beta, scale V)` with `V = (1 - delta) Q0 S0 Q0' + delta I`.
//! In the eigenbasis `V` is diagonal, `D0 = (1 - delta) S0 + delta` on the
//! `Q0` block and `delta` on the `Q1` block, so for fixed `delta` the GLS
//! estimate of `beta`, the profiled `scale` and the log-likelihood are all
//! closed-form.

use std::f64::consts::PI;

use anyhow::Result;
use lim_linalg::decomposition::solve_spd;
use lim_linalg::{economic_qs_linear, DenseMatrix, QsDecomposition};
use tracing::{debug, info};

use super::transform::DesignMatrixTransform;
use crate::ep::EpError;
use crate::optimize::maximize_scalar;
use crate::util::math::{delta_from_logistic, LOGISTIC_CLIP};

/// Maximum-likelihood quantities at a fixed `delta`.
#[derive(Debug, Clone)]
pub struct LmmFit {
    pub delta: f64,
    pub beta: Vec<f64>,
    pub scale: f64,
    pub lml: f64,
    r0: Vec<f64>,
    r1: Vec<f64>,
}

/// Predictive mean and variance for new samples.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FastLmmCore<'qs> {
    qs: &'qs QsDecomposition,
    y0: Vec<f64>,
    y1: Vec<f64>,
    m0: DenseMatrix,
    m1: DenseMatrix,
    delta: f64,
}

impl<'qs> FastLmmCore<'qs> {
    /// Rotates `y` and the covariates `M` into the eigenbasis once.
    pub fn new(
        y: &[f64],
        covariates: &DenseMatrix,
        qs: &'qs QsDecomposition,
    ) -> Result<Self, EpError> {
        let n = qs.n_samples();
        if y.len() != n {
            return Err(EpError::DimensionMismatch {
                what: "phenotype",
                expected: n,
                got: y.len(),
            });
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(EpError::InvalidPhenotype {
                index: i,
                reason: "value is not finite".to_string(),
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

        Ok(Self {
            qs,
            y0: qs.q0().t_mat_vec(y),
            y1: qs.q1().t_mat_vec(y),
            m0: qs.q0().transpose().mat_mul(covariates),
            m1: qs.q1().transpose().mat_mul(covariates),
            delta: 0.5,
        })
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// `delta` must lie in `(0, 1]`; at zero the null-space block would be singular.
    pub fn set_delta(&mut self, delta: f64) -> Result<(), EpError> {
        if !(delta > 0.0 && delta <= 1.0) {
            return Err(EpError::InvalidHyperparameter {
                name: "delta",
                value: delta,
                reason: "must lie in (0, 1]",
            });
        }
        self.delta = delta;
        Ok(())
    }

    fn d0(&self) -> Vec<f64> {
        self.qs
            .s0()
            .iter()
            .map(|s| (1.0 - self.delta) * s + self.delta)
            .collect()
    }

    pub fn fit(&self) -> Result<LmmFit, EpError> {
        let n = self.qs.n_samples();
        let n1 = self.y1.len();
        let delta = self.delta;
        let d0 = self.d0();
        let w0: Vec<f64> = d0.iter().map(|d| 1.0 / d).collect();
        let w1 = vec![1.0 / delta; n1];

        let p = self.m0.ncols();
        let a0 = self.m0.xtwx(&w0);
        let a1 = self.m1.xtwx(&w1);
        let xtdx = DenseMatrix::from_fn(p, p, |j, k| a0.get(j, k) + a1.get(j, k));
        let wy0: Vec<f64> = self.y0.iter().zip(&w0).map(|(y, w)| y * w).collect();
        let wy1: Vec<f64> = self.y1.iter().map(|y| y / delta).collect();
        let xtdy: Vec<f64> = self
            .m0
            .t_mat_vec(&wy0)
            .iter()
            .zip(self.m1.t_mat_vec(&wy1))
            .map(|(a, b)| a + b)
            .collect();
        let beta = solve_spd(&xtdx, &xtdy)?;

        let r0: Vec<f64> = self
            .y0
            .iter()
            .zip(self.m0.mat_vec(&beta))
            .map(|(y, m)| y - m)
            .collect();
        let r1: Vec<f64> = self
            .y1
            .iter()
            .zip(self.m1.mat_vec(&beta))
            .map(|(y, m)| y - m)
            .collect();

        let quad: f64 = r0.iter().zip(&w0).map(|(r, w)| r * r * w).sum::<f64>()
            + r1.iter().map(|r| r * r).sum::<f64>() / delta;
        let nf = n as f64;
        let scale = quad / nf;
        let log_det: f64 = d0.iter().map(|d| d.ln()).sum::<f64>() + n1 as f64 * delta.ln();
        let lml = -0.5 * nf * (2.0 * PI).ln() - 0.5 * log_det - 0.5 * nf * scale.ln() - 0.5 * nf;
        if !lml.is_finite() {
            return Err(EpError::NonFinite("profiled log-likelihood"));
        }

        Ok(LmmFit {
            delta,
            beta,
            scale,
            lml,
            r0,
            r1,
        })
    }

    pub fn lml(&self) -> Result<f64, EpError> {
        Ok(self.fit()?.lml)
    }

    /// Predictive distribution of new observations.
    ///
    /// `cross` holds the kernel between new and training samples (`m x n`),
    /// `self_diag` the kernel diagonal of the new samples and `covariates`
    /// their covariate rows.
    pub fn predict(
        &self,
        covariates: &DenseMatrix,
        cross: &DenseMatrix,
        self_diag: &[f64],
    ) -> Result<Prediction, EpError> {
        let m = cross.nrows();
        let n = self.qs.n_samples();
        if cross.ncols() != n {
            return Err(EpError::DimensionMismatch {
                what: "cross-covariance columns",
                expected: n,
                got: cross.ncols(),
            });
        }
        if covariates.nrows() != m || self_diag.len() != m {
            return Err(EpError::DimensionMismatch {
                what: "prediction rows",
                expected: m,
                got: covariates.nrows().min(self_diag.len()),
            });
        }
        if covariates.ncols() != self.m0.ncols() {
            return Err(EpError::DimensionMismatch {
                what: "prediction covariates",
                expected: self.m0.ncols(),
                got: covariates.ncols(),
            });
        }

        let fit = self.fit()?;
        let delta = fit.delta;
        let d0 = self.d0();
        let fixed = covariates.mat_vec(&fit.beta);

        // V^{-1} (y - M beta) in sample space
        let z0: Vec<f64> = fit.r0.iter().zip(&d0).map(|(r, d)| r / d).collect();
        let z1: Vec<f64> = fit.r1.iter().map(|r| r / delta).collect();
        let vr: Vec<f64> = self
            .qs
            .q0()
            .mat_vec(&z0)
            .iter()
            .zip(self.qs.q1().mat_vec(&z1))
            .map(|(a, b)| a + b)
            .collect();

        let mut mean = Vec::with_capacity(m);
        let mut variance = Vec::with_capacity(m);
        for j in 0..m {
            let c = cross.row(j);
            mean.push(fixed[j] + (1.0 - delta) * DenseMatrix::dot(&c, &vr));

            let c0 = self.qs.q0().t_mat_vec(&c);
            let c1 = self.qs.q1().t_mat_vec(&c);
            let explained: f64 = c0.iter().zip(&d0).map(|(v, d)| v * v / d).sum::<f64>()
                + c1.iter().map(|v| v * v).sum::<f64>() / delta;
            let prior = (1.0 - delta) * self_diag[j] + delta;
            variance.push(fit.scale * (prior - (1.0 - delta).powi(2) * explained));
        }

        Ok(Prediction { mean, variance })
    }
}

/// Spacing of the logistic grid scanned before the Brent search.
const SCAN_STEP: f64 = 1.0;

/// Intercept-only LMM whose covariance is the linear kernel of a
/// standardized design matrix.
#[derive(Debug, Clone)]
pub struct FastLmm {
    y: Vec<f64>,
    x: DenseMatrix,
    transform: DesignMatrixTransform,
    qs: QsDecomposition,
    intercept: DenseMatrix,
    logistic: f64,
    genetic_variance: Option<f64>,
    noise_variance: Option<f64>,
    offset: Option<f64>,
}

impl FastLmm {
    pub fn new(y: Vec<f64>, x: &DenseMatrix) -> Result<Self, EpError> {
        if x.nrows() != y.len() {
            return Err(EpError::DimensionMismatch {
                what: "design matrix rows",
                expected: y.len(),
                got: x.nrows(),
            });
        }
        let transform = DesignMatrixTransform::new(x)?;
        let x = transform.transform(x)?;
        let qs = economic_qs_linear(&x)?;
        let n = y.len();

        // validates the phenotype up front
        FastLmmCore::new(&y, &DenseMatrix::full(n, 1, 1.0), &qs)?;

        Ok(Self {
            y,
            x,
            transform,
            qs,
            intercept: DenseMatrix::full(n, 1, 1.0),
            logistic: 0.0,
            genetic_variance: None,
            noise_variance: None,
            offset: None,
        })
    }

    pub fn qs(&self) -> &QsDecomposition {
        &self.qs
    }

    pub fn logistic(&self) -> f64 {
        self.logistic
    }

    pub fn set_logistic(&mut self, logistic: f64) -> Result<(), EpError> {
        if !logistic.is_finite() {
            return Err(EpError::InvalidHyperparameter {
                name: "logistic",
                value: logistic,
                reason: "must be finite",
            });
        }
        self.logistic = logistic;
        Ok(())
    }

    pub fn delta(&self) -> f64 {
        delta_from_logistic(self.logistic)
    }

    pub fn genetic_variance(&self) -> Option<f64> {
        self.genetic_variance
    }

    pub fn noise_variance(&self) -> Option<f64> {
        self.noise_variance
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    fn core(&self) -> Result<FastLmmCore<'_>, EpError> {
        let mut core = FastLmmCore::new(&self.y, &self.intercept, &self.qs)?;
        core.set_delta(self.delta())?;
        Ok(core)
    }

    /// Profiled log-likelihood at the current `logistic`.
    pub fn value(&self) -> Result<f64, EpError> {
        self.core()?.lml()
    }

    /// Maximize [`FastLmm::value`] over `logistic` and store the variance
    /// decomposition at the optimum.
    pub fn learn(&mut self) -> Result<()> {
        let outcome = {
            let mut core = self.core()?;
            let mut profile = |x: f64| -> Result<f64> {
                core.set_delta(delta_from_logistic(x))?;
                Ok(core.lml()?)
            };

            // coarse scan first; Brent alone can settle on a local maximum
            let mut center = 0.0;
            let mut best = f64::NEG_INFINITY;
            let mut x = -LOGISTIC_CLIP;
            while x <= LOGISTIC_CLIP {
                let value = profile(x)?;
                if value > best {
                    best = value;
                    center = x;
                }
                x += SCAN_STEP;
            }
            debug!("FastLMM scan: best logistic {} (lml={:.6})", center, best);

            let lower = (center - SCAN_STEP).max(-LOGISTIC_CLIP);
            let upper = (center + SCAN_STEP).min(LOGISTIC_CLIP);
            maximize_scalar(profile, lower, upper, 200)?
        };
        self.set_logistic(outcome.x)?;
        let fit = self.core()?.fit()?;

        self.genetic_variance = Some(fit.scale * (1.0 - fit.delta));
        self.noise_variance = Some(fit.scale * fit.delta);
        self.offset = Some(fit.beta[0]);
        info!(
            "FastLMM learned: delta={:.6}, scale={:.6}, offset={:.6}, lml={:.6}",
            fit.delta, fit.scale, fit.beta[0], fit.lml
        );
        Ok(())
    }

    /// Predict new phenotypes from their raw design rows.
    pub fn predict(&self, xp: &DenseMatrix) -> Result<Prediction, EpError> {
        let xp = self.transform.transform(xp)?;
        let cross = xp.mat_mul(&self.x.transpose());
        let self_diag = xp.row_sq_norms();
        let covariates = DenseMatrix::full(xp.nrows(), 1, 1.0);
        self.core()?.predict(&covariates, &cross, &self_diag)
    }
}
