//! EP approximation of the log marginal likelihood and its gradients.
//!
//! For sites `(tau, eta)`, cavities `(tau_c, eta_c)` and prior mean `m`:
//!
//!   log Z_EP = sum log Z_i + 1/2 sum log(1 + tau_i / tau_c,i)
//!            - 1/2 log |I + K T| + 1/2 u' Sigma u
//!            + 1/2 sum [eta_c,i (mu_c,i tau_i - 2 eta_i) - eta_i^2] / (tau_c,i + tau_i)
//!            + sum (eta_i m_i - 1/2 tau_i m_i^2)
//!
//! with `u = eta - T m`. At an EP fixed point the derivative with respect to
//! any prior parameter `theta` is `1/2 b' dK b - 1/2 tr(W dK)`, where
//! `b = u - T Sigma u` and `W = (K + T^{-1})^{-1}`; with respect to `beta`
//! it is `M' b`.

use lim_linalg::{DenseMatrix, QsDecomposition};

use super::engine::ExpFamEp;
use super::posterior::SpectralPosterior;
use super::site::{Cavity, SiteLik};
use super::EpError;
use crate::likelihood::MomentProvider;

/// Quantities the LML value and every gradient are assembled from.
#[derive(Debug, Clone)]
pub(super) struct LmlTerms {
    pub(super) lml: f64,
    pub(super) b: Vec<f64>,
    /// `b' b`
    pub(super) bb: f64,
    /// `b' G b` with `G = Q0 S0 Q0'`
    pub(super) bgb: f64,
    pub(super) tr_w: f64,
    pub(super) tr_wg: f64,
}

pub(super) fn evaluate(
    posterior: &SpectralPosterior<'_>,
    qs: &QsDecomposition,
    sites: &SiteLik,
    cavity: &Cavity,
    log_zeroth: &[f64],
    prior_mean: &[f64],
) -> LmlTerms {
    let tau = sites.tau();
    let eta = sites.eta();

    let mut lml = -0.5 * posterior.log_det();
    for i in 0..tau.len() {
        let (t, e, m) = (tau[i], eta[i], prior_mean[i]);
        let (tc, ec) = (cavity.tau()[i], cavity.eta()[i]);
        let mc = ec / tc;
        lml += log_zeroth[i];
        lml += 0.5 * (t / tc).ln_1p();
        lml += 0.5 * (ec * (mc * t - 2.0 * e) - e * e) / (tc + t);
        lml += e * m - 0.5 * t * m * m;
    }

    let u = posterior.natural_residual(prior_mean, eta);
    let su = posterior.dot(&u);
    lml += 0.5 * DenseMatrix::dot(&u, &su);

    let b: Vec<f64> = u
        .iter()
        .zip(&su)
        .zip(tau)
        .map(|((ui, si), t)| ui - t * si)
        .collect();
    let bb = DenseMatrix::dot(&b, &b);
    let bgb = qs.quadratic_form(&b);
    let (tr_w, tr_wg) = posterior.traces();

    LmlTerms {
        lml,
        b,
        bb,
        bgb,
        tr_w,
        tr_wg,
    }
}

impl LmlTerms {
    /// `dK/dv = (1 - delta) G + delta I`.
    fn over_v(&self, delta: f64) -> f64 {
        0.5 * ((1.0 - delta) * self.bgb + delta * self.bb)
            - 0.5 * ((1.0 - delta) * self.tr_wg + delta * self.tr_w)
    }

    /// `dK/ddelta = v (I - G)`.
    fn over_delta(&self, v: f64) -> f64 {
        v * (0.5 * (self.bb - self.bgb) - 0.5 * (self.tr_w - self.tr_wg))
    }
}

impl<'qs, L: MomentProvider> ExpFamEp<'qs, L> {
    /// EP approximation of the log marginal likelihood.
    pub fn lml(&mut self) -> Result<f64, EpError> {
        Ok(self.ensure_fit()?.terms.lml)
    }

    pub fn gradient_over_v(&mut self) -> Result<f64, EpError> {
        let fit = self.ensure_fit()?;
        Ok(fit.terms.over_v(fit.delta))
    }

    pub fn gradient_over_delta(&mut self) -> Result<f64, EpError> {
        let fit = self.ensure_fit()?;
        Ok(fit.terms.over_delta(fit.v))
    }

    /// `(d/dv, d/ddelta)` from a single EP run.
    pub fn gradient_over_both(&mut self) -> Result<(f64, f64), EpError> {
        let fit = self.ensure_fit()?;
        Ok((fit.terms.over_v(fit.delta), fit.terms.over_delta(fit.v)))
    }

    pub fn gradient_over_beta(&mut self) -> Result<Vec<f64>, EpError> {
        Ok(self.ensure_fit()?.beta_gradient.clone())
    }
}
