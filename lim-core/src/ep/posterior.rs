#![allow(clippy::needless_range_loop)]
//! Gaussian posterior of the latent predictor in the QS eigenbasis.
//!
//! With `K = v (1 - delta) Q0 S0 Q0' + v delta I` write `e = v delta` and
//! `U = Q0 D^{1/2}`, `D = v (1 - delta) S0`, so that `K = e I + U U'`.
//! For diagonal site precisions `T` define
//!
//!   A  = T (I + e T)^{-1}
//!   Ge = (I + e T)^{-1}
//!   C  = I + U' A U = L L'           (r x r)
//!
//! Then
//!
//!   Sigma = (K^{-1} + T)^{-1} = e Ge + Ge U C^{-1} U' Ge
//!   (K + T^{-1})^{-1}         = A - A U C^{-1} U' A
//!   log |I + K T|             = sum log(1 + e tau) + log |C|
//!
//! None of these needs `K^{-1}` or `1 / tau`, so zero site precisions and
//! `delta = 0` are both handled. All `n x n` work is replaced by products
//! with `X = L^{-1} U'`, an `r x n` matrix built once per factorization.

use lim_linalg::{CholeskyDecomp, DenseMatrix, QsDecomposition};

use super::EpError;

#[derive(Debug, Clone)]
pub struct SpectralPosterior<'qs> {
    qs: &'qs QsDecomposition,
    noise: f64,
    tau: Vec<f64>,
    a: Vec<f64>,
    ge: Vec<f64>,
    x: DenseMatrix,
    x_col_sq: Vec<f64>,
    log_det_c: f64,
}

impl<'qs> SpectralPosterior<'qs> {
    pub fn new(
        qs: &'qs QsDecomposition,
        v: f64,
        delta: f64,
        tau: &[f64],
    ) -> Result<Self, EpError> {
        let n = qs.n_samples();
        let r = qs.rank();
        if tau.len() != n {
            return Err(EpError::DimensionMismatch {
                what: "site precisions",
                expected: n,
                got: tau.len(),
            });
        }

        let noise = v * delta;
        let sqrt_d: Vec<f64> = qs
            .s0()
            .iter()
            .map(|s| (v * (1.0 - delta) * s).sqrt())
            .collect();
        let ge: Vec<f64> = tau.iter().map(|t| 1.0 / (1.0 + noise * t)).collect();
        let a: Vec<f64> = tau.iter().zip(&ge).map(|(t, g)| t * g).collect();

        let q0 = qs.q0();
        let p = q0.xtwx(&a);
        let c = DenseMatrix::from_fn(r, r, |j, k| {
            let identity = if j == k { 1.0 } else { 0.0 };
            identity + sqrt_d[j] * p.get(j, k) * sqrt_d[k]
        });
        let chol = CholeskyDecomp::new(&c)?;

        let ut = DenseMatrix::from_fn(r, n, |k, i| sqrt_d[k] * q0.get(i, k));
        let x = chol.forward_substitute_matrix(&ut);
        let x_col_sq = x.col_sq_norms();

        Ok(Self {
            qs,
            noise,
            tau: tau.to_vec(),
            a,
            ge,
            x,
            x_col_sq,
            log_det_c: chol.log_det(),
        })
    }

    pub fn n_samples(&self) -> usize {
        self.tau.len()
    }

    /// `U C^{-1} U' z`.
    fn low_rank(&self, z: &[f64]) -> Vec<f64> {
        let w = self.x.mat_vec(z);
        self.x.t_mat_vec(&w)
    }

    /// `Sigma z`.
    pub fn dot(&self, z: &[f64]) -> Vec<f64> {
        let gz: Vec<f64> = z.iter().zip(&self.ge).map(|(zi, g)| zi * g).collect();
        let low = self.low_rank(&gz);
        (0..self.n_samples())
            .map(|i| self.noise * gz[i] + self.ge[i] * low[i])
            .collect()
    }

    /// Marginal posterior variances.
    pub fn diag(&self) -> Vec<f64> {
        (0..self.n_samples())
            .map(|i| self.noise * self.ge[i] + self.ge[i] * self.ge[i] * self.x_col_sq[i])
            .collect()
    }

    /// Posterior mean `m + Sigma (eta - T m)` for prior mean `m`.
    pub fn mean(&self, prior_mean: &[f64], eta: &[f64]) -> Vec<f64> {
        let u = self.natural_residual(prior_mean, eta);
        let su = self.dot(&u);
        prior_mean.iter().zip(&su).map(|(m, s)| m + s).collect()
    }

    /// `eta - T m`.
    pub fn natural_residual(&self, prior_mean: &[f64], eta: &[f64]) -> Vec<f64> {
        eta.iter()
            .zip(&self.tau)
            .zip(prior_mean)
            .map(|((e, t), m)| e - t * m)
            .collect()
    }

    /// `(K + T^{-1})^{-1} z`.
    pub fn woodbury_dot(&self, z: &[f64]) -> Vec<f64> {
        let az: Vec<f64> = z.iter().zip(&self.a).map(|(zi, a)| zi * a).collect();
        let low = self.low_rank(&az);
        az.iter()
            .zip(&low)
            .zip(&self.a)
            .map(|((azi, l), a)| azi - a * l)
            .collect()
    }

    /// `log |I + K T|`.
    pub fn log_det(&self) -> f64 {
        let diag: f64 = self.tau.iter().map(|t| (self.noise * t).ln_1p()).sum();
        diag + self.log_det_c
    }

    /// `tr(W)` and `tr(W G)` for `W = (K + T^{-1})^{-1}` and `G = Q0 S0 Q0'`.
    pub fn traces(&self) -> (f64, f64) {
        let q0 = self.qs.q0();
        let s0 = self.qs.s0();
        let n = self.n_samples();
        let r = self.qs.rank();

        let mut tr_w: f64 = self.a.iter().sum();
        for i in 0..n {
            let a2 = self.a[i] * self.a[i];
            for k in 0..r {
                let xv = self.x.get(k, i);
                tr_w -= xv * xv * a2;
            }
        }

        let mut tr_wg = 0.0;
        for j in 0..r {
            let mut p_jj = 0.0;
            for i in 0..n {
                let q = q0.get(i, j);
                p_jj += q * q * self.a[i];
            }
            tr_wg += s0[j] * p_jj;
        }
        let xa = DenseMatrix::from_fn(r, n, |k, i| self.x.get(k, i) * self.a[i]);
        let y = xa.mat_mul(q0);
        for j in 0..r {
            for k in 0..r {
                let yv = y.get(k, j);
                tr_wg -= yv * yv * s0[j];
            }
        }

        (tr_w, tr_wg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lim_linalg::decomposition::inverse_spd;
    use lim_linalg::economic_qs;

    fn kernel() -> DenseMatrix {
        DenseMatrix::from_row_major(
            4,
            4,
            &[
                2.0, 0.5, 0.3, 0.1, //
                0.5, 1.5, 0.2, 0.4, //
                0.3, 0.2, 1.2, 0.6, //
                0.1, 0.4, 0.6, 1.8,
            ],
        )
    }

    fn dense_prior(qs: &QsDecomposition, v: f64, delta: f64) -> DenseMatrix {
        qs.covariance().scale_add_identity(v * (1.0 - delta), v * delta)
    }

    #[test]
    fn test_covariance_matches_dense_inverse() {
        let qs = economic_qs(&kernel()).unwrap();
        let (v, delta) = (1.3, 0.25);
        let tau = [0.7, 0.0, 2.5, 0.1];
        let post = SpectralPosterior::new(&qs, v, delta, &tau).unwrap();

        let k = dense_prior(&qs, v, delta);
        let k_inv = inverse_spd(&k).unwrap();
        let precision = DenseMatrix::from_fn(4, 4, |i, j| {
            k_inv.get(i, j) + if i == j { tau[i] } else { 0.0 }
        });
        let sigma = inverse_spd(&precision).unwrap();

        let diag = post.diag();
        for i in 0..4 {
            assert!((diag[i] - sigma.get(i, i)).abs() < 1e-10);
        }
        let z = [0.2, -1.0, 0.5, 3.0];
        let expected = sigma.mat_vec(&z);
        let got = post.dot(&z);
        for i in 0..4 {
            assert!((got[i] - expected[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_log_det_matches_dense() {
        let qs = economic_qs(&kernel()).unwrap();
        let (v, delta) = (0.8, 0.6);
        let tau = [1.0, 0.4, 0.0, 3.0];
        let post = SpectralPosterior::new(&qs, v, delta, &tau).unwrap();

        let k = dense_prior(&qs, v, delta);
        // I + K T is not symmetric; use |I + T^{1/2} K T^{1/2}| instead
        let b = DenseMatrix::from_fn(4, 4, |i, j| {
            let identity = if i == j { 1.0 } else { 0.0 };
            identity + tau[i].sqrt() * k.get(i, j) * tau[j].sqrt()
        });
        let expected = CholeskyDecomp::new(&b).unwrap().log_det();
        assert!((post.log_det() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_traces_match_dense() {
        let qs = economic_qs(&kernel()).unwrap();
        let (v, delta) = (1.1, 0.3);
        let tau = [0.5, 1.5, 0.2, 0.9];
        let post = SpectralPosterior::new(&qs, v, delta, &tau).unwrap();

        let k = dense_prior(&qs, v, delta);
        let kt = DenseMatrix::from_fn(4, 4, |i, j| {
            k.get(i, j) + if i == j { 1.0 / tau[i] } else { 0.0 }
        });
        let w = inverse_spd(&kt).unwrap();
        let wg = w.mat_mul(&qs.covariance());
        let tr_w: f64 = w.diag().iter().sum();
        let tr_wg: f64 = wg.diag().iter().sum();

        let (got_w, got_wg) = post.traces();
        assert!((got_w - tr_w).abs() < 1e-10, "{} vs {}", got_w, tr_w);
        assert!((got_wg - tr_wg).abs() < 1e-10, "{} vs {}", got_wg, tr_wg);

        let z = [1.0, -0.5, 0.25, 2.0];
        let expected = w.mat_vec(&z);
        let got = post.woodbury_dot(&z);
        for i in 0..4 {
            assert!((got[i] - expected[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_zero_sites_give_prior() {
        let qs = economic_qs(&kernel()).unwrap();
        let post = SpectralPosterior::new(&qs, 2.0, 0.4, &[0.0; 4]).unwrap();
        let k = dense_prior(&qs, 2.0, 0.4);
        let diag = post.diag();
        for i in 0..4 {
            assert!((diag[i] - k.get(i, i)).abs() < 1e-12);
        }
        assert!(post.log_det().abs() < 1e-12);
        let m = post.mean(&[1.0; 4], &[0.0; 4]);
        assert!(m.iter().all(|x| (x - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_dimension_mismatch() {
        let qs = economic_qs(&kernel()).unwrap();
        assert!(matches!(
            SpectralPosterior::new(&qs, 1.0, 0.5, &[1.0; 3]),
            Err(EpError::DimensionMismatch { .. })
        ));
    }
}
