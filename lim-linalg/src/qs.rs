//! Economic QS decomposition of a positive semi-definite covariance.
//!
//! `K = Q0 diag(S0) Q0'`, where the columns of `[Q0 Q1]` form an orthonormal
//! basis of the sample space. `Q0` spans the range of `K` and `Q1` its null
//! space. Models built on this type treat it as read-only and may share one
//! decomposition between many fits.

use crate::decomposition::{symmetric_eigen, LinalgError};
use crate::dense::DenseMatrix;

/// Eigenvalues below this threshold are assigned to the null space.
pub const RANK_TOLERANCE: f64 = 1.4901161193847656e-8;

/// Accepted deviation of a basis row norm from one.
const BASIS_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct QsDecomposition {
    q0: DenseMatrix,
    q1: DenseMatrix,
    s0: Vec<f64>,
}

impl QsDecomposition {
    /// Validates shapes, positivity of `s0` and that `[Q0 Q1]` has unit-norm
    /// rows, which together with `n` columns is what a complete orthonormal
    /// basis requires.
    pub fn new(q0: DenseMatrix, q1: DenseMatrix, s0: Vec<f64>) -> Result<Self, LinalgError> {
        let n = q0.nrows();
        if q1.nrows() != n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: q1.nrows(),
            });
        }
        if s0.len() != q0.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: q0.ncols(),
                got: s0.len(),
            });
        }
        if q0.ncols() + q1.ncols() != n {
            return Err(LinalgError::InvalidDecomposition(format!(
                "Q0 and Q1 have {} columns in total but there are {} samples",
                q0.ncols() + q1.ncols(),
                n
            )));
        }
        if !q0.is_finite() || !q1.is_finite() || s0.iter().any(|s| !s.is_finite()) {
            return Err(LinalgError::NonFinite);
        }
        if let Some(k) = s0.iter().position(|&s| s <= 0.0) {
            return Err(LinalgError::InvalidDecomposition(format!(
                "S0[{}] = {} is not positive",
                k, s0[k]
            )));
        }

        let r0 = q0.row_sq_norms();
        let r1 = q1.row_sq_norms();
        for i in 0..n {
            let norm = r0[i] + r1[i];
            if (norm - 1.0).abs() > BASIS_TOLERANCE {
                return Err(LinalgError::InvalidDecomposition(format!(
                    "row {} of [Q0 Q1] has squared norm {:.6}",
                    i, norm
                )));
            }
        }

        Ok(Self { q0, q1, s0 })
    }

    /// Same eigenvectors, different eigenvalues.
    pub fn with_eigenvalues(&self, s0: Vec<f64>) -> Result<Self, LinalgError> {
        Self::new(self.q0.clone(), self.q1.clone(), s0)
    }

    pub fn n_samples(&self) -> usize {
        self.q0.nrows()
    }

    /// Number of non-null eigenpairs.
    pub fn rank(&self) -> usize {
        self.s0.len()
    }

    pub fn q0(&self) -> &DenseMatrix {
        &self.q0
    }

    pub fn q1(&self) -> &DenseMatrix {
        &self.q1
    }

    pub fn s0(&self) -> &[f64] {
        &self.s0
    }

    /// Dense `Q0 diag(S0) Q0'`.
    pub fn covariance(&self) -> DenseMatrix {
        let n = self.n_samples();
        DenseMatrix::from_fn(n, n, |i, j| {
            (0..self.rank())
                .map(|k| self.q0.get(i, k) * self.s0[k] * self.q0.get(j, k))
                .sum()
        })
    }

    /// `x' K x` computed in the eigenbasis.
    pub fn quadratic_form(&self, x: &[f64]) -> f64 {
        self.q0
            .t_mat_vec(x)
            .iter()
            .zip(&self.s0)
            .map(|(p, s)| s * p * p)
            .sum()
    }
}

/// Split the eigendecomposition of `k` at [`RANK_TOLERANCE`].
pub fn economic_qs(k: &DenseMatrix) -> Result<QsDecomposition, LinalgError> {
    let evd = symmetric_eigen(k)?;
    let n = k.nrows();
    let rank = evd.values.iter().filter(|&&s| s >= RANK_TOLERANCE).count();

    // values are sorted descending, so the range space is the leading block
    let q0 = DenseMatrix::from_fn(n, rank, |i, j| evd.vectors.get(i, j));
    let q1 = DenseMatrix::from_fn(n, n - rank, |i, j| evd.vectors.get(i, rank + j));
    let s0 = evd.values[..rank].to_vec();
    QsDecomposition::new(q0, q1, s0)
}

/// QS decomposition of the linear kernel `G G'`.
pub fn economic_qs_linear(g: &DenseMatrix) -> Result<QsDecomposition, LinalgError> {
    economic_qs(&g.gram())
}
