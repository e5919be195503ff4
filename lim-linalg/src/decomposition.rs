#![allow(clippy::needless_range_loop)]
//! Cholesky factors and symmetric eigendecompositions.
//!
//! The EP posterior only ever factors small `r x r` capacitance matrices,
//! so the Cholesky here is a plain column-by-column implementation with
//! forward and backward substitution exposed separately. Eigendecomposition
//! is delegated to faer.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("Matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Matrix contains non-finite entries")]
    NonFinite,

    #[error("Invalid spectral decomposition: {0}")]
    InvalidDecomposition(String),
}

/// Lower-triangular factor `L` with `A = L L'`.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if !(diag > 0.0) || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite { pivot: j });
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Solve `L y = b`.
    pub fn forward_substitute(&self, b: &[f64]) -> Vec<f64> {
        let n = self.dim();
        assert_eq!(b.len(), n);
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }
        y
    }

    /// Solve `L' x = y`.
    pub fn backward_substitute(&self, y: &[f64]) -> Vec<f64> {
        let n = self.dim();
        assert_eq!(y.len(), n);
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }
        x
    }

    /// Solve `L L' x = b`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let y = self.forward_substitute(b);
        self.backward_substitute(&y)
    }

    /// `L^{-1} B`, applied column by column.
    pub fn forward_substitute_matrix(&self, b: &DenseMatrix) -> DenseMatrix {
        let cols: Vec<Vec<f64>> = (0..b.ncols())
            .map(|j| self.forward_substitute(&b.col(j)))
            .collect();
        DenseMatrix::from_columns(self.dim(), &cols)
    }

    /// `log |A| = 2 sum_k log L_kk`.
    pub fn log_det(&self) -> f64 {
        2.0 * (0..self.dim()).map(|k| self.l.get(k, k).ln()).sum::<f64>()
    }

    pub fn inverse(&self) -> DenseMatrix {
        let n = self.dim();
        let cols: Vec<Vec<f64>> = (0..n)
            .map(|j| {
                let mut e = vec![0.0; n];
                e[j] = 1.0;
                self.solve(&e)
            })
            .collect();
        DenseMatrix::from_columns(n, &cols)
    }
}

/// Eigenpairs of a symmetric matrix, eigenvalues in descending order.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    /// Eigenvectors as columns, aligned with `values`.
    pub vectors: DenseMatrix,
}

pub fn symmetric_eigen(a: &DenseMatrix) -> Result<SymmetricEigen, LinalgError> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            got: a.ncols(),
        });
    }
    if n == 0 {
        return Err(LinalgError::InvalidDecomposition(
            "cannot decompose an empty matrix".to_string(),
        ));
    }
    if !a.is_finite() {
        return Err(LinalgError::NonFinite);
    }

    let evd = a.as_faer().selfadjoint_eigendecomposition(faer::Side::Lower);
    let s = evd.s();
    let u = evd.u();

    let raw: Vec<f64> = (0..n).map(|i| s.column_vector().read(i)).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| raw[j].total_cmp(&raw[i]));

    let values = order.iter().map(|&k| raw[k]).collect();
    let vectors = DenseMatrix::from_fn(n, n, |i, j| u.read(i, order[j]));
    Ok(SymmetricEigen { values, vectors })
}

/// Solve `A x = b` for symmetric positive definite `A`.
pub fn solve_spd(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.solve(b))
}

pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.inverse())
}
