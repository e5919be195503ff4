#![allow(clippy::needless_range_loop)]
//! Dense matrix storage backed by faer.
//!
//! Sample-by-sample quantities (eigenvector blocks, covariate matrices,
//! genotype designs) all live in a `DenseMatrix`. Besides element access,
//! the type provides the handful of products the spectral code needs:
//! `A x`, `A' x`, `A' diag(w) A` and `A A'`.

use faer::Mat;

/// Column-major dense matrix wrapping faer's `Mat<f64>`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// All-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Matrix with every entry equal to `value`. Used for intercept-only
    /// covariate designs.
    pub fn full(nrows: usize, ncols: usize, value: f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, |_, _| value),
        }
    }

    /// Build a matrix entry by entry.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Build from row-major data, the layout test fixtures are written in.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Build an `nrows x ncols` matrix from its columns.
    pub fn from_columns(nrows: usize, columns: &[Vec<f64>]) -> Self {
        for c in columns {
            assert_eq!(c.len(), nrows);
        }
        let inner = Mat::from_fn(nrows, columns.len(), |i, j| columns[j][i]);
        Self { inner }
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// True when no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                if !self.inner.read(i, j).is_finite() {
                    return false;
                }
            }
        }
        true
    }

    /// `A v`.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += self.inner.read(i, j) * vj;
            }
        }
        result
    }

    /// `A' v` without materializing the transpose.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        let n = self.nrows();
        (0..self.ncols())
            .map(|j| {
                let mut s = 0.0;
                for i in 0..n {
                    s += self.inner.read(i, j) * v[i];
                }
                s
            })
            .collect()
    }

    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        let result = &self.inner * &other.inner;
        DenseMatrix { inner: result }
    }

    pub fn transpose(&self) -> DenseMatrix {
        let inner = self.inner.transpose().to_owned();
        DenseMatrix { inner }
    }

    /// `A A'`, the linear kernel of a sample-by-feature design.
    pub fn gram(&self) -> DenseMatrix {
        let inner = self.inner.as_ref() * self.inner.transpose();
        DenseMatrix { inner }
    }

    pub fn col(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.inner.read(i, j)).collect()
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        (0..self.ncols()).map(|j| self.inner.read(i, j)).collect()
    }

    /// `a A + b I` for a square matrix.
    pub fn scale_add_identity(&self, a: f64, b: f64) -> DenseMatrix {
        assert_eq!(self.nrows(), self.ncols());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| {
            let d = if i == j { b } else { 0.0 };
            a * self.inner.read(i, j) + d
        });
        DenseMatrix { inner }
    }

    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.inner.read(i, i)).collect()
    }

    /// Squared Euclidean norm of every row, i.e. `diag(A A')`.
    pub fn row_sq_norms(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.nrows()];
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                let v = self.inner.read(i, j);
                out[i] += v * v;
            }
        }
        out
    }

    /// Squared Euclidean norm of every column, i.e. `diag(A' A)`.
    pub fn col_sq_norms(&self) -> Vec<f64> {
        (0..self.ncols())
            .map(|j| {
                let mut s = 0.0;
                for i in 0..self.nrows() {
                    let v = self.inner.read(i, j);
                    s += v * v;
                }
                s
            })
            .collect()
    }

    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// `A' diag(w) A`. With `A = Q0` this is the eigenbasis projection of
    /// a diagonal site-precision matrix.
    pub fn xtwx(&self, w: &[f64]) -> DenseMatrix {
        let n = self.nrows();
        let p = self.ncols();
        assert_eq!(w.len(), n);
        let mut result = DenseMatrix::zeros(p, p);
        for j in 0..p {
            for k in j..p {
                let mut s = 0.0;
                for i in 0..n {
                    s += self.inner.read(i, j) * w[i] * self.inner.read(i, k);
                }
                result.set(j, k, s);
                if j != k {
                    result.set(k, j, s);
                }
            }
        }
        result
    }
}
