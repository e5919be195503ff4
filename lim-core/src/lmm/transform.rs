//! Column standardization for genotype-like design matrices.

use lim_linalg::DenseMatrix;

use crate::ep::EpError;

/// Drops numerically constant columns, centres and scales the rest to unit
/// variance and divides by `sqrt(p_kept)`, so that `X X'` has unit average
/// diagonal.
#[derive(Debug, Clone)]
pub struct DesignMatrixTransform {
    n_features: usize,
    kept: Vec<usize>,
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl DesignMatrixTransform {
    /// Learn column statistics from `x`.
    pub fn new(x: &DenseMatrix) -> Result<Self, EpError> {
        if !x.is_finite() {
            return Err(EpError::NonFiniteCovariates);
        }
        let n = x.nrows() as f64;
        let mut kept = Vec::new();
        let mut mean = Vec::new();
        let mut std = Vec::new();
        for j in 0..x.ncols() {
            let col = x.col(j);
            let m = col.iter().sum::<f64>() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let s = var.sqrt();
            if s > 1e-12 * m.abs().max(1.0) {
                kept.push(j);
                mean.push(m);
                std.push(s);
            }
        }
        Ok(Self {
            n_features: x.ncols(),
            kept,
            mean,
            std,
        })
    }

    /// Indices of the columns that survive the transform.
    pub fn kept_columns(&self) -> &[usize] {
        &self.kept
    }

    pub fn transform(&self, x: &DenseMatrix) -> Result<DenseMatrix, EpError> {
        if x.ncols() != self.n_features {
            return Err(EpError::DimensionMismatch {
                what: "design matrix columns",
                expected: self.n_features,
                got: x.ncols(),
            });
        }
        let norm = (self.kept.len() as f64).sqrt();
        Ok(DenseMatrix::from_fn(x.nrows(), self.kept.len(), |i, j| {
            (x.get(i, self.kept[j]) - self.mean[j]) / (self.std[j] * norm)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_columns_dropped() {
        let x = DenseMatrix::from_row_major(
            4,
            3,
            &[
                1.0, 0.1, 0.0, //
                1.0, 0.1, 2.0, //
                1.0, 0.1, 1.0, //
                1.0, 0.1, 1.0,
            ],
        );
        let t = DesignMatrixTransform::new(&x).unwrap();
        assert_eq!(t.kept_columns(), &[2]);
        let z = t.transform(&x).unwrap();
        assert_eq!(z.ncols(), 1);
        let col = z.col(0);
        assert!(col.iter().sum::<f64>().abs() < 1e-12);
        let var = col.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gram_has_unit_average_diagonal() {
        let x = DenseMatrix::from_row_major(3, 2, &[0.0, 1.0, 1.0, 2.0, 2.0, 0.0]);
        let t = DesignMatrixTransform::new(&x).unwrap();
        let z = t.transform(&x).unwrap();
        let trace: f64 = z.row_sq_norms().iter().sum();
        assert!((trace / 3.0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_column_count_checked() {
        let x = DenseMatrix::from_row_major(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let t = DesignMatrixTransform::new(&x).unwrap();
        let wrong = DenseMatrix::zeros(2, 3);
        assert!(matches!(
            t.transform(&wrong),
            Err(EpError::DimensionMismatch { .. })
        ));
    }
}
