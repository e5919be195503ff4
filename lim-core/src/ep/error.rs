use lim_linalg::LinalgError;
use thiserror::Error;

use crate::likelihood::QuadratureError;

#[derive(Error, Debug)]
pub enum EpError {
    #[error("Invalid phenotype at sample {index}: {reason}")]
    InvalidPhenotype { index: usize, reason: String },

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid value {value} for {name}: {reason}")]
    InvalidHyperparameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Covariates contain non-finite entries")]
    NonFiniteCovariates,

    #[error("Moment computation failed at sample {index}: {source}")]
    Moments {
        index: usize,
        source: QuadratureError,
    },

    #[error("Cavity at sample {index} has non-positive precision {tau:.3e}")]
    ImproperCavity { index: usize, tau: f64 },

    #[error("Non-finite {0} encountered")]
    NonFinite(&'static str),

    #[error(transparent)]
    Linalg(#[from] LinalgError),
}
