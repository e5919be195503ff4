//! lim-linalg: linear algebra for lim-rs
//!
//! Dense matrices, small Cholesky factors, symmetric eigendecompositions
//! and the economic QS decomposition that every covariance in the
//! inference crates is expressed through.

pub mod decomposition;
pub mod dense;
pub mod qs;

pub use decomposition::{CholeskyDecomp, LinalgError};
pub use dense::DenseMatrix;
pub use qs::{economic_qs, economic_qs_linear, QsDecomposition};
