//! Expectation Propagation over a QS-decomposed covariance.
//!
//! - [`site`]: per-sample site and cavity parameters
//! - [`posterior`]: the joint Gaussian posterior in the eigenbasis
//! - [`engine`]: the fixed-point loop and hyperparameter state
//! - [`lml`]: the marginal likelihood approximation and its gradients
//! - [`fit`]: joint hyperparameter optimization

pub mod engine;
mod error;
pub mod fit;
pub mod lml;
pub mod posterior;
pub mod site;

pub use engine::{ConvergenceStatus, EpConfig, ExpFamEp, SiteInit};
pub use error::EpError;
