//! lim-core: inference for generalised linear mixed models
//!
//! Expectation Propagation for Bernoulli, binomial and Poisson phenotypes
//! with a QS-decomposed covariance, a closed-form Gaussian LMM over the
//! same decomposition, and the optimizers that fit their hyperparameters.

pub mod ep;
pub mod likelihood;
pub mod lmm;
pub mod optimize;
pub mod util;

pub use ep::{ConvergenceStatus, EpConfig, EpError, ExpFamEp, SiteInit};
pub use likelihood::{Bernoulli, Binomial, LikelihoodKind, MomentProvider, Moments, Poisson};
pub use lmm::{FastLmm, FastLmmCore};
