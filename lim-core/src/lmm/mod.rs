//! Gaussian linear mixed model over the same QS decomposition used by EP.

pub mod fastlmm;
pub mod transform;

pub use fastlmm::{FastLmm, FastLmmCore, LmmFit, Prediction};
pub use transform::DesignMatrixTransform;
