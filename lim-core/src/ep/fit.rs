//! Joint maximization of the EP marginal likelihood.
//!
//! The optimizer works on `x = [ln v, logit delta, beta...]`, which keeps
//! `v` positive and `delta` inside `[1e-5, 1 - 1e-5]` without constraints.

use anyhow::{anyhow, Result};
use tracing::info;

use super::engine::ExpFamEp;
use crate::likelihood::MomentProvider;
use crate::optimize::{maximize, Objective, OptimizeConfig, OptimizeOutcome};
use crate::util::math::{
    delta_from_logistic, delta_logistic_slope, logistic_from_delta, DELTA_MAX, DELTA_MIN,
};

impl<L: MomentProvider> Objective for ExpFamEp<'_, L> {
    fn set_params(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != 2 + self.beta().len() {
            return Err(anyhow!(
                "expected {} parameters, got {}",
                2 + self.beta().len(),
                params.len()
            ));
        }
        self.set_v(params[0].exp())?;
        self.set_delta(delta_from_logistic(params[1]))?;
        self.set_beta(&params[2..])?;
        Ok(())
    }

    fn value(&mut self) -> Result<f64> {
        Ok(self.lml()?)
    }

    fn gradient(&mut self) -> Result<Vec<f64>> {
        let (dv, ddelta) = self.gradient_over_both()?;
        let dbeta = self.gradient_over_beta()?;
        let mut grad = Vec::with_capacity(2 + dbeta.len());
        grad.push(self.v() * dv);
        grad.push(delta_logistic_slope(self.delta()) * ddelta);
        grad.extend(dbeta);
        Ok(grad)
    }
}

impl<L: MomentProvider> ExpFamEp<'_, L> {
    /// Maximize the LML over `v`, `delta` and `beta` with default settings.
    pub fn optimize(&mut self) -> Result<OptimizeOutcome> {
        self.optimize_with(&OptimizeConfig::default())
    }

    /// Maximize the LML and leave the engine at the best point found.
    pub fn optimize_with(&mut self, config: &OptimizeConfig) -> Result<OptimizeOutcome> {
        // a clipped delta has zero slope in the logistic scale
        let delta0 = if self.delta() <= DELTA_MIN || self.delta() >= DELTA_MAX {
            0.5
        } else {
            self.delta()
        };
        let mut x0 = vec![self.v().ln(), logistic_from_delta(delta0)];
        x0.extend_from_slice(self.beta());

        info!(
            "Optimizing EP hyperparameters: n={}, covariates={}",
            self.n_samples(),
            self.beta().len()
        );
        let outcome = maximize(self, x0, config)?;
        let lml = self.lml()?;
        info!(
            "EP optimization finished after {} iterations (converged: {}): lml={:.6}, v={:.6}, delta={:.6}",
            outcome.iterations,
            outcome.converged,
            lml,
            self.v(),
            self.delta()
        );

        Ok(OptimizeOutcome {
            value: lml,
            ..outcome
        })
    }
}
