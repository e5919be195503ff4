//! Maximizers for model objectives, driven through argmin.
//!
//! argmin minimizes, so both drivers wrap the objective in an adapter that
//! negates value and gradient. The adapters also remember the best point
//! evaluated, which is what callers get back if the solver stops with an
//! error (typically a failed line search), together with how many
//! evaluations were made before it stopped.

use std::cell::{Cell, RefCell};

use anyhow::{anyhow, Result};
use argmin::core::{
    CostFunction, Error, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::brent::BrentOpt;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use tracing::{debug, warn};

/// A smooth objective over a parameter vector.
pub trait Objective {
    fn set_params(&mut self, params: &[f64]) -> Result<()>;
    fn value(&mut self) -> Result<f64>;
    fn gradient(&mut self) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub max_iterations: u64,
    /// L-BFGS stops once the gradient norm drops below this.
    pub gradient_tolerance: f64,
    /// L-BFGS stops once the objective changes by less than this.
    pub cost_tolerance: f64,
    /// Number of correction pairs kept by L-BFGS.
    pub memory: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            gradient_tolerance: 1e-6,
            cost_tolerance: 1e-12,
            memory: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub params: Vec<f64>,
    pub value: f64,
    /// L-BFGS iterations; gradient evaluations past the start if the solver errored.
    pub iterations: u64,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct ScalarOutcome {
    pub x: f64,
    pub value: f64,
    /// Brent iterations; function evaluations past the first if the search errored.
    pub iterations: u64,
    pub converged: bool,
}

type Best<P> = RefCell<Option<(P, f64)>>;

fn record<P: Clone>(best: &Best<P>, x: &P, value: f64) {
    let mut slot = best.borrow_mut();
    let improved = match slot.as_ref() {
        Some((_, v)) => value > *v,
        None => true,
    };
    if improved {
        *slot = Some((x.clone(), value));
    }
}

struct NegatedObjective<'a, O> {
    objective: RefCell<&'a mut O>,
    best: &'a Best<Vec<f64>>,
    gradients: &'a Cell<u64>,
}

impl<O: Objective> CostFunction for NegatedObjective<'_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        let mut objective = self.objective.borrow_mut();
        objective.set_params(params)?;
        let value = objective.value()?;
        if !value.is_finite() {
            return Err(anyhow!("objective is not finite at {:?}", params));
        }
        record(self.best, params, value);
        Ok(-value)
    }
}

impl<O: Objective> Gradient for NegatedObjective<'_, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, Error> {
        let mut objective = self.objective.borrow_mut();
        objective.set_params(params)?;
        let grad = objective.gradient()?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(anyhow!("gradient is not finite at {:?}", params));
        }
        self.gradients.set(self.gradients.get() + 1);
        Ok(grad.into_iter().map(|g| -g).collect())
    }
}

/// Maximize `objective` from `x0` with L-BFGS and a More-Thuente line search.
///
/// The objective is left at the returned parameters.
pub fn maximize<O: Objective>(
    objective: &mut O,
    x0: Vec<f64>,
    config: &OptimizeConfig,
) -> Result<OptimizeOutcome> {
    let best: Best<Vec<f64>> = RefCell::new(None);
    let gradients = Cell::new(0);
    let problem = NegatedObjective {
        objective: RefCell::new(&mut *objective),
        best: &best,
        gradients: &gradients,
    };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, config.memory)
        .with_tolerance_grad(config.gradient_tolerance)?
        .with_tolerance_cost(config.cost_tolerance)?;

    let run = Executor::new(problem, solver)
        .configure(|state| state.param(x0).max_iters(config.max_iterations))
        .run();

    let (iterations, converged) = match run {
        Ok(result) => {
            let state = result.state();
            let converged = matches!(
                state.get_termination_status(),
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
            );
            debug!(
                "L-BFGS finished after {} iterations: {:?}",
                state.get_iter(),
                state.get_termination_status()
            );
            (state.get_iter(), converged)
        }
        Err(err) => {
            let iterations = gradients.get().saturating_sub(1);
            warn!(
                "L-BFGS stopped early after {} gradient evaluations ({}); keeping the best point seen",
                gradients.get(),
                err
            );
            (iterations, false)
        }
    };

    let (params, value) = best
        .into_inner()
        .ok_or_else(|| anyhow!("objective could not be evaluated at the starting point"))?;
    objective.set_params(&params)?;

    Ok(OptimizeOutcome {
        params,
        value,
        iterations,
        converged,
    })
}

struct NegatedScalar<'a, F> {
    f: RefCell<F>,
    best: &'a Best<f64>,
    evaluations: &'a Cell<u64>,
}

impl<F> CostFunction for NegatedScalar<'_, F>
where
    F: FnMut(f64) -> Result<f64>,
{
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        let value = (self.f.borrow_mut())(*x)?;
        if !value.is_finite() {
            return Err(anyhow!("objective is not finite at {}", x));
        }
        self.evaluations.set(self.evaluations.get() + 1);
        record(self.best, x, value);
        Ok(-value)
    }
}

/// Maximize a scalar function on `[lower, upper]` with Brent's method.
pub fn maximize_scalar<F>(
    f: F,
    lower: f64,
    upper: f64,
    max_iterations: u64,
) -> Result<ScalarOutcome>
where
    F: FnMut(f64) -> Result<f64>,
{
    if !(lower < upper) {
        return Err(anyhow!("empty search interval [{}, {}]", lower, upper));
    }
    let best: Best<f64> = RefCell::new(None);
    let evaluations = Cell::new(0);
    let problem = NegatedScalar {
        f: RefCell::new(f),
        best: &best,
        evaluations: &evaluations,
    };
    let solver = BrentOpt::new(lower, upper);

    let run = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iterations))
        .run();

    let (iterations, converged) = match run {
        Ok(result) => {
            let state = result.state();
            let converged = matches!(
                state.get_termination_status(),
                TerminationStatus::Terminated(TerminationReason::SolverConverged)
            );
            (state.get_iter(), converged)
        }
        Err(err) => {
            warn!("Brent search stopped early ({}); keeping the best point seen", err);
            (evaluations.get().saturating_sub(1), false)
        }
    };

    let (x, value) = best
        .into_inner()
        .ok_or_else(|| anyhow!("objective could not be evaluated on [{}, {}]", lower, upper))?;

    Ok(ScalarOutcome {
        x,
        value,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Concave quadratic `-(x - c)' diag(w) (x - c)`.
    struct Quadratic {
        center: Vec<f64>,
        weights: Vec<f64>,
        x: Vec<f64>,
    }

    impl Objective for Quadratic {
        fn set_params(&mut self, params: &[f64]) -> Result<()> {
            self.x = params.to_vec();
            Ok(())
        }

        fn value(&mut self) -> Result<f64> {
            Ok(-self
                .x
                .iter()
                .zip(&self.center)
                .zip(&self.weights)
                .map(|((x, c), w)| w * (x - c).powi(2))
                .sum::<f64>())
        }

        fn gradient(&mut self) -> Result<Vec<f64>> {
            Ok(self
                .x
                .iter()
                .zip(&self.center)
                .zip(&self.weights)
                .map(|((x, c), w)| -2.0 * w * (x - c))
                .collect())
        }
    }

    #[test]
    fn test_maximize_quadratic() {
        let mut q = Quadratic {
            center: vec![1.0, -2.0, 0.5],
            weights: vec![1.0, 3.0, 0.2],
            x: vec![0.0; 3],
        };
        let out = maximize(&mut q, vec![0.0, 0.0, 0.0], &OptimizeConfig::default()).unwrap();
        for (p, c) in out.params.iter().zip(&[1.0, -2.0, 0.5]) {
            assert!((p - c).abs() < 1e-5, "{} vs {}", p, c);
        }
        assert!(out.value > -1e-9);
        // objective left at the optimum
        assert_eq!(q.x, out.params);
    }

    /// Fails every gradient request once `budget` have been served.
    struct Exhausting {
        inner: Quadratic,
        budget: usize,
    }

    impl Objective for Exhausting {
        fn set_params(&mut self, params: &[f64]) -> Result<()> {
            self.inner.set_params(params)
        }

        fn value(&mut self) -> Result<f64> {
            self.inner.value()
        }

        fn gradient(&mut self) -> Result<Vec<f64>> {
            if self.budget == 0 {
                return Err(anyhow!("gradient budget exhausted"));
            }
            self.budget -= 1;
            self.inner.gradient()
        }
    }

    #[test]
    fn test_maximize_reports_progress_when_stopped_early() {
        let center = vec![3.0, -1.0, 0.5, 2.0, -0.4];
        let weights = vec![1.0, 10.0, 0.1, 5.0, 50.0];
        let start: f64 = -center
            .iter()
            .zip(&weights)
            .map(|(c, w)| w * c * c)
            .sum::<f64>();
        let mut f = Exhausting {
            inner: Quadratic {
                center,
                weights,
                x: vec![0.0; 5],
            },
            budget: 3,
        };
        let out = maximize(&mut f, vec![0.0; 5], &OptimizeConfig::default()).unwrap();
        assert!(!out.converged);
        assert_eq!(out.iterations, 2);
        assert!(out.value > start);
        assert_eq!(f.inner.x, out.params);
    }

    #[test]
    fn test_maximize_scalar() {
        let out = maximize_scalar(|x| Ok(-(x - 0.3).powi(2) + 2.0), -20.0, 20.0, 100).unwrap();
        assert!((out.x - 0.3).abs() < 1e-4);
        assert!((out.value - 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_maximize_scalar_keeps_best_on_error() {
        let mut calls = 0;
        let out = maximize_scalar(
            |x| {
                calls += 1;
                if calls > 3 {
                    Err(anyhow!("stop"))
                } else {
                    Ok(-x * x)
                }
            },
            -1.0,
            2.0,
            100,
        )
        .unwrap();
        assert!(!out.converged);
        assert_eq!(out.iterations, 2);
        assert!(out.value <= 0.0);
    }

    #[test]
    fn test_empty_interval_rejected() {
        assert!(maximize_scalar(|x| Ok(x), 1.0, 1.0, 10).is_err());
    }
}
