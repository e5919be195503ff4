//! Site approximations and cavity distributions in natural parameters.
//!
//! Site `i` approximates the likelihood term by an unnormalized Gaussian
//! with precision `tau_i` and precision-adjusted mean `eta_i`. The cavity
//! is the posterior marginal with that site divided out.

/// Outcome of a single damped site update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SiteUpdate {
    /// The site moved; `change` is the larger absolute change of its two parameters.
    Accepted { change: f64 },
    /// The proposed precision was negative and the site was left untouched.
    Rejected { tau: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteLik {
    tau: Vec<f64>,
    eta: Vec<f64>,
}

impl SiteLik {
    /// Sites with zero precision, i.e. the prior alone.
    pub fn zeros(n: usize) -> Self {
        Self {
            tau: vec![0.0; n],
            eta: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.tau.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tau.is_empty()
    }

    pub fn tau(&self) -> &[f64] {
        &self.tau
    }

    pub fn eta(&self) -> &[f64] {
        &self.eta
    }

    pub fn reset(&mut self) {
        self.tau.iter_mut().for_each(|t| *t = 0.0);
        self.eta.iter_mut().for_each(|e| *e = 0.0);
    }

    /// Move site `i` a fraction `damping` of the way to `(tau_new, eta_new)`.
    pub fn update(&mut self, i: usize, tau_new: f64, eta_new: f64, damping: f64) -> SiteUpdate {
        let tau = (1.0 - damping) * self.tau[i] + damping * tau_new;
        let eta = (1.0 - damping) * self.eta[i] + damping * eta_new;
        if !(tau >= 0.0) || !eta.is_finite() || !tau.is_finite() {
            return SiteUpdate::Rejected { tau };
        }
        let change = (tau - self.tau[i]).abs().max((eta - self.eta[i]).abs());
        self.tau[i] = tau;
        self.eta[i] = eta;
        SiteUpdate::Accepted { change }
    }
}

/// Cavity distributions `N(eta_i / tau_i, 1 / tau_i)`.
#[derive(Debug, Clone)]
pub struct Cavity {
    tau: Vec<f64>,
    eta: Vec<f64>,
}

impl Cavity {
    pub fn zeros(n: usize) -> Self {
        Self {
            tau: vec![0.0; n],
            eta: vec![0.0; n],
        }
    }

    /// Divide each site out of the posterior marginal `N(mean_i, variance_i)`.
    pub fn update(&mut self, mean: &[f64], variance: &[f64], sites: &SiteLik) {
        for i in 0..self.tau.len() {
            self.tau[i] = 1.0 / variance[i] - sites.tau[i];
            self.eta[i] = mean[i] / variance[i] - sites.eta[i];
        }
    }

    pub fn tau(&self) -> &[f64] {
        &self.tau
    }

    pub fn eta(&self) -> &[f64] {
        &self.eta
    }

    pub fn mean(&self, i: usize) -> f64 {
        self.eta[i] / self.tau[i]
    }

    pub fn variance(&self, i: usize) -> f64 {
        1.0 / self.tau[i]
    }

    /// True when the cavity is a proper Gaussian.
    pub fn is_proper(&self, i: usize) -> bool {
        self.tau[i] > 0.0 && self.tau[i].is_finite() && self.eta[i].is_finite()
    }
}
