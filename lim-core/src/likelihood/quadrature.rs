//! Moments of a one-dimensional tilted density by Laplace-centred quadrature.
//!
//! The tilted density is `p(y | f) N(f | mu, s2)`. For log-concave
//! likelihoods it is unimodal, so we locate the mode with a safeguarded
//! Newton iteration, then integrate on an equispaced grid centred on the
//! mode until the log density has dropped by `tail_drop` on both sides.
//! The trapezoid rule on such a grid converges geometrically for smooth,
//! rapidly decaying integrands.

use std::f64::consts::PI;

use thiserror::Error;

/// Log density with its first two derivatives in the latent variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogDensity {
    pub value: f64,
    pub d1: f64,
    pub d2: f64,
}

/// Zeroth, first and second moments of the tilted density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltedMoments {
    /// `log Z`, the log normalizer.
    pub log_zeroth: f64,
    pub mean: f64,
    pub variance: f64,
}

#[derive(Error, Debug)]
pub enum QuadratureError {
    #[error("Cavity distribution must have finite mean and positive variance (mean {mean}, variance {variance})")]
    InvalidCavity { mean: f64, variance: f64 },

    #[error("Tilted density is not finite at f = {at}")]
    NonFinite { at: f64 },

    #[error("Tilted density did not decay within {max_points} grid points")]
    TooManyPoints { max_points: usize },

    #[error("Tilted density has non-positive variance {variance}")]
    Degenerate { variance: f64 },
}

/// Controls the integration grid.
#[derive(Debug, Clone)]
pub struct QuadratureConfig {
    /// Grid points per posterior standard deviation around the mode.
    pub points_per_sd: f64,
    /// Upper bound on the grid step.
    pub max_step: f64,
    /// Integration stops once the log density is this far below its peak.
    pub tail_drop: f64,
    /// Maximum number of grid points on each side of the mode.
    pub max_points: usize,
    /// Newton iterations for locating the mode.
    pub newton_max_iter: usize,
    /// Relative step size at which the mode search stops.
    pub newton_tol: f64,
}

impl Default for QuadratureConfig {
    fn default() -> Self {
        Self {
            points_per_sd: 4.0,
            max_step: 0.25,
            tail_drop: 50.0,
            max_points: 100_000,
            newton_max_iter: 100,
            newton_tol: 1e-12,
        }
    }
}

/// Integrate `exp(log_lik(f)) N(f | cavity_mean, cavity_variance)`.
pub fn tilted_moments<F>(
    log_lik: F,
    cavity_mean: f64,
    cavity_variance: f64,
    config: &QuadratureConfig,
) -> Result<TiltedMoments, QuadratureError>
where
    F: Fn(f64) -> LogDensity,
{
    if !cavity_mean.is_finite() || !cavity_variance.is_finite() || !(cavity_variance > 0.0) {
        return Err(QuadratureError::InvalidCavity {
            mean: cavity_mean,
            variance: cavity_variance,
        });
    }

    let log_norm = -0.5 * (2.0 * PI * cavity_variance).ln();
    let tilted = |f: f64| {
        let l = log_lik(f);
        let z = f - cavity_mean;
        LogDensity {
            value: l.value - 0.5 * z * z / cavity_variance + log_norm,
            d1: l.d1 - z / cavity_variance,
            d2: l.d2 - 1.0 / cavity_variance,
        }
    };

    let (mode, peak) = find_mode(&tilted, cavity_mean, cavity_variance, config)?;

    let curvature = if peak.d2 < 0.0 {
        -peak.d2
    } else {
        1.0 / cavity_variance
    };
    let h = (1.0 / (curvature.sqrt() * config.points_per_sd)).min(config.max_step);

    // Offsets are measured from the mode to keep the variance accumulation
    // free of cancellation.
    let mut s0 = 1.0;
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    for direction in [-1.0, 1.0] {
        let mut j = 1usize;
        loop {
            if j > config.max_points {
                return Err(QuadratureError::TooManyPoints {
                    max_points: config.max_points,
                });
            }
            let d = direction * j as f64 * h;
            let lv = tilted(mode + d).value - peak.value;
            if lv.is_nan() {
                return Err(QuadratureError::NonFinite { at: mode + d });
            }
            if lv < -config.tail_drop {
                break;
            }
            let w = lv.exp();
            s0 += w;
            s1 += w * d;
            s2 += w * d * d;
            j += 1;
        }
    }

    let offset = s1 / s0;
    let variance = s2 / s0 - offset * offset;
    if !(variance > 0.0) {
        return Err(QuadratureError::Degenerate { variance });
    }

    Ok(TiltedMoments {
        log_zeroth: peak.value + (h * s0).ln(),
        mean: mode + offset,
        variance,
    })
}

/// Newton ascent with step halving on a concave log density.
fn find_mode<G>(
    tilted: &G,
    start: f64,
    scale: f64,
    config: &QuadratureConfig,
) -> Result<(f64, LogDensity), QuadratureError>
where
    G: Fn(f64) -> LogDensity,
{
    let mut f = start;
    let mut current = tilted(f);
    if !current.value.is_finite() || !current.d1.is_finite() || !current.d2.is_finite() {
        return Err(QuadratureError::NonFinite { at: f });
    }

    for _ in 0..config.newton_max_iter {
        let step = if current.d2 < 0.0 {
            -current.d1 / current.d2
        } else {
            current.d1 * scale
        };

        let mut t = 1.0;
        let mut next = f + step;
        let mut candidate = tilted(next);
        while !(candidate.value >= current.value) && t > 1e-10 {
            t *= 0.5;
            next = f + t * step;
            candidate = tilted(next);
        }
        if !(candidate.value >= current.value) {
            break;
        }

        let moved = (next - f).abs();
        f = next;
        current = candidate;
        if moved <= config.newton_tol * (1.0 + f.abs()) {
            break;
        }
    }

    if !current.value.is_finite() {
        return Err(QuadratureError::NonFinite { at: f });
    }
    Ok((f, current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_lik(y: f64, s2: f64) -> impl Fn(f64) -> LogDensity {
        move |f| {
            let z = y - f;
            LogDensity {
                value: -0.5 * z * z / s2 - 0.5 * (2.0 * PI * s2).ln(),
                d1: z / s2,
                d2: -1.0 / s2,
            }
        }
    }

    #[test]
    fn test_flat_likelihood_returns_cavity() {
        let flat = |_f: f64| LogDensity {
            value: 0.0,
            d1: 0.0,
            d2: 0.0,
        };
        let m = tilted_moments(flat, 0.3, 2.0, &QuadratureConfig::default()).unwrap();
        assert!(m.log_zeroth.abs() < 1e-12, "log Z = {}", m.log_zeroth);
        assert!((m.mean - 0.3).abs() < 1e-12);
        assert!((m.variance - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_gaussian_likelihood_closed_form() {
        use statrs::distribution::{Continuous, Normal};

        let (y, s2, mu, v) = (1.7, 0.5, -0.4, 1.3);
        let m = tilted_moments(gaussian_lik(y, s2), mu, v, &QuadratureConfig::default()).unwrap();

        let total = v + s2;
        let expected_log_z = Normal::new(mu, total.sqrt()).unwrap().ln_pdf(y);
        let expected_var = v * s2 / total;
        let expected_mean = expected_var * (mu / v + y / s2);
        assert!((m.log_zeroth - expected_log_z).abs() < 1e-10);
        assert!((m.mean - expected_mean).abs() < 1e-10);
        assert!((m.variance - expected_var).abs() < 1e-10);
    }

    #[test]
    fn test_narrow_cavity() {
        let (y, s2, mu, v) = (0.0, 1.0, 2.0, 1e-6);
        let m = tilted_moments(gaussian_lik(y, s2), mu, v, &QuadratureConfig::default()).unwrap();
        let expected_var = v * s2 / (v + s2);
        assert!((m.variance / expected_var - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_invalid_cavity() {
        let flat = |_f: f64| LogDensity {
            value: 0.0,
            d1: 0.0,
            d2: 0.0,
        };
        let cfg = QuadratureConfig::default();
        assert!(matches!(
            tilted_moments(flat, 0.0, -1.0, &cfg),
            Err(QuadratureError::InvalidCavity { .. })
        ));
        assert!(tilted_moments(flat, f64::NAN, 1.0, &cfg).is_err());
        assert!(tilted_moments(flat, 0.0, f64::INFINITY, &cfg).is_err());
    }
}
