//! Mathematical utility functions.

/// The unconstrained `delta` scalar is clipped to `[-LOGISTIC_CLIP, LOGISTIC_CLIP]`
/// before the sigmoid is applied.
pub const LOGISTIC_CLIP: f64 = 20.0;

/// Lower bound on `delta` after the sigmoid.
pub const DELTA_MIN: f64 = 1e-5;

/// Upper bound on `delta` after the sigmoid.
pub const DELTA_MAX: f64 = 1.0 - 1e-5;

/// `ln(1 + e^x)` without overflow for large `x`.
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Logistic sigmoid `1 / (1 + e^{-x})`.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Map an unconstrained scalar to `delta`:
/// `clip(sigmoid(clip(x, -20, 20)), 1e-5, 1 - 1e-5)`.
pub fn delta_from_logistic(x: f64) -> f64 {
    sigmoid(x.clamp(-LOGISTIC_CLIP, LOGISTIC_CLIP)).clamp(DELTA_MIN, DELTA_MAX)
}

/// Inverse of [`delta_from_logistic`] on the clipped range.
pub fn logistic_from_delta(delta: f64) -> f64 {
    let d = delta.clamp(DELTA_MIN, DELTA_MAX);
    (d / (1.0 - d)).ln()
}

/// `d delta / dx` expressed through `delta` itself; zero once a clip is active.
pub fn delta_logistic_slope(delta: f64) -> f64 {
    if delta <= DELTA_MIN || delta >= DELTA_MAX {
        0.0
    } else {
        delta * (1.0 - delta)
    }
}
