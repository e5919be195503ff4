//! Shared fixtures for the integration tests.

use lim_linalg::{economic_qs_linear, DenseMatrix, QsDecomposition};

/// Mersenne Twister stream reproducing the legacy NumPy `RandomState`
/// draws used to build the reference datasets.
pub struct LegacyRandomState {
    mt: [u32; 624],
    index: usize,
    cached_gauss: Option<f64>,
}

impl LegacyRandomState {
    pub fn new(seed: u32) -> Self {
        let mut mt = [0u32; 624];
        mt[0] = seed;
        for i in 1..624 {
            let prev = mt[i - 1];
            mt[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Self {
            mt,
            index: 624,
            cached_gauss: None,
        }
    }

    fn twist(&mut self) {
        const UPPER: u32 = 0x8000_0000;
        const LOWER: u32 = 0x7fff_ffff;
        const MATRIX_A: u32 = 0x9908_b0df;
        for i in 0..624 {
            let y = (self.mt[i] & UPPER) | (self.mt[(i + 1) % 624] & LOWER);
            let mut next = self.mt[(i + 397) % 624] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.mt[i] = next;
        }
        self.index = 0;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= 624 {
            self.twist();
        }
        let mut y = self.mt[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^= y >> 18;
        y
    }

    /// Uniform on `[0, 1)` with 53 random bits.
    pub fn next_f64(&mut self) -> f64 {
        let a = (self.next_u32() >> 5) as f64;
        let b = (self.next_u32() >> 6) as f64;
        (a * 67_108_864.0 + b) / 9_007_199_254_740_992.0
    }

    /// Standard normal via the polar method, caching the second draw.
    pub fn gauss(&mut self) -> f64 {
        if let Some(g) = self.cached_gauss.take() {
            return g;
        }
        loop {
            let x1 = 2.0 * self.next_f64() - 1.0;
            let x2 = 2.0 * self.next_f64() - 1.0;
            let r2 = x1 * x1 + x2 * x2;
            if r2 < 1.0 && r2 != 0.0 {
                let f = (-2.0 * r2.ln() / r2).sqrt();
                self.cached_gauss = Some(f * x1);
                return f * x2;
            }
        }
    }

    /// Integer on `[low, high)` by masked rejection.
    pub fn randint(&mut self, low: u32, high: u32) -> u32 {
        let range = high - low - 1;
        let mut mask = range;
        for shift in [1, 2, 4, 8, 16] {
            mask |= mask >> shift;
        }
        loop {
            let v = self.next_u32() & mask;
            if v <= range {
                return low + v;
            }
        }
    }

    pub fn logistic(&mut self, scale: f64) -> f64 {
        let mut u = self.next_f64();
        while u <= 0.0 {
            u = self.next_f64();
        }
        scale * (u / (1.0 - u)).ln()
    }
}

/// Three samples, two features: the small binomial reference problem.
pub fn small_binomial_problem() -> (QsDecomposition, DenseMatrix, Vec<f64>, Vec<f64>) {
    let g = DenseMatrix::from_row_major(3, 2, &[1.2, 3.4, -0.1, 1.2, 0.0, 0.2]);
    let qs = economic_qs_linear(&g).unwrap();
    let shifted: Vec<f64> = qs.s0().iter().map(|s| s + 1.0).collect();
    let qs = qs.with_eigenvalues(shifted).unwrap();
    let covariates = DenseMatrix::full(3, 1, 1.0);
    (qs, covariates, vec![1.0, 0.0, 1.0], vec![1.0, 1.0, 1.0])
}

/// 30 samples, 31 features, binomial counts from a logistic latent model.
pub struct SyntheticBinomial {
    pub g: DenseMatrix,
    pub nsuccesses: Vec<f64>,
    pub ntrials: Vec<f64>,
}

pub fn synthetic_binomial() -> SyntheticBinomial {
    let (n, p) = (30, 31);
    let mut rng = LegacyRandomState::new(139);

    let root_p = (p as f64).sqrt();
    let mut data = Vec::with_capacity(n * p);
    for _ in 0..n * p {
        data.push(rng.gauss() / root_p);
    }
    let g = DenseMatrix::from_row_major(n, p, &data);

    let u: Vec<f64> = (0..p).map(|_| rng.gauss()).collect();
    let gu = g.mat_vec(&u);
    let z: Vec<f64> = gu.iter().map(|v| 0.1 + 2.0 * v + rng.gauss()).collect();

    let ntrials: Vec<u32> = (0..n).map(|_| rng.randint(10, 500)).collect();

    let logistic_scale = std::f64::consts::PI / 3f64.sqrt();
    let nsuccesses = z
        .iter()
        .zip(&ntrials)
        .map(|(&zi, &t)| {
            (0..t)
                .filter(|_| zi + rng.logistic(logistic_scale) > 0.0)
                .count() as f64
        })
        .collect();

    SyntheticBinomial {
        g,
        nsuccesses,
        ntrials: ntrials.into_iter().map(f64::from).collect(),
    }
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
