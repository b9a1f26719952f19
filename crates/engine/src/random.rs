//! Randomness used by the optimizer, kept behind a trait so tests can replay
//! fixed sequences.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};

pub trait RandomSource {
    /// Uniform draw in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Draw from `Beta(alpha, beta)`.
    fn beta(&mut self, alpha: f64, beta: f64) -> f64;
}

/// Production generator backed by a seedable `StdRng`.
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for StdRandom {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            // Only reachable with a non-positive prior, which config validation rejects.
            Err(_) => alpha / (alpha + beta),
        }
    }
}

/// Replays a fixed list of uniform draws and answers Beta draws with the
/// distribution mean, which makes bandit selection greedy and repeatable.
pub struct SequenceRandom {
    uniforms: Vec<f64>,
    position: usize,
}

impl SequenceRandom {
    pub fn new(uniforms: Vec<f64>) -> Self {
        Self {
            uniforms,
            position: 0,
        }
    }

    /// Every uniform draw returns `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for SequenceRandom {
    fn uniform(&mut self) -> f64 {
        if self.uniforms.is_empty() {
            return 0.5;
        }
        let value = self.uniforms[self.position % self.uniforms.len()];
        self.position += 1;
        value
    }

    fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        alpha / (alpha + beta)
    }
}
