//! Random number generator abstraction for determinism.
//!
//! The engine only draws randomness for retry jitter. In production this
//! wraps a real RNG; tests inject a fixed implementation so backoff delays
//! are predictable.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Abstraction over random number generation.
pub trait DeterministicRng: Send + Sync {
    /// Generate a random `u32` in the range `[min, max]` inclusive.
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32;

    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Production RNG seeded from the operating system.
#[derive(Debug)]
pub struct SystemRng(StdRng);

impl SystemRng {
    /// Creates an OS-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl Default for SystemRng {
    fn default() -> Self {
        Self::new()
    }
}

impl DeterministicRng for SystemRng {
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        self.0.random_range(min..=max)
    }

    fn next_f64(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_rng_stays_within_bounds() {
        let mut rng = SystemRng::new();
        for _ in 0..100 {
            let value = rng.next_u32_range(3, 7);
            assert!((3..=7).contains(&value));
            let unit = rng.next_f64();
            assert!((0.0..1.0).contains(&unit));
        }
    }

    #[test]
    fn test_system_rng_degenerate_range_returns_min() {
        let mut rng = SystemRng::new();
        assert_eq!(rng.next_u32_range(4, 4), 4);
        assert_eq!(rng.next_u32_range(9, 2), 9);
    }
}
