//! Shared random source for every probabilistic decision in the engine.
//!
//! One `Dice` is built per engine and handed to each service, so a fixed
//! seed makes a whole run reproducible.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Dice {
    rng: Mutex<StdRng>,
}

impl Dice {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        // A panic while holding the lock cannot leave an RNG half-updated.
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bernoulli trial with probability `p` (clamped to 0..=1).
    pub fn chance(&self, p: f64) -> bool {
        if !p.is_finite() || p <= 0.0 {
            return false;
        }
        self.rng().gen_bool(p.min(1.0))
    }

    /// Uniform integer in `[low, high]`.
    pub fn between(&self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng().gen_range(low..=high)
    }

    /// A delay uniform in `[min_secs, max_secs]`, millisecond resolution.
    pub fn delay_secs(&self, min_secs: u64, max_secs: u64) -> Duration {
        let ms = self.between((min_secs * 1000) as i64, (max_secs * 1000) as i64);
        Duration::from_millis(ms as u64)
    }

    /// Random index into a collection of `len` items.
    pub fn index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            None
        } else {
            Some(self.rng().gen_range(0..len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chance_edges() {
        let dice = Dice::seeded(1);
        assert!(!dice.chance(0.0));
        assert!(!dice.chance(-1.0));
        assert!(!dice.chance(f64::NAN));
        assert!(dice.chance(1.0));
        assert!(dice.chance(3.0));
    }

    #[test]
    fn test_chance_frequency() {
        let dice = Dice::seeded(42);
        let hits = (0..10_000).filter(|_| dice.chance(0.3)).count();
        assert!((2_700..3_300).contains(&hits), "hits = {}", hits);
    }

    #[test]
    fn test_delay_bounds() {
        let dice = Dice::seeded(3);
        for _ in 0..500 {
            let d = dice.delay_secs(1, 3);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3));
        }
        assert_eq!(dice.delay_secs(5, 5), Duration::from_secs(5));
    }

    #[test]
    fn test_index() {
        let dice = Dice::seeded(4);
        assert_eq!(dice.index(0), None);
        for _ in 0..100 {
            assert!(dice.index(3).unwrap() < 3);
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = Dice::seeded(9);
        let b = Dice::seeded(9);
        let xs: Vec<i64> = (0..20).map(|_| a.between(0, 1000)).collect();
        let ys: Vec<i64> = (0..20).map(|_| b.between(0, 1000)).collect();
        assert_eq!(xs, ys);
    }
}
