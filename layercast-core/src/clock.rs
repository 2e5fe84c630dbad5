//! Virtual time and seeded randomness for deterministic simulations.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Maximum real time that can be advanced in a single operation (24 hours).
const MAX_TIME_ADVANCE_SECS: f64 = 86_400.0;

/// Errors raised by the virtual clock.
#[derive(Debug, Error, PartialEq)]
pub enum ClockError {
    /// Scale factor is not a positive finite number
    #[error("Invalid time scale: {scale}")]
    InvalidScale {
        /// Rejected scale factor
        scale: f64,
    },

    /// Requested advance is negative, non-finite or too large
    #[error("Cannot advance clock by {real_secs}s of real time")]
    InvalidAdvance {
        /// Rejected real-time step in seconds
        real_secs: f64,
    },
}

/// Virtual clock shared by every component that reads time.
///
/// Holds `scaled_time = scale * real_time` in seconds. Time only moves when
/// the driver advances it, so a run never sleeps and never reads the
/// system clock. Components never see the scale, only scaled times.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    now: f64,
    start: f64,
    scale: f64,
}

impl VirtualClock {
    /// Creates a clock at virtual time zero.
    ///
    /// # Errors
    ///
    /// - `ClockError::InvalidScale` - If `scale` is not positive and finite
    pub fn new(scale: f64) -> Result<Self, ClockError> {
        Self::starting_at(0.0, scale)
    }

    /// Creates a clock positioned at `start` virtual seconds.
    ///
    /// # Errors
    ///
    /// - `ClockError::InvalidScale` - If `scale` is not positive and finite
    pub fn starting_at(start: f64, scale: f64) -> Result<Self, ClockError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ClockError::InvalidScale { scale });
        }
        Ok(Self {
            now: start,
            start,
            scale,
        })
    }

    /// Returns current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Returns virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> f64 {
        self.now - self.start
    }

    /// Returns the real-to-virtual multiplier.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Converts a real-time span into virtual seconds.
    pub fn scaled(&self, real_secs: f64) -> f64 {
        real_secs * self.scale
    }

    /// Advances the clock by `real_secs` of real time and returns the new
    /// virtual time.
    ///
    /// # Errors
    ///
    /// - `ClockError::InvalidAdvance` - If the step is negative, non-finite or exceeds 24 hours
    pub fn advance(&mut self, real_secs: f64) -> Result<f64, ClockError> {
        if !(real_secs.is_finite() && (0.0..=MAX_TIME_ADVANCE_SECS).contains(&real_secs)) {
            return Err(ClockError::InvalidAdvance { real_secs });
        }
        self.now += self.scaled(real_secs);
        Ok(self.now)
    }
}

/// Deterministic random number generator for reproducible simulations.
///
/// Uses ChaCha8 for fast, seed-stable sequences. Implements `RngCore`, so
/// distributions from `rand_distr` can sample from it directly.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Returns the seed used for this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates random number in range [0, 1).
    pub fn uniform_f64(&mut self) -> f64 {
        // 53 significant bits keep the result strictly below 1.0
        (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generates an index in range [0, len). Returns 0 when `len` is 0.
    pub fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        (self.rng.next_u64() % len as u64) as usize
    }

    /// Generates an integer in the inclusive range [low, high].
    pub fn inclusive(&mut self, low: usize, high: usize) -> usize {
        if low >= high {
            return low;
        }
        low + self.index(high - low + 1)
    }

    /// Generates random boolean with given probability.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.uniform_f64() < probability
    }

    /// Shuffles a mutable slice in-place.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.rng);
    }

    /// Selects random element from slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let index = self.index(slice.len());
            slice.get(index)
        }
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.rng.fill_bytes(dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_clock_applies_scale() {
        let mut clock = VirtualClock::new(1000.0).unwrap();

        clock.advance(0.002).unwrap();
        assert!((clock.now() - 2.0).abs() < 1e-9);

        clock.advance(0.001).unwrap();
        assert!((clock.elapsed() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_rejects_invalid_scale() {
        assert_eq!(
            VirtualClock::new(0.0).unwrap_err(),
            ClockError::InvalidScale { scale: 0.0 }
        );
        assert!(VirtualClock::new(f64::NAN).is_err());
        assert!(VirtualClock::new(-2.0).is_err());
    }

    #[test]
    fn test_clock_rejects_invalid_advance() {
        let mut clock = VirtualClock::starting_at(10.0, 1.0).unwrap();
        clock.advance(5.0).unwrap();

        assert!(clock.advance(-1.0).is_err());
        assert!(clock.advance(f64::INFINITY).is_err());
        assert_eq!(clock.now(), 15.0);
        assert_eq!(clock.elapsed(), 5.0);
    }

    #[test]
    fn test_clock_max_advance_limit() {
        let mut clock = VirtualClock::new(1.0).unwrap();
        assert!(clock.advance(86_401.0).is_err());
    }

    #[test]
    fn test_deterministic_rng_reproducibility() {
        let mut rng1 = DeterministicRng::from_seed(12345);
        let mut rng2 = DeterministicRng::from_seed(12345);

        let values1: Vec<usize> = (0..10).map(|_| rng1.index(100)).collect();
        let values2: Vec<usize> = (0..10).map(|_| rng2.index(100)).collect();

        assert_eq!(values1, values2);
        assert_eq!(rng1.seed(), 12345);
    }

    #[test]
    fn test_rng_ranges() {
        let mut rng = DeterministicRng::from_seed(7);
        for _ in 0..1000 {
            let x = rng.uniform_f64();
            assert!((0.0..1.0).contains(&x));

            let n = rng.inclusive(1, 4);
            assert!((1..=4).contains(&n));
        }
        assert_eq!(rng.inclusive(3, 3), 3);
        assert_eq!(rng.index(0), 0);
    }

    #[test]
    fn test_rng_shuffle_determinism() {
        let mut rng1 = DeterministicRng::from_seed(42);
        let mut rng2 = DeterministicRng::from_seed(42);

        let mut data1 = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut data2 = data1.clone();

        rng1.shuffle(&mut data1);
        rng2.shuffle(&mut data2);

        assert_eq!(data1, data2);
        let mut sorted = data1.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }
}
