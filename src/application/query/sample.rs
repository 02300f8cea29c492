//! Randomness for windowed random sampling.

use std::sync::{Mutex, PoisonError};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::domain::PrimaryKey;

pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, 1)`.
    fn next_unit(&self) -> f64;

    /// Shuffle `keys` in place.
    fn shuffle(&self, keys: &mut [PrimaryKey]);
}

pub struct ChaChaSource {
    rng: Mutex<ChaCha8Rng>,
}

impl ChaChaSource {
    pub fn from_seed_u64(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Seed from the operating system's entropy source.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_os_rng()),
        }
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, ChaCha8Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RandomSource for ChaChaSource {
    fn next_unit(&self) -> f64 {
        self.rng().random::<f64>()
    }

    fn shuffle(&self, keys: &mut [PrimaryKey]) {
        keys.shuffle(&mut *self.rng());
    }
}

/// First offset of a random window of `n` rows out of `count`.
///
/// `r` must lie in `[0, 1)`. Returns 0 when the window covers every row.
pub fn window_start(count: u64, n: u64, r: f64) -> u64 {
    if count <= n {
        return 0;
    }
    let span = count - n;
    let offset = (r.clamp(0.0, 1.0) * span as f64).floor() as u64;
    offset.min(span)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn window_start_stays_in_bounds() {
        assert_eq!(window_start(100, 10, 0.0), 0);
        assert_eq!(window_start(100, 10, 0.5), 45);
        assert_eq!(window_start(100, 10, 0.999_999), 89);
        assert_eq!(window_start(100, 10, 1.0), 90);
        assert_eq!(window_start(5, 10, 0.7), 0);
        assert_eq!(window_start(10, 10, 0.7), 0);
    }

    #[test]
    fn next_unit_is_half_open() {
        let source = ChaChaSource::from_seed_u64(7);
        for _ in 0..1_000 {
            let r = source.next_unit();
            assert!((0.0..1.0).contains(&r));
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let source = ChaChaSource::from_entropy();
        let mut keys: Vec<PrimaryKey> = (0..50).map(PrimaryKey::Int).collect();
        source.shuffle(&mut keys);

        let distinct: BTreeSet<_> = keys.iter().cloned().collect();
        assert_eq!(distinct.len(), 50);
        assert_eq!(distinct, (0..50).map(PrimaryKey::Int).collect::<BTreeSet<_>>());
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = ChaChaSource::from_seed_u64(42);
        let b = ChaChaSource::from_seed_u64(42);
        let mut left: Vec<PrimaryKey> = (0..10).map(PrimaryKey::Int).collect();
        let mut right = left.clone();
        a.shuffle(&mut left);
        b.shuffle(&mut right);
        assert_eq!(left, right);
    }

    #[test]
    fn shuffle_matches_slice_random_on_the_same_stream() {
        let source = ChaChaSource::from_seed_u64(9);
        let mut keys: Vec<PrimaryKey> = (0..20).map(PrimaryKey::Int).collect();
        source.shuffle(&mut keys);

        let mut expected: Vec<PrimaryKey> = (0..20).map(PrimaryKey::Int).collect();
        expected.shuffle(&mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(keys, expected);
    }
}
