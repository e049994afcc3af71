//! Reproducible normal variates.
//!
//! Draws go either through an explicit generator handle ([`rnorm_with`]) or
//! through the process-wide stream ([`rnorm`]), which starts from
//! [`DEFAULT_SEED`] and can be reseeded with [`set_seed`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};
use std::sync::Mutex;
use thiserror::Error;

use crate::array::Vector;

/// Seed of the process-wide stream until [`set_seed`] is called.
pub const DEFAULT_SEED: u64 = 42;

lazy_static! {
    static ref GLOBAL_RNG: Mutex<StdRng> = Mutex::new(StdRng::seed_from_u64(DEFAULT_SEED));
}

#[derive(Debug, Error)]
pub enum RandomError {
    #[error("standard deviation must be finite and non-negative, got {sd}")]
    InvalidSd { sd: f64 },
    #[error("invalid normal distribution (mean {mean}, sd {sd}): {source}")]
    Distribution {
        mean: f64,
        sd: f64,
        #[source]
        source: NormalError,
    },
}

/// Reseeds the process-wide stream.
pub fn set_seed(seed: u64) {
    with_global_rng(|rng| *rng = StdRng::seed_from_u64(seed));
}

/// Runs `f` with exclusive access to the process-wide stream.
///
/// Holding the lock for the whole closure keeps a sequence of draws from
/// being interleaved with draws made on other threads.
pub fn with_global_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut guard = GLOBAL_RNG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// Draws `n` variates from `N(mean, sd²)` using the process-wide stream.
pub fn rnorm(n: usize, mean: f64, sd: f64) -> Result<Vector, RandomError> {
    with_global_rng(|rng| rnorm_with(rng, n, mean, sd))
}

/// Draws `n` variates from `N(mean, sd²)` using `rng`.
pub fn rnorm_with<R: Rng + ?Sized>(
    rng: &mut R,
    n: usize,
    mean: f64,
    sd: f64,
) -> Result<Vector, RandomError> {
    if !(sd.is_finite() && sd >= 0.) {
        return Err(RandomError::InvalidSd { sd });
    }
    let normal =
        Normal::new(mean, sd).map_err(|source| RandomError::Distribution { mean, sd, source })?;
    Ok((0..n).map(|_| normal.sample(&mut *rng)).collect())
}
