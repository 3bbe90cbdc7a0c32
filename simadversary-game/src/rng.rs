//! Deterministic RNG streams segregated by resolution domain.
use hmac::{Hmac, Mac};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use sha2::Sha256;
use std::cell::{RefCell, RefMut};

use crate::constants::PERCENT_SCALE;

/// Bundle of RNG streams derived from one session seed.
#[derive(Debug, Clone)]
pub struct RngBundle {
    detection: RefCell<CountingRng<SmallRng>>,
    success: RefCell<CountingRng<SmallRng>>,
    tests: RefCell<CountingRng<SmallRng>>,
    events: RefCell<CountingRng<SmallRng>>,
}

impl RngBundle {
    /// Construct the bundle from a user-visible seed.
    #[must_use]
    pub fn from_user_seed(seed: u64) -> Self {
        Self {
            detection: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"detection"))),
            success: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"success"))),
            tests: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"tests"))),
            events: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"events"))),
        }
    }

    #[must_use]
    pub fn detection(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.detection.borrow_mut()
    }

    #[must_use]
    pub fn success(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.success.borrow_mut()
    }

    #[must_use]
    pub fn tests(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.tests.borrow_mut()
    }

    #[must_use]
    pub fn events(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.events.borrow_mut()
    }

    /// Total draws across every stream.
    #[must_use]
    pub fn total_draws(&self) -> u64 {
        [&self.detection, &self.success, &self.tests, &self.events]
            .iter()
            .map(|stream| stream.borrow().draws())
            .sum()
    }
}

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<SmallRng> {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            draws: 0,
        }
    }
}

impl<R: RngCore> CountingRng<R> {
    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: RngCore> RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

/// Uniform roll in `[0, 100)`.
pub fn roll_percent<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.r#gen::<f64>() * PERCENT_SCALE
}

/// Uniform roll in `[0, 1)`.
pub fn roll_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.r#gen::<f64>()
}

fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&user_seed.to_le_bytes()) else {
        return user_seed;
    };
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0_u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}
