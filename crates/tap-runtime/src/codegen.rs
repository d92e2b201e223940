//! Random referral code drawing.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Characters a referral code is drawn from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draws fixed-length codes. Uniqueness is the caller's job.
pub struct CodeGenerator {
    rng: Mutex<ChaCha8Rng>,
    length: usize,
}

impl CodeGenerator {
    pub fn from_entropy(length: usize) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
            length,
        }
    }

    /// Reproducible sequence, for tests and replays.
    pub fn seeded(length: usize, seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            length,
        }
    }

    pub fn draw(&self) -> String {
        let mut rng = self.rng.lock();
        (0..self.length)
            .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
            .collect()
    }
}
