//! Tie-break source for wars between equally sized armies

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Result of breaking a tie between equal unit counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    Draw,
    AttackerWins,
    DefenderWins,
}

/// Source of randomness consulted only when both armies are the same size
#[cfg_attr(test, mockall::automock)]
pub trait TieBreaker: Send {
    fn break_tie(&mut self) -> TieBreak;
}

/// Coin-flip tie breaker: heads is a draw, otherwise a second flip picks the winner
pub struct RandomTieBreaker<R = ChaCha8Rng> {
    rng: R,
}

impl<R: RngCore + Send> RandomTieBreaker<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RandomTieBreaker<ChaCha8Rng> {
    /// Reproducible tie breaker for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(ChaCha8Rng::from_entropy())
    }
}

impl<R: RngCore + Send> TieBreaker for RandomTieBreaker<R> {
    fn break_tie(&mut self) -> TieBreak {
        if self.rng.gen_bool(0.5) {
            TieBreak::Draw
        } else if self.rng.gen_bool(0.5) {
            TieBreak::AttackerWins
        } else {
            TieBreak::DefenderWins
        }
    }
}

/// Tie breaker that always returns the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedTieBreaker(pub TieBreak);

impl TieBreaker for FixedTieBreaker {
    fn break_tie(&mut self) -> TieBreak {
        self.0
    }
}
