//! Seeded pseudo-random numbers for replayable events
//!
//! `ShuffleRows` and `SampleRows` must produce the same row order whenever the
//! same event log is replayed, by this crate or by any other implementation of
//! the log format. The generator is therefore fixed bit-for-bit: the seed
//! string is folded into a `u32` with a `* 31` rolling hash and draws come from
//! the mulberry32 mixer, all in wrapping 32-bit arithmetic.

/// Deterministic generator derived from a string seed.
///
/// There is no shared state: every event builds its own generator, so two
/// replays of one event always see the same sequence.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    /// Create a generator from a seed string
    pub fn new(seed: &str) -> Self {
        Self {
            state: seed_hash(seed),
        }
    }

    /// Next raw 32-bit draw
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Next draw normalized to `[0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }

    /// Uniform index in `0..bound` (`bound` must be non-zero)
    pub fn below(&mut self, bound: usize) -> usize {
        let idx = (self.next_f64() * bound as f64).floor() as usize;
        idx.min(bound.saturating_sub(1))
    }
}

/// Fold a seed string into the initial generator state.
///
/// `h = h * 31 + code_point` per character, modulo 2^32.
pub fn seed_hash(seed: &str) -> u32 {
    seed.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Fisher-Yates permutation of `0..n`, walking from the end.
pub fn shuffle_positions(n: usize, seed: &str) -> Vec<usize> {
    let mut rng = SeededRng::new(seed);
    let mut positions: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.below(i + 1);
        positions.swap(i, j);
    }
    positions
}

/// Partial Fisher-Yates: `k` distinct positions out of `0..n`, in draw order.
///
/// `k` is clamped to `n`.
pub fn sample_positions(n: usize, k: usize, seed: &str) -> Vec<usize> {
    let k = k.min(n);
    let mut rng = SeededRng::new(seed);
    let mut positions: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = i + rng.below(n - i);
        positions.swap(i, j);
    }
    positions.truncate(k);
    positions
}
