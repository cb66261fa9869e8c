//! Seeded random source for fault injection.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Largest packet loss reported for a single frame.
pub const MAX_MISSING_PACKETS: u32 = 16;

/// Shared dice for fault decisions. A fixed seed replays the same faults.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded when `seed` is set, otherwise from OS entropy.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate`. Rates at or beyond the ends of `[0, 1]`
    /// never draw.
    pub fn roll(&self, rate: f64) -> bool {
        match rate {
            r if r <= 0.0 => false,
            r if r >= 1.0 => true,
            r => self.inner.lock().gen::<f64>() < r,
        }
    }

    /// Packets lost by a damaged frame, in `1..=MAX_MISSING_PACKETS`.
    pub fn missing_packets(&self) -> u32 {
        self.inner.lock().gen_range(1..=MAX_MISSING_PACKETS)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").finish_non_exhaustive()
    }
}
