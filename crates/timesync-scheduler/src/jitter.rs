use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Uniform draw over `[lo, hi]`, reproducible for a given `seed`.
///
/// Bounds given in the wrong order are swapped. `lo == hi` returns `lo`
/// without touching the generator, so a zero-width window always yields 0.
pub fn random_in_range(seed: i64, lo: i64, hi: i64) -> i64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if lo == hi {
        return lo;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
    rng.gen_range(lo..=hi)
}

/// Per-device jitter source.
///
/// Every draw re-seeds from the device seed mixed with the listener name and
/// the exact event time, so two listeners (or two successive periods of one
/// listener) never share an offset just because they share a device seed.
#[derive(Debug, Clone, Copy)]
pub struct JitterGenerator {
    seed: i64,
}

impl JitterGenerator {
    pub fn new(seed: i64) -> Self {
        Self { seed }
    }

    /// Offset within `±range / 2` (millisecond resolution) for the event of
    /// `listener` falling exactly at `exact`.
    pub fn offset(&self, listener: &str, exact: DateTime<Utc>, range: Duration) -> Duration {
        let half = range.num_milliseconds() / 2;
        let ms = random_in_range(self.draw_seed(listener, exact), -half, half);
        Duration::milliseconds(ms)
    }

    fn draw_seed(&self, listener: &str, exact: DateTime<Utc>) -> i64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(listener.as_bytes());
        hasher.update([0u8]);
        hasher.update(exact.timestamp_millis().to_le_bytes());
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        i64::from_le_bytes(head)
    }
}
