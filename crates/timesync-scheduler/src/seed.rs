use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{db::SchedulerStore, error::Result};

/// Source of stable, device-identifying strings.
///
/// Best effort: an identifier that cannot be read is left out of the list.
/// Fewer identifiers weaken decorrelation between devices but never fail
/// seed creation.
pub trait DeviceIdentity {
    fn identifiers(&self) -> Vec<String>;
}

/// Fixed identifier list, for hosts that resolve identity up front.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Vec<String>);

impl DeviceIdentity for StaticIdentity {
    fn identifiers(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Expand an identity string into a well-distributed, non-zero 64-bit seed.
///
/// SHA-256 of the identity is folded to 32 bits and used to seed ChaCha8,
/// whose first non-zero output becomes the seed. Zero is skipped because the
/// store uses it to mean "no seed yet".
pub fn seed_from_identity(identity: &str) -> i64 {
    let digest = Sha256::digest(identity.as_bytes());
    let folded = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);

    let mut rng = ChaCha8Rng::seed_from_u64(u64::from(folded));
    loop {
        let candidate = rng.next_u64() as i64;
        if candidate != 0 {
            return candidate;
        }
    }
}

/// Creates the device seed once and hands back the persisted value ever after.
pub struct DeviceSeedManager<I> {
    identity: I,
}

impl<I: DeviceIdentity> DeviceSeedManager<I> {
    pub fn new(identity: I) -> Self {
        Self { identity }
    }

    /// Return the persisted seed, creating and persisting it on first use.
    ///
    /// A store failure is returned as-is: there is no degraded mode without
    /// a stable seed.
    pub fn get_or_create_seed(&self, store: &mut dyn SchedulerStore) -> Result<i64> {
        let existing = store.seed()?;
        if existing != 0 {
            debug!(seed = existing, "device seed loaded");
            return Ok(existing);
        }

        let ids = self.identity.identifiers();
        if ids.is_empty() {
            warn!("no device identifiers available; jitter will match other anonymous devices");
        }
        let seed = seed_from_identity(&ids.concat());
        store.set_seed(seed)?;
        info!(identifiers = ids.len(), "device seed created");
        Ok(seed)
    }
}
