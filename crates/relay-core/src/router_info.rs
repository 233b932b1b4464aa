//! Process-wide context: authoritative time pushed down from the backend,
//! this relay's identity, and its signing keypair. Threaded explicitly into
//! the components that need it rather than kept as ambient global state.

use std::sync::atomic::{AtomicU64, Ordering};

use relay_crypto::Keypair;

pub struct RouterInfo {
    pub relay_id: u64,
    pub keypair: Keypair,
    pub startup_timestamp: u64,
    authoritative_time: AtomicU64,
}

impl RouterInfo {
    pub fn new(relay_id: u64, keypair: Keypair, startup_timestamp: u64) -> Self {
        RouterInfo {
            relay_id,
            keypair,
            startup_timestamp,
            authoritative_time: AtomicU64::new(startup_timestamp),
        }
    }

    /// Current authoritative time, seconds since epoch, as last pushed down
    /// by a successful backend update (or the startup time before the first
    /// one lands).
    pub fn now_unix(&self) -> u64 {
        self.authoritative_time.load(Ordering::Relaxed)
    }

    pub fn set_authoritative_time(&self, now_unix: u64) {
        self.authoritative_time.store(now_unix, Ordering::Relaxed);
    }
}
