//! ActionID minting.
//!
//! The original library derived IDs from wall-clock time assuming
//! microsecond precision, which is unsafe under concurrent load (two
//! actions in the same microsecond collide). Per the redesign note, IDs are
//! instead a monotonic counter concatenated with a per-session nonce, so
//! uniqueness holds for the connection's lifetime regardless of timing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mints unique `ActionID` tokens for one session.
pub struct ActionIdGenerator {
    nonce: u64,
    counter: AtomicU64,
}

impl ActionIdGenerator {
    /// `nonce` should differ across sessions sharing a process (e.g. derived
    /// from the process ID, a random seed, or a connection sequence number);
    /// it is opaque to the PBX.
    pub fn new(nonce: u64) -> Self {
        ActionIdGenerator {
            nonce,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:x}-{:x}", self.nonce, seq)
    }
}
