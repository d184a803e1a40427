//! Clock & Crypto. Monotonic and wall-clock time, SHA-256 digest, HMAC,
//! and random ID generation. Kept as a small trait so the facade and sync
//! manager can be driven by a fixed clock in tests rather than calling
//! `SystemTime::now()` deep in the call stack.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since epoch. All timestamps in this crate are
    /// expressed in this unit.
    fn now_ms(&self) -> i64;

    /// Monotonic instant, used only for measuring elapsed durations
    /// (backoff timers, sync history), never persisted.
    fn monotonic(&self) -> Instant;
}

#[derive(Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// A fixed clock for deterministic tests, letting end-to-end scenarios
/// advance time explicitly instead of racing the wall clock.
#[derive(Clone)]
pub struct FixedClock {
    millis: std::sync::Arc<std::sync::atomic::AtomicI64>,
    epoch: Instant,
}

impl FixedClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(start_ms)),
            epoch: Instant::now(),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.millis
            .fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: i64) {
        self.millis.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn monotonic(&self) -> Instant {
        self.epoch
    }
}

/// SHA-256 over raw bytes, hex-encoded. Used for the integrity hash and
/// checksum over canonicalized JSON.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256, hex-encoded. Reserved for request-signing use by the
/// external aggregator submission path, which lives outside this crate.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// A v4-shape random id, generated locally rather than assigned by a
/// server round trip.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
    }
}
