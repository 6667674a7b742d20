//! Request/response records exchanged between the scheduler and its workers.
//!
//! Both records have a fixed size on the wire: little-endian `f64`/`u64`
//! fields, no header and no delimiter. A reader that gets zero bytes where a
//! record should start treats it as the peer shutting down.
//!
//! ```text
//! Request  (32 bytes)  left | right | density_budget | sent_at
//! Response (40 bytes)  estimate | error_density | received_at | computed_at | replied_at
//! ```

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time in microseconds since the UNIX epoch.
///
/// Only used for diagnostics; nothing in the scheduler depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self(micros)
    }

    /// Time from `earlier` to `self`, zero if the clock went backwards.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Work item sent to a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub left: f64,
    pub right: f64,
    /// Largest acceptable error per unit length.
    pub density_budget: f64,
    pub sent_at: Timestamp,
}

/// A worker's answer to one [`Request`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    /// Integral over `[left, right]` of the request.
    pub estimate: f64,
    /// Error of `estimate` per unit length.
    pub error_density: f64,
    pub received_at: Timestamp,
    pub computed_at: Timestamp,
    pub replied_at: Timestamp,
}

impl Request {
    /// Encoded size in bytes.
    pub const SIZE: usize = 32;

    /// Create a request stamped with the current time.
    pub fn new(left: f64, right: f64, density_budget: f64) -> Self {
        Self {
            left,
            right,
            density_budget,
            sent_at: Timestamp::now(),
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.left.to_le_bytes());
        buf[8..16].copy_from_slice(&self.right.to_le_bytes());
        buf[16..24].copy_from_slice(&self.density_budget.to_le_bytes());
        buf[24..32].copy_from_slice(&self.sent_at.0.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            left: f64_at(buf, 0),
            right: f64_at(buf, 8),
            density_budget: f64_at(buf, 16),
            sent_at: Timestamp(u64_at(buf, 24)),
        }
    }
}

impl Response {
    /// Encoded size in bytes.
    pub const SIZE: usize = 40;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.estimate.to_le_bytes());
        buf[8..16].copy_from_slice(&self.error_density.to_le_bytes());
        buf[16..24].copy_from_slice(&self.received_at.0.to_le_bytes());
        buf[24..32].copy_from_slice(&self.computed_at.0.to_le_bytes());
        buf[32..40].copy_from_slice(&self.replied_at.0.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            estimate: f64_at(buf, 0),
            error_density: f64_at(buf, 8),
            received_at: Timestamp(u64_at(buf, 16)),
            computed_at: Timestamp(u64_at(buf, 24)),
            replied_at: Timestamp(u64_at(buf, 32)),
        }
    }
}

fn u64_at(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn f64_at(buf: &[u8], offset: usize) -> f64 {
    f64::from_bits(u64_at(buf, offset))
}
