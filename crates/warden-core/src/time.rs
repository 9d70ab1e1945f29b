//! Probe timestamps: nanoseconds from the kernel monotonic clock.

use std::{fmt, ops::Add};

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed since `earlier`. Saturates to zero if the
    /// probe delivered records out of order.
    pub fn nanos_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Timestamp(nanos)
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, nanos: u64) -> Timestamp {
        Timestamp(self.0 + nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
