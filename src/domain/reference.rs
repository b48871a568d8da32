//! Deterministic gateway reference derivation.
//!
//! The gateway only accepts a short numeric reference per transaction. We
//! derive it from the caller-supplied transaction id so the callback can be
//! mapped back to the ledger row without any extra lookup table.

use serde::{Deserialize, Serialize};
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Width of the gateway's numeric reference field, in decimal digits.
pub const REFERENCE_DIGITS: u32 = 10;

/// Exclusive upper bound of a reference (10^REFERENCE_DIGITS).
pub const REFERENCE_MODULUS: u64 = 10u64.pow(REFERENCE_DIGITS);

/// Gateway-compatible numeric reference. Always in `1..REFERENCE_MODULUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayReference(u64);

impl GatewayReference {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Storage representation. Lossless because the modulus fits in `i64`.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Rebuilds a reference read back from storage or from a callback field.
    /// Returns `None` when the value is outside the gateway field width.
    pub fn from_stored(value: i64) -> Option<Self> {
        if value <= 0 || value as u64 >= REFERENCE_MODULUS {
            return None;
        }
        Some(Self(value as u64))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<i64>().ok().and_then(Self::from_stored)
    }
}

impl fmt::Display for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps a transaction id onto the gateway reference space.
///
/// Pure and stable across processes and releases: the result is persisted and
/// echoed back by the gateway, so changing this function orphans every pending
/// row.
pub fn derive(transaction_id: &str) -> GatewayReference {
    let reduced = fnv1a_64(transaction_id.as_bytes()) % REFERENCE_MODULUS;
    GatewayReference(if reduced == 0 { 1 } else { reduced })
}
