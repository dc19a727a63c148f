use std::fmt;

use serde::{Deserialize, Serialize};

/// Spacing between the ranks of two adjacent priority tokens.
pub const RANK_STEP: u32 = 100;

/// Numeric queue rank derived from a priority token.
///
/// Lower ranks dequeue first. Explicit ranks are spaced [`RANK_STEP`] apart
/// so that finer-grained ranks can later be slotted between two existing
/// ones without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(u32);

impl Rank {
    /// The most urgent explicit rank (ordinal 0).
    pub const FIRST: Rank = Rank(RANK_STEP);

    /// Rank given to unknown or absent tokens: served after everything else.
    pub const LAST: Rank = Rank(u32::MAX);

    /// Rank for the token at zero-based position `ordinal` of a priority order.
    pub fn from_ordinal(ordinal: usize) -> Self {
        let step = u32::try_from(ordinal)
            .ok()
            .and_then(|o| o.checked_add(1))
            .and_then(|o| o.checked_mul(RANK_STEP));
        Rank(step.unwrap_or(u32::MAX))
    }

    /// Wrap a raw rank value.
    pub const fn new(value: u32) -> Self {
        Rank(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn is_last(self) -> bool {
        self == Self::LAST
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_last() {
            f.write_str("last")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<Rank> for u32 {
    fn from(rank: Rank) -> Self {
        rank.0
    }
}
