//! Core value types shared by every layer of the synchronizer.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use alloy::rpc::types::Block;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Half-open range of block numbers, `[start, end)`.
///
/// `start <= end` always holds; an empty range has `start == end` and still
/// remembers where it sits on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    /// Creates a range. An `end` below `start` collapses to an empty range at `start`.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// An empty range positioned at `at`.
    #[must_use]
    pub const fn empty(at: u64) -> Self {
        Self { start: at, end: at }
    }

    /// First block of the range.
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive upper bound.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Last block included in the range, as used by `eth_getLogs`.
    ///
    /// `None` for an empty range.
    #[must_use]
    pub const fn to_block(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub const fn contains(&self, block_number: u64) -> bool {
        block_number >= self.start && block_number < self.end
    }

    /// Smallest range covering both `self` and `other`.
    ///
    /// Empty ranges contribute nothing except when both are empty, in which
    /// case the lower position wins.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => Self::empty(self.start.min(other.start)),
            (true, false) => *other,
            (false, true) => *self,
            (false, false) => Self::new(self.start.min(other.start), self.end.max(other.end)),
        }
    }

    /// Splits into `[start, at)` and `[at, end)`, clamping `at` into the range.
    #[must_use]
    pub fn split_at(&self, at: u64) -> (Self, Self) {
        let at = at.clamp(self.start, self.end);
        (Self::new(self.start, at), Self::new(at, self.end))
    }

    /// Consecutive sub-ranges of at most `size` blocks.
    #[must_use]
    pub fn chunks(&self, size: u64) -> Vec<Self> {
        let size = size.max(1);
        let mut chunks = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = start.saturating_add(size).min(self.end);
            chunks.push(Self::new(start, end));
            start = end;
        }
        chunks
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A block as seen by the block source: number, hash linkage and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
}

impl BlockRecord {
    /// Create a `BlockRecord` from an Alloy block.
    pub fn from_block(block: &Block) -> Self {
        Self {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
        }
    }

    /// Create a new `BlockRecord` manually (useful for testing).
    pub const fn new(number: u64, hash: B256, parent_hash: B256, timestamp: u64) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp,
        }
    }
}

/// Operational freeze flag of the exchange.
///
/// Ordered by severity so escalation is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreezeStatus {
    /// Operator is serving forced requests in time
    NotFrozen,
    /// A forced request outlived the grace period; anyone may freeze
    Freezable,
    /// The exchange was frozen on-chain. Terminal.
    Frozen,
}

impl FreezeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFrozen => "not-frozen",
            Self::Freezable => "freezable",
            Self::Frozen => "frozen",
        }
    }
}

impl fmt::Display for FreezeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreezeStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-frozen" => Ok(Self::NotFrozen),
            "freezable" => Ok(Self::Freezable),
            "frozen" => Ok(Self::Frozen),
            other => Err(SyncError::decoding(
                format!("unknown freeze status '{other}'"),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_basics() {
        let range = BlockRange::new(101, 150);
        assert_eq!(range.len(), 49);
        assert_eq!(range.to_block(), Some(149));
        assert!(range.contains(101));
        assert!(!range.contains(150));
        assert!(BlockRange::new(10, 5).is_empty());
        assert_eq!(BlockRange::empty(7).to_block(), None);
    }

    #[test]
    fn test_merge_ignores_empty_side() {
        let a = BlockRange::new(100, 120);
        assert_eq!(a.merge(&BlockRange::empty(500)), a);
        assert_eq!(BlockRange::empty(500).merge(&a), a);
        assert_eq!(
            BlockRange::empty(9).merge(&BlockRange::empty(4)),
            BlockRange::empty(4)
        );
        assert_eq!(
            a.merge(&BlockRange::new(150, 160)),
            BlockRange::new(100, 160)
        );
    }

    #[test]
    fn test_split_and_chunks() {
        let range = BlockRange::new(0, 10);
        let (left, right) = range.split_at(4);
        assert_eq!(left, BlockRange::new(0, 4));
        assert_eq!(right, BlockRange::new(4, 10));

        let chunks = range.chunks(4);
        assert_eq!(
            chunks,
            vec![
                BlockRange::new(0, 4),
                BlockRange::new(4, 8),
                BlockRange::new(8, 10)
            ]
        );
        assert!(BlockRange::empty(3).chunks(4).is_empty());
    }

    #[test]
    fn test_freeze_status_roundtrip_and_order() {
        for status in [
            FreezeStatus::NotFrozen,
            FreezeStatus::Freezable,
            FreezeStatus::Frozen,
        ] {
            assert_eq!(status.as_str().parse::<FreezeStatus>().ok(), Some(status));
        }
        assert!(FreezeStatus::Frozen > FreezeStatus::Freezable);
        assert!(FreezeStatus::Freezable > FreezeStatus::NotFrozen);
        assert!("melted".parse::<FreezeStatus>().is_err());
    }
}
