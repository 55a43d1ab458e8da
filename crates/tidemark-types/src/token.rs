//! Token ranges on the 64-bit hash ring.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of distinct tokens on the ring.
const RING_SIZE: u128 = 1 << 64;

/// Most pieces [`TokenRange::split`] ever returns.
pub const MAX_SPLIT_PARTS: u64 = 4096;

/// A half-open interval `(start, end]` of the signed 64-bit token ring.
///
/// `start > end` describes the range that wraps past `i64::MAX`.
/// `start == end` describes the whole ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenRange {
    start: i64,
    end: i64,
}

impl TokenRange {
    /// Create a token range.
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Exclusive lower bound.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Inclusive upper bound.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Whether the range crosses the ring boundary.
    pub fn is_wrapping(&self) -> bool {
        self.start >= self.end
    }

    /// Whether the range covers every token.
    pub fn is_full_ring(&self) -> bool {
        self.start == self.end
    }

    /// Number of tokens in the range.
    pub fn size(&self) -> u128 {
        if self.is_full_ring() {
            RING_SIZE
        } else {
            self.offset(self.end)
        }
    }

    /// Clockwise distance from `start` to `token`.
    fn offset(&self, token: i64) -> u128 {
        (token as i128 - self.start as i128).rem_euclid(RING_SIZE as i128) as u128
    }

    /// Whether `token` falls inside the range.
    pub fn contains_token(&self, token: i64) -> bool {
        if self.is_full_ring() {
            return true;
        }
        let off = self.offset(token);
        off != 0 && off <= self.size()
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &TokenRange) -> bool {
        if self.is_full_ring() {
            return true;
        }
        if other.is_full_ring() {
            return false;
        }
        self.offset(other.start) + other.size() <= self.size()
    }

    /// Whether the two ranges share at least one token.
    pub fn overlaps(&self, other: &TokenRange) -> bool {
        if self.is_full_ring() || other.is_full_ring() {
            return true;
        }
        let start_offset = self.offset(other.start);
        start_offset < self.size() || start_offset + other.size() > RING_SIZE
    }

    /// Split into `parts` contiguous sub-ranges of near-equal token count.
    ///
    /// The pieces tile the range exactly and are returned in ring order.
    /// A range with fewer tokens than `parts` is returned whole, and `parts`
    /// is capped at [`MAX_SPLIT_PARTS`].
    pub fn split(&self, parts: u64) -> Vec<TokenRange> {
        let size = self.size();
        let parts = parts.min(MAX_SPLIT_PARTS);
        if parts <= 1 || size < parts as u128 {
            return vec![*self];
        }

        let mut pieces = Vec::new();
        let mut prev = self.start;
        for i in 1..parts as u128 {
            let off = size * i / parts as u128;
            let boundary = self.start.wrapping_add(off as u64 as i64);
            pieces.push(TokenRange::new(prev, boundary));
            prev = boundary;
        }
        pieces.push(TokenRange::new(prev, self.end));
        pieces
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}
