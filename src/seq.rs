//! Wrapping 32-bit TCP sequence numbers.
//!
//! Sequence numbers live on a ring of 2³² values, so the usual integer
//! ordering is meaningless once a connection wraps. All comparisons use the
//! half-space rule: `a` comes before `b` when the unsigned difference
//! `b - a` fits in the lower half of the ring. The predicates below are the
//! only way higher modules may order sequence numbers.

use core::fmt;
use core::ops::{Add, AddAssign};

/// A TCP sequence number, with wrapping comparison semantics.
///
/// `PartialOrd` is intentionally not implemented: the half-space relation is
/// not transitive over the full ring, so every comparison must be explicit
/// about its direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// `self < other` under the half-space rule.
    ///
    /// Holds when `(other - self - 1) mod 2³²` has the high bit clear, i.e.
    /// the unsigned subtraction does not overflow into the upper half.
    pub fn before(self, other: SeqNum) -> bool {
        other.0.wrapping_sub(self.0.wrapping_add(1)) & 0x8000_0000 == 0
    }

    /// `self <= other` under the half-space rule.
    pub fn before_eq(self, other: SeqNum) -> bool {
        other.0.wrapping_sub(self.0) & 0x8000_0000 == 0
    }

    /// `self > other` under the half-space rule.
    pub fn after(self, other: SeqNum) -> bool {
        self.0.wrapping_sub(other.0.wrapping_add(1)) & 0x8000_0000 == 0
    }

    /// `self >= other` under the half-space rule.
    pub fn after_eq(self, other: SeqNum) -> bool {
        self.0.wrapping_sub(other.0) & 0x8000_0000 == 0
    }

    /// The number of bytes from `self` up to `other`, mod 2³².
    pub fn offset_to(self, other: SeqNum) -> u32 {
        other.0.wrapping_sub(self.0)
    }
}

impl Add<u32> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNum {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl From<u32> for SeqNum {
    fn from(value: u32) -> SeqNum {
        SeqNum(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
