use std::fmt::Display;

use super::AbstractDomain;
use crate::intermediate_representation::{BitSize, Bitvector, BitvectorExtended};

#[cfg(test)]
mod tests;

/// The maximal number of intervals kept in a range set.
/// Unions with more fragments collapse to their convex hull.
const MAX_INTERVALS: usize = 4;

/// The maximal bit width for which transfer functions stay precise.
/// Wider values are tracked as the full set.
const MAX_PRECISE_WIDTH: u32 = 64;

/// A conservative over-approximation of the values an integer of fixed bit
/// width may hold, represented as a union of closed-open wrap-aware intervals.
///
/// Internally the set is normalized to a sorted list of disjoint,
/// non-adjacent intervals `lo < hi <= 2^width` over the unsigned value space;
/// a wrap-around interval is stored as its two linear pieces.
/// The empty set (no intervals) and the full set (one interval covering
/// everything) are distinguished values.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct RangeSet {
    width: BitSize,
    intervals: Vec<(u128, u128)>,
}

fn modulus(width: BitSize) -> u128 {
    // Values wider than 64 bits are only ever tracked as empty or full,
    // so a saturated modulus for 128-bit values is sufficient.
    if width.as_u32() >= 128 {
        u128::MAX
    } else {
        1u128 << width.as_u32()
    }
}

fn half_space(width: BitSize) -> u128 {
    1u128 << (width.as_u32() - 1)
}

impl RangeSet {
    /// Create the empty set of the given width.
    pub fn empty(width: BitSize) -> RangeSet {
        RangeSet {
            width,
            intervals: Vec::new(),
        }
    }

    /// Create the full set of the given width.
    pub fn new_top(width: BitSize) -> RangeSet {
        RangeSet {
            width,
            intervals: vec![(0, modulus(width))],
        }
    }

    /// Create a set containing exactly one value (taken modulo the width).
    pub fn singleton(width: BitSize, value: u128) -> RangeSet {
        let value = value % modulus(width);
        RangeSet {
            width,
            intervals: vec![(value, value + 1)],
        }
    }

    /// Lift an integer constant to a singleton set.
    pub fn from_constant(value: &Bitvector) -> RangeSet {
        let width = value.bitsize();
        if width.as_u32() > MAX_PRECISE_WIDTH {
            return RangeSet::new_top(width);
        }
        RangeSet::singleton(width, value.try_to_u128().unwrap())
    }

    /// Create the closed-open wrap-aware interval `[lo, hi)`.
    /// `lo == hi` denotes the full set.
    pub fn interval(width: BitSize, lo: u128, hi: u128) -> RangeSet {
        let m = modulus(width);
        let (lo, hi) = (lo % m, hi % m);
        if lo == hi {
            return RangeSet::new_top(width);
        }
        if lo < hi {
            RangeSet {
                width,
                intervals: vec![(lo, hi)],
            }
        } else {
            RangeSet {
                width,
                intervals: vec![(0, hi), (lo, m)],
            }
        }
    }

    /// Create the interval starting at `lo` containing `len` consecutive values
    /// (wrapping around if necessary).
    fn wrap_interval(width: BitSize, lo: u128, len: u128) -> RangeSet {
        let m = modulus(width);
        if len == 0 {
            return RangeSet::empty(width);
        }
        if len >= m {
            return RangeSet::new_top(width);
        }
        let lo = lo % m;
        let hi = (lo + len) % m;
        if lo == hi {
            return RangeSet::new_top(width);
        }
        RangeSet::interval(width, lo, hi)
    }

    /// Create the set of all values between `lo` and `hi` in signed order,
    /// both bounds inclusive.
    fn signed_interval(width: BitSize, lo: i128, hi: i128) -> RangeSet {
        if lo > hi {
            return RangeSet::empty(width);
        }
        let m = modulus(width) as i128;
        RangeSet::wrap_interval(width, lo.rem_euclid(m) as u128, (hi - lo + 1) as u128)
    }

    /// The bit width of the contained values.
    pub fn width(&self) -> BitSize {
        self.width
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The number of values contained in the set.
    pub fn span(&self) -> u128 {
        self.intervals.iter().map(|(lo, hi)| hi - lo).sum()
    }

    /// Whether the set contains the given value.
    pub fn contains(&self, value: u128) -> bool {
        self.intervals
            .iter()
            .any(|&(lo, hi)| lo <= value && value < hi)
    }

    /// If the set contains exactly one value, return it.
    pub fn as_singleton(&self) -> Option<u128> {
        match self.intervals.as_slice() {
            [(lo, hi)] if hi - lo == 1 => Some(*lo),
            _ => None,
        }
    }

    /// The smallest contained value in unsigned order.
    pub fn min_unsigned(&self) -> Option<u128> {
        self.intervals.first().map(|(lo, _)| *lo)
    }

    /// The largest contained value in unsigned order.
    pub fn max_unsigned(&self) -> Option<u128> {
        self.intervals.last().map(|(_, hi)| hi - 1)
    }

    /// The smallest contained value in signed order.
    pub fn min_signed(&self) -> Option<i128> {
        let m = modulus(self.width) as i128;
        match self.first_value_at_least(half_space(self.width)) {
            Some(negative) => Some(negative as i128 - m),
            None => self.min_unsigned().map(|v| v as i128),
        }
    }

    /// The largest contained value in signed order.
    pub fn max_signed(&self) -> Option<i128> {
        let m = modulus(self.width) as i128;
        match self.last_value_below(half_space(self.width)) {
            Some(positive) => Some(positive as i128),
            None => self.max_unsigned().map(|v| v as i128 - m),
        }
    }

    fn first_value_at_least(&self, bound: u128) -> Option<u128> {
        for &(lo, hi) in &self.intervals {
            if hi > bound {
                return Some(std::cmp::max(lo, bound));
            }
        }
        None
    }

    fn last_value_below(&self, bound: u128) -> Option<u128> {
        for &(lo, hi) in self.intervals.iter().rev() {
            if lo < bound {
                return Some(std::cmp::min(hi, bound) - 1);
            }
        }
        None
    }

    fn from_pieces(width: BitSize, mut pieces: Vec<(u128, u128)>) -> RangeSet {
        let m = modulus(width);
        pieces.retain(|(lo, hi)| lo < hi);
        for piece in pieces.iter_mut() {
            piece.1 = std::cmp::min(piece.1, m);
        }
        pieces.sort_unstable();
        let mut merged: Vec<(u128, u128)> = Vec::new();
        for (lo, hi) in pieces {
            match merged.last_mut() {
                Some(last) if lo <= last.1 => last.1 = std::cmp::max(last.1, hi),
                _ => merged.push((lo, hi)),
            }
        }
        if merged.len() > MAX_INTERVALS {
            let lo = merged.first().unwrap().0;
            let hi = merged.last().unwrap().1;
            merged = vec![(lo, hi)];
        }
        RangeSet {
            width,
            intervals: merged,
        }
    }

    /// The exact set union.
    pub fn union(&self, other: &RangeSet) -> RangeSet {
        assert_eq!(self.width, other.width);
        let mut pieces = self.intervals.clone();
        pieces.extend(other.intervals.iter().copied());
        RangeSet::from_pieces(self.width, pieces)
    }

    /// The widening union: the union of both sets, collapsed to the full set
    /// if the union would cover more than half of the representable values
    /// while neither operand did.
    pub fn safe_union(&self, other: &RangeSet) -> RangeSet {
        if self.is_top() || other.is_top() {
            return RangeSet::new_top(self.width);
        }
        let union = self.union(other);
        let half = half_space(self.width);
        if union.span() > half && self.span() <= half && other.span() <= half {
            return RangeSet::new_top(self.width);
        }
        union
    }

    /// Jump-widen a grown value: `self` is the new value, `old` the previous
    /// one. If only the upper end grew, extend it to cover half the value
    /// space above the stable minimum; if only the lower end grew, extend
    /// downward likewise; if both ends moved, give up and return the full set.
    ///
    /// The result always contains `self`. Growing ends jump far enough that
    /// bounded loop counters regain precision through edge refinement instead
    /// of creeping one widening step per iteration.
    pub fn widen_from(&self, old: &RangeSet) -> RangeSet {
        let width = self.width;
        if self.is_top() || old.is_empty() || self.is_empty() {
            return self.clone();
        }
        let half = half_space(width);
        let new_min = self.min_unsigned().unwrap();
        let new_max = self.max_unsigned().unwrap();
        if self.span() >= half || new_max - new_min >= half {
            // Already wider than any jump target; further growth is left to
            // the iteration caps.
            return self.clone();
        }
        let old_min = old.min_unsigned().unwrap();
        let old_max = old.max_unsigned().unwrap();
        if new_min == old_min && new_max > old_max {
            RangeSet::wrap_interval(width, new_min, half)
        } else if new_max == old_max && new_min < old_min {
            let m = modulus(width) as i128;
            let lo = (new_max as i128 + 1 - half as i128).rem_euclid(m) as u128;
            RangeSet::wrap_interval(width, lo, half)
        } else {
            RangeSet::new_top(width)
        }
    }

    /// The set intersection.
    pub fn intersect(&self, other: &RangeSet) -> RangeSet {
        assert_eq!(self.width, other.width);
        let mut pieces = Vec::new();
        for &(a_lo, a_hi) in &self.intervals {
            for &(b_lo, b_hi) in &other.intervals {
                let lo = std::cmp::max(a_lo, b_lo);
                let hi = std::cmp::min(a_hi, b_hi);
                if lo < hi {
                    pieces.push((lo, hi));
                }
            }
        }
        RangeSet::from_pieces(self.width, pieces)
    }

    /// The complement set.
    pub fn complement(&self) -> RangeSet {
        let m = modulus(self.width);
        let mut pieces = Vec::new();
        let mut cursor = 0;
        for &(lo, hi) in &self.intervals {
            if cursor < lo {
                pieces.push((cursor, lo));
            }
            cursor = hi;
        }
        if cursor < m {
            pieces.push((cursor, m));
        }
        RangeSet {
            width: self.width,
            intervals: pieces,
        }
    }

    /// Remove a single value from the set.
    pub fn remove_value(&self, value: u128) -> RangeSet {
        self.intersect(&RangeSet::singleton(self.width, value).complement())
    }

    fn precise(&self) -> bool {
        self.width.as_u32() <= MAX_PRECISE_WIDTH
    }

    /// Split the set into pieces that do not cross the sign boundary,
    /// given as inclusive signed bounds.
    fn signed_pieces(&self) -> Vec<(i128, i128)> {
        let half = half_space(self.width);
        let m = modulus(self.width) as i128;
        let mut pieces = Vec::new();
        for &(lo, hi) in &self.intervals {
            if lo < half {
                let upper = std::cmp::min(hi, half);
                pieces.push((lo as i128, upper as i128 - 1));
            }
            if hi > half {
                let lower = std::cmp::max(lo, half);
                pieces.push((lower as i128 - m, hi as i128 - 1 - m));
            }
        }
        pieces
    }
}

// ------------------------------------------------------------------
// Transfer functions

impl RangeSet {
    /// Wrapping addition.
    pub fn add(&self, rhs: &RangeSet) -> RangeSet {
        self.pointwise(rhs, |width, a, b| {
            let len = (a.1 - a.0) + (b.1 - b.0) - 1;
            Some(RangeSet::wrap_interval(width, a.0 + b.0, len))
        })
    }

    /// Wrapping subtraction.
    pub fn sub(&self, rhs: &RangeSet) -> RangeSet {
        let m = modulus(self.width);
        self.pointwise(rhs, |width, a, b| {
            let len = (a.1 - a.0) + (b.1 - b.0) - 1;
            let lo = (a.0 + m - (b.1 - 1)) % m;
            Some(RangeSet::wrap_interval(width, lo, len))
        })
    }

    /// Wrapping multiplication (unsigned view).
    pub fn mul(&self, rhs: &RangeSet) -> RangeSet {
        let m = modulus(self.width);
        self.pointwise(rhs, |width, a, b| {
            let max = (a.1 - 1).checked_mul(b.1 - 1)?;
            if max >= m {
                return None;
            }
            Some(RangeSet::interval(width, a.0 * b.0, max + 1))
        })
    }

    /// Unsigned division. The full set results if the divisor may be zero.
    pub fn udiv(&self, rhs: &RangeSet) -> RangeSet {
        if rhs.contains(0) {
            return self.coarse_result(rhs);
        }
        self.pointwise(rhs, |width, a, b| {
            let lo = a.0 / (b.1 - 1);
            let hi = (a.1 - 1) / b.0;
            Some(RangeSet::interval(width, lo, hi + 1))
        })
    }

    /// Signed division. The full set results if the divisor may be zero.
    pub fn sdiv(&self, rhs: &RangeSet) -> RangeSet {
        if rhs.contains(0) {
            return self.coarse_result(rhs);
        }
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(self.width);
        }
        if !self.precise() || self.is_top() || rhs.is_top() {
            return RangeSet::new_top(self.width);
        }
        let int_min = -(half_space(self.width) as i128);
        let int_max = half_space(self.width) as i128 - 1;
        let mut result = RangeSet::empty(self.width);
        for a in self.signed_pieces() {
            for b in rhs.signed_pieces() {
                let corners = [a.0 / b.0, a.0 / b.1, a.1 / b.0, a.1 / b.1];
                let lo = *corners.iter().min().unwrap();
                let hi = *corners.iter().max().unwrap();
                if lo < int_min || hi > int_max {
                    // Division overflow (INT_MIN / -1) wraps.
                    return RangeSet::new_top(self.width);
                }
                result = result.union(&RangeSet::signed_interval(self.width, lo, hi));
            }
        }
        result
    }

    /// Unsigned remainder. The full set results if the divisor may be zero.
    pub fn urem(&self, rhs: &RangeSet) -> RangeSet {
        if rhs.contains(0) {
            return self.coarse_result(rhs);
        }
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(self.width);
        }
        if !self.precise() {
            return RangeSet::new_top(self.width);
        }
        let max_divisor = rhs.max_unsigned().unwrap();
        if self.max_unsigned().unwrap() < rhs.min_unsigned().unwrap() {
            return self.clone();
        }
        RangeSet::wrap_interval(self.width, 0, max_divisor)
    }

    /// Signed remainder. The full set results if the divisor may be zero.
    pub fn srem(&self, rhs: &RangeSet) -> RangeSet {
        if rhs.contains(0) {
            return self.coarse_result(rhs);
        }
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(self.width);
        }
        if !self.precise() || rhs.is_top() {
            return RangeSet::new_top(self.width);
        }
        let max_abs = rhs
            .signed_pieces()
            .iter()
            .map(|&(lo, hi)| std::cmp::max(lo.abs(), hi.abs()))
            .max()
            .unwrap();
        RangeSet::signed_interval(self.width, -(max_abs - 1), max_abs - 1)
    }

    /// Left shift. Only precise for a constant shift amount.
    pub fn shl(&self, rhs: &RangeSet) -> RangeSet {
        let m = modulus(self.width);
        match rhs.as_singleton() {
            Some(k) if k < self.width.as_u32() as u128 => self.pointwise_unary(|width, a| {
                let max = (a.1 - 1).checked_shl(k as u32)?;
                if max >= m {
                    return None;
                }
                Some(RangeSet::interval(width, a.0 << k, max + 1))
            }),
            _ => self.coarse_result(rhs),
        }
    }

    /// Logical right shift. Only precise for a constant shift amount.
    pub fn lshr(&self, rhs: &RangeSet) -> RangeSet {
        match rhs.as_singleton() {
            Some(k) if k < self.width.as_u32() as u128 => self.pointwise_unary(|width, a| {
                Some(RangeSet::interval(
                    width,
                    a.0 >> k,
                    ((a.1 - 1) >> k) + 1,
                ))
            }),
            _ => self.coarse_result(rhs),
        }
    }

    /// Arithmetic right shift. Only precise for a constant shift amount.
    pub fn ashr(&self, rhs: &RangeSet) -> RangeSet {
        match rhs.as_singleton() {
            Some(k) if k < self.width.as_u32() as u128 => {
                if self.is_empty() {
                    return RangeSet::empty(self.width);
                }
                if !self.precise() || self.is_top() {
                    return RangeSet::new_top(self.width);
                }
                let mut result = RangeSet::empty(self.width);
                for (lo, hi) in self.signed_pieces() {
                    result = result.union(&RangeSet::signed_interval(
                        self.width,
                        lo >> k,
                        hi >> k,
                    ));
                }
                result
            }
            _ => self.coarse_result(rhs),
        }
    }

    /// Bitwise and. Only precise if both operands are singletons.
    pub fn and(&self, rhs: &RangeSet) -> RangeSet {
        self.bitwise(rhs, |a, b| a & b)
    }

    /// Bitwise or. Only precise if both operands are singletons.
    pub fn or(&self, rhs: &RangeSet) -> RangeSet {
        self.bitwise(rhs, |a, b| a | b)
    }

    /// Bitwise xor. Only precise if both operands are singletons.
    pub fn xor(&self, rhs: &RangeSet) -> RangeSet {
        self.bitwise(rhs, |a, b| a ^ b)
    }

    fn bitwise(&self, rhs: &RangeSet, op: impl Fn(u128, u128) -> u128) -> RangeSet {
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(self.width);
        }
        match (self.as_singleton(), rhs.as_singleton()) {
            (Some(a), Some(b)) => RangeSet::singleton(self.width, op(a, b)),
            _ => RangeSet::new_top(self.width),
        }
    }

    fn coarse_result(&self, rhs: &RangeSet) -> RangeSet {
        if self.is_empty() || rhs.is_empty() {
            RangeSet::empty(self.width)
        } else {
            RangeSet::new_top(self.width)
        }
    }

    fn pointwise(
        &self,
        rhs: &RangeSet,
        op: impl Fn(BitSize, (u128, u128), (u128, u128)) -> Option<RangeSet>,
    ) -> RangeSet {
        assert_eq!(self.width, rhs.width);
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(self.width);
        }
        if !self.precise() {
            return RangeSet::new_top(self.width);
        }
        let mut result = RangeSet::empty(self.width);
        for &a in &self.intervals {
            for &b in &rhs.intervals {
                match op(self.width, a, b) {
                    Some(partial) => result = result.union(&partial),
                    None => return RangeSet::new_top(self.width),
                }
                if result.is_top() {
                    return result;
                }
            }
        }
        result
    }

    fn pointwise_unary(
        &self,
        op: impl Fn(BitSize, (u128, u128)) -> Option<RangeSet>,
    ) -> RangeSet {
        if self.is_empty() {
            return RangeSet::empty(self.width);
        }
        if !self.precise() {
            return RangeSet::new_top(self.width);
        }
        let mut result = RangeSet::empty(self.width);
        for &a in &self.intervals {
            match op(self.width, a) {
                Some(partial) => result = result.union(&partial),
                None => return RangeSet::new_top(self.width),
            }
        }
        result
    }
}

// ------------------------------------------------------------------
// Width conversions

impl RangeSet {
    /// Truncate all values to the given smaller width.
    pub fn trunc(&self, new_width: BitSize) -> RangeSet {
        if self.is_empty() {
            return RangeSet::empty(new_width);
        }
        if !self.precise() {
            return RangeSet::new_top(new_width);
        }
        let new_m = modulus(new_width);
        let mut result = RangeSet::empty(new_width);
        for &(lo, hi) in &self.intervals {
            let len = hi - lo;
            if len >= new_m {
                return RangeSet::new_top(new_width);
            }
            result = result.union(&RangeSet::wrap_interval(new_width, lo % new_m, len));
            if result.is_top() {
                return result;
            }
        }
        result
    }

    /// Zero-extend all values to the given larger width.
    pub fn zext(&self, new_width: BitSize) -> RangeSet {
        if self.is_empty() {
            return RangeSet::empty(new_width);
        }
        if !self.precise() || new_width.as_u32() > MAX_PRECISE_WIDTH {
            return RangeSet::new_top(new_width);
        }
        RangeSet {
            width: new_width,
            intervals: self.intervals.clone(),
        }
    }

    /// Sign-extend all values to the given larger width.
    pub fn sext(&self, new_width: BitSize) -> RangeSet {
        if self.is_empty() {
            return RangeSet::empty(new_width);
        }
        if !self.precise() || new_width.as_u32() > MAX_PRECISE_WIDTH {
            return RangeSet::new_top(new_width);
        }
        let mut result = RangeSet::empty(new_width);
        for (lo, hi) in self.signed_pieces() {
            result = result.union(&RangeSet::signed_interval(new_width, lo, hi));
        }
        result
    }

    /// Convert to the given width: extend (zero or sign) or truncate.
    pub fn resize(&self, new_width: BitSize, signed: bool) -> RangeSet {
        use std::cmp::Ordering::*;
        match self.width.cmp(&new_width) {
            Equal => self.clone(),
            Greater => self.trunc(new_width),
            Less if signed => self.sext(new_width),
            Less => self.zext(new_width),
        }
    }
}

// ------------------------------------------------------------------
// Comparisons and refinement

impl RangeSet {
    /// The 1-bit result set of comparing `self` with `rhs` under the predicate.
    pub fn icmp(&self, pred: crate::intermediate_representation::RelOpType, rhs: &RangeSet) -> RangeSet {
        use crate::intermediate_representation::RelOpType::*;
        let result_width = BitSize::new(1);
        if self.is_empty() || rhs.is_empty() {
            return RangeSet::empty(result_width);
        }
        let (may_true, may_false) = match pred {
            Eq => (
                !self.intersect(rhs).is_empty(),
                !(self.as_singleton().is_some() && self.as_singleton() == rhs.as_singleton()),
            ),
            Ne => {
                let (t, f) = {
                    let eq = self.icmp(Eq, rhs);
                    (eq.contains(1), eq.contains(0))
                };
                (f, t)
            }
            Ult => (
                self.min_unsigned() < rhs.max_unsigned(),
                self.max_unsigned() >= rhs.min_unsigned(),
            ),
            Ule => (
                self.min_unsigned() <= rhs.max_unsigned(),
                self.max_unsigned() > rhs.min_unsigned(),
            ),
            Ugt => return rhs.icmp(Ult, self),
            Uge => return rhs.icmp(Ule, self),
            Slt => (
                self.min_signed() < rhs.max_signed(),
                self.max_signed() >= rhs.min_signed(),
            ),
            Sle => (
                self.min_signed() <= rhs.max_signed(),
                self.max_signed() > rhs.min_signed(),
            ),
            Sgt => return rhs.icmp(Slt, self),
            Sge => return rhs.icmp(Sle, self),
        };
        match (may_true, may_false) {
            (true, true) => RangeSet::new_top(result_width),
            (true, false) => RangeSet::singleton(result_width, 1),
            (false, true) => RangeSet::singleton(result_width, 0),
            (false, false) => RangeSet::empty(result_width),
        }
    }

    /// Refine the operand ranges of a comparison with the knowledge that the
    /// predicate evaluated to `taken`. Returns the refined `(lhs, rhs)` pair.
    pub fn refine_cmp(
        pred: crate::intermediate_representation::RelOpType,
        taken: bool,
        lhs: &RangeSet,
        rhs: &RangeSet,
    ) -> (RangeSet, RangeSet) {
        let pred = if taken { pred } else { pred.negated() };
        RangeSet::refine_true(pred, lhs, rhs)
    }

    fn refine_true(
        pred: crate::intermediate_representation::RelOpType,
        lhs: &RangeSet,
        rhs: &RangeSet,
    ) -> (RangeSet, RangeSet) {
        use crate::intermediate_representation::RelOpType::*;
        let width = lhs.width;
        if lhs.is_empty() || rhs.is_empty() {
            return (RangeSet::empty(width), RangeSet::empty(width));
        }
        let m = modulus(width);
        let int_min = -(half_space(width) as i128);
        let int_max = half_space(width) as i128 - 1;
        match pred {
            Eq => {
                let met = lhs.intersect(rhs);
                (met.clone(), met)
            }
            Ne => {
                let new_lhs = match rhs.as_singleton() {
                    Some(value) => lhs.remove_value(value),
                    None => lhs.clone(),
                };
                let new_rhs = match lhs.as_singleton() {
                    Some(value) => rhs.remove_value(value),
                    None => rhs.clone(),
                };
                (new_lhs, new_rhs)
            }
            Ult => {
                let rhs_max = rhs.max_unsigned().unwrap();
                let lhs_min = lhs.min_unsigned().unwrap();
                let new_lhs = lhs.intersect(&RangeSet {
                    width,
                    intervals: vec![(0, rhs_max)],
                });
                let new_rhs = rhs.intersect(&RangeSet {
                    width,
                    intervals: if lhs_min + 1 < m {
                        vec![(lhs_min + 1, m)]
                    } else {
                        Vec::new()
                    },
                });
                (new_lhs, new_rhs)
            }
            Ule => {
                let rhs_max = rhs.max_unsigned().unwrap();
                let lhs_min = lhs.min_unsigned().unwrap();
                let new_lhs = lhs.intersect(&RangeSet {
                    width,
                    intervals: vec![(0, rhs_max + 1)],
                });
                let new_rhs = rhs.intersect(&RangeSet {
                    width,
                    intervals: vec![(lhs_min, m)],
                });
                (new_lhs, new_rhs)
            }
            Ugt => {
                let (new_rhs, new_lhs) = RangeSet::refine_true(Ult, rhs, lhs);
                (new_lhs, new_rhs)
            }
            Uge => {
                let (new_rhs, new_lhs) = RangeSet::refine_true(Ule, rhs, lhs);
                (new_lhs, new_rhs)
            }
            Slt => {
                let rhs_max = rhs.max_signed().unwrap();
                let lhs_min = lhs.min_signed().unwrap();
                let new_lhs =
                    lhs.intersect(&RangeSet::signed_interval(width, int_min, rhs_max - 1));
                let new_rhs =
                    rhs.intersect(&RangeSet::signed_interval(width, lhs_min + 1, int_max));
                (new_lhs, new_rhs)
            }
            Sle => {
                let rhs_max = rhs.max_signed().unwrap();
                let lhs_min = lhs.min_signed().unwrap();
                let new_lhs = lhs.intersect(&RangeSet::signed_interval(width, int_min, rhs_max));
                let new_rhs = rhs.intersect(&RangeSet::signed_interval(width, lhs_min, int_max));
                (new_lhs, new_rhs)
            }
            Sgt => {
                let (new_rhs, new_lhs) = RangeSet::refine_true(Slt, rhs, lhs);
                (new_lhs, new_rhs)
            }
            Sge => {
                let (new_rhs, new_lhs) = RangeSet::refine_true(Sle, rhs, lhs);
                (new_lhs, new_rhs)
            }
        }
    }
}

// ------------------------------------------------------------------
// Metadata conversion

impl RangeSet {
    /// Convert the set into `[lo, hi)` bitvector pairs for `intrange` metadata.
    ///
    /// The full set is encoded as a single `lo == hi` pair (which consumers
    /// ignore); a union touching both ends of the value space is emitted as
    /// one wrap-around pair plus the remaining inner intervals.
    pub fn to_metadata(&self) -> Vec<(Bitvector, Bitvector)> {
        let width = self.width;
        let m = modulus(width);
        let pair = |lo: u128, hi: u128| {
            (
                Bitvector::from_u128_truncated(lo, width),
                Bitvector::from_u128_truncated(hi % m, width),
            )
        };
        if self.is_top() {
            return vec![pair(0, 0)];
        }
        let n = self.intervals.len();
        if n >= 2 && self.intervals[0].0 == 0 && self.intervals[n - 1].1 == m {
            let mut pairs = vec![pair(self.intervals[n - 1].0, self.intervals[0].1)];
            for &(lo, hi) in &self.intervals[1..n - 1] {
                pairs.push(pair(lo, hi));
            }
            return pairs;
        }
        self.intervals.iter().map(|&(lo, hi)| pair(lo, hi)).collect()
    }
}

impl AbstractDomain for RangeSet {
    /// Merge two range sets, applying widening if necessary.
    fn merge(&self, other: &RangeSet) -> RangeSet {
        self.safe_union(other)
    }

    /// Return `true` if the set spans all representable values.
    fn is_top(&self) -> bool {
        matches!(self.intervals.as_slice(), [(0, hi)] if *hi == modulus(self.width))
    }
}

impl Display for RangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "⊥:i{}", self.width);
        }
        if self.is_top() {
            return write!(f, "⊤:i{}", self.width);
        }
        let rendered: Vec<String> = self
            .intervals
            .iter()
            .map(|(lo, hi)| format!("[{lo:#x}, {hi:#x})"))
            .collect();
        write!(f, "{}:i{}", rendered.join(" ∪ "), self.width)
    }
}
