use super::*;
use crate::intermediate_representation::RelOpType;

fn w32() -> BitSize {
    BitSize::new(32)
}

fn set(lo: u128, hi: u128) -> RangeSet {
    RangeSet::interval(w32(), lo, hi)
}

#[test]
fn constructors_and_extremes() {
    let top = RangeSet::new_top(w32());
    assert!(top.is_top());
    assert!(!top.is_empty());
    assert_eq!(top.span(), 1u128 << 32);

    let empty = RangeSet::empty(w32());
    assert!(empty.is_empty());
    assert_eq!(empty.span(), 0);

    let one = RangeSet::singleton(w32(), 42);
    assert_eq!(one.as_singleton(), Some(42));
    assert!(one.contains(42));
    assert!(!one.contains(41));

    // A wrap-around interval covers both ends of the value space.
    let wrap = set(0xffff_fff0, 0x10);
    assert!(wrap.contains(0xffff_fff5));
    assert!(wrap.contains(5));
    assert!(!wrap.contains(0x1000));
    assert_eq!(wrap.span(), 0x20);
}

#[test]
fn union_and_intersection() {
    let low = set(0, 10);
    let high = set(20, 30);
    let both = low.union(&high);
    assert!(both.contains(5));
    assert!(both.contains(25));
    assert!(!both.contains(15));

    assert_eq!(both.intersect(&low), low);
    assert!(low.intersect(&high).is_empty());

    // Adjacent intervals merge.
    assert_eq!(set(0, 10).union(&set(10, 20)), set(0, 20));
}

#[test]
fn safe_union_widens_past_half_space() {
    let half = 1u128 << 31;
    let small = set(0, 10);
    let big = set(10, half + 5);
    // Each operand covers at most half the space, the union does not.
    assert!(small.safe_union(&big).is_top());
    // Small unions stay precise.
    assert_eq!(small.safe_union(&set(5, 20)), set(0, 20));
    // Top absorbs everything.
    assert!(RangeSet::new_top(w32()).safe_union(&small).is_top());
}

#[test]
fn signed_extremes() {
    let positive = set(1, 11);
    assert_eq!(positive.min_signed(), Some(1));
    assert_eq!(positive.max_signed(), Some(10));

    // [-2, 2) in two's complement.
    let around_zero = set(0xffff_fffe, 2);
    assert_eq!(around_zero.min_signed(), Some(-2));
    assert_eq!(around_zero.max_signed(), Some(1));
    assert_eq!(around_zero.min_unsigned(), Some(0));
    assert_eq!(around_zero.max_unsigned(), Some(0xffff_ffff));
}

#[test]
fn add_and_sub_wrap() {
    let a = set(10, 20);
    let b = set(1, 3);
    assert_eq!(a.add(&b), set(11, 21));
    assert_eq!(a.sub(&b), set(8, 19));

    // Addition across the wrap boundary stays a compact wrap interval.
    let near_max = set(0xffff_fffe, 0xffff_ffff);
    assert_eq!(near_max.add(&set(1, 3)), set(0xffff_ffff, 1));

    // Overly wide operands collapse.
    let wide = set(0, (1 << 31) + 1);
    assert!(wide.add(&wide).is_top());
}

#[test]
fn mul_and_div() {
    let a = set(2, 5);
    let b = set(3, 4);
    assert_eq!(a.mul(&b), set(6, 13));
    assert!(a.mul(&RangeSet::new_top(w32())).is_top());

    assert_eq!(set(10, 21).udiv(&set(2, 3)), set(5, 11));
    // A divisor that may be zero poisons the division.
    assert!(set(10, 21).udiv(&set(0, 3)).is_top());

    // Signed division with negative divisors.
    let dividend = RangeSet::signed_interval(w32(), -10, 10);
    let divisor = RangeSet::singleton(w32(), (1u128 << 32) - 2); // -2
    let quotient = dividend.sdiv(&divisor);
    assert_eq!(quotient.min_signed(), Some(-5));
    assert_eq!(quotient.max_signed(), Some(5));
}

#[test]
fn rem_and_shifts() {
    assert_eq!(set(0, 100).urem(&set(8, 9)), set(0, 8));
    assert_eq!(set(3, 6).urem(&set(10, 12)), set(3, 6));

    assert_eq!(set(1, 4).shl(&RangeSet::singleton(w32(), 4)), set(16, 49));
    assert_eq!(set(16, 49).lshr(&RangeSet::singleton(w32(), 4)), set(1, 4));
    // Shift amounts that are not constant lose all precision.
    assert!(set(1, 4).shl(&set(1, 3)).is_top());

    let negative = RangeSet::signed_interval(w32(), -16, -8);
    let shifted = negative.ashr(&RangeSet::singleton(w32(), 2));
    assert_eq!(shifted.min_signed(), Some(-4));
    assert_eq!(shifted.max_signed(), Some(-2));
}

#[test]
fn bitops_only_precise_on_singletons() {
    let a = RangeSet::singleton(w32(), 12);
    let b = RangeSet::singleton(w32(), 10);
    assert_eq!(a.and(&b).as_singleton(), Some(8));
    assert_eq!(a.or(&b).as_singleton(), Some(14));
    assert_eq!(a.xor(&b).as_singleton(), Some(6));
    assert!(a.and(&set(0, 2)).is_top());
}

#[test]
fn width_conversions() {
    let a = set(0x100, 0x1f0);
    let narrow = a.trunc(BitSize::new(8));
    assert!(narrow.contains(0x00));
    assert!(narrow.contains(0xef));
    assert_eq!(narrow.width(), BitSize::new(8));

    let small = RangeSet::interval(BitSize::new(8), 0xf0, 0xff);
    let zext = small.zext(w32());
    assert_eq!(zext.min_unsigned(), Some(0xf0));

    let sext = small.sext(w32());
    assert_eq!(sext.min_signed(), Some(-16));
    assert_eq!(sext.max_signed(), Some(-2));

    // Truncating an interval longer than the target space collapses.
    assert!(set(0, 0x200).trunc(BitSize::new(8)).is_top());
}

#[test]
fn comparison_transfer() {
    let low = set(0, 10);
    let high = set(20, 30);
    assert_eq!(low.icmp(RelOpType::Ult, &high).as_singleton(), Some(1));
    assert_eq!(high.icmp(RelOpType::Ult, &low).as_singleton(), Some(0));
    assert!(low.icmp(RelOpType::Ult, &set(5, 25)).is_top());
    assert_eq!(
        RangeSet::singleton(w32(), 7).icmp(RelOpType::Eq, &RangeSet::singleton(w32(), 7)),
        RangeSet::singleton(BitSize::new(1), 1)
    );
}

#[test]
fn refinement_narrows_operands() {
    let x = RangeSet::new_top(w32());
    let bound = RangeSet::singleton(w32(), 10);

    let (lt, _) = RangeSet::refine_cmp(RelOpType::Ult, true, &x, &bound);
    assert_eq!(lt, set(0, 10));

    let (ge, _) = RangeSet::refine_cmp(RelOpType::Ult, false, &x, &bound);
    assert_eq!(ge.min_unsigned(), Some(10));

    let (eq, _) = RangeSet::refine_cmp(RelOpType::Eq, true, &x, &bound);
    assert_eq!(eq.as_singleton(), Some(10));

    let (ne, _) = RangeSet::refine_cmp(RelOpType::Eq, false, &set(9, 12), &bound);
    assert!(ne.contains(9));
    assert!(!ne.contains(10));
    assert!(ne.contains(11));

    let (slt, _) = RangeSet::refine_cmp(RelOpType::Slt, true, &x, &RangeSet::singleton(w32(), 0));
    assert_eq!(slt.max_signed(), Some(-1));
}

#[test]
fn jump_widening_extends_the_growing_end() {
    // Upward growth jumps the upper end to half the space above the minimum.
    let widened = set(0, 3).widen_from(&set(0, 2));
    assert_eq!(widened, set(0, 1 << 31));
    assert_eq!(widened.intersect(&set(0, 3)), set(0, 3));

    // Downward growth widens the lower end.
    let widened = set(3, 10).widen_from(&set(5, 10));
    assert!(widened.contains(3));
    assert!(widened.contains(9));
    assert!(!widened.is_top());

    // Growth at both ends gives up.
    assert!(set(3, 12).widen_from(&set(5, 10)).is_top());
}

#[test]
fn merge_is_monotone() {
    let mut current = RangeSet::empty(w32());
    for step in [set(0, 1), set(1, 5), set(100, 200), set(0, 50)] {
        let next = current.merge(&step);
        // The merge result contains both operands.
        assert_eq!(next.intersect(&current), current);
        assert_eq!(next.intersect(&step), step);
        current = next;
    }
}

#[test]
fn metadata_round_trip_shape() {
    // A plain interval yields one pair.
    let pairs = set(3, 4).to_metadata();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.try_to_u64().unwrap(), 3);
    assert_eq!(pairs[0].1.try_to_u64().unwrap(), 4);

    // The full set yields a single ignored `lo == hi` pair.
    let pairs = RangeSet::new_top(w32()).to_metadata();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, pairs[0].1);

    // A set touching both ends of the space is emitted as one wrap pair.
    let wrap = set(0xffff_fff0, 0x10);
    let pairs = wrap.to_metadata();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.try_to_u64().unwrap(), 0xffff_fff0);
    assert_eq!(pairs[0].1.try_to_u64().unwrap(), 0x10);
}

#[test]
fn fragment_cap_collapses_to_hull() {
    let mut fragmented = RangeSet::empty(w32());
    for i in 0..10u128 {
        fragmented = fragmented.union(&RangeSet::singleton(w32(), i * 10));
    }
    // More than MAX_INTERVALS fragments collapse to the convex hull.
    assert!(fragmented.contains(15));
    assert_eq!(fragmented.min_unsigned(), Some(0));
    assert_eq!(fragmented.max_unsigned(), Some(90));
}
