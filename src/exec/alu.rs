//! Arithmetic helpers for the execution engine.
//!
//! Every flag-affecting instruction funnels through one of these functions,
//! which are the only writers of the condition flags.

use super::registers::Flags;

/// Updates ZF and SF to reflect the given result.
fn update_flags_zs(flags: &mut Flags, result: i64) {
    flags.set(Flags::ZF, result == 0);
    flags.set(Flags::SF, result < 0);
}

/// Computes `a + b` with wraparound, setting all three flags.
pub(super) fn add_with_flags(flags: &mut Flags, a: i64, b: i64) -> i64 {
    let result = a.wrapping_add(b);
    flags.set(Flags::OF, ((a ^ result) & (b ^ result)) < 0);
    update_flags_zs(flags, result);
    result
}

/// Computes `a - b` with wraparound, setting all three flags.
/// OF is additionally set whenever `b` is `i64::MIN`.
pub(super) fn sub_with_flags(flags: &mut Flags, a: i64, b: i64) -> i64 {
    let result = a.wrapping_sub(b);
    flags.set(Flags::OF, ((a ^ b) & (a ^ result)) < 0 || b == i64::MIN);
    update_flags_zs(flags, result);
    result
}

/// Computes `a * b` with wraparound. Only OF is affected: set iff the full
/// product does not fit in a signed quadword.
pub(super) fn imul_with_flags(flags: &mut Flags, a: i64, b: i64) -> i64 {
    match a.checked_mul(b) {
        Some(result) => {
            flags.set(Flags::OF, false);
            result
        }
        None => {
            flags.set(Flags::OF, true);
            a.wrapping_mul(b)
        }
    }
}

/// Records a bitwise result: ZF and SF from the value, OF cleared.
pub(super) fn logic_with_flags(flags: &mut Flags, result: i64) -> i64 {
    flags.set(Flags::OF, false);
    update_flags_zs(flags, result);
    result
}

/// Computes `-a` with wraparound, setting all three flags.
/// OF is set iff `a` is `i64::MIN`.
pub(super) fn neg_with_flags(flags: &mut Flags, a: i64) -> i64 {
    let result = a.wrapping_neg();
    flags.set(Flags::OF, a == i64::MIN);
    update_flags_zs(flags, result);
    result
}

/// Computes `a << amount` for a pre-masked amount in `[0, 63]`.
/// A zero amount touches no flags. An amount of one sets OF iff the top two
/// bits of `a` differ; larger amounts leave OF unchanged.
pub(super) fn shl_with_flags(flags: &mut Flags, a: i64, amount: u32) -> i64 {
    if amount == 0 {
        return a;
    }
    let result = a.wrapping_shl(amount);
    if amount == 1 {
        flags.set(Flags::OF, (a ^ a.wrapping_shl(1)) < 0);
    }
    update_flags_zs(flags, result);
    result
}

/// Computes the logical right shift of `a` for a pre-masked amount in `[0, 63]`.
/// A zero amount touches no flags. An amount of one sets OF to the old sign
/// bit of `a`; larger amounts leave OF unchanged.
pub(super) fn shr_with_flags(flags: &mut Flags, a: i64, amount: u32) -> i64 {
    if amount == 0 {
        return a;
    }
    let result = ((a as u64) >> amount) as i64;
    if amount == 1 {
        flags.set(Flags::OF, a < 0);
    }
    update_flags_zs(flags, result);
    result
}

/// Computes the arithmetic right shift of `a` for a pre-masked amount in
/// `[0, 63]`. A zero amount touches no flags. An amount of one clears OF;
/// larger amounts leave OF unchanged.
pub(super) fn sar_with_flags(flags: &mut Flags, a: i64, amount: u32) -> i64 {
    if amount == 0 {
        return a;
    }
    let result = a.wrapping_shr(amount);
    if amount == 1 {
        flags.set(Flags::OF, false);
    }
    update_flags_zs(flags, result);
    result
}

#[test]
fn test_sub_min_src() {
    // subtracting i64::MIN flags overflow no matter the result sign
    let mut flags = Flags::empty();
    assert_eq!(sub_with_flags(&mut flags, -1, i64::MIN), i64::MAX);
    assert!(flags.contains(Flags::OF));

    flags = Flags::empty();
    sub_with_flags(&mut flags, 12, i64::MIN);
    assert!(flags.contains(Flags::OF));

    // an ordinary subtraction of a large value does not
    flags = Flags::empty();
    assert_eq!(sub_with_flags(&mut flags, -1, i64::MIN + 1), i64::MAX - 1);
    assert!(!flags.contains(Flags::OF));
}
#[test]
fn test_shift_zero_amount() {
    let mut flags = Flags::OF | Flags::SF | Flags::ZF;
    assert_eq!(shl_with_flags(&mut flags, 5, 0), 5);
    assert_eq!(shr_with_flags(&mut flags, 5, 0), 5);
    assert_eq!(sar_with_flags(&mut flags, 5, 0), 5);
    assert_eq!(flags, Flags::OF | Flags::SF | Flags::ZF);
}
#[test]
fn test_shift_by_one_overflow() {
    let mut flags = Flags::empty();
    shl_with_flags(&mut flags, 1 << 62, 1);
    assert!(flags.contains(Flags::OF)); // top two bits differed

    flags = Flags::empty();
    shl_with_flags(&mut flags, 3 << 62, 1);
    assert!(!flags.contains(Flags::OF)); // top two bits agreed

    flags = Flags::empty();
    assert_eq!(shr_with_flags(&mut flags, -1, 1), i64::MAX);
    assert!(flags.contains(Flags::OF)); // old sign bit was set

    flags = Flags::OF;
    assert_eq!(sar_with_flags(&mut flags, -8, 1), -4);
    assert!(!flags.contains(Flags::OF)); // sar by one always clears
}
#[test]
fn test_imul_overflow() {
    let mut flags = Flags::empty();
    assert_eq!(imul_with_flags(&mut flags, 1 << 32, 1 << 31), i64::MIN);
    assert!(flags.contains(Flags::OF));

    flags = Flags::empty();
    assert_eq!(imul_with_flags(&mut flags, 1 << 31, (1 << 31) - 1), 0x3fffffff80000000);
    assert!(!flags.contains(Flags::OF));
}
