// crates/tessera-core/src/math.rs
//
// Fixed-point helpers for token arithmetic. Reward and auction formulas
// multiply three 18-decimal quantities, which does not fit in u128, so the
// product is carried in a U256 before dividing back down.

use alloy_primitives::U256;

/// Narrow a U256 back to u128, `None` if it does not fit.
fn narrow(value: U256) -> Option<u128> {
    u128::try_from(value).ok()
}

/// Compute `a * b / divisor`, truncating.
///
/// Returns `None` on division by zero or if the result overflows u128.
pub fn mul_div(a: u128, b: u128, divisor: u128) -> Option<u128> {
    if divisor == 0 {
        return None;
    }
    narrow(U256::from(a) * U256::from(b) / U256::from(divisor))
}

/// Compute `a * b / divisor`, rounding up.
pub fn mul_div_ceil(a: u128, b: u128, divisor: u128) -> Option<u128> {
    if divisor == 0 {
        return None;
    }
    let product = U256::from(a) * U256::from(b);
    let divisor = U256::from(divisor);
    let mut quotient = product / divisor;
    if !(product % divisor).is_zero() {
        quotient += U256::from(1u8);
    }
    narrow(quotient)
}

/// Split a finite, non-negative f64 into `(mantissa, exponent)` with
/// `x == mantissa * 2^exponent` exactly.
fn decompose(x: f64) -> Option<(u64, i32)> {
    if !x.is_finite() || x.is_sign_negative() {
        return None;
    }
    let bits = x.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    if exponent == 0 {
        Some((fraction, -1074))
    } else {
        Some((fraction | (1u64 << 52), exponent - 1075))
    }
}

/// Compute `value * numerator / denominator` rounded half up, treating both
/// floats as the exact binary values they hold.
///
/// Returns `None` for a zero, negative or non-finite denominator, a
/// negative or non-finite numerator, or a result beyond u128.
pub fn mul_float_ratio(value: u128, numerator: f64, denominator: f64) -> Option<u128> {
    let (num_mantissa, num_exp) = decompose(numerator)?;
    let (den_mantissa, den_exp) = decompose(denominator)?;
    if den_mantissa == 0 {
        return None;
    }

    let mut top = U256::from(value).checked_mul(U256::from(num_mantissa))?;
    let mut bottom = U256::from(den_mantissa);
    let shift = num_exp - den_exp;
    if shift >= 0 {
        top = top.checked_shl(shift as usize)?;
    } else {
        bottom = bottom.checked_shl(shift.unsigned_abs() as usize)?;
    }

    let quotient = top / bottom;
    let remainder = top % bottom;
    let rounded = if remainder.checked_mul(U256::from(2u8))? >= bottom {
        quotient + U256::from(1u8)
    } else {
        quotient
    };
    narrow(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_small_values() {
        assert_eq!(mul_div(18, 1980, 19), Some(1875));
        assert_eq!(mul_div(1980, 1, 20), Some(99));
        assert_eq!(mul_div(7, 3, 0), None);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // 1e27 * 1e27 / 1e27 overflows a plain u128 product.
        let e27: u128 = 1_000_000_000_000_000_000_000_000_000;
        assert_eq!(mul_div(e27, e27, e27), Some(e27));
        assert_eq!(mul_div(e27, 3 * e27, 2 * e27), Some(3 * e27 / 2));
    }

    #[test]
    fn test_mul_div_matches_native_when_no_overflow() {
        let cases = [(123_456_789u128, 987_654_321u128, 1_000_003u128), (u64::MAX as u128, 17, 5)];
        for (a, b, d) in cases {
            assert_eq!(mul_div(a, b, d), Some(a * b / d));
        }
    }

    #[test]
    fn test_mul_div_overflowing_result() {
        assert_eq!(mul_div(u128::MAX, u128::MAX, 1), None);
        assert_eq!(mul_div(u128::MAX, 2, 2), Some(u128::MAX));
    }

    #[test]
    fn test_mul_div_ceil() {
        assert_eq!(mul_div_ceil(10, 1, 3), Some(4));
        assert_eq!(mul_div_ceil(9, 1, 3), Some(3));
        assert_eq!(mul_div_ceil(1, 1, 0), None);
    }

    #[test]
    fn test_mul_float_ratio_exact_values() {
        assert_eq!(mul_float_ratio(1_000, 3.0, 4.0), Some(750));
        assert_eq!(mul_float_ratio(10, 1.0, 4.0), Some(3));
        assert_eq!(mul_float_ratio(7, 0.5, 1.0), Some(4));
        assert_eq!(mul_float_ratio(7, 0.0, 1.0), Some(0));
    }

    #[test]
    fn test_mul_float_ratio_uses_binary_value_of_ln2() {
        // ln 2 as an f64 is exactly 6243314768165359 / 2^53.
        let e27: u128 = 1_000_000_000_000_000_000_000_000_000;
        assert_eq!(
            mul_float_ratio(e27, 2.0, std::f64::consts::LN_2),
            Some(2_885_390_081_777_926_911_255_691_439)
        );
    }

    #[test]
    fn test_mul_float_ratio_rejects_bad_inputs() {
        assert_eq!(mul_float_ratio(1, 1.0, 0.0), None);
        assert_eq!(mul_float_ratio(1, -1.0, 1.0), None);
        assert_eq!(mul_float_ratio(1, f64::NAN, 1.0), None);
        assert_eq!(mul_float_ratio(u128::MAX, 4.0, 1.0), None);
    }
}
