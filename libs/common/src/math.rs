use crate::amount::Amount;

/// Solve quadratic equation:
///  A x^2 + B x - C = 0
///
/// Positive root solution:
///  Q = (sqrt(B^2 + 4 A C) - B) / (2 A)
///
/// which is evaluated in the equivalent form
///  Q = 2 C / (B + sqrt(B^2 + 4 A C))
///
/// NOTE: The textbook form subtracts two nearly equal numbers when `A` is
/// tiny relative to `B`, which is the normal case for a bonding curve with a
/// large supply. The rearranged form has no cancellation and no division by `A`,
/// so it also holds for `A == 0` (where `Q = C / B`).
///
pub fn solve_quadratic(a: Amount, b: Amount, negative_c: Amount) -> Option<Amount> {
    let b_squared = b.checked_sq()?;
    let ac = a.checked_mul(negative_c)?;
    let four_ac = ac.checked_mul(Amount::FOUR)?;
    let rad = b_squared.checked_add(four_ac)?;
    let sqrt = rad.checked_sqrt()?;
    let den = b.checked_add(sqrt)?;
    let num = Amount::TWO.checked_mul(negative_c)?;
    num.checked_div(den)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_quadratic() {
        // x^2 + 2x - 8 = 0 => x = 2
        let x = solve_quadratic(Amount::ONE, Amount::TWO, Amount::from_u128_with_scale(8, 0)).unwrap();
        assert_eq!(x, Amount::TWO);

        // A == 0 degenerates to C / B
        let x = solve_quadratic(Amount::ZERO, Amount::TWO, Amount::ONE).unwrap();
        assert_eq!(x, Amount::from_u128_with_scale(5, 1));
    }

    #[test]
    fn test_solve_quadratic_no_positive_denominator() {
        assert!(solve_quadratic(Amount::ZERO, Amount::ZERO, Amount::ONE).is_none());
    }
}
