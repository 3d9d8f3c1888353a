//! Two-decimal round-half-up arithmetic.
//!
//! Values are first snapped to 1e-6 of a cent so binary noise such as
//! `4.245 * 100 = 424.49999999999994` still rounds up.

/// Round a value already expressed in hundredths, returning units.
pub(crate) fn round_cents(cents: f64) -> f64 {
    let snapped = (cents * 1e6).round() / 1e6;
    (snapped + 0.5).floor() / 100.0
}

/// Round to two decimals, halves away from zero for non-negative input.
pub fn round_half_up(value: f64) -> f64 {
    round_cents(value * 100.0)
}

/// `achieved / planned × 100`, rounded half-up; `0` when nothing was planned.
pub fn completion_pct(planned: f64, achieved: f64) -> f64 {
    if planned == 0.0 {
        return 0.0;
    }
    round_half_up(achieved / planned * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_rounds_up() {
        assert_eq!(round_half_up(4.245), 4.25);
        assert_eq!(round_half_up(4.235), 4.24);
        assert_eq!(round_half_up(2.675), 2.68);
        assert_eq!(round_half_up(4.2449), 4.24);
    }

    #[test]
    fn test_exact_values_unchanged() {
        assert_eq!(round_half_up(4.3), 4.3);
        assert_eq!(round_half_up(0.0), 0.0);
        assert_eq!(round_half_up(5.0), 5.0);
    }

    #[test]
    fn test_completion_pct() {
        assert_eq!(completion_pct(10.0, 7.0), 70.0);
        assert_eq!(completion_pct(3.0, 1.0), 33.33);
        assert_eq!(completion_pct(3.0, 2.0), 66.67);
        assert_eq!(completion_pct(0.0, 5.0), 0.0);
        assert_eq!(completion_pct(4.0, 6.0), 150.0);
    }
}
