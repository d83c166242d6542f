//! Kelly Criterion stake sizing and expected value, for decimal odds.
//!
//! Standard formula:
//!   f* = (b·p − q) / b
//! where
//!   b  = net odds received on the bet (decimal odds − 1)
//!   p  = estimated probability of winning
//!   q  = 1 − p  (probability of losing)
//!
//! A *fractional* Kelly multiplier (0 < multiplier ≤ 1) reduces variance at
//! the cost of slightly lower expected growth.

/// Calculate the Kelly stake fraction of bankroll.
///
/// # Arguments
/// * `win_prob`       – Estimated probability that the bet wins (0.0–1.0).
/// * `decimal_odds`   – Quoted decimal odds (payout per unit staked, incl. stake).
/// * `kelly_fraction` – Fractional Kelly multiplier (0.0–1.0).
///
/// Returns `0.0` when odds are not better than even money or the raw Kelly
/// fraction is non-positive (no edge).
pub fn kelly_stake(win_prob: f64, decimal_odds: f64, kelly_fraction: f64) -> f64 {
    debug_assert!((0.0..=1.0).contains(&win_prob), "win_prob out of range");
    debug_assert!(
        (0.0..=1.0).contains(&kelly_fraction),
        "kelly_fraction out of range"
    );

    if decimal_odds <= 1.0 {
        return 0.0;
    }

    let b = decimal_odds - 1.0;
    let p = win_prob;
    let q = 1.0 - p;

    let f = (b * p - q) / b;

    if f <= 0.0 {
        return 0.0; // no edge
    }

    (f * kelly_fraction).clamp(0.0, 1.0)
}

/// Expected value of a unit stake, in percent: `(p × odds − 1) × 100`.
pub fn expected_value_percent(win_prob: f64, decimal_odds: f64) -> f64 {
    (win_prob * decimal_odds - 1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kelly_no_edge() {
        // Fair odds: p = 0.5 at 2.0 means zero edge, zero stake.
        let stake = kelly_stake(0.5, 2.0, 1.0);
        assert_relative_eq!(stake, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_positive_edge() {
        // p = 0.6 at 2.0: b = 1.0, f = (1*0.6 - 0.4)/1 = 0.2.
        let stake = kelly_stake(0.6, 2.0, 1.0);
        assert_relative_eq!(stake, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_fractional_multiplier() {
        // Same as above with 25% Kelly.
        let stake = kelly_stake(0.6, 2.0, 0.25);
        assert_relative_eq!(stake, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_negative_edge() {
        let stake = kelly_stake(0.3, 2.0, 1.0);
        assert_relative_eq!(stake, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_odds_at_or_below_evens() {
        assert_relative_eq!(kelly_stake(0.9, 1.0, 1.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(kelly_stake(0.9, 0.8, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_clamp_high() {
        let stake = kelly_stake(0.99, 50.0, 1.0);
        assert!(stake <= 1.0);
    }

    #[test]
    fn test_expected_value() {
        // 70% at 2.0 decimal odds: 0.7*2.0 - 1 = +40%.
        assert_relative_eq!(expected_value_percent(0.7, 2.0), 40.0, epsilon = 1e-9);
        assert_relative_eq!(expected_value_percent(0.5, 2.0), 0.0, epsilon = 1e-9);
        assert!(expected_value_percent(0.4, 2.0) < 0.0);
    }
}
