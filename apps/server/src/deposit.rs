use serde::Serialize;

/// Deposit percentage applied when the business has none configured.
pub const DEFAULT_DEPOSIT_PERCENTAGE: i64 = 50;

/// Split of a service price into the deposit (seña) and what is left to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepositSplit {
    pub price: i64,
    pub percentage: i64,
    pub deposit: i64,
    pub remainder: i64,
}

/// `deposit = round(price * pct / 100)`, `remainder = price - deposit`.
///
/// The percentage is clamped to `[0, 100]`.
pub fn compute_deposit(price: i64, percentage: Option<i64>) -> DepositSplit {
    let percentage = percentage
        .unwrap_or(DEFAULT_DEPOSIT_PERCENTAGE)
        .clamp(0, 100);
    let deposit = percent_of(price, percentage);
    DepositSplit {
        price,
        percentage,
        deposit,
        remainder: price - deposit,
    }
}

/// `amount * pct / 100` rounded half away from zero, in whole currency units.
pub fn percent_of(amount: i64, percentage: i64) -> i64 {
    let scaled = amount * percentage;
    let quotient = scaled / 100;
    let rest = scaled % 100;
    if rest.abs() * 2 >= 100 {
        quotient + scaled.signum()
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_half() {
        let split = compute_deposit(10_000, None);
        assert_eq!(split.percentage, 50);
        assert_eq!(split.deposit, 5_000);
        assert_eq!(split.remainder, 5_000);
    }

    #[test]
    fn test_rounds_half_up() {
        // 2_501 * 50% = 1_250.5
        let split = compute_deposit(2_501, Some(50));
        assert_eq!(split.deposit, 1_251);
        assert_eq!(split.remainder, 1_250);
    }

    #[test]
    fn test_rounds_down_below_half() {
        // 999 * 33% = 329.67 → 330, 1_001 * 30% = 300.3 → 300
        assert_eq!(compute_deposit(999, Some(33)).deposit, 330);
        assert_eq!(compute_deposit(1_001, Some(30)).deposit, 300);
    }

    #[test]
    fn test_zero_and_full_percentage() {
        assert_eq!(compute_deposit(7_000, Some(0)).deposit, 0);
        assert_eq!(compute_deposit(7_000, Some(100)).remainder, 0);
    }

    #[test]
    fn test_percentage_clamped() {
        assert_eq!(compute_deposit(1_000, Some(150)).deposit, 1_000);
        assert_eq!(compute_deposit(1_000, Some(-10)).deposit, 0);
    }

    #[test]
    fn test_percent_of_negative_rounds_away_from_zero() {
        assert_eq!(percent_of(-2_501, 50), -1_251);
    }

    proptest! {
        #[test]
        fn deposit_plus_remainder_is_price(price in 0i64..10_000_000, pct in 0i64..=100) {
            let split = compute_deposit(price, Some(pct));
            prop_assert_eq!(split.deposit + split.remainder, price);
            prop_assert!(split.deposit >= 0 && split.deposit <= price);
        }
    }
}
