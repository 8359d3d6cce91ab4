//! Discount resolution
//!
//! A bill that already carries a positive stored discount keeps that value
//! verbatim, so historical bills stay priced under the policy in force when
//! they were encoded. Otherwise the discount derives from the customer's
//! discount percentage.

use rust_decimal::Decimal;

use crate::bills::Bill;
use crate::customer::Customer;
use crate::tariff::round_money;

/// Resolve the discount for a bill.
pub fn discount_for(bill: &Bill, customer: &Customer) -> Decimal {
    discount_amount(bill.discount_amount, bill.basic_amount, customer.discount)
}

/// Core resolution: stored positive discount wins; otherwise derive from the
/// customer's percentage; zero when neither is present.
pub fn discount_amount(
    stored_discount: Decimal,
    basic_amount: Decimal,
    customer_discount_percent: Option<Decimal>,
) -> Decimal {
    if stored_discount > Decimal::ZERO {
        return stored_discount;
    }

    match customer_discount_percent {
        Some(percent) if percent > Decimal::ZERO => {
            round_money(basic_amount * percent / Decimal::ONE_HUNDRED)
        }
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stored_discount_wins_verbatim() {
        // Stored value is kept as-is even when the customer percent differs
        let amount = discount_amount(dec!(12.345), dec!(100), Some(dec!(20)));
        assert_eq!(amount, dec!(12.345));
    }

    #[test]
    fn test_derived_from_customer_percent() {
        let amount = discount_amount(Decimal::ZERO, dec!(120), Some(dec!(5)));
        assert_eq!(amount, dec!(6));
    }

    #[test]
    fn test_derived_discount_rounds_to_two_decimals() {
        let amount = discount_amount(Decimal::ZERO, dec!(33.33), Some(dec!(10)));
        assert_eq!(amount, dec!(3.33));
    }

    #[test]
    fn test_no_discount_without_percent_or_stored_value() {
        assert_eq!(discount_amount(Decimal::ZERO, dec!(100), None), Decimal::ZERO);
        assert_eq!(
            discount_amount(Decimal::ZERO, dec!(100), Some(Decimal::ZERO)),
            Decimal::ZERO
        );
    }
}
