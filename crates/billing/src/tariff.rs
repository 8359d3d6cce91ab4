//! Tiered consumption pricing
//!
//! Converts a metered consumption into the basic amount for a customer's
//! tariff: the first [`TIER_BREAK`] cubic meters are charged at `rate1`, the
//! excess at `rate2`, and zero consumption still pays `rate1` as a flat
//! minimum charge. Amounts are rounded to two decimal places,
//! midpoint away from zero.

use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::PgPool;

use crate::error::BillingResult;

/// Consumption threshold (in cubic meters) where `rate2` takes over.
pub const TIER_BREAK: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Monetary precision for all computed amounts.
pub const MONEY_SCALE: u32 = 2;

/// Per-customer-type water rates. Read-only input to the rate engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct Tariff {
    /// Customer type this tariff applies to (e.g. "Residential")
    #[sqlx(rename = "type")]
    pub customer_type: String,
    /// Price per cubic meter for the first tier
    pub rate1: Decimal,
    /// Price per cubic meter beyond the first tier
    pub rate2: Decimal,
}

/// Round a monetary amount to standard precision.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Metered consumption, clamped at zero.
///
/// A current reading below the previous one is rejected as a validation error
/// at bill entry; the clamp here only guards derived values.
pub fn consumption(previous_reading: Decimal, current_reading: Decimal) -> Decimal {
    (current_reading - previous_reading).max(Decimal::ZERO)
}

/// Basic amount for a consumption under a tariff.
pub fn basic_amount(consumption: Decimal, tariff: &Tariff) -> Decimal {
    let basic = if consumption <= Decimal::ZERO {
        // Minimum charge for zero consumption
        tariff.rate1
    } else if consumption <= TIER_BREAK {
        consumption * tariff.rate1
    } else {
        TIER_BREAK * tariff.rate1 + (consumption - TIER_BREAK) * tariff.rate2
    };

    round_money(basic)
}

/// Loads per-customer-type tariffs from the backing store.
pub struct TariffService {
    pool: PgPool,
}

impl TariffService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the tariff for a customer type, if one is configured.
    pub async fn get_tariff(&self, customer_type: &str) -> BillingResult<Option<Tariff>> {
        let tariff = sqlx::query_as::<_, Tariff>(
            r#"
            SELECT type, rate1, rate2
            FROM customer_type
            WHERE type = $1
            "#,
        )
        .bind(customer_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tariff)
    }

    /// List all configured tariffs, ordered by type.
    pub async fn list_tariffs(&self) -> BillingResult<Vec<Tariff>> {
        let tariffs = sqlx::query_as::<_, Tariff>(
            r#"
            SELECT type, rate1, rate2
            FROM customer_type
            ORDER BY type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tariffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tariff(rate1: Decimal, rate2: Decimal) -> Tariff {
        Tariff {
            customer_type: "Residential".to_string(),
            rate1,
            rate2,
        }
    }

    #[test]
    fn test_zero_consumption_charges_minimum() {
        let t = tariff(dec!(20), dec!(15));
        assert_eq!(basic_amount(Decimal::ZERO, &t), dec!(20));
    }

    #[test]
    fn test_first_tier_charged_at_rate1() {
        let t = tariff(dec!(20), dec!(15));
        assert_eq!(basic_amount(dec!(1), &t), dec!(20));
        assert_eq!(basic_amount(dec!(3), &t), dec!(60));
    }

    #[test]
    fn test_excess_charged_at_rate2() {
        // 3 * 20 + 2 * 15 = 90
        let t = tariff(dec!(20), dec!(15));
        assert_eq!(basic_amount(dec!(5), &t), dec!(90));
    }

    #[test]
    fn test_worked_scenario_seven_cubic_meters() {
        // 3 * 20 + 4 * 15 = 120
        let t = tariff(dec!(20), dec!(15));
        assert_eq!(basic_amount(dec!(7), &t), dec!(120));
    }

    #[test]
    fn test_fractional_consumption_rounds_to_two_decimals() {
        let t = tariff(dec!(20.555), dec!(15));
        assert_eq!(basic_amount(dec!(1), &t), dec!(20.56));
    }

    #[test]
    fn test_consumption_clamped_at_zero() {
        assert_eq!(consumption(dec!(10), dec!(7)), Decimal::ZERO);
        assert_eq!(consumption(dec!(10), dec!(10)), Decimal::ZERO);
        assert_eq!(consumption(dec!(10), dec!(17)), dec!(7));
    }

    #[test]
    fn test_equal_readings_pay_minimum_charge() {
        let t = tariff(dec!(25), dec!(18));
        let c = consumption(dec!(42), dec!(42));
        assert_eq!(basic_amount(c, &t), dec!(25));
    }
}
