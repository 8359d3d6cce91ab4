//! Overdue surcharge calculation
//!
//! A bill falls due on the policy's due day of the month *after* its billed
//! month. From the day after the due date the first surcharge applies to the
//! basic amount; strictly after the last calendar day of the due month the
//! second surcharge applies on top of basic + first, so the two tiers
//! compound. The calculation is pure and time-dependent only through the
//! injected "now".

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::{Date, Month};

use crate::error::{BillingError, BillingResult};
use crate::tariff::round_money;

/// Default due day of the month when no policy row is configured.
pub const DEFAULT_DUE_DAY: u8 = 10;
/// Default first-tier surcharge percent.
pub const DEFAULT_FIRST_PERCENT: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
/// Default second-tier surcharge percent.
pub const DEFAULT_SECOND_PERCENT: Decimal = Decimal::from_parts(15, 0, 0, false, 0);

/// Due-date and penalty policy. Read-only input to the calculator.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SurchargePolicy {
    /// Day of the month (1-31) the bill falls due; clamped to the length of
    /// the due month when it would overflow (e.g. day 31 in February).
    pub due_day: u8,
    pub first_percent: Decimal,
    pub second_percent: Decimal,
}

impl Default for SurchargePolicy {
    fn default() -> Self {
        Self {
            due_day: DEFAULT_DUE_DAY,
            first_percent: DEFAULT_FIRST_PERCENT,
            second_percent: DEFAULT_SECOND_PERCENT,
        }
    }
}

/// Which penalty tiers apply to a bill at a given point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SurchargeTier {
    /// Not overdue; no surcharge
    None,
    /// Past the due date, still within the due month
    First,
    /// Past the end of the due month; both tiers apply
    Both,
}

/// Breakdown of the overdue penalty for a single bill.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SurchargeBreakdown {
    pub first_surcharge: Decimal,
    pub second_surcharge: Decimal,
    pub total_surcharge: Decimal,
    pub days_overdue: i64,
    pub due_date: Date,
    pub end_of_due_month: Date,
    pub tier: SurchargeTier,
}

impl SurchargeBreakdown {
    fn not_overdue(due_date: Date, end_of_due_month: Date) -> Self {
        Self {
            first_surcharge: Decimal::ZERO,
            second_surcharge: Decimal::ZERO,
            total_surcharge: Decimal::ZERO,
            days_overdue: 0,
            due_date,
            end_of_due_month,
            tier: SurchargeTier::None,
        }
    }
}

/// Due date for a billed month: `policy.due_day` of the following month.
pub fn due_date(billed_month: Date, policy: &SurchargePolicy) -> BillingResult<Date> {
    if !(1..=31).contains(&policy.due_day) {
        return Err(BillingError::Validation(format!(
            "Surcharge due day must be between 1 and 31, got {}",
            policy.due_day
        )));
    }

    let (due_year, due_month) = match billed_month.month() {
        Month::December => (billed_month.year() + 1, Month::January),
        month => (billed_month.year(), month.next()),
    };

    let day = policy
        .due_day
        .min(time::util::days_in_year_month(due_year, due_month));

    Date::from_calendar_date(due_year, due_month, day)
        .map_err(|e| BillingError::Validation(format!("Invalid due date: {}", e)))
}

/// Last calendar day of the due date's month.
fn end_of_month(date: Date) -> BillingResult<Date> {
    let last = time::util::days_in_year_month(date.year(), date.month());
    Date::from_calendar_date(date.year(), date.month(), last)
        .map_err(|e| BillingError::Validation(format!("Invalid month end: {}", e)))
}

/// Compute the surcharge for a bill's billed month and basic amount as of
/// `now`. Each tier is rounded to two decimals before summing.
pub fn surcharge(
    billed_month: Date,
    basic_amount: Decimal,
    policy: &SurchargePolicy,
    now: Date,
) -> BillingResult<SurchargeBreakdown> {
    let due = due_date(billed_month, policy)?;
    let month_end = end_of_month(due)?;

    let days_overdue = (now - due).whole_days();
    if days_overdue <= 0 {
        return Ok(SurchargeBreakdown::not_overdue(due, month_end));
    }

    let first_surcharge = round_money(basic_amount * policy.first_percent / Decimal::ONE_HUNDRED);

    // The second tier compounds on basic + first, not on basic alone.
    let (second_surcharge, tier) = if now > month_end {
        let base = basic_amount + first_surcharge;
        let second = round_money(base * policy.second_percent / Decimal::ONE_HUNDRED);
        (second, SurchargeTier::Both)
    } else {
        (Decimal::ZERO, SurchargeTier::First)
    };

    Ok(SurchargeBreakdown {
        first_surcharge,
        second_surcharge,
        total_surcharge: first_surcharge + second_surcharge,
        days_overdue,
        due_date: due,
        end_of_due_month: month_end,
        tier,
    })
}

/// Row shape of the single `surcharge_settings` row.
#[derive(Debug, sqlx::FromRow)]
struct SurchargeSettingsRow {
    due_day: i32,
    first_surcharge_percent: Decimal,
    second_surcharge_percent: Decimal,
}

/// Loads the surcharge policy, falling back to the fixed default when the
/// settings table is empty.
pub struct SurchargeService {
    pool: PgPool,
}

impl SurchargeService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_policy(&self) -> BillingResult<SurchargePolicy> {
        let row = sqlx::query_as::<_, SurchargeSettingsRow>(
            r#"
            SELECT due_day, first_surcharge_percent, second_surcharge_percent
            FROM surcharge_settings
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => SurchargePolicy {
                due_day: u8::try_from(row.due_day).map_err(|_| {
                    BillingError::Validation(format!("Invalid due day: {}", row.due_day))
                })?,
                first_percent: row.first_surcharge_percent,
                second_percent: row.second_surcharge_percent,
            },
            None => SurchargePolicy::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;

    fn policy() -> SurchargePolicy {
        SurchargePolicy::default()
    }

    #[test]
    fn test_due_date_is_due_day_of_following_month() {
        let due = due_date(date!(2024 - 01 - 01), &policy()).unwrap();
        assert_eq!(due, date!(2024 - 02 - 10));
    }

    #[test]
    fn test_due_date_rolls_over_december() {
        let due = due_date(date!(2023 - 12 - 01), &policy()).unwrap();
        assert_eq!(due, date!(2024 - 01 - 10));
    }

    #[test]
    fn test_due_day_clamped_to_month_length() {
        let p = SurchargePolicy {
            due_day: 31,
            ..policy()
        };
        let due = due_date(date!(2024 - 01 - 01), &p).unwrap();
        assert_eq!(due, date!(2024 - 02 - 29));
    }

    #[test]
    fn test_invalid_due_day_rejected() {
        let p = SurchargePolicy {
            due_day: 0,
            ..policy()
        };
        assert!(matches!(
            due_date(date!(2024 - 01 - 01), &p),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_no_surcharge_before_due_date() {
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 02 - 09))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::None);
        assert_eq!(b.total_surcharge, Decimal::ZERO);
        assert_eq!(b.days_overdue, 0);
    }

    #[test]
    fn test_no_surcharge_on_due_date_itself() {
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 02 - 10))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::None);
        assert_eq!(b.total_surcharge, Decimal::ZERO);
    }

    #[test]
    fn test_first_surcharge_day_after_due_date() {
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 02 - 11))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::First);
        assert_eq!(b.first_surcharge, dec!(12.00));
        assert_eq!(b.total_surcharge, dec!(12.00));
        assert_eq!(b.days_overdue, 1);
    }

    #[test]
    fn test_first_surcharge_within_due_month() {
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 02 - 15))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::First);
        assert_eq!(b.total_surcharge, dec!(12.00));
    }

    #[test]
    fn test_no_second_surcharge_on_last_day_of_due_month() {
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 02 - 29))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::First);
        assert_eq!(b.second_surcharge, Decimal::ZERO);
    }

    #[test]
    fn test_second_surcharge_compounds_after_due_month() {
        // 12 + (120 + 12) * 15% = 12 + 19.80 = 31.80
        let b = surcharge(date!(2024 - 01 - 01), dec!(120), &policy(), date!(2024 - 03 - 05))
            .unwrap();
        assert_eq!(b.tier, SurchargeTier::Both);
        assert_eq!(b.first_surcharge, dec!(12.00));
        assert_eq!(b.second_surcharge, dec!(19.80));
        assert_eq!(b.total_surcharge, dec!(31.80));
    }

    #[test]
    fn test_tiers_rounded_before_summing() {
        // basic 33.35: first = 3.34 (rounded), second = (33.35 + 3.34) * 15% = 5.50
        let b = surcharge(date!(2024 - 01 - 01), dec!(33.35), &policy(), date!(2024 - 03 - 05))
            .unwrap();
        assert_eq!(b.first_surcharge, dec!(3.34));
        assert_eq!(b.second_surcharge, dec!(5.50));
        assert_eq!(b.total_surcharge, dec!(8.84));
    }
}
