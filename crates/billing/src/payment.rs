//! Payment settlement and reversal
//!
//! Settles one or more of a customer's bills in a single transaction: prices
//! each bill as of the payment date (basic + live surcharge - resolved
//! discount), consumes available credit first, converts any overpayment into
//! new credit, and marks every bill Paid. The bill rows and the single net
//! credit delta commit together or not at all.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::bills::{Bill, PaymentStatus};
use crate::credit::{CreditLedger, CreditReason};
use crate::customer::Customer;
use crate::discount::discount_for;
use crate::error::{BillingError, BillingResult};
use crate::surcharge::{surcharge, SurchargeBreakdown, SurchargePolicy, SurchargeService};

/// One bill priced as of the payment date.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BillTotals {
    pub bill_id: i64,
    pub basic_amount: Decimal,
    pub surcharge: SurchargeBreakdown,
    pub discount_amount: Decimal,
    /// basic + total surcharge - discount
    pub total_due: Decimal,
}

/// Pure settlement arithmetic for a payment.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PaymentPlan {
    pub grand_total: Decimal,
    /// Existing credit consumed by this payment
    pub credit_to_apply: Decimal,
    /// What the payer must hand over after credit
    pub amount_after_credit: Decimal,
    /// Excess received, banked as new credit
    pub overpayment: Decimal,
    /// Net balance change: overpayment - credit consumed
    pub credit_delta: Decimal,
}

/// Result of a completed payment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentOutcome {
    pub paid_count: usize,
    pub credit_consumed: Decimal,
    pub credit_added: Decimal,
    pub new_credit_balance: Decimal,
    pub grand_total: Decimal,
}

/// Result of reverting a paid bill to Unpaid.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReversalOutcome {
    pub bill_id: i64,
    /// Advance-payment credit handed back to the customer (zero for cash)
    pub restored_credit: Decimal,
}

/// Price each bill as of `now` under the customer's discount and the
/// surcharge policy.
pub fn bill_totals(
    bills: &[Bill],
    customer: &Customer,
    policy: &SurchargePolicy,
    now: Date,
) -> BillingResult<Vec<BillTotals>> {
    bills
        .iter()
        .map(|bill| {
            let breakdown = surcharge(bill.billed_month, bill.basic_amount, policy, now)?;
            let discount = discount_for(bill, customer);
            Ok(BillTotals {
                bill_id: bill.bill_id,
                basic_amount: bill.basic_amount,
                total_due: bill.basic_amount + breakdown.total_surcharge - discount,
                discount_amount: discount,
                surcharge: breakdown,
            })
        })
        .collect()
}

/// Decide how a payment settles: credit is consumed up to the grand total,
/// the received amount must cover the remainder, and any excess becomes new
/// credit. Rejected payments have no side effects.
pub fn plan_payment(
    grand_total: Decimal,
    credit_balance: Decimal,
    amount_received: Decimal,
) -> BillingResult<PaymentPlan> {
    if amount_received < Decimal::ZERO {
        return Err(BillingError::Validation(format!(
            "Amount received cannot be negative, got {}",
            amount_received
        )));
    }

    let credit_to_apply = credit_balance.min(grand_total);
    let amount_after_credit = grand_total - credit_to_apply;

    if amount_received < amount_after_credit {
        return Err(BillingError::InsufficientPayment {
            received: amount_received,
            required: amount_after_credit,
        });
    }

    let overpayment = amount_received - amount_after_credit;

    Ok(PaymentPlan {
        grand_total,
        credit_to_apply,
        amount_after_credit,
        overpayment,
        credit_delta: overpayment - credit_to_apply,
    })
}

/// Orchestrates settlement of one or more bills against the credit ledger.
pub struct PaymentService {
    pool: PgPool,
}

impl PaymentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Unpaid bills of a customer priced as of today, for caller display.
    pub async fn priced_unpaid_bills(&self, customer_id: i64) -> BillingResult<Vec<BillTotals>> {
        let policy = SurchargeService::new(self.pool.clone()).get_policy().await?;
        let customer = self.fetch_customer(customer_id).await?;

        let bills = sqlx::query_as::<_, Bill>(
            r#"
            SELECT * FROM bills
            WHERE customerid = $1
              AND paymentstatus IN ('Unpaid', 'Partial')
            ORDER BY billedmonth ASC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        bill_totals(&bills, &customer, &policy, OffsetDateTime::now_utc().date())
    }

    /// Settle the given bills for one customer.
    ///
    /// Runs under a per-customer critical section (`FOR UPDATE` on the
    /// customer row): bill status updates and the net credit delta are one
    /// all-or-nothing unit.
    pub async fn process_payment(
        &self,
        bill_ids: &[i64],
        payer: &str,
        amount_received: Decimal,
    ) -> BillingResult<PaymentOutcome> {
        if bill_ids.is_empty() {
            return Err(BillingError::Validation(
                "No bills selected for payment".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = bill_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(BillingError::Validation(format!(
                "Bill {} selected more than once",
                dup
            )));
        }

        let policy = SurchargeService::new(self.pool.clone()).get_policy().await?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;

        let bills = sqlx::query_as::<_, Bill>(
            "SELECT * FROM bills WHERE billid = ANY($1) ORDER BY billedmonth ASC FOR UPDATE",
        )
        .bind(bill_ids)
        .fetch_all(&mut *tx)
        .await?;

        if bills.len() != bill_ids.len() {
            let missing = bill_ids
                .iter()
                .find(|id| !bills.iter().any(|b| b.bill_id == **id))
                .copied()
                .unwrap_or(bill_ids[0]);
            return Err(BillingError::BillNotFound(missing));
        }

        let customer_id = bills[0].customer_id;
        if bills.iter().any(|b| b.customer_id != customer_id) {
            return Err(BillingError::Validation(
                "All bills in a payment must belong to the same customer".to_string(),
            ));
        }
        if let Some(paid) = bills.iter().find(|b| b.payment_status == PaymentStatus::Paid) {
            return Err(BillingError::Validation(format!(
                "Bill {} is already paid",
                paid.bill_id
            )));
        }

        // Lock the customer row: at most one in-flight ledger mutation per
        // customer.
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customerid, name, barangay, type, status, discount, credit_balance
            FROM customers
            WHERE customerid = $1
            FOR UPDATE
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::CustomerNotFound(customer_id))?;

        let totals = bill_totals(&bills, &customer, &policy, now.date())?;
        let grand_total: Decimal = totals.iter().map(|t| t.total_due).sum();

        let plan = plan_payment(grand_total, customer.credit_balance, amount_received)?;

        for total in &totals {
            sqlx::query(
                r#"
                UPDATE bills
                SET paymentstatus = 'Paid',
                    paidby = $2,
                    datepaid = $3,
                    surchargeamount = $4,
                    discountamount = $5,
                    totalbillamount = $6
                WHERE billid = $1
                "#,
            )
            .bind(total.bill_id)
            .bind(payer)
            .bind(now)
            .bind(total.surcharge.total_surcharge)
            .bind(total.discount_amount)
            .bind(total.total_due)
            .execute(&mut *tx)
            .await?;
        }

        let new_credit_balance = if plan.credit_delta != Decimal::ZERO {
            CreditLedger::apply_balance_delta(&mut tx, customer_id, plan.credit_delta).await?
        } else {
            customer.credit_balance
        };

        if plan.credit_to_apply > Decimal::ZERO {
            CreditLedger::record_adjustment(
                &mut tx,
                customer_id,
                -plan.credit_to_apply,
                CreditReason::AppliedToBill,
                None,
                Some("Consumed at payment"),
                payer,
            )
            .await?;
        }
        if plan.overpayment > Decimal::ZERO {
            CreditLedger::record_adjustment(
                &mut tx,
                customer_id,
                plan.overpayment,
                CreditReason::Overpayment,
                None,
                Some("Overpayment banked as credit"),
                payer,
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            customer_id,
            paid_count = bills.len(),
            grand_total = %grand_total,
            credit_consumed = %plan.credit_to_apply,
            credit_added = %plan.overpayment,
            paid_by = %payer,
            "Processed payment"
        );

        Ok(PaymentOutcome {
            paid_count: bills.len(),
            credit_consumed: plan.credit_to_apply,
            credit_added: plan.overpayment,
            new_credit_balance,
            grand_total,
        })
    }

    /// Revert a paid bill to Unpaid, restoring any advance-payment credit.
    /// Ledger restoration and the bill reset commit as one unit.
    pub async fn reverse_payment(
        &self,
        bill_id: i64,
        actor: &str,
    ) -> BillingResult<ReversalOutcome> {
        let mut tx = self.pool.begin().await?;

        let bill = sqlx::query_as::<_, Bill>("SELECT * FROM bills WHERE billid = $1 FOR UPDATE")
            .bind(bill_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(BillingError::BillNotFound(bill_id))?;

        if bill.payment_status != PaymentStatus::Paid {
            return Err(BillingError::Validation(format!(
                "Bill {} is not paid; nothing to reverse",
                bill_id
            )));
        }

        let restored_credit = CreditLedger::restore_on_reversal(&mut tx, &bill, actor).await?;

        sqlx::query(
            r#"
            UPDATE bills
            SET paymentstatus = 'Unpaid',
                paidby = NULL,
                datepaid = NULL,
                advancepaymentamount = NULL
            WHERE billid = $1
            "#,
        )
        .bind(bill_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            bill_id,
            customer_id = bill.customer_id,
            restored_credit = %restored_credit,
            actor = %actor,
            "Reversed payment"
        );

        Ok(ReversalOutcome {
            bill_id,
            restored_credit,
        })
    }

    async fn fetch_customer(&self, customer_id: i64) -> BillingResult<Customer> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customerid, name, barangay, type, status, discount, credit_balance
            FROM customers
            WHERE customerid = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        customer.ok_or(BillingError::CustomerNotFound(customer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_consumes_credit_before_cash() {
        // Balance 150 against a 200 total: 150 applied, 50 due in cash
        let plan = plan_payment(dec!(200), dec!(150), dec!(70)).unwrap();
        assert_eq!(plan.credit_to_apply, dec!(150));
        assert_eq!(plan.amount_after_credit, dec!(50));
        assert_eq!(plan.overpayment, dec!(20));
        // Final balance moves by -150 + 20 = -130: 150 -> 20
        assert_eq!(plan.credit_delta, dec!(-130));
    }

    #[test]
    fn test_plan_rejects_underpayment() {
        let err = plan_payment(dec!(200), dec!(150), dec!(49.99)).unwrap_err();
        assert!(matches!(
            err,
            BillingError::InsufficientPayment { required, .. } if required == dec!(50)
        ));
    }

    #[test]
    fn test_plan_exact_payment_has_no_overpayment() {
        let plan = plan_payment(dec!(200), dec!(0), dec!(200)).unwrap();
        assert_eq!(plan.credit_to_apply, Decimal::ZERO);
        assert_eq!(plan.overpayment, Decimal::ZERO);
        assert_eq!(plan.credit_delta, Decimal::ZERO);
    }

    #[test]
    fn test_plan_credit_covers_everything() {
        // Credit exceeds the total: nothing due, zero received accepted
        let plan = plan_payment(dec!(120), dec!(500), Decimal::ZERO).unwrap();
        assert_eq!(plan.credit_to_apply, dec!(120));
        assert_eq!(plan.amount_after_credit, Decimal::ZERO);
        assert_eq!(plan.credit_delta, dec!(-120));
    }

    #[test]
    fn test_plan_rejects_negative_amount_received() {
        assert!(matches!(
            plan_payment(dec!(100), dec!(0), dec!(-1)),
            Err(BillingError::Validation(_))
        ));
    }
}
