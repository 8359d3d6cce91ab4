//! Customer credit ledger
//!
//! Owns one invariant: a customer's credit balance never goes negative, and
//! every mutation lands as a signed `credit_adjustments` row alongside the
//! balance update, in the same transaction. The balance column is the
//! materialized projection of those rows.
//!
//! Balance changes go through a single conditional UPDATE
//! (`credit_balance + delta >= 0`), so two concurrent mutations can never
//! both deduct against a stale read.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::bills::Bill;
use crate::error::{BillingError, BillingResult};

/// Why a credit balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_reason", rename_all = "kebab-case")]
pub enum CreditReason {
    ManualAdd,
    ManualDeduct,
    AppliedToBill,
    Overpayment,
    RestoredOnReversal,
}

/// Direction of a manual adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub enum AdjustmentKind {
    Add,
    Deduct,
}

/// One signed entry in the audit trail.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct CreditAdjustment {
    pub id: Uuid,
    #[sqlx(rename = "customerid")]
    pub customer_id: i64,
    /// Signed: positive grows the balance, negative shrinks it
    pub amount: Decimal,
    pub reason: CreditReason,
    /// Bill this entry settles or restores, when applicable
    #[sqlx(rename = "billid")]
    pub bill_id: Option<i64>,
    pub remarks: Option<String>,
    pub actor: String,
    pub created_at: OffsetDateTime,
}

/// Outcome of a manual adjustment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdjustOutcome {
    pub customer_id: i64,
    pub previous_balance: Decimal,
    /// Signed delta that was applied
    pub adjustment: Decimal,
    pub new_balance: Decimal,
}

/// Outcome of applying credit to a set of bills.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApplyOutcome {
    pub bills_paid: usize,
    pub credit_used: Decimal,
    pub remaining_credit: Decimal,
}

/// A bill selected for credit application and its allocated share.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BillShare {
    pub bill_id: i64,
    pub amount: Decimal,
}

/// Selected shares must be positive and sum to exactly the amount being
/// deducted from the balance.
fn validate_shares(selections: &[BillShare], total_to_apply: Decimal) -> BillingResult<()> {
    if selections.is_empty() {
        return Err(BillingError::Validation(
            "No bills selected for credit application".to_string(),
        ));
    }
    let share_sum: Decimal = selections.iter().map(|s| s.amount).sum();
    if selections.iter().any(|s| s.amount <= Decimal::ZERO) || share_sum != total_to_apply {
        return Err(BillingError::Validation(format!(
            "Bill shares ({}) must be positive and sum to the total to apply ({})",
            share_sum, total_to_apply
        )));
    }
    Ok(())
}

/// Stateful component owning customer credit balances.
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance for a customer.
    pub async fn balance(&self, customer_id: i64) -> BillingResult<Decimal> {
        let row: Option<(Decimal,)> =
            sqlx::query_as("SELECT credit_balance FROM customers WHERE customerid = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(balance,)| balance)
            .ok_or(BillingError::CustomerNotFound(customer_id))
    }

    /// Manually add to or deduct from a customer's balance.
    ///
    /// A deduct that exceeds the balance is rejected with
    /// `InsufficientCredit` and leaves the balance unchanged.
    pub async fn adjust(
        &self,
        customer_id: i64,
        amount: Decimal,
        kind: AdjustmentKind,
        remarks: Option<&str>,
        actor: &str,
    ) -> BillingResult<AdjustOutcome> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::Validation(format!(
                "Adjustment amount must be positive, got {}",
                amount
            )));
        }

        let (delta, reason) = match kind {
            AdjustmentKind::Add => (amount, CreditReason::ManualAdd),
            AdjustmentKind::Deduct => (-amount, CreditReason::ManualDeduct),
        };

        let mut tx = self.pool.begin().await?;

        let new_balance =
            Self::apply_balance_delta(&mut tx, customer_id, delta).await?;
        Self::record_adjustment(&mut tx, customer_id, delta, reason, None, remarks, actor).await?;

        tx.commit().await?;

        tracing::info!(
            customer_id,
            delta = %delta,
            new_balance = %new_balance,
            actor = %actor,
            "Adjusted credit balance"
        );

        Ok(AdjustOutcome {
            customer_id,
            previous_balance: new_balance - delta,
            adjustment: delta,
            new_balance,
        })
    }

    /// Settle the selected bills from the customer's credit balance.
    ///
    /// Each bill is marked Paid with its allocated share recorded as the
    /// advance-payment amount; the balance is decremented once by the
    /// combined total. All of it commits or none of it does.
    pub async fn apply_to_bills(
        &self,
        customer_id: i64,
        selections: &[BillShare],
        total_to_apply: Decimal,
        actor: &str,
    ) -> BillingResult<ApplyOutcome> {
        validate_shares(selections, total_to_apply)?;

        let mut tx = self.pool.begin().await?;

        // One combined decrement, not one per bill.
        let remaining_credit =
            Self::apply_balance_delta(&mut tx, customer_id, -total_to_apply).await?;

        let now = OffsetDateTime::now_utc();
        for share in selections {
            let updated: Option<(i64,)> = sqlx::query_as(
                r#"
                UPDATE bills
                SET paymentstatus = 'Paid',
                    advancepaymentamount = $3,
                    paidby = $4,
                    datepaid = $5
                WHERE billid = $1
                  AND customerid = $2
                  AND paymentstatus <> 'Paid'
                RETURNING billid
                "#,
            )
            .bind(share.bill_id)
            .bind(customer_id)
            .bind(share.amount)
            .bind(actor)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if updated.is_none() {
                // Rolls back the balance decrement and any bills already marked.
                return Err(BillingError::Validation(format!(
                    "Bill {} is not an unpaid bill of customer {}",
                    share.bill_id, customer_id
                )));
            }

            Self::record_adjustment(
                &mut tx,
                customer_id,
                -share.amount,
                CreditReason::AppliedToBill,
                Some(share.bill_id),
                None,
                actor,
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            customer_id,
            bills_paid = selections.len(),
            credit_used = %total_to_apply,
            remaining_credit = %remaining_credit,
            actor = %actor,
            "Applied credit to bills"
        );

        Ok(ApplyOutcome {
            bills_paid: selections.len(),
            credit_used: total_to_apply,
            remaining_credit,
        })
    }

    /// Customers holding credit, largest balance first.
    pub async fn customers_with_credit(&self) -> BillingResult<Vec<(i64, String, Decimal)>> {
        let rows: Vec<(i64, String, Decimal)> = sqlx::query_as(
            r#"
            SELECT customerid, name, credit_balance
            FROM customers
            WHERE credit_balance > 0
            ORDER BY credit_balance DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Audit trail for one customer, newest first.
    pub async fn history(&self, customer_id: i64) -> BillingResult<Vec<CreditAdjustment>> {
        let rows = sqlx::query_as::<_, CreditAdjustment>(
            r#"
            SELECT id, customerid, amount, reason, billid, remarks, actor, created_at
            FROM credit_adjustments
            WHERE customerid = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Credit back the advance-payment amount of a bill being reverted to
    /// Unpaid. Cash-paid bills (no advance amount) restore nothing. Runs
    /// inside the caller's reversal transaction.
    pub(crate) async fn restore_on_reversal(
        tx: &mut Transaction<'_, Postgres>,
        bill: &Bill,
        actor: &str,
    ) -> BillingResult<Decimal> {
        let restore = match bill.advance_payment_amount {
            Some(amount) if amount > Decimal::ZERO => amount,
            _ => return Ok(Decimal::ZERO),
        };

        Self::apply_balance_delta(tx, bill.customer_id, restore).await?;
        Self::record_adjustment(
            tx,
            bill.customer_id,
            restore,
            CreditReason::RestoredOnReversal,
            Some(bill.bill_id),
            None,
            actor,
        )
        .await?;

        tracing::info!(
            bill_id = bill.bill_id,
            customer_id = bill.customer_id,
            restored = %restore,
            actor = %actor,
            "Restored advance-payment credit on reversal"
        );

        Ok(restore)
    }

    /// Atomic conditional balance update. The `>= 0` guard (backed by the
    /// CHECK constraint) is what keeps concurrent deducts from racing a
    /// stale read.
    pub(crate) async fn apply_balance_delta(
        tx: &mut Transaction<'_, Postgres>,
        customer_id: i64,
        delta: Decimal,
    ) -> BillingResult<Decimal> {
        let updated: Option<(Decimal,)> = sqlx::query_as(
            r#"
            UPDATE customers
            SET credit_balance = credit_balance + $2
            WHERE customerid = $1
              AND credit_balance + $2 >= 0
            RETURNING credit_balance
            "#,
        )
        .bind(customer_id)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await?;

        match updated {
            Some((balance,)) => Ok(balance),
            None => {
                // Distinguish a missing customer from an over-deduct.
                let available: Option<(Decimal,)> =
                    sqlx::query_as("SELECT credit_balance FROM customers WHERE customerid = $1")
                        .bind(customer_id)
                        .fetch_optional(&mut **tx)
                        .await?;

                match available {
                    Some((available,)) => Err(BillingError::InsufficientCredit {
                        requested: -delta,
                        available,
                    }),
                    None => Err(BillingError::CustomerNotFound(customer_id)),
                }
            }
        }
    }

    /// Append one signed entry to the audit trail.
    pub(crate) async fn record_adjustment(
        tx: &mut Transaction<'_, Postgres>,
        customer_id: i64,
        amount: Decimal,
        reason: CreditReason,
        bill_id: Option<i64>,
        remarks: Option<&str>,
        actor: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_adjustments (customerid, amount, reason, billid, remarks, actor)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(customer_id)
        .bind(amount)
        .bind(reason)
        .bind(bill_id)
        .bind(remarks)
        .bind(actor)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn share(bill_id: i64, amount: Decimal) -> BillShare {
        BillShare { bill_id, amount }
    }

    #[test]
    fn test_shares_must_sum_to_total() {
        let shares = [share(11111111, dec!(30)), share(22222222, dec!(25))];
        assert!(validate_shares(&shares, dec!(55)).is_ok());
        assert!(matches!(
            validate_shares(&shares, dec!(50)),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_selection_rejected() {
        assert!(matches!(
            validate_shares(&[], Decimal::ZERO),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_non_positive_share_rejected() {
        let shares = [share(11111111, dec!(50)), share(22222222, dec!(0))];
        assert!(matches!(
            validate_shares(&shares, dec!(50)),
            Err(BillingError::Validation(_))
        ));
    }
}
