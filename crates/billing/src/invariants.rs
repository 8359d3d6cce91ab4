//! Billing invariants
//!
//! Runnable consistency checks over the billing store, intended to be run
//! after any mutation or bulk data correction.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Customer(s) affected
    pub customer_ids: Vec<i64>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - customers may be charged or credited incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    customerid: i64,
    name: String,
    credit_balance: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateMonthRow {
    customerid: i64,
    billedmonth: time::Date,
    bill_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentFieldRow {
    billid: i64,
    customerid: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    billid: i64,
    customerid: i64,
    previousreading: Decimal,
    currentreading: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerDriftRow {
    customerid: i64,
    credit_balance: Decimal,
    ledger_sum: Decimal,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_credit_balance_non_negative().await?);
        violations.extend(self.check_one_bill_per_customer_month().await?);
        violations.extend(self.check_paid_bills_have_payment_fields().await?);
        violations.extend(self.check_unpaid_bills_have_no_payment_fields().await?);
        violations.extend(self.check_readings_consistent().await?);
        violations.extend(self.check_ledger_matches_balance().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Credit balances never go negative.
    ///
    /// The CHECK constraint should make this unrepresentable; a violation
    /// means the constraint was dropped or bypassed.
    async fn check_credit_balance_non_negative(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            r#"
            SELECT customerid, name, credit_balance
            FROM customers
            WHERE credit_balance < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "credit_balance_non_negative".to_string(),
                customer_ids: vec![row.customerid],
                description: format!(
                    "Customer '{}' has negative credit balance {}",
                    row.name, row.credit_balance
                ),
                context: serde_json::json!({
                    "name": row.name,
                    "credit_balance": row.credit_balance,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: One bill per customer per billed month.
    async fn check_one_bill_per_customer_month(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateMonthRow> = sqlx::query_as(
            r#"
            SELECT customerid, billedmonth, COUNT(*) as bill_count
            FROM bills
            GROUP BY customerid, billedmonth
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "one_bill_per_customer_month".to_string(),
                customer_ids: vec![row.customerid],
                description: format!(
                    "Customer has {} bills for {} (expected 1)",
                    row.bill_count, row.billedmonth
                ),
                context: serde_json::json!({
                    "billed_month": row.billedmonth.to_string(),
                    "bill_count": row.bill_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Paid bills carry paid-by and date-paid.
    async fn check_paid_bills_have_payment_fields(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaymentFieldRow> = sqlx::query_as(
            r#"
            SELECT billid, customerid
            FROM bills
            WHERE paymentstatus = 'Paid'
              AND (paidby IS NULL OR datepaid IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_bills_have_payment_fields".to_string(),
                customer_ids: vec![row.customerid],
                description: "Paid bill is missing paid-by or date-paid".to_string(),
                context: serde_json::json!({ "bill_id": row.billid }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Unpaid bills carry no payment fields.
    ///
    /// A reversal must clear paid-by, date-paid, and the advance-payment
    /// amount; leftovers here mean a reversal half-applied.
    async fn check_unpaid_bills_have_no_payment_fields(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaymentFieldRow> = sqlx::query_as(
            r#"
            SELECT billid, customerid
            FROM bills
            WHERE paymentstatus = 'Unpaid'
              AND (paidby IS NOT NULL OR datepaid IS NOT NULL
                   OR COALESCE(advancepaymentamount, 0) > 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unpaid_bills_have_no_payment_fields".to_string(),
                customer_ids: vec![row.customerid],
                description: "Unpaid bill still carries payment fields".to_string(),
                context: serde_json::json!({ "bill_id": row.billid }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Readings and consumption are consistent.
    async fn check_readings_consistent(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT billid, customerid, previousreading, currentreading
            FROM bills
            WHERE currentreading < previousreading
               OR consumption <> GREATEST(currentreading - previousreading, 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "readings_consistent".to_string(),
                customer_ids: vec![row.customerid],
                description: format!(
                    "Bill readings are inconsistent: {} -> {}",
                    row.previousreading, row.currentreading
                ),
                context: serde_json::json!({
                    "bill_id": row.billid,
                    "previous_reading": row.previousreading,
                    "current_reading": row.currentreading,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: The balance column matches the ledger sum.
    ///
    /// Every balance mutation appends a signed adjustment row, so the
    /// materialized balance must equal the sum of the customer's rows.
    async fn check_ledger_matches_balance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<LedgerDriftRow> = sqlx::query_as(
            r#"
            SELECT c.customerid,
                   c.credit_balance,
                   COALESCE(SUM(a.amount), 0) AS ledger_sum
            FROM customers c
            JOIN credit_adjustments a ON a.customerid = c.customerid
            GROUP BY c.customerid, c.credit_balance
            HAVING c.credit_balance <> COALESCE(SUM(a.amount), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ledger_matches_balance".to_string(),
                customer_ids: vec![row.customerid],
                description: format!(
                    "Balance {} drifted from ledger sum {}",
                    row.credit_balance, row.ledger_sum
                ),
                context: serde_json::json!({
                    "credit_balance": row.credit_balance,
                    "ledger_sum": row.ledger_sum,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "credit_balance_non_negative" => self.check_credit_balance_non_negative().await,
            "one_bill_per_customer_month" => self.check_one_bill_per_customer_month().await,
            "paid_bills_have_payment_fields" => self.check_paid_bills_have_payment_fields().await,
            "unpaid_bills_have_no_payment_fields" => {
                self.check_unpaid_bills_have_no_payment_fields().await
            }
            "readings_consistent" => self.check_readings_consistent().await,
            "ledger_matches_balance" => self.check_ledger_matches_balance().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "credit_balance_non_negative",
            "one_bill_per_customer_month",
            "paid_bills_have_payment_fields",
            "unpaid_bills_have_no_payment_fields",
            "readings_consistent",
            "ledger_matches_balance",
        ]
    }
}
