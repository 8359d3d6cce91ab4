//! Bill records and the billing flow that creates them
//!
//! A bill covers one customer's consumption for one calendar month, keyed by
//! `(customerid, billedmonth)` with a UNIQUE constraint as the authoritative
//! guard. Surcharge, discount, and total are stored as zero at encoding time
//! and settled by the payment processor, which prices them as of the payment
//! date.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::allocator::{self, BillIdProbe};
use crate::error::{BillingError, BillingResult};
use crate::tariff::{basic_amount, consumption, Tariff};

/// Payment lifecycle of a bill.
///
/// `Partial` is representable in the schema but no operation in this engine
/// transitions into or out of it; it is reachable only through external data
/// correction. Unpaid-bill queries still treat it as settleable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

/// Bill row with the full persisted field set.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Bill {
    #[sqlx(rename = "billid")]
    pub bill_id: i64,
    #[sqlx(rename = "customerid")]
    pub customer_id: i64,
    /// First day of the month the consumption covers
    #[sqlx(rename = "billedmonth")]
    pub billed_month: Date,
    #[sqlx(rename = "previousreading")]
    pub previous_reading: Decimal,
    #[sqlx(rename = "currentreading")]
    pub current_reading: Decimal,
    pub consumption: Decimal,
    #[sqlx(rename = "basicamount")]
    pub basic_amount: Decimal,
    #[sqlx(rename = "surchargeamount")]
    pub surcharge_amount: Decimal,
    #[sqlx(rename = "discountamount")]
    pub discount_amount: Decimal,
    #[sqlx(rename = "totalbillamount")]
    pub total_bill_amount: Decimal,
    #[sqlx(rename = "paymentstatus")]
    pub payment_status: PaymentStatus,
    /// Portion of the total settled from credit balance; set only when the
    /// bill was paid via credit application
    #[sqlx(rename = "advancepaymentamount")]
    pub advance_payment_amount: Option<Decimal>,
    #[sqlx(rename = "paidby")]
    pub paid_by: Option<String>,
    #[sqlx(rename = "datepaid")]
    pub date_paid: Option<OffsetDateTime>,
    #[sqlx(rename = "encodedby")]
    pub encoded_by: String,
}

/// Input for creating or editing a bill.
#[derive(Debug, Clone)]
pub struct BillInput {
    pub customer_id: i64,
    pub billed_month: Date,
    pub previous_reading: Decimal,
    pub current_reading: Decimal,
    pub encoded_by: String,
}

impl BillInput {
    /// Reject bad readings before any mutation.
    fn validate(&self) -> BillingResult<()> {
        if self.previous_reading < Decimal::ZERO || self.current_reading < Decimal::ZERO {
            return Err(BillingError::Validation(
                "Meter readings cannot be negative".to_string(),
            ));
        }
        if self.current_reading < self.previous_reading {
            return Err(BillingError::Validation(format!(
                "Current reading ({}) is less than previous reading ({})",
                self.current_reading, self.previous_reading
            )));
        }
        Ok(())
    }
}

/// Row shape for the tariff lookup joined through the customer's type.
#[derive(Debug, sqlx::FromRow)]
struct CustomerTypeRow {
    #[sqlx(rename = "type")]
    customer_type: Option<String>,
}

pub struct BillService {
    pool: PgPool,
}

impl BillIdProbe for BillService {
    async fn bill_id_exists(&self, candidate: i64) -> BillingResult<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bills WHERE billid = $1)")
                .bind(candidate)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

impl BillService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether the customer already has a bill for the month, optionally
    /// excluding one bill id (the bill being edited).
    pub async fn check_duplicate(
        &self,
        customer_id: i64,
        billed_month: Date,
        exclude_bill_id: Option<i64>,
    ) -> BillingResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM bills
                WHERE customerid = $1
                  AND billedmonth = $2
                  AND ($3::BIGINT IS NULL OR billid <> $3)
            )
            "#,
        )
        .bind(customer_id)
        .bind(billed_month)
        .bind(exclude_bill_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Create a bill: validate readings, enforce one-bill-per-customer-month,
    /// price the consumption under the customer's tariff, and insert under a
    /// freshly allocated 8-digit id.
    pub async fn create_bill(&self, input: BillInput) -> BillingResult<Bill> {
        input.validate()?;

        let tariff = self.tariff_for_customer(input.customer_id).await?;

        if self
            .check_duplicate(input.customer_id, input.billed_month, None)
            .await?
        {
            return Err(BillingError::DuplicateBill {
                customer_id: input.customer_id,
                billed_month: input.billed_month,
            });
        }

        let consumed = consumption(input.previous_reading, input.current_reading);
        let basic = basic_amount(consumed, &tariff);
        let bill_id = allocator::allocate_bill_id(self).await?;

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            INSERT INTO bills (
                billid, customerid, billedmonth,
                previousreading, currentreading, consumption,
                basicamount, surchargeamount, discountamount, totalbillamount,
                paymentstatus, encodedby
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, 0, 'Unpaid', $8)
            RETURNING *
            "#,
        )
        .bind(bill_id)
        .bind(input.customer_id)
        .bind(input.billed_month)
        .bind(input.previous_reading)
        .bind(input.current_reading)
        .bind(consumed)
        .bind(basic)
        .bind(&input.encoded_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, input.customer_id, input.billed_month))?;

        tracing::info!(
            bill_id,
            customer_id = input.customer_id,
            billed_month = %input.billed_month,
            basic_amount = %basic,
            encoded_by = %input.encoded_by,
            "Created bill"
        );

        Ok(bill)
    }

    /// Edit a bill's month and readings, repricing the basic amount. The
    /// bill's own id is excluded from the duplicate check.
    pub async fn update_bill(&self, bill_id: i64, input: BillInput) -> BillingResult<Bill> {
        input.validate()?;

        if self
            .check_duplicate(input.customer_id, input.billed_month, Some(bill_id))
            .await?
        {
            return Err(BillingError::DuplicateBill {
                customer_id: input.customer_id,
                billed_month: input.billed_month,
            });
        }

        let tariff = self.tariff_for_customer(input.customer_id).await?;
        let consumed = consumption(input.previous_reading, input.current_reading);
        let basic = basic_amount(consumed, &tariff);

        let bill = sqlx::query_as::<_, Bill>(
            r#"
            UPDATE bills
            SET billedmonth = $2,
                previousreading = $3,
                currentreading = $4,
                consumption = $5,
                basicamount = $6,
                encodedby = $7
            WHERE billid = $1
            RETURNING *
            "#,
        )
        .bind(bill_id)
        .bind(input.billed_month)
        .bind(input.previous_reading)
        .bind(input.current_reading)
        .bind(consumed)
        .bind(basic)
        .bind(&input.encoded_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, input.customer_id, input.billed_month))?;

        let bill = bill.ok_or(BillingError::BillNotFound(bill_id))?;

        tracing::info!(
            bill_id,
            customer_id = input.customer_id,
            billed_month = %input.billed_month,
            basic_amount = %basic,
            "Updated bill"
        );

        Ok(bill)
    }

    pub async fn get_bill(&self, bill_id: i64) -> BillingResult<Bill> {
        let bill = sqlx::query_as::<_, Bill>("SELECT * FROM bills WHERE billid = $1")
            .bind(bill_id)
            .fetch_optional(&self.pool)
            .await?;

        bill.ok_or(BillingError::BillNotFound(bill_id))
    }

    /// Bills still awaiting settlement, oldest billed month first.
    pub async fn unpaid_bills(&self, customer_id: i64) -> BillingResult<Vec<Bill>> {
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

        Ok(bills)
    }

    /// The customer's most recent bill; its current reading seeds the next
    /// bill's previous reading.
    pub async fn last_bill(&self, customer_id: i64) -> BillingResult<Option<Bill>> {
        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT * FROM bills
            WHERE customerid = $1
            ORDER BY billedmonth DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bill)
    }

    /// Tariff for a customer, resolved through the customer's type.
    async fn tariff_for_customer(&self, customer_id: i64) -> BillingResult<Tariff> {
        let row = sqlx::query_as::<_, CustomerTypeRow>(
            "SELECT type FROM customers WHERE customerid = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::CustomerNotFound(customer_id))?;

        let customer_type = row
            .customer_type
            .ok_or_else(|| BillingError::TariffNotFound("(none)".to_string()))?;

        let tariff = sqlx::query_as::<_, Tariff>(
            "SELECT type, rate1, rate2 FROM customer_type WHERE type = $1",
        )
        .bind(&customer_type)
        .fetch_optional(&self.pool)
        .await?;

        tariff.ok_or(BillingError::TariffNotFound(customer_type))
    }

    /// The UNIQUE constraint on (customerid, billedmonth) is authoritative;
    /// concurrent inserts that slip past the advisory check land here.
    fn map_unique_violation(e: sqlx::Error, customer_id: i64, billed_month: Date) -> BillingError {
        if let sqlx::Error::Database(db) = &e {
            if db.constraint() == Some("bills_customerid_billedmonth_key") {
                return BillingError::DuplicateBill {
                    customer_id,
                    billed_month,
                };
            }
        }
        e.into()
    }
}
