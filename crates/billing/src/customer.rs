//! Customer lookups as consumed by the billing engine
//!
//! Only the fields the engine needs: tariff type, discount percentage, and
//! credit balance. The balance is mutated exclusively through the credit
//! ledger, never here.

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// Customer row as consumed by the billing engine.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct Customer {
    #[sqlx(rename = "customerid")]
    pub customer_id: i64,
    pub name: String,
    pub barangay: Option<String>,
    /// Tariff type; joins to `customer_type` for rates
    #[sqlx(rename = "type")]
    pub customer_type: Option<String>,
    pub status: Option<String>,
    /// Discount percentage (0-100), if the customer has one
    pub discount: Option<Decimal>,
    /// Prepaid/overpaid funds available to offset future bills; never negative
    pub credit_balance: Decimal,
}

pub struct CustomerService {
    pool: PgPool,
}

impl CustomerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Customer details including credit balance and discount.
    pub async fn get_details(&self, customer_id: i64) -> BillingResult<Customer> {
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
