//! Billing error types
//!
//! Every operation in this crate returns a structured [`BillingError`] to the
//! caller; errors never cross the crate boundary as panics. Rejections happen
//! before any mutation, and storage failures roll back the whole transaction.

use rust_decimal::Decimal;
use time::Date;

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors that can occur during billing operations
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Input rejected before any mutation (bad readings, bad amounts, etc.)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Customer lookup failed
    #[error("Customer not found: {0}")]
    CustomerNotFound(i64),

    /// Bill lookup failed
    #[error("Bill not found: {0}")]
    BillNotFound(i64),

    /// No tariff configured for the customer's type
    #[error("No tariff configured for customer type '{0}'")]
    TariffNotFound(String),

    /// The (customer, billed month) pair is already billed
    #[error("Customer {customer_id} already has a bill for {billed_month}")]
    DuplicateBill {
        customer_id: i64,
        billed_month: Date,
    },

    /// The bounded bill-id probe loop failed to find a free id
    #[error("Could not allocate a unique bill id after {0} attempts")]
    IdExhausted(u32),

    /// A deduct or apply-to-bills would take the balance negative
    #[error("Insufficient credit: requested {requested}, available {available}")]
    InsufficientCredit {
        requested: Decimal,
        available: Decimal,
    },

    /// Amount received does not cover the post-credit total
    #[error("Insufficient payment: received {received}, required {required}")]
    InsufficientPayment {
        received: Decimal,
        required: Decimal,
    },

    /// Backing-store failure, propagated unmodified
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
