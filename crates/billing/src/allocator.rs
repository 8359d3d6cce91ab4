//! Collision-safe bill identifier allocation
//!
//! Bill ids are short, human-typed 8-digit numbers drawn uniformly from
//! [10,000,000, 99,999,999]. The allocator probes the store for a free id and
//! retries up to a fixed bound; the PRIMARY KEY on `bills.billid` remains the
//! authoritative uniqueness guard, so this loop is an optimization for the
//! common case, never the correctness mechanism.

use rand::Rng;

use crate::error::{BillingError, BillingResult};

/// Smallest valid bill id (inclusive).
pub const BILL_ID_MIN: i64 = 10_000_000;
/// Largest valid bill id (exclusive upper bound of the candidate range).
pub const BILL_ID_MAX: i64 = 100_000_000;
/// How many candidates to probe before giving up with `IdExhausted`.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 10;

/// Existence probe for candidate bill ids. Implemented against the store by
/// the bill service and against in-memory sets in tests.
pub trait BillIdProbe {
    fn bill_id_exists(
        &self,
        candidate: i64,
    ) -> impl std::future::Future<Output = BillingResult<bool>> + Send;
}

/// Draw a fresh batch of candidate ids.
fn candidates() -> Vec<i64> {
    let mut rng = rand::rng();
    (0..MAX_ALLOCATION_ATTEMPTS)
        .map(|_| rng.random_range(BILL_ID_MIN..BILL_ID_MAX))
        .collect()
}

/// Allocate a bill id, probing random candidates against the store.
pub async fn allocate_bill_id<P: BillIdProbe + Sync>(probe: &P) -> BillingResult<i64> {
    allocate_from(probe, candidates()).await
}

/// Probe the given candidates in order; first free one wins. Exhausting the
/// list is a fatal `IdExhausted` for this attempt - the caller may retry the
/// whole operation, but never gets a colliding or deterministic fallback id.
async fn allocate_from<P: BillIdProbe + Sync>(
    probe: &P,
    candidates: impl IntoIterator<Item = i64>,
) -> BillingResult<i64> {
    let mut attempts = 0;
    for candidate in candidates {
        attempts += 1;
        if !probe.bill_id_exists(candidate).await? {
            return Ok(candidate);
        }
        tracing::debug!(candidate, attempts, "Bill id candidate collided, retrying");
    }

    tracing::warn!(attempts, "Bill id allocation exhausted its probe budget");
    Err(BillingError::IdExhausted(attempts))
}
