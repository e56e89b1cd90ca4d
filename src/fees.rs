//! Fee arithmetic shared by the payment handlers, the settings fan-out, and
//! the seeder. Everything here is pure; persistence stays in the handlers.

pub const TERMS_PER_YEAR: i64 = 3;

pub fn annual_fee(fee_per_term: f64) -> f64 {
    fee_per_term * TERMS_PER_YEAR as f64
}

/// Sum of recorded payment amounts. Negative amounts are not rejected here;
/// they act as credit notes and simply reduce the total.
pub fn total_paid<I>(amounts: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    amounts.into_iter().sum()
}

/// May go negative on overpayment; the carry-forward is passed through as-is.
pub fn balance(fee_per_term: f64, total_paid: f64) -> f64 {
    annual_fee(fee_per_term) - total_paid
}

/// Clearance is cumulative-to-date: a student is cleared when total payments
/// cover every term up to and including the active one, regardless of which
/// term each payment was recorded against. The boundary is inclusive, and the
/// function is total over its numeric domain: a zero fee clears everyone and
/// a negative total is handled by the comparison alone.
pub fn is_cleared(total_paid: f64, fee_per_term: f64, current_term: i64) -> bool {
    total_paid >= current_term as f64 * fee_per_term
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerTotals {
    pub total_paid: f64,
    pub balance: f64,
}

/// Recompute aggregates from the FULL payment sequence. Never update these
/// incrementally: recomputing from source keeps the result independent of
/// mutation order and lets a later write heal an earlier partial failure.
pub fn recompute_totals<I>(amounts: I, fee_per_term: f64) -> LedgerTotals
where
    I: IntoIterator<Item = f64>,
{
    let paid = total_paid(amounts);
    LedgerTotals {
        total_paid: paid,
        balance: balance(fee_per_term, paid),
    }
}
