// ⚖️ Reconciliation Engine - match expense items against billing payments
//
// Greedy first-match, per payment in ledger order:
//   1. identity: payee name == partner name OR payee code == partner code
//   2. amount:   |payment - expense| / |expense| <= tolerance (5%)
//   3. date:     |payment date - expected payment date| <= window (7 days)
//
// An expense claimed by one payment is removed from the pool, so no expense
// is matched twice in the same run.
//
// The two stores commit separately (primary first, then billing). A crash
// between the commits leaves expenses marked paid with their payments still
// pending; the next run skips those expenses because they are matched.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calendar;
use crate::config::ReconciliationSection;
use crate::db::{self, Event};
use crate::entities::{PaymentRecord, PaymentRecordStatus, PaymentStatus};
use crate::error::{BillingError, Result};

const ACTOR: &str = "reconciler";

/// Absorbs float representation error so exactly-at-tolerance still passes
const TOLERANCE_EPSILON: f64 = 1e-9;

// ============================================================================
// MATCH CANDIDATE + PAIR
// ============================================================================

/// An unmatched, unpaid expense item with its partner's identity keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub expense_id: i64,
    pub item_name: String,
    pub amount: f64,
    pub expected_payment_date: Option<NaiveDate>,
    pub partner_name: Option<String>,
    pub partner_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub payment_id: i64,
    pub expense_id: i64,
    pub payment_amount: Option<f64>,
    pub payment_date: Option<NaiveDate>,

    /// payment − expense
    pub difference: Option<f64>,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub matched: usize,
    pub unmatched_expenses: usize,
    pub unmatched_payments: usize,
    pub pairs: Vec<MatchPair>,
    pub dry_run: bool,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "{}{} matched, {} expense items unmatched, {} payments unmatched",
            if self.dry_run { "[dry run] " } else { "" },
            self.matched,
            self.unmatched_expenses,
            self.unmatched_payments
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    /// Relative amount tolerance (default: 0.05 = 5%)
    pub amount_tolerance: f64,

    /// Max days between payment date and expected payment date (default: 7)
    pub date_window_days: i64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            amount_tolerance: 0.05,
            date_window_days: 7,
        }
    }

    pub fn with_tolerances(amount_tolerance: f64, date_window_days: i64) -> Self {
        ReconciliationEngine {
            amount_tolerance,
            date_window_days,
        }
    }

    pub fn from_config(section: &ReconciliationSection) -> Self {
        Self::with_tolerances(section.amount_tolerance, section.date_window_days)
    }

    /// Payee name or payee code must agree; blank values never match
    pub fn identity_matches(&self, payment: &PaymentRecord, candidate: &MatchCandidate) -> bool {
        let same = |a: Option<&str>, b: Option<&str>| match (non_blank(a), non_blank(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };

        same(payment.payee.as_deref(), candidate.partner_name.as_deref())
            || same(payment.payee_code.as_deref(), candidate.partner_code.as_deref())
    }

    pub fn amount_within_tolerance(&self, payment_amount: Option<f64>, expense_amount: Option<f64>) -> bool {
        let (Some(payment), Some(expense)) = (payment_amount, expense_amount) else {
            return false;
        };
        if payment == 0.0 || expense == 0.0 {
            return false;
        }

        let relative = (payment - expense).abs() / expense.abs();
        relative <= self.amount_tolerance + TOLERANCE_EPSILON
    }

    pub fn dates_within_window(&self, payment_date: Option<NaiveDate>, expense_date: Option<NaiveDate>) -> bool {
        match (payment_date, expense_date) {
            (Some(p), Some(e)) => (p - e).num_days().abs() <= self.date_window_days,
            _ => false,
        }
    }

    pub fn is_match(&self, payment: &PaymentRecord, candidate: &MatchCandidate) -> bool {
        self.identity_matches(payment, candidate)
            && self.amount_within_tolerance(payment.amount, Some(candidate.amount))
            && self.dates_within_window(payment.payment_date, candidate.expected_payment_date)
    }

    /// Greedy first-match in input order; each candidate used at most once
    pub fn find_matches(&self, payments: &[PaymentRecord], candidates: &[MatchCandidate]) -> Vec<MatchPair> {
        let mut claimed = vec![false; candidates.len()];
        let mut pairs = Vec::new();

        for payment in payments {
            let hit = candidates
                .iter()
                .enumerate()
                .find(|(i, candidate)| !claimed[*i] && self.is_match(payment, candidate));

            match hit {
                Some((i, candidate)) => {
                    claimed[i] = true;
                    debug!(
                        payment_id = payment.id,
                        expense_id = candidate.expense_id,
                        "payment matched"
                    );
                    pairs.push(MatchPair {
                        payment_id: payment.id,
                        expense_id: candidate.expense_id,
                        payment_amount: payment.amount,
                        payment_date: payment.payment_date,
                        difference: payment.amount.map(|amount| amount - candidate.amount),
                    });
                }
                None => debug!(payment_id = payment.id, "no matching expense item"),
            }
        }

        pairs
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// TWO-STORE RECONCILER
// ============================================================================

/// Match pending payments against open expense items and mark both sides.
pub fn reconcile(
    primary: &Connection,
    billing: &Connection,
    engine: &ReconciliationEngine,
) -> Result<ReconciliationReport> {
    let payments = db::get_pending_payments(billing)?;
    let candidates = load_candidates(primary)?;
    let pairs = engine.find_matches(&payments, &candidates);

    if !pairs.is_empty() {
        let tx = primary.unchecked_transaction()?;
        for pair in &pairs {
            mark_expense_paid(&tx, pair)?;
        }
        tx.commit()?;

        let tx = billing.unchecked_transaction()?;
        for pair in &pairs {
            mark_payment_reconciled(&tx, pair.payment_id)?;
        }
        tx.commit()?;
    }

    let report = build_report(&payments, &candidates, pairs, false);
    info!("{}", report.summary());
    Ok(report)
}

/// Dry run: same matching, no writes
pub fn preview(
    primary: &Connection,
    billing: &Connection,
    engine: &ReconciliationEngine,
) -> Result<ReconciliationReport> {
    let payments = db::get_pending_payments(billing)?;
    let candidates = load_candidates(primary)?;
    let pairs = engine.find_matches(&payments, &candidates);

    Ok(build_report(&payments, &candidates, pairs, true))
}

fn build_report(
    payments: &[PaymentRecord],
    candidates: &[MatchCandidate],
    pairs: Vec<MatchPair>,
    dry_run: bool,
) -> ReconciliationReport {
    ReconciliationReport {
        matched: pairs.len(),
        unmatched_expenses: candidates.len() - pairs.len(),
        unmatched_payments: payments.len() - pairs.len(),
        pairs,
        dry_run,
        reconciled_at: Utc::now(),
    }
}

/// Unmatched, unpaid, unarchived expense items with partner name/code
pub fn load_candidates(primary: &Connection) -> Result<Vec<MatchCandidate>> {
    let sql = format!(
        "SELECT {}, p.name, p.code
         FROM expense_items e
         LEFT JOIN partners p ON e.partner_id = p.id
         WHERE e.payment_matched_id IS NULL
           AND (e.archived = 0 OR e.archived IS NULL)
         ORDER BY e.id",
        db::expense_columns_with_alias("e")
    );

    let mut stmt = primary.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let item = db::expense_from_row(row)?;
            let partner_name: Option<String> = row.get(17)?;
            let partner_code: Option<String> = row.get(18)?;
            Ok((item, partner_name, partner_code))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let candidates = rows
        .into_iter()
        .filter(|(item, _, _)| !item.is_paid())
        .map(|(item, partner_name, partner_code)| MatchCandidate {
            expense_id: item.id,
            item_name: item.item_name,
            amount: item.amount,
            expected_payment_date: item.expected_payment_date,
            partner_name,
            partner_code,
        })
        .collect();

    Ok(candidates)
}

fn mark_expense_paid(conn: &Connection, pair: &MatchPair) -> Result<()> {
    conn.execute(
        "UPDATE expense_items
         SET payment_matched_id = ?1,
             actual_payment_date = ?2,
             payment_amount = ?3,
             payment_difference = ?4,
             payment_status = ?5
         WHERE id = ?6",
        params![
            pair.payment_id,
            pair.payment_date.map(calendar::format_date),
            pair.payment_amount,
            pair.difference,
            PaymentStatus::Paid.as_str(),
            pair.expense_id,
        ],
    )?;

    let event = Event::new(
        "payment_matched",
        "expense_item",
        &pair.expense_id.to_string(),
        serde_json::to_value(pair)?,
        ACTOR,
    );
    db::insert_event(conn, &event)?;

    Ok(())
}

fn mark_payment_reconciled(conn: &Connection, payment_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE payments SET status = ?1 WHERE id = ?2",
        params![PaymentRecordStatus::Reconciled.as_str(), payment_id],
    )?;
    Ok(())
}

// ============================================================================
// MANUAL MATCH
// ============================================================================

/// Operator-chosen pair, applied without the heuristics.
pub fn manual_match(
    primary: &Connection,
    billing: &Connection,
    expense_id: i64,
    payment_id: i64,
) -> Result<MatchPair> {
    let expense = db::get_expense_item(primary, expense_id)?
        .ok_or(BillingError::ExpenseNotFound(expense_id))?;
    if expense.is_matched() {
        return Err(BillingError::AlreadyMatched { expense_id });
    }

    let payment = db::get_payment(billing, payment_id)?.ok_or(BillingError::PaymentNotFound(payment_id))?;
    if payment.is_reconciled() {
        warn!(payment_id, "payment already reconciled, matching anyway");
    }

    let pair = MatchPair {
        payment_id,
        expense_id,
        payment_amount: payment.amount,
        payment_date: payment.payment_date,
        difference: payment.amount.map(|amount| amount - expense.amount),
    };

    let tx = primary.unchecked_transaction()?;
    mark_expense_paid(&tx, &pair)?;
    tx.commit()?;

    mark_payment_reconciled(billing, payment_id)?;

    info!(expense_id, payment_id, "manual match applied");
    Ok(pair)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Contract, NewExpenseItem, Partner, PaymentMode};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(expense_id: i64, amount: f64, expected: NaiveDate) -> MatchCandidate {
        MatchCandidate {
            expense_id,
            item_name: "出演料".to_string(),
            amount,
            expected_payment_date: Some(expected),
            partner_name: Some("Studio A".to_string()),
            partner_code: Some("P001".to_string()),
        }
    }

    fn payment(id: i64, payee: &str, code: Option<&str>, amount: f64, paid: NaiveDate) -> PaymentRecord {
        let mut payment = PaymentRecord::new(payee, code, amount, paid);
        payment.id = id;
        payment
    }

    // ------------------------------------------------------------------------
    // Pure matcher
    // ------------------------------------------------------------------------

    #[test]
    fn test_amount_tolerance_boundary() {
        let engine = ReconciliationEngine::new();

        assert!(engine.amount_within_tolerance(Some(105000.0), Some(100000.0)));
        assert!(engine.amount_within_tolerance(Some(95000.0), Some(100000.0)));
        assert!(!engine.amount_within_tolerance(Some(105010.0), Some(100000.0)));
        assert!(!engine.amount_within_tolerance(Some(0.0), Some(100000.0)));
        assert!(!engine.amount_within_tolerance(Some(100000.0), Some(0.0)));
        assert!(!engine.amount_within_tolerance(None, Some(100000.0)));
    }

    #[test]
    fn test_date_window_boundary() {
        let engine = ReconciliationEngine::new();
        let expected = date(2025, 11, 30);

        assert!(engine.dates_within_window(Some(date(2025, 12, 7)), Some(expected)));
        assert!(engine.dates_within_window(Some(date(2025, 11, 23)), Some(expected)));
        assert!(!engine.dates_within_window(Some(date(2025, 12, 8)), Some(expected)));
        assert!(!engine.dates_within_window(None, Some(expected)));
    }

    #[test]
    fn test_identity_by_name_or_code() {
        let engine = ReconciliationEngine::new();
        let c = candidate(1, 1000.0, date(2025, 11, 30));

        let by_name = payment(1, "  Studio A ", None, 1000.0, date(2025, 11, 30));
        let by_code = payment(2, "スタジオA", Some("P001"), 1000.0, date(2025, 11, 30));
        let neither = payment(3, "Studio B", Some("P002"), 1000.0, date(2025, 11, 30));

        assert!(engine.identity_matches(&by_name, &c));
        assert!(engine.identity_matches(&by_code, &c));
        assert!(!engine.identity_matches(&neither, &c));

        let mut blank = c.clone();
        blank.partner_name = Some(String::new());
        blank.partner_code = None;
        let empty_payee = payment(4, "", None, 1000.0, date(2025, 11, 30));
        assert!(!engine.identity_matches(&empty_payee, &blank));
    }

    #[test]
    fn test_matched_expense_is_not_reused() {
        let engine = ReconciliationEngine::new();
        let candidates = vec![candidate(10, 1000.0, date(2025, 11, 30))];
        let payments = vec![
            payment(1, "Studio A", None, 1000.0, date(2025, 11, 30)),
            payment(2, "Studio A", None, 1000.0, date(2025, 11, 30)),
        ];

        let pairs = engine.find_matches(&payments, &candidates);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].payment_id, 1);
        assert_eq!(pairs[0].expense_id, 10);
    }

    #[test]
    fn test_first_candidate_wins() {
        let engine = ReconciliationEngine::new();
        let candidates = vec![
            candidate(10, 1000.0, date(2025, 11, 30)),
            candidate(11, 1000.0, date(2025, 11, 30)),
        ];
        let payments = vec![
            payment(1, "Studio A", None, 1020.0, date(2025, 12, 2)),
            payment(2, "Studio A", None, 990.0, date(2025, 11, 28)),
        ];

        let pairs = engine.find_matches(&payments, &candidates);

        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].payment_id, pairs[0].expense_id), (1, 10));
        assert_eq!((pairs[1].payment_id, pairs[1].expense_id), (2, 11));
        assert!((pairs[0].difference.unwrap() - 20.0).abs() < 1e-9);
    }

    // ------------------------------------------------------------------------
    // Two stores
    // ------------------------------------------------------------------------

    fn stores() -> (Connection, Connection) {
        let primary = Connection::open_in_memory().unwrap();
        db::setup_primary_store(&primary).unwrap();
        let billing = Connection::open_in_memory().unwrap();
        db::setup_billing_store(&billing).unwrap();
        (primary, billing)
    }

    fn seed_expense(primary: &Connection, amount: f64, expected: NaiveDate) -> i64 {
        let partner_id = db::insert_partner(primary, &Partner::new("Studio A", Some("P001"))).unwrap();
        let contract_id =
            db::insert_contract(primary, &Contract::new("出演料", PaymentMode::Spot)).unwrap();

        db::insert_expense_item(
            primary,
            &NewExpenseItem {
                contract_id: Some(contract_id),
                production_id: None,
                partner_id: Some(partner_id),
                item_name: "出演料".to_string(),
                amount,
                implementation_date: date(2025, 10, 1),
                expected_payment_date: Some(expected),
                notes: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_reconcile_marks_both_stores() {
        let (primary, billing) = stores();
        let expense_id = seed_expense(&primary, 100000.0, date(2025, 11, 30));
        let payment_id = db::insert_payment(
            &billing,
            &PaymentRecord::new("別名義", Some("P001"), 105000.0, date(2025, 12, 7)),
        )
        .unwrap();

        let report = reconcile(&primary, &billing, &ReconciliationEngine::new()).unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched_expenses, 0);
        assert_eq!(report.unmatched_payments, 0);

        let expense = db::get_expense_item(&primary, expense_id).unwrap().unwrap();
        assert_eq!(expense.payment_matched_id, Some(payment_id));
        assert_eq!(expense.payment_status, PaymentStatus::Paid);
        assert_eq!(expense.actual_payment_date, Some(date(2025, 12, 7)));
        assert_eq!(expense.payment_amount, Some(105000.0));
        assert_eq!(expense.payment_difference, Some(5000.0));

        let payment = db::get_payment(&billing, payment_id).unwrap().unwrap();
        assert!(payment.is_reconciled());

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_reconcile_rejects_outside_tolerance() {
        let (primary, billing) = stores();
        seed_expense(&primary, 100000.0, date(2025, 11, 30));
        db::insert_payment(
            &billing,
            &PaymentRecord::new("Studio A", Some("P001"), 105010.0, date(2025, 11, 30)),
        )
        .unwrap();
        db::insert_payment(
            &billing,
            &PaymentRecord::new("Studio A", Some("P001"), 100000.0, date(2025, 12, 8)),
        )
        .unwrap();

        let report = reconcile(&primary, &billing, &ReconciliationEngine::new()).unwrap();

        assert_eq!(report.matched, 0);
        assert_eq!(report.unmatched_expenses, 1);
        assert_eq!(report.unmatched_payments, 2);
    }

    #[test]
    fn test_rerun_after_full_match_changes_nothing() {
        let (primary, billing) = stores();
        seed_expense(&primary, 1000.0, date(2025, 11, 30));
        seed_expense(&primary, 2000.0, date(2025, 11, 30));
        db::insert_payment(
            &billing,
            &PaymentRecord::new("Studio A", None, 1000.0, date(2025, 11, 30)),
        )
        .unwrap();

        let engine = ReconciliationEngine::new();
        let first = reconcile(&primary, &billing, &engine).unwrap();
        let second = reconcile(&primary, &billing, &engine).unwrap();

        assert_eq!(first.matched, 1);
        assert_eq!(second.matched, 0);
        assert_eq!(first.unmatched_expenses, second.unmatched_expenses);
        assert_eq!(first.unmatched_payments, second.unmatched_payments);
    }

    #[test]
    fn test_preview_writes_nothing() {
        let (primary, billing) = stores();
        let expense_id = seed_expense(&primary, 1000.0, date(2025, 11, 30));
        db::insert_payment(
            &billing,
            &PaymentRecord::new("Studio A", None, 1000.0, date(2025, 11, 30)),
        )
        .unwrap();

        let report = preview(&primary, &billing, &ReconciliationEngine::new()).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.matched, 1);
        let expense = db::get_expense_item(&primary, expense_id).unwrap().unwrap();
        assert!(!expense.is_matched());
        assert_eq!(db::get_pending_payments(&billing).unwrap().len(), 1);
    }

    #[test]
    fn test_manual_match() {
        let (primary, billing) = stores();
        let expense_id = seed_expense(&primary, 1000.0, date(2025, 11, 30));
        let payment_id = db::insert_payment(
            &billing,
            &PaymentRecord::new("Someone else", None, 1500.0, date(2026, 2, 1)),
        )
        .unwrap();

        let pair = manual_match(&primary, &billing, expense_id, payment_id).unwrap();
        assert_eq!(pair.difference, Some(500.0));

        let err = manual_match(&primary, &billing, expense_id, payment_id).unwrap_err();
        assert!(matches!(err, BillingError::AlreadyMatched { .. }));

        let err = manual_match(&primary, &billing, 999, payment_id).unwrap_err();
        assert!(matches!(err, BillingError::ExpenseNotFound(999)));

        let other = seed_expense(&primary, 1000.0, date(2025, 11, 30));
        let err = manual_match(&primary, &billing, other, 999).unwrap_err();
        assert!(matches!(err, BillingError::PaymentNotFound(999)));
    }
}
