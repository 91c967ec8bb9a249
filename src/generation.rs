// 🏭 Expense Generation - persist planned rows without duplicating them
//
// Flow: load contract + production → plan_expenses() → insert rows whose
// dedup key is absent. Existing rows are never updated or deleted here;
// after a contract edit the caller runs regenerate (delete + generate).

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{self, Event};
use crate::entities::NewExpenseItem;
use crate::error::Result;
use crate::schedule::{plan_expenses, DedupKey, PlannedExpense};

const ACTOR: &str = "expense_generator";

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub contract_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub contracts_processed: usize,
    pub items_inserted: usize,
    pub failures: Vec<GenerationFailure>,
}

impl GenerationSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} contracts processed, {} expense items inserted, {} failed",
            self.contracts_processed,
            self.items_inserted,
            self.failures.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerateOutcome {
    pub deleted: usize,
    pub generated: usize,
}

// ============================================================================
// GENERATE
// ============================================================================

/// Generate missing expense items for one contract.
///
/// Returns the number of rows actually inserted. A missing contract is
/// `Ok(0)`; a count-based contract without broadcast days is an error and
/// nothing is written.
pub fn generate_expense_items(conn: &Connection, contract_id: i64) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let inserted = generate_in(&tx, contract_id)?;
    tx.commit()?;
    Ok(inserted)
}

/// Run the generator over every contract, one transaction per contract.
///
/// Contract-level problems (bad broadcast days...) are collected so the
/// batch keeps going; storage errors abort.
pub fn generate_all(conn: &Connection) -> Result<GenerationSummary> {
    let mut summary = GenerationSummary::default();

    for contract in db::get_all_contracts(conn)? {
        summary.contracts_processed += 1;

        match generate_expense_items(conn, contract.id) {
            Ok(inserted) => summary.items_inserted += inserted,
            Err(e) if e.is_domain_error() => {
                warn!(contract_id = contract.id, error = %e, "skipping contract");
                summary.failures.push(GenerationFailure {
                    contract_id: contract.id,
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    info!("{}", summary.summary());
    Ok(summary)
}

/// Generation body without its own transaction, so regenerate can nest it
fn generate_in(conn: &Connection, contract_id: i64) -> Result<usize> {
    let Some(contract) = db::get_contract(conn, contract_id)? else {
        warn!(contract_id, "contract not found, nothing generated");
        return Ok(0);
    };

    let production = match contract.production_id {
        Some(id) => db::get_production(conn, id)?,
        None => None,
    };

    let plan = plan_expenses(&contract, production.as_ref())?;

    let mut inserted = 0;
    for planned in &plan {
        if expense_item_exists(conn, contract.id, planned)? {
            debug!(
                contract_id,
                date = %planned.implementation_date,
                "expense item already present, skipping"
            );
            continue;
        }

        db::insert_expense_item(
            conn,
            &NewExpenseItem {
                contract_id: Some(contract.id),
                production_id: contract.production_id,
                partner_id: contract.partner_id,
                item_name: planned.item_name.clone(),
                amount: planned.amount,
                implementation_date: planned.implementation_date,
                expected_payment_date: planned.expected_payment_date,
                notes: planned.notes.clone(),
            },
        )?;
        inserted += 1;
    }

    if inserted > 0 {
        let event = Event::new(
            "expense_items_generated",
            "contract",
            &contract.id.to_string(),
            serde_json::json!({
                "payment_mode": contract.payment_mode.as_str(),
                "planned": plan.len(),
                "inserted": inserted,
            }),
            ACTOR,
        );
        db::insert_event(conn, &event)?;
    }

    info!(
        contract_id,
        planned = plan.len(),
        inserted,
        "expense generation finished"
    );
    Ok(inserted)
}

/// Duplicate check by the planned row's dedup key.
///
/// Dates may have been stored as YYYY/MM/DD by older tools, so both
/// spellings of the implementation date are checked.
fn expense_item_exists(conn: &Connection, contract_id: i64, planned: &PlannedExpense) -> Result<bool> {
    let (dashed, slashed) = date_spellings(planned.implementation_date);

    let count: i64 = match planned.dedup {
        DedupKey::DateAndAmount => conn.query_row(
            "SELECT COUNT(*) FROM expense_items
             WHERE contract_id = ?1
               AND implementation_date IN (?2, ?3)
               AND ABS(amount - ?4) < 0.005",
            params![contract_id, dashed, slashed, planned.amount],
            |row| row.get(0),
        )?,
        DedupKey::DateOnly => conn.query_row(
            "SELECT COUNT(*) FROM expense_items
             WHERE contract_id = ?1
               AND implementation_date IN (?2, ?3)",
            params![contract_id, dashed, slashed],
            |row| row.get(0),
        )?,
    };

    Ok(count > 0)
}

fn date_spellings(date: NaiveDate) -> (String, String) {
    (
        date.format("%Y-%m-%d").to_string(),
        date.format("%Y/%m/%d").to_string(),
    )
}

// ============================================================================
// DELETE + REGENERATE
// ============================================================================

/// Remove every expense item of a contract. Returns the number deleted.
pub fn delete_expense_items_by_contract(conn: &Connection, contract_id: i64) -> Result<usize> {
    let deleted = delete_in(conn, contract_id)?;
    info!(contract_id, deleted, "expense items deleted");
    Ok(deleted)
}

fn delete_in(conn: &Connection, contract_id: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM expense_items WHERE contract_id = ?1",
        [contract_id],
    )?;
    Ok(deleted)
}

/// Delete then generate in one transaction; an error keeps the old rows.
pub fn regenerate_expense_items(conn: &Connection, contract_id: i64) -> Result<RegenerateOutcome> {
    let tx = conn.unchecked_transaction()?;

    let deleted = delete_in(&tx, contract_id)?;
    let generated = generate_in(&tx, contract_id)?;

    tx.commit()?;

    info!(contract_id, deleted, generated, "expense items regenerated");
    Ok(RegenerateOutcome { deleted, generated })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Contract, PaymentMode, Production};
    use crate::error::BillingError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_primary_store(&conn).unwrap();
        conn
    }

    fn insert_monthly(conn: &Connection, price: f64) -> i64 {
        let mut contract = Contract::new("出演料", PaymentMode::MonthlyFixed);
        contract.start_date = Some(date(2025, 10, 1));
        contract.end_date = Some(date(2025, 12, 1));
        contract.unit_price = Some(price);
        db::insert_contract(conn, &contract).unwrap()
    }

    fn insert_count_based(conn: &Connection, days: Option<&str>) -> i64 {
        let mut production = Production::new("Morning Show");
        production.broadcast_days = days.map(str::to_string);
        let production_id = db::insert_production(conn, &production).unwrap();

        let mut contract = Contract::new("MC", PaymentMode::CountBased);
        contract.production_id = Some(production_id);
        contract.start_date = Some(date(2025, 11, 1));
        contract.end_date = Some(date(2025, 11, 30));
        contract.unit_price = Some(10000.0);
        db::insert_contract(conn, &contract).unwrap()
    }

    #[test]
    fn test_monthly_generation_is_idempotent() {
        let conn = setup();
        let contract_id = insert_monthly(&conn, 100000.0);

        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 3);
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 0);

        let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].implementation_date, Some(date(2025, 12, 1)));
        assert_eq!(items[2].expected_payment_date, Some(date(2026, 1, 31)));
        assert!(items.iter().all(|i| !i.is_paid() && !i.is_matched()));

        let events = db::get_events_for_entity(&conn, "contract", &contract_id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["inserted"], 3);
    }

    #[test]
    fn test_price_change_adds_rows_until_regenerated() {
        let conn = setup();
        let contract_id = insert_monthly(&conn, 100000.0);
        generate_expense_items(&conn, contract_id).unwrap();

        conn.execute(
            "UPDATE contracts SET unit_price = 120000 WHERE id = ?1",
            [contract_id],
        )
        .unwrap();

        // Amount is part of the key for fixed-rate modes: old rows stay
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 3);
        assert_eq!(db::count_expense_items(&conn).unwrap(), 6);

        let outcome = regenerate_expense_items(&conn, contract_id).unwrap();
        assert_eq!(outcome, RegenerateOutcome { deleted: 6, generated: 3 });

        let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
        assert!(items.iter().all(|i| i.amount == 120000.0));
    }

    #[test]
    fn test_count_based_dedup_ignores_amount() {
        let conn = setup();
        let contract_id = insert_count_based(&conn, Some("月,水"));

        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 1);

        conn.execute(
            "UPDATE contracts SET unit_price = 20000 WHERE id = ?1",
            [contract_id],
        )
        .unwrap();
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 0);

        let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, 80000.0);
    }

    #[test]
    fn test_count_based_without_days_writes_nothing() {
        let conn = setup();
        let contract_id = insert_count_based(&conn, None);

        let err = generate_expense_items(&conn, contract_id).unwrap_err();
        assert!(matches!(err, BillingError::MissingBroadcastDays { .. }));
        assert_eq!(db::count_expense_items(&conn).unwrap(), 0);
    }

    #[test]
    fn test_separator_only_days_write_nothing_until_fixed() {
        let conn = setup();

        for days in ["、", ","] {
            let contract_id = insert_count_based(&conn, Some(days));
            let err = generate_expense_items(&conn, contract_id).unwrap_err();
            assert!(matches!(err, BillingError::MissingBroadcastDays { .. }));
            assert!(db::get_expense_items_by_contract(&conn, contract_id).unwrap().is_empty());

            // Fixing the production later still produces the real row
            conn.execute(
                "UPDATE productions SET broadcast_days = '月・水'
                 WHERE id = (SELECT production_id FROM contracts WHERE id = ?1)",
                [contract_id],
            )
            .unwrap();
            assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 1);

            let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
            assert_eq!(items[0].amount, 80000.0);
        }
    }

    #[test]
    fn test_spot_generation_is_idempotent() {
        let conn = setup();

        let mut contract = Contract::new("ゲスト出演", PaymentMode::Spot);
        contract.implementation_date = Some(date(2025, 10, 18));
        contract.spot_amount = Some(30000.0);
        let contract_id = db::insert_contract(&conn, &contract).unwrap();

        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 1);
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 0);

        let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].implementation_date, Some(date(2025, 10, 18)));
        assert_eq!(items[0].expected_payment_date, Some(date(2025, 11, 30)));

        // A different amount on the same date is a different row
        conn.execute(
            "UPDATE contracts SET spot_amount = 35000 WHERE id = ?1",
            [contract_id],
        )
        .unwrap();
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 1);
    }

    #[test]
    fn test_spot_uses_production_start_when_undated() {
        let conn = setup();

        let mut production = Production::new("Special");
        production.start_date = Some(date(2025, 12, 20));
        let production_id = db::insert_production(&conn, &production).unwrap();

        let mut contract = Contract::new("ゲスト出演", PaymentMode::Spot);
        contract.production_id = Some(production_id);
        contract.spot_amount = Some(50000.0);
        let contract_id = db::insert_contract(&conn, &contract).unwrap();

        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 1);
        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 0);

        let items = db::get_expense_items_by_contract(&conn, contract_id).unwrap();
        assert_eq!(items[0].implementation_date, Some(date(2025, 12, 20)));
        assert_eq!(items[0].expected_payment_date, Some(date(2026, 1, 31)));
        println!("✅ Spot contract dated from production start: {:?}", items[0].implementation_date);
    }

    #[test]
    fn test_missing_contract_generates_nothing() {
        let conn = setup();
        assert_eq!(generate_expense_items(&conn, 999).unwrap(), 0);
    }

    #[test]
    fn test_legacy_slash_dates_count_as_present() {
        let conn = setup();
        let contract_id = insert_monthly(&conn, 100000.0);
        conn.execute(
            "INSERT INTO expense_items (contract_id, item_name, amount, implementation_date)
             VALUES (?1, 'legacy', 100000, '2025/10/01')",
            [contract_id],
        )
        .unwrap();

        assert_eq!(generate_expense_items(&conn, contract_id).unwrap(), 2);
    }

    #[test]
    fn test_generate_all_collects_failures() {
        let conn = setup();
        let good = insert_monthly(&conn, 50000.0);
        let bad = insert_count_based(&conn, Some(""));

        let summary = generate_all(&conn).unwrap();

        assert_eq!(summary.contracts_processed, 2);
        assert_eq!(summary.items_inserted, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].contract_id, bad);
        assert_eq!(db::get_expense_items_by_contract(&conn, good).unwrap().len(), 3);

        println!("✅ {}", summary.summary());
    }

    #[test]
    fn test_regenerate_failure_keeps_existing_rows() {
        let conn = setup();
        let contract_id = insert_count_based(&conn, Some("月,水"));
        generate_expense_items(&conn, contract_id).unwrap();

        conn.execute("UPDATE productions SET broadcast_days = NULL", []).unwrap();

        assert!(regenerate_expense_items(&conn, contract_id).is_err());
        assert_eq!(db::get_expense_items_by_contract(&conn, contract_id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_by_contract() {
        let conn = setup();
        let first = insert_monthly(&conn, 100000.0);
        let second = insert_monthly(&conn, 50000.0);
        generate_expense_items(&conn, first).unwrap();
        generate_expense_items(&conn, second).unwrap();

        assert_eq!(delete_expense_items_by_contract(&conn, first).unwrap(), 3);
        assert_eq!(db::count_expense_items(&conn).unwrap(), 3);
    }
}
