// 🔁 Contract Renewal - extend contract terms, automatically or by hand
//
// Extension moves contract_end_date forward by the contract's renewal period
// (or the configured default) and leaves a history row + event behind.
// Renewal never generates expense items; run generation afterwards.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar;
use crate::config::RenewalSection;
use crate::db::{self, Event};
use crate::entities::Contract;
use crate::error::{BillingError, Result};

pub const REASON_AUTO: &str = "auto";
pub const REASON_MANUAL: &str = "manual";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalRecord {
    pub id: i64,
    pub contract_id: i64,
    pub previous_end_date: Option<NaiveDate>,
    pub new_end_date: NaiveDate,
    pub renewal_date: NaiveDate,
    pub renewal_reason: Option<String>,
    pub executed_by: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewalSummary {
    pub checked: usize,
    pub extended: usize,
    pub failed: usize,
    pub renewals: Vec<RenewalRecord>,
}

// ============================================================================
// RENEWAL MANAGER
// ============================================================================

pub struct RenewalManager {
    /// Look-ahead window for expiring contracts (default: 30 days)
    pub notice_days: i64,

    /// Used when a contract has no renewal period (default: 3 months)
    pub default_period_months: u32,
}

impl RenewalManager {
    pub fn new() -> Self {
        RenewalManager {
            notice_days: 30,
            default_period_months: 3,
        }
    }

    pub fn from_config(section: &RenewalSection) -> Self {
        RenewalManager {
            notice_days: section.notice_days,
            default_period_months: section.default_period_months,
        }
    }

    fn period_for(&self, contract: &Contract) -> u32 {
        contract
            .renewal_period_months
            .unwrap_or(self.default_period_months)
    }

    /// Extend one contract by its renewal period.
    pub fn extend_contract(
        &self,
        conn: &Connection,
        contract_id: i64,
        reason: &str,
        executed_by: &str,
        notes: Option<&str>,
        today: NaiveDate,
    ) -> Result<RenewalRecord> {
        let contract = db::get_contract(conn, contract_id)?.ok_or(BillingError::ContractNotFound(contract_id))?;
        let previous_end = contract.end_date.ok_or(BillingError::ContractEndMissing(contract_id))?;

        let period = self.period_for(&contract);
        let new_end = calendar::add_months(previous_end, period)
            .ok_or(BillingError::ContractEndMissing(contract_id))?;

        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE contracts
             SET contract_end_date = ?1,
                 last_renewal_date = ?2,
                 renewal_count = COALESCE(renewal_count, 0) + 1
             WHERE id = ?3",
            params![
                calendar::format_date(new_end),
                calendar::format_date(today),
                contract_id
            ],
        )?;

        tx.execute(
            "INSERT INTO contract_renewal_history (
                contract_id, previous_end_date, new_end_date, renewal_date,
                renewal_reason, executed_by, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contract_id,
                calendar::format_date(previous_end),
                calendar::format_date(new_end),
                calendar::format_date(today),
                reason,
                executed_by,
                notes,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let event = Event::new(
            "contract_extended",
            "contract",
            &contract_id.to_string(),
            serde_json::json!({
                "previous_end_date": calendar::format_date(previous_end),
                "new_end_date": calendar::format_date(new_end),
                "period_months": period,
                "reason": reason,
            }),
            executed_by,
        );
        db::insert_event(&tx, &event)?;

        tx.commit()?;

        info!(contract_id, %previous_end, %new_end, reason, "contract extended");

        Ok(RenewalRecord {
            id,
            contract_id,
            previous_end_date: Some(previous_end),
            new_end_date: new_end,
            renewal_date: today,
            renewal_reason: Some(reason.to_string()),
            executed_by: Some(executed_by.to_string()),
            notes: notes.map(str::to_string),
        })
    }

    /// Extend every auto-renewing, non-terminated contract expiring soon
    pub fn run_auto_renewal(&self, conn: &Connection, today: NaiveDate, executed_by: &str) -> Result<RenewalSummary> {
        let due: Vec<Contract> = contracts_expiring_within(conn, today, self.notice_days)?
            .into_iter()
            .filter(|c| c.auto_renewal_enabled && !c.is_terminated())
            .collect();

        let mut summary = RenewalSummary {
            checked: due.len(),
            ..Default::default()
        };

        for contract in due {
            match self.extend_contract(conn, contract.id, REASON_AUTO, executed_by, None, today) {
                Ok(record) => {
                    summary.extended += 1;
                    summary.renewals.push(record);
                }
                Err(e) if e.is_domain_error() => {
                    warn!(contract_id = contract.id, error = %e, "auto renewal failed");
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            checked = summary.checked,
            extended = summary.extended,
            failed = summary.failed,
            "auto renewal finished"
        );
        Ok(summary)
    }
}

impl Default for RenewalManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Contracts whose end date falls in [today, today + days]
pub fn contracts_expiring_within(conn: &Connection, today: NaiveDate, days: i64) -> Result<Vec<Contract>> {
    let horizon = calendar::offset_days(today, days)
        .ok_or_else(|| BillingError::Config(format!("expiry window of {} days is out of range", days)))?;

    let contracts = db::get_all_contracts(conn)?
        .into_iter()
        .filter(|c| matches!(c.end_date, Some(end) if end >= today && end <= horizon))
        .collect();

    Ok(contracts)
}

/// Newest renewal first
pub fn renewal_history(conn: &Connection, contract_id: i64) -> Result<Vec<RenewalRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, contract_id, previous_end_date, new_end_date, renewal_date,
                renewal_reason, executed_by, notes
         FROM contract_renewal_history
         WHERE contract_id = ?1
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map([contract_id], |row| {
            let previous: Option<String> = row.get(2)?;
            let new_end: String = row.get(3)?;
            let renewal: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                previous,
                new_end,
                renewal,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // Rows with unreadable dates are skipped rather than failing the listing
    let records = rows
        .into_iter()
        .filter_map(|(id, contract_id, previous, new_end, renewal, reason, by, notes)| {
            Some(RenewalRecord {
                id,
                contract_id,
                previous_end_date: previous.as_deref().and_then(calendar::parse_date),
                new_end_date: calendar::parse_date(&new_end)?,
                renewal_date: calendar::parse_date(&renewal)?,
                renewal_reason: reason,
                executed_by: by,
                notes,
            })
        })
        .collect();

    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PaymentMode;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_primary_store(&conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, end: Option<NaiveDate>, auto: bool, period: Option<u32>) -> i64 {
        let mut contract = Contract::new("出演料", PaymentMode::MonthlyFixed);
        contract.start_date = Some(date(2025, 10, 1));
        contract.end_date = end;
        contract.unit_price = Some(100000.0);
        contract.auto_renewal_enabled = auto;
        contract.renewal_period_months = period;
        db::insert_contract(conn, &contract).unwrap()
    }

    #[test]
    fn test_extend_contract_records_history() {
        let conn = setup();
        let id = insert(&conn, Some(date(2025, 12, 31)), false, Some(6));
        let manager = RenewalManager::new();

        let record = manager
            .extend_contract(&conn, id, REASON_MANUAL, "tanaka", Some("延長合意"), date(2025, 12, 1))
            .unwrap();

        assert_eq!(record.previous_end_date, Some(date(2025, 12, 31)));
        assert_eq!(record.new_end_date, date(2026, 6, 30));

        let contract = db::get_contract(&conn, id).unwrap().unwrap();
        assert_eq!(contract.end_date, Some(date(2026, 6, 30)));
        assert_eq!(contract.renewal_count, 1);
        assert_eq!(contract.last_renewal_date, Some(date(2025, 12, 1)));

        let history = renewal_history(&conn, id).unwrap();
        assert_eq!(history, vec![record]);

        let events = db::get_events_for_entity(&conn, "contract", &id.to_string()).unwrap();
        assert_eq!(events[0].event_type, "contract_extended");
    }

    #[test]
    fn test_extend_uses_default_period() {
        let conn = setup();
        let id = insert(&conn, Some(date(2025, 11, 30)), false, None);
        let manager = RenewalManager {
            notice_days: 30,
            default_period_months: 3,
        };

        let record = manager
            .extend_contract(&conn, id, REASON_MANUAL, "tanaka", None, date(2025, 11, 1))
            .unwrap();
        assert_eq!(record.new_end_date, date(2026, 2, 28));
    }

    #[test]
    fn test_extend_errors() {
        let conn = setup();
        let manager = RenewalManager::new();

        let err = manager
            .extend_contract(&conn, 42, REASON_MANUAL, "tanaka", None, date(2025, 11, 1))
            .unwrap_err();
        assert!(matches!(err, BillingError::ContractNotFound(42)));

        let id = insert(&conn, None, true, None);
        let err = manager
            .extend_contract(&conn, id, REASON_MANUAL, "tanaka", None, date(2025, 11, 1))
            .unwrap_err();
        assert!(matches!(err, BillingError::ContractEndMissing(_)));
        assert!(renewal_history(&conn, id).unwrap().is_empty());
    }

    #[test]
    fn test_expiring_window_is_inclusive() {
        let conn = setup();
        let today = date(2025, 12, 1);
        insert(&conn, Some(date(2025, 12, 1)), true, None);
        insert(&conn, Some(date(2025, 12, 31)), true, None);
        insert(&conn, Some(date(2026, 1, 1)), true, None);
        insert(&conn, Some(date(2025, 11, 30)), true, None);

        let expiring = contracts_expiring_within(&conn, today, 30).unwrap();
        assert_eq!(expiring.len(), 2);

        let err = contracts_expiring_within(&conn, today, 99_999_999_999_999).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_auto_renewal_skips_disabled_and_terminated() {
        let conn = setup();
        let today = date(2025, 12, 15);
        let renewing = insert(&conn, Some(date(2025, 12, 31)), true, None);
        insert(&conn, Some(date(2025, 12, 31)), false, None);
        let terminated = insert(&conn, Some(date(2025, 12, 31)), true, None);
        conn.execute(
            "UPDATE contracts SET termination_notice_date = '2025-11-30' WHERE id = ?1",
            [terminated],
        )
        .unwrap();

        let manager = RenewalManager::new();
        let summary = manager.run_auto_renewal(&conn, today, "system").unwrap();

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.extended, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.renewals[0].contract_id, renewing);
        assert_eq!(summary.renewals[0].renewal_reason.as_deref(), Some(REASON_AUTO));

        // Extended past the window: second run finds nothing
        let again = manager.run_auto_renewal(&conn, today, "system").unwrap();
        assert_eq!(again.checked, 0);

        println!("✅ Auto renewal: {:?}", summary);
    }
}
