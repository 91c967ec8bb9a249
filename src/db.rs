// 🗄️ Storage - primary operational store + billing ledger store
//
// Two independent SQLite files:
//   primary: productions, partners, contracts, expense_items, renewal history, events
//   billing: payments (owned by accounting, we only flip statuses)
//
// Tables are created with CREATE TABLE IF NOT EXISTS when a store is opened,
// so callers can rely on the schema being present.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::calendar;
use crate::entities::{
    Contract, ExpenseItem, NewExpenseItem, Partner, PaymentMode, PaymentRecord,
    PaymentRecordStatus, PaymentStatus, PaymentTiming, Production, STATUS_PLANNED,
};
use crate::error::Result;

// ============================================================================
// OPEN + SCHEMA
// ============================================================================

/// Open (or create) the primary store and make sure its tables exist
pub fn open_primary_store(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_primary_store(&conn)?;
    debug!(path = %path.display(), "primary store ready");
    Ok(conn)
}

/// Open (or create) the billing ledger and make sure `payments` exists
pub fn open_billing_store(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_billing_store(&conn)?;
    debug!(path = %path.display(), "billing store ready");
    Ok(conn)
}

pub fn setup_primary_store(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS productions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            production_type TEXT,
            start_date TEXT,
            end_date TEXT,
            broadcast_days TEXT,
            status TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS partners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT,
            contact_person TEXT,
            email TEXT,
            partner_type TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contracts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            production_id INTEGER,
            partner_id INTEGER,
            item_name TEXT NOT NULL,
            contract_start_date TEXT,
            contract_end_date TEXT,
            implementation_date TEXT,
            payment_type TEXT DEFAULT 'monthly_fixed',
            unit_price REAL,
            spot_amount REAL,
            payment_timing TEXT DEFAULT 'end_of_next_month',
            auto_renewal_enabled INTEGER DEFAULT 1,
            renewal_period_months INTEGER DEFAULT 3,
            termination_notice_date TEXT,
            last_renewal_date TEXT,
            renewal_count INTEGER DEFAULT 0,
            notes TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expense_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contract_id INTEGER,
            production_id INTEGER,
            partner_id INTEGER,
            item_name TEXT NOT NULL,
            amount REAL NOT NULL,
            implementation_date TEXT,
            expected_payment_date TEXT,
            status TEXT DEFAULT 'planned',
            payment_status TEXT DEFAULT 'unpaid',
            payment_matched_id INTEGER,
            actual_payment_date TEXT,
            payment_amount REAL,
            payment_difference REAL,
            invoice_received_date TEXT,
            archived INTEGER DEFAULT 0,
            notes TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contract_renewal_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contract_id INTEGER NOT NULL,
            previous_end_date TEXT,
            new_end_date TEXT NOT NULL,
            renewal_date TEXT NOT NULL,
            renewal_reason TEXT,
            executed_by TEXT,
            notes TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expense_contract_date
         ON expense_items(contract_id, implementation_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expense_matched ON expense_items(payment_matched_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contracts_dates
         ON contracts(contract_start_date, contract_end_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// The ledger file belongs to accounting: its journal mode is left alone
pub fn setup_billing_store(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT,
            payee TEXT,
            payee_code TEXT,
            amount REAL,
            payment_date TEXT,
            status TEXT DEFAULT 'pending'
        )",
        [],
    )?;

    Ok(())
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

/// Read a TEXT date column; unparsable values become `None`
fn date_column(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(calendar::parse_date))
}

fn date_param(date: Option<NaiveDate>) -> Option<String> {
    date.map(calendar::format_date)
}

// ============================================================================
// PRODUCTIONS + PARTNERS
// ============================================================================

pub fn insert_production(conn: &Connection, production: &Production) -> Result<i64> {
    conn.execute(
        "INSERT INTO productions (name, production_type, start_date, end_date, broadcast_days, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            production.name,
            production.production_type,
            date_param(production.start_date),
            date_param(production.end_date),
            production.broadcast_days,
            production.status,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_production(conn: &Connection, id: i64) -> Result<Option<Production>> {
    let production = conn
        .query_row(
            "SELECT id, name, production_type, start_date, end_date, broadcast_days, status
             FROM productions WHERE id = ?1",
            [id],
            |row| {
                Ok(Production {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    production_type: row.get(2)?,
                    start_date: date_column(row, 3)?,
                    end_date: date_column(row, 4)?,
                    broadcast_days: row.get(5)?,
                    status: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(production)
}

pub fn insert_partner(conn: &Connection, partner: &Partner) -> Result<i64> {
    conn.execute(
        "INSERT INTO partners (name, code, contact_person, email, partner_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            partner.name,
            partner.code,
            partner.contact_person,
            partner.email,
            partner.partner_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_partner(conn: &Connection, id: i64) -> Result<Option<Partner>> {
    let partner = conn
        .query_row(
            "SELECT id, name, code, contact_person, email, partner_type
             FROM partners WHERE id = ?1",
            [id],
            |row| {
                Ok(Partner {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    code: row.get(2)?,
                    contact_person: row.get(3)?,
                    email: row.get(4)?,
                    partner_type: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(partner)
}

// ============================================================================
// CONTRACTS
// ============================================================================

const CONTRACT_COLUMNS: &str = "id, production_id, partner_id, item_name,
    contract_start_date, contract_end_date, implementation_date,
    payment_type, unit_price, spot_amount, payment_timing,
    auto_renewal_enabled, renewal_period_months, termination_notice_date,
    last_renewal_date, renewal_count, notes";

fn contract_from_row(row: &Row) -> rusqlite::Result<Contract> {
    let payment_type: Option<String> = row.get(7)?;
    let payment_timing: Option<String> = row.get(10)?;
    let auto_renewal: Option<i64> = row.get(11)?;
    let renewal_period: Option<i64> = row.get(12)?;
    let renewal_count: Option<i64> = row.get(15)?;

    Ok(Contract {
        id: row.get(0)?,
        production_id: row.get(1)?,
        partner_id: row.get(2)?,
        item_name: row.get(3)?,
        start_date: date_column(row, 4)?,
        end_date: date_column(row, 5)?,
        implementation_date: date_column(row, 6)?,
        payment_mode: PaymentMode::from_db(payment_type.as_deref()),
        unit_price: row.get(8)?,
        spot_amount: row.get(9)?,
        payment_timing: PaymentTiming::from_db(payment_timing.as_deref()),
        auto_renewal_enabled: auto_renewal.unwrap_or(0) != 0,
        renewal_period_months: renewal_period
            .filter(|m| *m > 0)
            .and_then(|m| u32::try_from(m).ok()),
        termination_notice_date: date_column(row, 13)?,
        last_renewal_date: date_column(row, 14)?,
        renewal_count: renewal_count.unwrap_or(0),
        notes: row.get(16)?,
    })
}

pub fn insert_contract(conn: &Connection, contract: &Contract) -> Result<i64> {
    conn.execute(
        "INSERT INTO contracts (
            production_id, partner_id, item_name,
            contract_start_date, contract_end_date, implementation_date,
            payment_type, unit_price, spot_amount, payment_timing,
            auto_renewal_enabled, renewal_period_months, termination_notice_date,
            last_renewal_date, renewal_count, notes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            contract.production_id,
            contract.partner_id,
            contract.item_name,
            date_param(contract.start_date),
            date_param(contract.end_date),
            date_param(contract.implementation_date),
            contract.payment_mode.as_str(),
            contract.unit_price,
            contract.spot_amount,
            contract.payment_timing.as_str(),
            contract.auto_renewal_enabled as i64,
            contract.renewal_period_months,
            date_param(contract.termination_notice_date),
            date_param(contract.last_renewal_date),
            contract.renewal_count,
            contract.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_contract(conn: &Connection, id: i64) -> Result<Option<Contract>> {
    let sql = format!("SELECT {} FROM contracts WHERE id = ?1", CONTRACT_COLUMNS);
    let contract = conn.query_row(&sql, [id], contract_from_row).optional()?;
    Ok(contract)
}

pub fn get_all_contracts(conn: &Connection) -> Result<Vec<Contract>> {
    let sql = format!("SELECT {} FROM contracts ORDER BY id", CONTRACT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let contracts = stmt
        .query_map([], contract_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(contracts)
}

// ============================================================================
// EXPENSE ITEMS
// ============================================================================

const EXPENSE_COLUMNS: &str = "id, contract_id, production_id, partner_id, item_name,
    amount, implementation_date, expected_payment_date, status, payment_status,
    payment_matched_id, actual_payment_date, payment_amount, payment_difference,
    invoice_received_date, archived, notes";

pub(crate) fn expense_from_row(row: &Row) -> rusqlite::Result<ExpenseItem> {
    let status: Option<String> = row.get(8)?;
    let payment_status: Option<String> = row.get(9)?;
    let archived: Option<i64> = row.get(15)?;

    Ok(ExpenseItem {
        id: row.get(0)?,
        contract_id: row.get(1)?,
        production_id: row.get(2)?,
        partner_id: row.get(3)?,
        item_name: row.get(4)?,
        amount: row.get(5)?,
        implementation_date: date_column(row, 6)?,
        expected_payment_date: date_column(row, 7)?,
        status: status.unwrap_or_else(|| STATUS_PLANNED.to_string()),
        payment_status: PaymentStatus::from_db(payment_status.as_deref()),
        payment_matched_id: row.get(10)?,
        actual_payment_date: date_column(row, 11)?,
        payment_amount: row.get(12)?,
        payment_difference: row.get(13)?,
        invoice_received_date: date_column(row, 14)?,
        archived: archived.unwrap_or(0) != 0,
        notes: row.get(16)?,
    })
}

/// Column list prefixed with a table alias, for joins
pub(crate) fn expense_columns_with_alias(alias: &str) -> String {
    EXPENSE_COLUMNS
        .split(',')
        .map(|col| format!("{}.{}", alias, col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn insert_expense_item(conn: &Connection, item: &NewExpenseItem) -> Result<i64> {
    conn.execute(
        "INSERT INTO expense_items (
            contract_id, production_id, partner_id, item_name, amount,
            implementation_date, expected_payment_date, status, payment_status, notes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            item.contract_id,
            item.production_id,
            item.partner_id,
            item.item_name,
            item.amount,
            calendar::format_date(item.implementation_date),
            date_param(item.expected_payment_date),
            STATUS_PLANNED,
            PaymentStatus::Unpaid.as_str(),
            item.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_expense_item(conn: &Connection, id: i64) -> Result<Option<ExpenseItem>> {
    let sql = format!("SELECT {} FROM expense_items WHERE id = ?1", EXPENSE_COLUMNS);
    let item = conn.query_row(&sql, [id], expense_from_row).optional()?;
    Ok(item)
}

pub fn get_expense_items_by_contract(conn: &Connection, contract_id: i64) -> Result<Vec<ExpenseItem>> {
    let sql = format!(
        "SELECT {} FROM expense_items WHERE contract_id = ?1
         ORDER BY implementation_date, id",
        EXPENSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([contract_id], expense_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Unpaid, unarchived expense items (used by alerts)
pub fn get_open_expense_items(conn: &Connection) -> Result<Vec<ExpenseItem>> {
    let sql = format!(
        "SELECT {} FROM expense_items
         WHERE (archived = 0 OR archived IS NULL)
         ORDER BY id",
        EXPENSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([], expense_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items.into_iter().filter(|item| !item.is_paid()).collect())
}

pub fn count_expense_items(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM expense_items", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// PAYMENTS (billing store)
// ============================================================================

fn payment_from_row(row: &Row) -> rusqlite::Result<PaymentRecord> {
    let status: Option<String> = row.get(6)?;
    Ok(PaymentRecord {
        id: row.get(0)?,
        subject: row.get(1)?,
        payee: row.get(2)?,
        payee_code: row.get(3)?,
        amount: row.get(4)?,
        payment_date: date_column(row, 5)?,
        status: PaymentRecordStatus::from_db(status.as_deref()),
    })
}

pub fn insert_payment(conn: &Connection, payment: &PaymentRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO payments (subject, payee, payee_code, amount, payment_date, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            payment.subject,
            payment.payee,
            payment.payee_code,
            payment.amount,
            date_param(payment.payment_date),
            payment.status.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_payment(conn: &Connection, id: i64) -> Result<Option<PaymentRecord>> {
    let payment = conn
        .query_row(
            "SELECT id, subject, payee, payee_code, amount, payment_date, status
             FROM payments WHERE id = ?1",
            [id],
            payment_from_row,
        )
        .optional()?;
    Ok(payment)
}

/// Payments not yet reconciled, in table order
pub fn get_pending_payments(conn: &Connection) -> Result<Vec<PaymentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject, payee, payee_code, amount, payment_date, status
         FROM payments ORDER BY id",
    )?;
    let payments = stmt
        .query_map([], payment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments.into_iter().filter(|p| !p.is_reconciled()).collect())
}

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

/// Event for audit trail: every generation, match and renewal leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}
