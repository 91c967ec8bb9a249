// 🚨 Alerts - open expense items that need attention
//
//   invoice_waiting  → service done (implementation date + grace passed),
//                      no invoice received yet
//   overdue_payment  → expected payment date already passed, still unpaid

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::calendar;
use crate::config::AlertsSection;
use crate::db;
use crate::entities::ExpenseItem;
use crate::error::{BillingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    InvoiceWaiting,
    OverduePayment,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::InvoiceWaiting => "invoice_waiting",
            AlertKind::OverduePayment => "overdue_payment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub expense_id: i64,
    pub item_name: String,
    pub partner_name: Option<String>,
    pub amount: f64,

    /// Implementation date (invoice waiting) or expected payment date (overdue)
    pub due_date: NaiveDate,
    pub days_late: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertReport {
    pub invoice_waiting: Vec<Alert>,
    pub overdue_payments: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub invoice_waiting: usize,
    pub overdue_payments: usize,
    pub total: usize,
}

impl AlertReport {
    pub fn counts(&self) -> AlertCounts {
        AlertCounts {
            invoice_waiting: self.invoice_waiting.len(),
            overdue_payments: self.overdue_payments.len(),
            total: self.invoice_waiting.len() + self.overdue_payments.len(),
        }
    }
}

// ============================================================================
// ALERT MANAGER
// ============================================================================

pub struct AlertManager {
    /// Days after the implementation date before a missing invoice is flagged
    pub invoice_grace_days: i64,
}

impl AlertManager {
    pub fn new() -> Self {
        AlertManager { invoice_grace_days: 1 }
    }

    pub fn from_config(section: &AlertsSection) -> Self {
        AlertManager {
            invoice_grace_days: section.invoice_grace_days,
        }
    }

    pub fn invoice_waiting(&self, conn: &Connection, today: NaiveDate) -> Result<Vec<Alert>> {
        let cutoff = self
            .invoice_grace_days
            .checked_neg()
            .and_then(|back| calendar::offset_days(today, back))
            .ok_or_else(|| {
                BillingError::Config(format!(
                    "invoice grace of {} days is out of range",
                    self.invoice_grace_days
                ))
            })?;

        collect_alerts(conn, AlertKind::InvoiceWaiting, today, |item| {
            if item.invoice_received_date.is_some() {
                return None;
            }
            item.implementation_date.filter(|d| *d <= cutoff)
        })
    }

    pub fn overdue_payments(&self, conn: &Connection, today: NaiveDate) -> Result<Vec<Alert>> {
        collect_alerts(conn, AlertKind::OverduePayment, today, |item| {
            item.expected_payment_date.filter(|d| *d < today)
        })
    }

    pub fn all_alerts(&self, conn: &Connection, today: NaiveDate) -> Result<AlertReport> {
        Ok(AlertReport {
            invoice_waiting: self.invoice_waiting(conn, today)?,
            overdue_payments: self.overdue_payments(conn, today)?,
        })
    }

    pub fn alert_counts(&self, conn: &Connection, today: NaiveDate) -> Result<AlertCounts> {
        Ok(self.all_alerts(conn, today)?.counts())
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Open items for which `due` yields a date, oldest first
fn collect_alerts<F>(conn: &Connection, kind: AlertKind, today: NaiveDate, due: F) -> Result<Vec<Alert>>
where
    F: Fn(&ExpenseItem) -> Option<NaiveDate>,
{
    let mut partner_names: HashMap<i64, Option<String>> = HashMap::new();
    let mut alerts = Vec::new();

    for item in db::get_open_expense_items(conn)? {
        let Some(due_date) = due(&item) else {
            continue;
        };

        let partner_name = match item.partner_id {
            Some(id) => match partner_names.get(&id) {
                Some(name) => name.clone(),
                None => {
                    let name = db::get_partner(conn, id)?.map(|p| p.name);
                    partner_names.insert(id, name.clone());
                    name
                }
            },
            None => None,
        };

        alerts.push(Alert {
            kind,
            expense_id: item.id,
            item_name: item.item_name,
            partner_name,
            amount: item.amount,
            due_date,
            days_late: (today - due_date).num_days(),
        });
    }

    alerts.sort_by_key(|a| (a.due_date, a.expense_id));
    debug!(kind = kind.as_str(), count = alerts.len(), "alerts collected");
    Ok(alerts)
}
