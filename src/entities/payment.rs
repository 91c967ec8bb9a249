// 🏦 Payment Record - a raw row from the billing ledger
//
// The billing ledger is maintained by accounting in its own SQLite file.
// We only read payments and flip their status to `reconciled`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Pending,
    Reconciled,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Reconciled => "reconciled",
        }
    }

    pub fn from_db(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("reconciled") | Some("照合済") => PaymentRecordStatus::Reconciled,
            _ => PaymentRecordStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub subject: Option<String>,
    pub payee: Option<String>,
    pub payee_code: Option<String>,
    pub amount: Option<f64>,

    /// `None` when missing or not in an accepted date format
    pub payment_date: Option<NaiveDate>,

    pub status: PaymentRecordStatus,
}

impl PaymentRecord {
    pub fn new(payee: &str, payee_code: Option<&str>, amount: f64, payment_date: NaiveDate) -> Self {
        PaymentRecord {
            id: 0,
            subject: None,
            payee: Some(payee.to_string()),
            payee_code: payee_code.map(str::to_string),
            amount: Some(amount),
            payment_date: Some(payment_date),
            status: PaymentRecordStatus::Pending,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.status == PaymentRecordStatus::Reconciled
    }
}
