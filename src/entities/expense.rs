// 💴 Expense Item Entity - one expected payment derived from a contract
//
// Lifecycle: generated as `planned` / `unpaid` → invoice received →
// matched against a billing-ledger payment → `paid`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Anything that is not an explicit "paid" label counts as unpaid
    pub fn from_db(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("paid") | Some("支払済") => PaymentStatus::Paid,
            _ => PaymentStatus::Unpaid,
        }
    }
}

/// Order status for freshly generated rows (発注予定)
pub const STATUS_PLANNED: &str = "planned";

// ============================================================================
// EXPENSE ITEM
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseItem {
    pub id: i64,
    pub contract_id: Option<i64>,
    pub production_id: Option<i64>,
    pub partner_id: Option<i64>,
    pub item_name: String,
    pub amount: f64,
    pub implementation_date: Option<NaiveDate>,
    pub expected_payment_date: Option<NaiveDate>,
    pub status: String,
    pub payment_status: PaymentStatus,

    // Filled in by reconciliation
    pub payment_matched_id: Option<i64>,
    pub actual_payment_date: Option<NaiveDate>,
    pub payment_amount: Option<f64>,
    pub payment_difference: Option<f64>,

    pub invoice_received_date: Option<NaiveDate>,
    pub archived: bool,
    pub notes: Option<String>,
}

impl ExpenseItem {
    pub fn is_matched(&self) -> bool {
        self.payment_matched_id.is_some()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// Row to insert; ids and payment fields are assigned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpenseItem {
    pub contract_id: Option<i64>,
    pub production_id: Option<i64>,
    pub partner_id: Option<i64>,
    pub item_name: String,
    pub amount: f64,
    pub implementation_date: NaiveDate,
    pub expected_payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_from_db() {
        assert_eq!(PaymentStatus::from_db(Some("paid")), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_db(Some("支払済")), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_db(Some("未払い")), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::from_db(None), PaymentStatus::Unpaid);
    }
}
