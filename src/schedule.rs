// 🗓️ Expense Schedule Planner - contract in, planned expense rows out
//
// Pure function over typed records: no database access here. The generator
// (generation.rs) decides which planned rows are new and inserts them.
//
//   spot          → 1 row on the implementation date
//   monthly_fixed → 1 row per month, unit_price
//   count_based   → 1 row per month, broadcasts in month × unit_price

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar;
use crate::entities::{Contract, PaymentMode, Production};
use crate::error::{BillingError, Result};

// ============================================================================
// PLANNED EXPENSE
// ============================================================================

/// Which columns identify an already-generated row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupKey {
    /// (contract, implementation date, amount): fixed-rate modes
    DateAndAmount,

    /// (contract, implementation date): count-based, the amount varies by month
    DateOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedExpense {
    pub item_name: String,
    pub amount: f64,
    pub implementation_date: NaiveDate,
    pub expected_payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub dedup: DedupKey,
}

// ============================================================================
// PLANNER
// ============================================================================

/// Plan every expense row a contract implies.
///
/// An empty plan means "nothing to generate" (missing amounts or dates).
/// Count-based contracts without broadcast days are an error instead, so the
/// configuration problem surfaces even when the price is also missing.
pub fn plan_expenses(contract: &Contract, production: Option<&Production>) -> Result<Vec<PlannedExpense>> {
    match contract.payment_mode {
        PaymentMode::Spot => Ok(plan_spot(contract, production)),
        PaymentMode::MonthlyFixed => Ok(plan_monthly_fixed(contract)),
        PaymentMode::CountBased => plan_count_based(contract, production),
    }
}

fn plan_spot(contract: &Contract, production: Option<&Production>) -> Vec<PlannedExpense> {
    let Some(amount) = contract.positive_spot_amount() else {
        debug!(contract_id = contract.id, "spot contract without amount, nothing to plan");
        return Vec::new();
    };

    let implementation_date = contract
        .implementation_date
        .or_else(|| production.and_then(|p| p.start_date));

    let Some(implementation_date) = implementation_date else {
        debug!(contract_id = contract.id, "spot contract without implementation date");
        return Vec::new();
    };

    vec![PlannedExpense {
        item_name: contract.item_name.clone(),
        amount,
        implementation_date,
        expected_payment_date: calendar::month_end_after(
            implementation_date,
            contract.payment_timing.months_ahead(),
        ),
        notes: None,
        dedup: DedupKey::DateAndAmount,
    }]
}

fn plan_monthly_fixed(contract: &Contract) -> Vec<PlannedExpense> {
    let Some(unit_price) = contract.positive_unit_price() else {
        debug!(contract_id = contract.id, "monthly contract without unit price");
        return Vec::new();
    };

    contract_months(contract)
        .into_iter()
        .map(|month| PlannedExpense {
            item_name: monthly_item_name(&contract.item_name, month),
            amount: unit_price,
            implementation_date: month,
            expected_payment_date: calendar::month_end_after(
                month,
                contract.payment_timing.months_ahead(),
            ),
            notes: None,
            dedup: DedupKey::DateAndAmount,
        })
        .collect()
}

fn plan_count_based(contract: &Contract, production: Option<&Production>) -> Result<Vec<PlannedExpense>> {
    let weekdays = production
        .map(Production::broadcast_weekdays)
        .unwrap_or_default();
    if weekdays.is_empty() {
        return Err(BillingError::MissingBroadcastDays {
            contract_id: contract.id,
        });
    }

    let Some(unit_price) = contract.positive_unit_price() else {
        debug!(contract_id = contract.id, "count-based contract without unit price");
        return Ok(Vec::new());
    };

    let planned = contract_months(contract)
        .into_iter()
        .map(|month| {
            let count = calendar::count_broadcasts_in_month(month.year(), month.month(), &weekdays);
            let amount = unit_price * f64::from(count);

            PlannedExpense {
                item_name: monthly_item_name(&contract.item_name, month),
                amount,
                implementation_date: month,
                expected_payment_date: calendar::month_end_after(
                    month,
                    contract.payment_timing.months_ahead(),
                ),
                notes: Some(format!(
                    "実施回数: {}回 × ¥{} = ¥{}",
                    count,
                    format_yen(unit_price),
                    format_yen(amount)
                )),
                dedup: DedupKey::DateOnly,
            }
        })
        .collect();

    Ok(planned)
}

fn contract_months(contract: &Contract) -> Vec<NaiveDate> {
    match (contract.start_date, contract.end_date) {
        (Some(start), Some(end)) => calendar::months_between(start, end),
        _ => {
            debug!(contract_id = contract.id, "contract term incomplete");
            Vec::new()
        }
    }
}

/// "出演料 2025年10月分"
fn monthly_item_name(item_name: &str, month: NaiveDate) -> String {
    format!("{} {}年{}月分", item_name, month.year(), month.month())
}

/// Whole-yen amount with thousands separators: 40000.0 → "40,000"
pub fn format_yen(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if rounded < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

// ============================================================================
// TESTS
// ============================================================================
