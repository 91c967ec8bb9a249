// 📝 Contract Entity - what drives expense generation
//
// A contract ties a partner to a production and says HOW expenses arise:
//   spot          → one payment on the implementation date
//   monthly_fixed → unit_price every month of the contract term
//   count_based   → unit_price × broadcasts in each month
//
// Japanese labels written by older tools (月額固定, 回数ベース, 翌月末払い...)
// are accepted on read; new rows are written with the English labels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYMENT MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// One-off payment
    Spot,

    /// Same amount every month
    MonthlyFixed,

    /// Broadcast count × unit price, per month
    CountBased,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Spot => "spot",
            PaymentMode::MonthlyFixed => "monthly_fixed",
            PaymentMode::CountBased => "count_based",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "spot" | "スポット" | "単発" => Some(PaymentMode::Spot),
            "monthly_fixed" | "月額固定" => Some(PaymentMode::MonthlyFixed),
            "count_based" | "回数ベース" => Some(PaymentMode::CountBased),
            _ => None,
        }
    }

    /// Column value → mode. NULL or unknown labels fall back to monthly-fixed.
    pub fn from_db(label: Option<&str>) -> Self {
        label.and_then(Self::parse).unwrap_or(PaymentMode::MonthlyFixed)
    }
}

// ============================================================================
// PAYMENT TIMING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTiming {
    /// Paid at the end of the service month (当月末払い)
    EndOfCurrentMonth,

    /// Paid at the end of the month after the service month (翌月末払い)
    EndOfNextMonth,
}

impl PaymentTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentTiming::EndOfCurrentMonth => "end_of_current_month",
            PaymentTiming::EndOfNextMonth => "end_of_next_month",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "end_of_current_month" | "当月末払い" | "当月末" => {
                Some(PaymentTiming::EndOfCurrentMonth)
            }
            "end_of_next_month" | "翌月末払い" | "翌月末" => Some(PaymentTiming::EndOfNextMonth),
            _ => None,
        }
    }

    pub fn from_db(label: Option<&str>) -> Self {
        label.and_then(Self::parse).unwrap_or_default()
    }

    /// How many months after the service month the payment falls due
    pub fn months_ahead(&self) -> u32 {
        match self {
            PaymentTiming::EndOfCurrentMonth => 0,
            PaymentTiming::EndOfNextMonth => 1,
        }
    }
}

impl Default for PaymentTiming {
    fn default() -> Self {
        PaymentTiming::EndOfNextMonth
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub production_id: Option<i64>,
    pub partner_id: Option<i64>,
    pub item_name: String,

    /// Contract term, month granularity (day of month is ignored)
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    /// Spot contracts only; falls back to the production start date
    pub implementation_date: Option<NaiveDate>,

    pub payment_mode: PaymentMode,
    pub unit_price: Option<f64>,
    pub spot_amount: Option<f64>,
    pub payment_timing: PaymentTiming,

    // Renewal settings
    pub auto_renewal_enabled: bool,
    pub renewal_period_months: Option<u32>,
    pub termination_notice_date: Option<NaiveDate>,
    pub last_renewal_date: Option<NaiveDate>,
    pub renewal_count: i64,

    pub notes: Option<String>,
}

impl Contract {
    /// Minimal contract for the given mode; everything optional left empty
    pub fn new(item_name: &str, payment_mode: PaymentMode) -> Self {
        Contract {
            id: 0,
            production_id: None,
            partner_id: None,
            item_name: item_name.to_string(),
            start_date: None,
            end_date: None,
            implementation_date: None,
            payment_mode,
            unit_price: None,
            spot_amount: None,
            payment_timing: PaymentTiming::default(),
            auto_renewal_enabled: false,
            renewal_period_months: None,
            termination_notice_date: None,
            last_renewal_date: None,
            renewal_count: 0,
            notes: None,
        }
    }

    /// Unit price, treating NULL / zero / negative as "no amount"
    pub fn positive_unit_price(&self) -> Option<f64> {
        self.unit_price.filter(|p| *p > 0.0)
    }

    pub fn positive_spot_amount(&self) -> Option<f64> {
        self.spot_amount.filter(|a| *a > 0.0)
    }

    pub fn is_terminated(&self) -> bool {
        self.termination_notice_date.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_mode_labels() {
        assert_eq!(PaymentMode::parse("月額固定"), Some(PaymentMode::MonthlyFixed));
        assert_eq!(PaymentMode::parse("回数ベース"), Some(PaymentMode::CountBased));
        assert_eq!(PaymentMode::parse("spot"), Some(PaymentMode::Spot));
        assert_eq!(PaymentMode::from_db(None), PaymentMode::MonthlyFixed);
        assert_eq!(PaymentMode::from_db(Some("weekly")), PaymentMode::MonthlyFixed);
    }

    #[test]
    fn test_payment_timing_defaults_to_next_month() {
        assert_eq!(PaymentTiming::from_db(None), PaymentTiming::EndOfNextMonth);
        assert_eq!(
            PaymentTiming::from_db(Some("当月末払い")),
            PaymentTiming::EndOfCurrentMonth
        );
        assert_eq!(PaymentTiming::EndOfCurrentMonth.months_ahead(), 0);
        assert_eq!(PaymentTiming::EndOfNextMonth.months_ahead(), 1);
    }

    #[test]
    fn test_zero_amounts_are_missing() {
        let mut contract = Contract::new("MC fee", PaymentMode::MonthlyFixed);
        contract.unit_price = Some(0.0);
        contract.spot_amount = Some(-5.0);
        assert_eq!(contract.positive_unit_price(), None);
        assert_eq!(contract.positive_spot_amount(), None);

        contract.unit_price = Some(100000.0);
        assert_eq!(contract.positive_unit_price(), Some(100000.0));
    }
}
