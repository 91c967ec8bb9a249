// ⚠️ Error types for the billing core
//
// Domain errors are the ones a caller must see (bad contract configuration,
// unknown ids). Anything "nothing to do" is NOT an error: generation and
// reconciliation skip those rows silently and report counts instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Count-based contract whose production has no broadcast days configured
    #[error("contract {contract_id}: count-based payment requires broadcast days on the production")]
    MissingBroadcastDays { contract_id: i64 },

    #[error("contract {0} not found")]
    ContractNotFound(i64),

    /// Renewal needs a current end date to extend from
    #[error("contract {0} has no end date")]
    ContractEndMissing(i64),

    #[error("expense item {0} not found")]
    ExpenseNotFound(i64),

    #[error("payment {0} not found")]
    PaymentNotFound(i64),

    #[error("expense item {expense_id} is already matched to a payment")]
    AlreadyMatched { expense_id: i64 },
}

impl BillingError {
    /// True for errors caused by contract data rather than the store itself
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            BillingError::MissingBroadcastDays { .. }
                | BillingError::ContractNotFound(_)
                | BillingError::ContractEndMissing(_)
                | BillingError::ExpenseNotFound(_)
                | BillingError::PaymentNotFound(_)
                | BillingError::AlreadyMatched { .. }
        )
    }
}
