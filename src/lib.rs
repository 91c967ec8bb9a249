// Billing Manager - Core Library
// Expense schedules from contracts + payment reconciliation against the
// billing ledger. Exposes all modules for the CLI, API server, and tests.

pub mod alerts;
pub mod calendar;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod generation;
pub mod reconciliation;
pub mod renewal;
pub mod schedule;

use std::sync::Once;

// Re-export commonly used types
pub use alerts::{Alert, AlertCounts, AlertKind, AlertManager, AlertReport};
pub use config::{load_config, save_config, Config, DEFAULT_CONFIG_FILE};
pub use db::{
    get_events_for_entity, insert_event, open_billing_store, open_primary_store,
    setup_billing_store, setup_primary_store, Event,
};
pub use entities::{
    Contract, ExpenseItem, NewExpenseItem, Partner, PaymentMode, PaymentRecord,
    PaymentRecordStatus, PaymentStatus, PaymentTiming, Production,
};
pub use error::{BillingError, Result};
pub use generation::{
    delete_expense_items_by_contract, generate_all, generate_expense_items,
    regenerate_expense_items, GenerationFailure, GenerationSummary, RegenerateOutcome,
};
pub use reconciliation::{
    manual_match, preview, reconcile, MatchCandidate, MatchPair, ReconciliationEngine,
    ReconciliationReport,
};
pub use renewal::{
    contracts_expiring_within, renewal_history, RenewalManager, RenewalRecord, RenewalSummary,
};
pub use schedule::{plan_expenses, DedupKey, PlannedExpense};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static TRACING_INIT: Once = Once::new();

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `billing_manager=info` filter. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("billing_manager=info"));

        fmt().with_env_filter(filter).init();
    });
}
