// Entity Models - typed records for both stores
//
// Every row read from SQLite becomes one of these structs, so missing
// columns show up as `None` instead of being papered over with defaults.

pub mod contract;
pub mod expense;
pub mod partner;
pub mod payment;
pub mod production;

pub use contract::{Contract, PaymentMode, PaymentTiming};
pub use expense::{ExpenseItem, NewExpenseItem, PaymentStatus, STATUS_PLANNED};
pub use partner::Partner;
pub use payment::{PaymentRecord, PaymentRecordStatus};
pub use production::Production;
