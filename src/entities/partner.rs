// 🤝 Partner Entity - payees (cast, staff, vendors)
//
// The payment ledger knows partners only by payee name and payee code,
// so both are the identity keys used during reconciliation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: i64,
    pub name: String,

    /// Accounting payee code, shared with the billing ledger
    pub code: Option<String>,

    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub partner_type: Option<String>,
}

impl Partner {
    pub fn new(name: &str, code: Option<&str>) -> Self {
        Partner {
            id: 0,
            name: name.to_string(),
            code: code.map(str::to_string),
            contact_person: None,
            email: None,
            partner_type: None,
        }
    }
}
