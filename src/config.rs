// ⚙️ Configuration - TOML file with per-section defaults
//
// A missing file is not an error (defaults apply); a malformed one is.
// Every field has a default, so partial files only override what they name.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BillingError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "billing-manager.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSection,
    pub reconciliation: ReconciliationSection,
    pub renewal: RenewalSection,
    pub alerts: AlertsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Operational store (contracts, expense items)
    pub primary_path: PathBuf,

    /// Accounting's payment ledger
    pub billing_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSection {
    /// Relative amount tolerance, 0.05 = 5%
    pub amount_tolerance: f64,
    pub date_window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalSection {
    /// Look-ahead for contracts about to expire
    pub notice_days: i64,

    /// Used when a contract has no renewal period of its own
    pub default_period_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    pub invoice_grace_days: i64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            primary_path: PathBuf::from("order_management.db"),
            billing_path: PathBuf::from("billing.db"),
        }
    }
}

impl Default for ReconciliationSection {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.05,
            date_window_days: 7,
        }
    }
}

impl Default for RenewalSection {
    fn default() -> Self {
        Self {
            notice_days: 30,
            default_period_months: 3,
        }
    }
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self { invoice_grace_days: 1 }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)?;
    parse_config(&raw).map_err(|e| BillingError::Config(format!("{}: {}", path.display(), e)))
}

pub fn parse_config(raw: &str) -> std::result::Result<Config, toml::de::Error> {
    toml::from_str(raw)
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let s = toml::to_string_pretty(config)
        .map_err(|e| BillingError::Config(format!("serialize config: {}", e)))?;
    fs::write(path, s)?;
    Ok(())
}
