use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;

use billing_manager::{
    calendar, db, delete_expense_items_by_contract, generate_all, generate_expense_items,
    init_tracing, load_config, manual_match, preview, reconcile, regenerate_expense_items,
    AlertManager, Config, ReconciliationEngine, ReconciliationReport, RenewalManager,
    DEFAULT_CONFIG_FILE,
};

#[derive(Parser, Debug)]
#[command(
    name = "billing-manager",
    version,
    about = "Expense schedules from contracts + payment reconciliation"
)]
struct Cli {
    /// Config file (default: ./billing-manager.toml, defaults if absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override [database].primary_path
    #[arg(long, global = true)]
    primary_db: Option<PathBuf>,

    /// Override [database].billing_path
    #[arg(long, global = true)]
    billing_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create both stores (tables are created if missing)
    Init,

    /// Generate missing expense items for one contract or all of them
    Generate {
        #[arg(long, conflicts_with = "all")]
        contract: Option<i64>,

        #[arg(long)]
        all: bool,
    },

    /// Delete then regenerate a contract's expense items
    Regenerate {
        #[arg(long)]
        contract: i64,
    },

    /// Delete every expense item of a contract
    DeleteExpenses {
        #[arg(long)]
        contract: i64,
    },

    /// Match pending payments against open expense items
    Reconcile {
        /// Show what would match without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Match one expense item to one payment by hand
    Match {
        #[arg(long)]
        expense: i64,

        #[arg(long)]
        payment: i64,
    },

    /// Extend one contract by its renewal period
    Renew {
        #[arg(long)]
        contract: i64,

        #[arg(long, default_value = "manual")]
        reason: String,

        #[arg(long, default_value = "operator")]
        executed_by: String,

        #[arg(long)]
        notes: Option<String>,

        /// Renewal date, YYYY-MM-DD (default: today)
        #[arg(long)]
        today: Option<String>,
    },

    /// Extend all auto-renewing contracts that expire soon
    AutoRenew {
        #[arg(long)]
        today: Option<String>,
    },

    /// List contracts expiring within N days
    Expiring {
        /// Default: [renewal].notice_days
        #[arg(long)]
        days: Option<i64>,

        #[arg(long)]
        today: Option<String>,
    },

    /// Show invoice-waiting and overdue-payment alerts
    Alerts {
        #[arg(long)]
        today: Option<String>,
    },

    /// List a contract's expense items
    Expenses {
        #[arg(long)]
        contract: i64,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Init => {
            db::open_primary_store(&config.database.primary_path)?;
            db::open_billing_store(&config.database.billing_path)?;
            println!("✓ Primary store: {}", config.database.primary_path.display());
            println!("✓ Billing store: {}", config.database.billing_path.display());
        }

        Command::Generate { contract, all } => {
            let conn = open_primary(&config)?;
            match (contract, all) {
                (Some(id), false) => {
                    let inserted = generate_expense_items(&conn, id)
                        .with_context(|| format!("generating expense items for contract {}", id))?;
                    println!("✓ Contract {}: {} expense items inserted", id, inserted);
                }
                (None, true) => {
                    let summary = generate_all(&conn)?;
                    println!("✓ {}", summary.summary());
                    for failure in &summary.failures {
                        println!("  ✗ contract {}: {}", failure.contract_id, failure.error);
                    }
                }
                _ => bail!("pass either --contract <id> or --all"),
            }
        }

        Command::Regenerate { contract } => {
            let conn = open_primary(&config)?;
            let outcome = regenerate_expense_items(&conn, contract)
                .with_context(|| format!("regenerating contract {}", contract))?;
            println!(
                "✓ Contract {}: {} deleted, {} generated",
                contract, outcome.deleted, outcome.generated
            );
        }

        Command::DeleteExpenses { contract } => {
            let conn = open_primary(&config)?;
            let deleted = delete_expense_items_by_contract(&conn, contract)?;
            println!("✓ Contract {}: {} expense items deleted", contract, deleted);
        }

        Command::Reconcile { dry_run } => {
            let primary = open_primary(&config)?;
            let billing = open_billing(&config)?;
            let engine = ReconciliationEngine::from_config(&config.reconciliation);

            let report = if dry_run {
                preview(&primary, &billing, &engine)?
            } else {
                reconcile(&primary, &billing, &engine)?
            };
            print_reconciliation(&report);
        }

        Command::Match { expense, payment } => {
            let primary = open_primary(&config)?;
            let billing = open_billing(&config)?;
            let pair = manual_match(&primary, &billing, expense, payment)?;
            println!(
                "✓ Expense {} ↔ payment {} (difference: {})",
                pair.expense_id,
                pair.payment_id,
                pair.difference
                    .map(|d| format!("{:+.0}", d))
                    .unwrap_or_else(|| "-".to_string())
            );
        }

        Command::Renew {
            contract,
            reason,
            executed_by,
            notes,
            today,
        } => {
            let conn = open_primary(&config)?;
            let manager = RenewalManager::from_config(&config.renewal);
            let record = manager.extend_contract(
                &conn,
                contract,
                &reason,
                &executed_by,
                notes.as_deref(),
                parse_today(today.as_deref())?,
            )?;
            println!(
                "✓ Contract {} extended: {} → {}",
                contract,
                record
                    .previous_end_date
                    .map(calendar::format_date)
                    .unwrap_or_default(),
                calendar::format_date(record.new_end_date)
            );
        }

        Command::AutoRenew { today } => {
            let conn = open_primary(&config)?;
            let manager = RenewalManager::from_config(&config.renewal);
            let summary = manager.run_auto_renewal(&conn, parse_today(today.as_deref())?, "system")?;
            println!(
                "✓ Checked {}, extended {}, failed {}",
                summary.checked, summary.extended, summary.failed
            );
            for record in &summary.renewals {
                println!(
                    "  contract {} → {}",
                    record.contract_id,
                    calendar::format_date(record.new_end_date)
                );
            }
        }

        Command::Expiring { days, today } => {
            let conn = open_primary(&config)?;
            let days = days.unwrap_or(config.renewal.notice_days);
            let contracts = billing_manager::contracts_expiring_within(
                &conn,
                parse_today(today.as_deref())?,
                days,
            )?;

            println!("📅 {} contracts expiring within {} days", contracts.len(), days);
            for c in &contracts {
                println!(
                    "  #{} {} ends {}{}",
                    c.id,
                    c.item_name,
                    c.end_date.map(calendar::format_date).unwrap_or_default(),
                    if c.auto_renewal_enabled { " (auto)" } else { "" }
                );
            }
        }

        Command::Alerts { today } => {
            let conn = open_primary(&config)?;
            let manager = AlertManager::from_config(&config.alerts);
            let report = manager.all_alerts(&conn, parse_today(today.as_deref())?)?;
            let counts = report.counts();

            println!("🚨 {} alerts", counts.total);
            println!("\n📨 Invoice waiting: {}", counts.invoice_waiting);
            for a in &report.invoice_waiting {
                println!(
                    "  #{} {} ({}) since {}",
                    a.expense_id,
                    a.item_name,
                    a.partner_name.as_deref().unwrap_or("-"),
                    calendar::format_date(a.due_date)
                );
            }
            println!("\n💸 Overdue payments: {}", counts.overdue_payments);
            for a in &report.overdue_payments {
                println!(
                    "  #{} {} ¥{:.0} due {} ({} days late)",
                    a.expense_id,
                    a.item_name,
                    a.amount,
                    calendar::format_date(a.due_date),
                    a.days_late
                );
            }
        }

        Command::Expenses { contract } => {
            let conn = open_primary(&config)?;
            let items = db::get_expense_items_by_contract(&conn, contract)?;

            println!("📊 Contract {}: {} expense items", contract, items.len());
            for item in &items {
                println!(
                    "  #{} {} | ¥{:.0} | {} → {} | {}",
                    item.id,
                    item.item_name,
                    item.amount,
                    item.implementation_date.map(calendar::format_date).unwrap_or_default(),
                    item.expected_payment_date.map(calendar::format_date).unwrap_or_default(),
                    item.payment_status.as_str()
                );
            }
        }
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&path).with_context(|| format!("loading {}", path.display()))?;

    if let Some(p) = &cli.primary_db {
        config.database.primary_path = p.clone();
    }
    if let Some(p) = &cli.billing_db {
        config.database.billing_path = p.clone();
    }

    Ok(config)
}

fn open_primary(config: &Config) -> Result<Connection> {
    let path = &config.database.primary_path;
    db::open_primary_store(path).with_context(|| format!("opening primary store {}", path.display()))
}

fn open_billing(config: &Config) -> Result<Connection> {
    let path = &config.database.billing_path;
    db::open_billing_store(path).with_context(|| format!("opening billing store {}", path.display()))
}

fn parse_today(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(s) => calendar::parse_date(s).with_context(|| format!("invalid date: {}", s)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn print_reconciliation(report: &ReconciliationReport) {
    println!("⚖️  {}", report.summary());
    for pair in &report.pairs {
        println!(
            "  payment {} → expense {} ({})",
            pair.payment_id,
            pair.expense_id,
            pair.payment_date.map(calendar::format_date).unwrap_or_default()
        );
    }
}
