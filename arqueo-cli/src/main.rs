use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use arqueo::{
    FundService, FundServiceConfig, MovementDraft, MutationOutcome, StaticIdentity,
    StaticProviderDirectory, TracingDispatcher,
};
use arqueo_closing::ClosingInput;
use arqueo_core::{AccountId, Currency, CurrencyMap, MovementId, MovementKind, MovementPatch};
use arqueo_store::SqliteFundStore;

#[derive(Parser, Debug)]
#[command(name = "arqueo", version, about = "Cash-fund ledger and reconciliation")]
struct Cli {
    /// Configuration file (TOML); missing file falls back to defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tenant to operate on; overrides the configured company.
    #[arg(long, global = true)]
    company: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current balance of one account.
    Balance {
        #[arg(long)]
        account: AccountId,
        #[arg(long, default_value = "CRC")]
        currency: Currency,
    },
    /// List movements in a day or date-range window, newest first.
    Movements {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Record a new movement.
    Record {
        #[arg(long)]
        account: AccountId,
        #[arg(long, default_value = "CRC")]
        currency: Currency,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        invoice: String,
        #[arg(long)]
        kind: MovementKind,
        #[arg(long, default_value = "0")]
        credit: Decimal,
        #[arg(long, default_value = "0")]
        debit: Decimal,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Edit fields of an existing movement.
    Edit {
        id: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        invoice: Option<String>,
        #[arg(long)]
        credit: Option<i64>,
        #[arg(long)]
        debit: Option<i64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a movement; its delta is backed out of the balance.
    Delete { id: String },
    /// Show a movement's audit history.
    History { id: String },
    /// Commit a daily closing against a physical count.
    Close {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "0")]
        crc: Decimal,
        #[arg(long, default_value = "0")]
        usd: Decimal,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List committed closings, newest first.
    Closings,
    /// Override the initial balance of one account.
    SetInitial {
        #[arg(long)]
        account: AccountId,
        #[arg(long, default_value = "CRC")]
        currency: Currency,
        amount: Decimal,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = arqueo_config::Settings::load(cli.config.as_deref())?;
    let company = cli.company.unwrap_or_else(|| settings.company.clone());

    let timezone = FixedOffset::east_opt(settings.utc_offset_minutes * 60)
        .context("utc_offset_minutes is out of range")?;

    let store = Arc::new(SqliteFundStore::new(&settings.database_path)?);
    let service = FundService::new(FundServiceConfig {
        movements: store.clone(),
        funds: store.clone(),
        closings: store,
        identity: Arc::new(StaticIdentity(settings.operator.clone())),
        directory: Arc::new(StaticProviderDirectory::default()),
        notifier: Arc::new(TracingDispatcher),
        edit_cooldown: Duration::from_secs(settings.edit_cooldown_secs),
        timezone,
    });

    match cli.command {
        Command::Balance { account, currency } => {
            let balance = service.current_balance(&company, account, currency)?;
            println!("{account} {currency}: {balance}");
        }
        Command::Movements { from, to } => {
            for movement in service.list_movements(&company, from, to)? {
                println!(
                    "{}  {}  {:>12}  {}  {}",
                    movement.created_at.format("%Y-%m-%d %H:%M"),
                    movement.id,
                    movement.delta(),
                    movement.currency,
                    movement.notes
                );
            }
        }
        Command::Record {
            account,
            currency,
            provider,
            invoice,
            kind,
            credit,
            debit,
            notes,
        } => {
            let (movement, outcome) = service.record_movement(
                &company,
                MovementDraft {
                    account,
                    currency,
                    provider_code: provider,
                    invoice_number: invoice,
                    kind,
                    amount_credit: credit,
                    amount_debit: debit,
                    notes,
                    breakdown: None,
                },
            )?;
            report_outcome(outcome);
            println!("recorded {}", movement.id);
        }
        Command::Edit {
            id,
            provider,
            invoice,
            credit,
            debit,
            notes,
        } => {
            let patch = MovementPatch {
                provider_code: provider,
                invoice_number: invoice,
                amount_credit: credit,
                amount_debit: debit,
                notes,
                ..MovementPatch::default()
            };
            let (movement, outcome) =
                service.edit_movement(&company, &MovementId::from(id), patch)?;
            report_outcome(outcome);
            println!("edited {} (revision {})", movement.id, movement.audit_history.len());
        }
        Command::Delete { id } => {
            let outcome = service.delete_movement(&company, &MovementId::from(id))?;
            report_outcome(outcome);
        }
        Command::History { id } => {
            let (history, _) = service.movement_history(&company, &MovementId::from(id))?;
            for entry in history {
                println!("{}  {:?}", entry.at.format("%Y-%m-%d %H:%M:%S"), entry.after);
            }
        }
        Command::Close {
            date,
            crc,
            usd,
            notes,
        } => {
            let (closing, outcome) = service.commit_daily_closing(
                &company,
                ClosingInput {
                    closing_date: date,
                    manager: settings.operator.clone(),
                    counted: CurrencyMap { crc, usd },
                    notes,
                    breakdown: CurrencyMap {
                        crc: BTreeMap::new(),
                        usd: BTreeMap::new(),
                    },
                },
            )?;
            report_outcome(outcome);
            println!(
                "closing {}: diff CRC {} / USD {}",
                closing.id, closing.diff.crc, closing.diff.usd
            );
        }
        Command::Closings => {
            for closing in service.list_closings(&company)? {
                println!(
                    "{}  {}  diff CRC {} / USD {}",
                    closing.closing_date, closing.manager, closing.diff.crc, closing.diff.usd
                );
            }
        }
        Command::SetInitial {
            account,
            currency,
            amount,
        } => {
            let outcome = service.set_initial_balance(&company, account, currency, amount)?;
            report_outcome(outcome);
        }
    }
    Ok(())
}

fn report_outcome(outcome: MutationOutcome) {
    if outcome == MutationOutcome::PendingConfirmation {
        warn!("storage acknowledged the write late; state will converge");
    }
}
