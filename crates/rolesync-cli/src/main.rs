//! rolesync - role assignment reconciliation CLI
//!
//! Operator front end for the reconciliation engine: run a pass against a
//! SQLite ledger, preview the work a pass would do, or inspect the ledger.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;

use commands::reconcile::ReconcileOpts;

/// rolesync - role assignment reconciliation
#[derive(Parser, Debug)]
#[command(name = "rolesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the ledger database
    #[arg(long, default_value = "rolesync.db")]
    ledger: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a reconciliation pass for a contact within a company
    Reconcile {
        /// Contact identifier
        contact_id: String,

        /// Company identifier
        company_id: String,

        /// Company-scoped contact handle used for authority calls
        /// (defaults to the contact identifier)
        #[arg(long)]
        company_contact: Option<String>,

        /// JSON file with the desired assignments
        #[arg(long)]
        desired: PathBuf,

        /// JSON file with the role catalog
        #[arg(long)]
        catalog: PathBuf,

        /// TOML config with the authority endpoint and engine tuning
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use an in-memory mock authority instead of HTTP
        #[arg(long)]
        mock: bool,
    },

    /// Show the work a pass would do, without executing it
    Plan {
        /// Contact identifier
        contact_id: String,

        /// Company identifier
        company_id: String,

        /// JSON file with the desired assignments
        #[arg(long)]
        desired: PathBuf,

        /// JSON file with the role catalog
        #[arg(long)]
        catalog: PathBuf,

        /// TOML config with the authority endpoint and engine tuning
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Inspect the ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),
}

#[derive(Subcommand, Debug)]
enum LedgerCommands {
    /// List records for a contact within a company
    List {
        /// Contact identifier
        contact_id: String,

        /// Company identifier
        company_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Reconcile {
            contact_id,
            company_id,
            company_contact,
            desired,
            catalog,
            config,
            mock,
        } => {
            commands::reconcile::run(ReconcileOpts {
                ledger_path: cli.ledger,
                catalog_path: catalog,
                desired_path: desired,
                contact_id,
                company_id,
                company_contact_id: company_contact,
                config_path: config,
                mock,
            })
            .await
        },
        Commands::Plan {
            contact_id,
            company_id,
            desired,
            catalog,
            config,
        } => {
            // Planning never calls the authority; the mock stands in so no
            // endpoint configuration is required for a dry run.
            commands::reconcile::plan(ReconcileOpts {
                ledger_path: cli.ledger,
                catalog_path: catalog,
                desired_path: desired,
                contact_id,
                company_id,
                company_contact_id: None,
                config_path: config,
                mock: true,
            })
            .await
        },
        Commands::Ledger(LedgerCommands::List {
            contact_id,
            company_id,
        }) => commands::ledger::list(&cli.ledger, &contact_id, &company_id),
    }
}
