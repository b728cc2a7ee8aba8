//! `ledger` inspection subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use rolesync_core::AssignmentLedger;
use rolesync_core::ledger::SqliteAssignmentLedger;

/// Prints every ledger record for a contact within a company as JSON.
pub fn list(ledger_path: &Path, contact_id: &str, company_id: &str) -> Result<()> {
    let ledger = SqliteAssignmentLedger::open(ledger_path)
        .with_context(|| format!("opening ledger database {}", ledger_path.display()))?;

    let records = ledger
        .find_all(contact_id, company_id)
        .context("reading ledger records")?;

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
