//! CLI subcommand implementations.

pub mod ledger;
pub mod reconcile;
