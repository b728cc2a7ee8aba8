//! Role assignment reconciliation engine.
//!
//! This crate keeps a contact's set of authorization roles-per-location
//! consistent between a local durable ledger and an external authority
//! system. The authority has no multi-record transaction support, can
//! rate-limit or reject individual operations, and must never hold two
//! conflicting roles for the same location — so all mutation flows through
//! a single phased reconciliation pass:
//!
//! 1. Load the existing assignment set from the [`ledger`] and resolve the
//!    referenced roles from the [`catalog`].
//! 2. Diff desired against existing, keyed by `(company, location-or-admin)`.
//! 3. Execute revokes/deletes, join, then execute grants/creates/updates,
//!    driving the [`authority`] client with retry, backoff, and an injected
//!    rate limiter.
//! 4. Write results back to the ledger and return a structured summary.
//!
//! The [`engine`] module is the orchestrator; `catalog`, `ledger`, and
//! `authority` are its collaborators and are injected as trait objects so
//! every piece can be exercised in isolation.

pub mod authority;
pub mod catalog;
pub mod engine;
pub mod ledger;

pub use authority::{AuthorityError, AuthoritySyncClient, RetryPolicy};
pub use catalog::{CatalogError, Role, RoleCatalog};
pub use engine::{
    AssignmentAction, DesiredAssignment, EngineConfig, ReconcileError, ReconcilePlan,
    ReconcileSummary, ReconciliationEngine, SkipReason,
};
pub use ledger::{AssignmentKey, AssignmentLedger, LedgerError, LedgerRecord, NewLedgerRecord};
