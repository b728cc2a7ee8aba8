//! Reconciliation engine.
//!
//! One invocation is one pass: load the existing set, resolve roles, diff,
//! then execute in two phases — deletes first, creates/updates second —
//! chunked for bounded concurrency. The delete phase is fully joined before
//! the first create is dispatched, because the authority rejects a second
//! grant for a slot that still holds an active one.
//!
//! # Invariants
//!
//! - At most one record per `(contact, company, key)` survives a pass, on
//!   both sides of the authority boundary.
//! - For a slot transitioning role A → B, the revoke of A is issued and
//!   awaited before the grant of B.
//! - A second identical pass issues zero remote calls.
//! - Per-item remote and catalog failures are recorded and isolated; ledger
//!   infrastructure failures abort the pass after in-flight work joins.
//! - Passes for the same `(contact, company)` are serialized; cancellation
//!   suppresses new dispatch but never abandons in-flight remote calls.

mod diff;
mod summary;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::authority::{AuthoritySyncClient, RetryPolicy, with_retry};
use crate::catalog::{CatalogError, RoleCatalog};
use crate::ledger::{AssignmentKey, AssignmentLedger, LedgerError, LedgerRecord, NewLedgerRecord};

pub use diff::{
    DesiredAssignment, PlannedCreate, PlannedUpdate, ReconcilePlan, SkippedAssignment,
    compute_plan,
};
pub use summary::{AssignmentAction, ReconcileSummary, SkipReason};

/// Default number of operations dispatched concurrently per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Maximum `(contact, company)` pass locks tracked before idle entries are
/// pruned.
const MAX_TRACKED_PASS_LOCKS: usize = 1024;

/// Errors that abort a reconciliation pass.
///
/// Per-item remote and catalog failures never appear here; they are
/// recorded in the [`ReconcileSummary`] instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// Ledger infrastructure failure. The pass is inconsistent and must be
    /// retried wholesale by the caller.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    /// The batched role lookup itself was rejected (not an unresolved id).
    #[error("catalog failure: {0}")]
    Catalog(#[from] CatalogError),

    /// A spawned operation task failed to join.
    #[error("internal task failure: {0}")]
    Internal(String),
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Operations dispatched concurrently per chunk; chunks run
    /// sequentially.
    pub chunk_size: usize,
    /// Retry policy applied uniformly to every grant and revoke.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

type PassKey = (String, String);

/// Orchestrates reconciliation passes against the ledger, catalog, and
/// authority client.
pub struct ReconciliationEngine {
    ledger: Arc<dyn AssignmentLedger>,
    catalog: Arc<dyn RoleCatalog>,
    authority: Arc<dyn AuthoritySyncClient>,
    config: EngineConfig,
    // One async mutex per (contact, company); held for a whole pass so two
    // passes never compute diffs against each other's intermediate state.
    pass_locks: Mutex<HashMap<PassKey, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: Arc<AtomicBool>,
}

impl ReconciliationEngine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn AssignmentLedger>,
        catalog: Arc<dyn RoleCatalog>,
        authority: Arc<dyn AuthoritySyncClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            catalog,
            authority,
            config,
            pass_locks: Mutex::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle for requesting cancellation.
    ///
    /// Setting the flag stops new operations from being dispatched;
    /// operations already in flight run to completion and their results are
    /// recorded in the ledger, because a grant or revoke that completes
    /// remotely but goes unrecorded is permanent drift.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Computes the work sets for a pass without executing anything.
    ///
    /// Advisory: no pass lock is taken, so a concurrent `reconcile` can
    /// invalidate the returned plan.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Ledger`] or [`ReconcileError::Catalog`] on
    /// collaborator infrastructure failures.
    pub fn plan(
        &self,
        contact_id: &str,
        company_id: &str,
        desired: &[DesiredAssignment],
    ) -> Result<ReconcilePlan, ReconcileError> {
        let existing = self.ledger.find_all(contact_id, company_id)?;
        let roles = self.resolve_roles(&existing, desired)?;
        Ok(compute_plan(contact_id, company_id, &existing, desired, &roles))
    }

    /// Runs one reconciliation pass.
    ///
    /// `contact_id` keys the ledger; `company_contact_id` is the contact's
    /// membership handle within the company — the identifier the authority
    /// system knows the contact by, used for every grant and revoke.
    ///
    /// Completes with a [`ReconcileSummary`] even when individual
    /// assignments were skipped or failed; per-item outcomes are never a
    /// blocking error.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Ledger`] on any ledger infrastructure
    /// failure — the pass is then considered inconsistent and the caller
    /// should retry it wholesale.
    pub async fn reconcile(
        &self,
        contact_id: &str,
        company_id: &str,
        company_contact_id: &str,
        desired: Vec<DesiredAssignment>,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let pass_lock = self.pass_lock(contact_id, company_id);
        let _guard = pass_lock.lock().await;

        info!(
            contact_id,
            company_id,
            company_contact_id,
            desired = desired.len(),
            "reconciliation pass starting"
        );

        let existing = self.ledger.find_all(contact_id, company_id)?;
        let roles = self.resolve_roles(&existing, &desired)?;
        let plan = compute_plan(contact_id, company_id, &existing, &desired, &roles);

        let mut summary =
            ReconcileSummary::new(contact_id, company_id, company_contact_id, now_rfc3339());

        for item in &plan.skipped {
            warn!(
                contact_id,
                role_id = %item.assignment.role_id,
                reason = %item.reason,
                "skipping desired assignment"
            );
            summary.push(AssignmentAction::Skipped {
                key: Some(item.assignment.key()),
                role_id: Some(item.assignment.role_id.clone()),
                reason: item.reason.clone(),
            });
        }
        for record in &plan.unchanged {
            summary.push(AssignmentAction::Unchanged {
                key: record.key(),
                role_id: record.role_id.clone(),
            });
        }

        // Keys already handled this pass; a key that somehow appears in more
        // than one chunk's scope is reconciled exactly once.
        let mut processed: HashSet<AssignmentKey> = HashSet::new();

        // Phase 1: deletes. Fully joined before any create/update goes out,
        // so the authority never sees a second grant for a held slot. A
        // full-removal pass (empty desired set) is exactly this phase.
        let deletes: Vec<Operation> = plan.to_delete.into_iter().map(Operation::Delete).collect();
        self.run_phase(contact_id, company_contact_id, deletes, &mut processed, &mut summary)
            .await?;

        // Phase 2: creates and updates.
        if !summary.cancelled {
            let mut applies: Vec<Operation> =
                plan.to_create.into_iter().map(Operation::Create).collect();
            applies.extend(plan.to_update.into_iter().map(Operation::Update));
            self.run_phase(contact_id, company_contact_id, applies, &mut processed, &mut summary)
                .await?;
        }

        summary.finished_at = now_rfc3339();
        info!(
            contact_id,
            company_id,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    fn resolve_roles(
        &self,
        existing: &[LedgerRecord],
        desired: &[DesiredAssignment],
    ) -> Result<HashMap<String, crate::catalog::Role>, ReconcileError> {
        let ids: BTreeSet<String> = desired
            .iter()
            .map(|a| a.role_id.clone())
            .chain(existing.iter().map(|r| r.role_id.clone()))
            .collect();
        Ok(self.catalog.get_roles(&ids)?)
    }

    fn pass_lock(&self, contact_id: &str, company_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .pass_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if locks.len() >= MAX_TRACKED_PASS_LOCKS {
            // Entries with no holder or waiter are safe to drop.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Arc::clone(
            locks
                .entry((contact_id.to_string(), company_id.to_string()))
                .or_default(),
        )
    }

    /// Runs one phase of operations: sequential chunks, concurrent within a
    /// chunk, every chunk fully joined before the next starts.
    async fn run_phase(
        &self,
        contact_id: &str,
        company_contact_id: &str,
        operations: Vec<Operation>,
        processed: &mut HashSet<AssignmentKey>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError> {
        let chunk_size = self.config.chunk_size.max(1);

        for chunk in operations.chunks(chunk_size) {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!(contact_id, "cancellation requested, suppressing remaining work");
                summary.cancelled = true;
                return Ok(());
            }

            let mut handles = Vec::with_capacity(chunk.len());
            for operation in chunk {
                let key = operation.key();
                if !processed.insert(key.clone()) {
                    warn!(contact_id, key = %key, "key already reconciled this pass");
                    summary.push(AssignmentAction::Skipped {
                        key: Some(key),
                        role_id: None,
                        reason: SkipReason::DuplicateKey,
                    });
                    continue;
                }

                let ctx = OpContext {
                    ledger: Arc::clone(&self.ledger),
                    authority: Arc::clone(&self.authority),
                    retry: self.config.retry.clone(),
                    contact_id: contact_id.to_string(),
                    company_contact_id: company_contact_id.to_string(),
                };
                let operation = operation.clone();
                handles.push(tokio::spawn(async move { operation.execute(ctx).await }));
            }

            // Join barrier: a chunk completes in full — success or failure
            // recorded per task — before the next chunk is dispatched.
            let mut fatal: Option<ReconcileError> = None;
            for joined in futures::future::join_all(handles).await {
                match joined {
                    Ok(Ok(action)) => summary.push(action),
                    Ok(Err(err)) => {
                        if fatal.is_none() {
                            fatal = Some(ReconcileError::Ledger(err));
                        }
                    },
                    Err(err) => {
                        if fatal.is_none() {
                            fatal = Some(ReconcileError::Internal(err.to_string()));
                        }
                    },
                }
            }
            if let Some(err) = fatal {
                return Err(err);
            }
        }

        Ok(())
    }
}

/// Execution context cloned into each spawned operation task.
struct OpContext {
    ledger: Arc<dyn AssignmentLedger>,
    authority: Arc<dyn AuthoritySyncClient>,
    retry: RetryPolicy,
    // Ledger key for the contact.
    contact_id: String,
    // The contact's membership handle within the company; what the
    // authority system keys grants and revokes by.
    company_contact_id: String,
}

/// One unit of reconciliation work.
#[derive(Debug, Clone)]
enum Operation {
    Delete(LedgerRecord),
    Create(PlannedCreate),
    Update(PlannedUpdate),
}

impl Operation {
    fn key(&self) -> AssignmentKey {
        match self {
            Self::Delete(record) => record.key(),
            Self::Create(planned) => planned.key(),
            Self::Update(planned) => planned.key(),
        }
    }

    /// Executes the operation. Remote failures become per-item
    /// [`AssignmentAction::Failed`]; ledger failures (other than a
    /// duplicate-key race on create) are returned as fatal.
    async fn execute(self, ctx: OpContext) -> Result<AssignmentAction, LedgerError> {
        match self {
            Self::Delete(record) => execute_delete(&ctx, record).await,
            Self::Create(planned) => execute_create(&ctx, planned).await,
            Self::Update(planned) => execute_update(&ctx, planned).await,
        }
    }
}

async fn execute_delete(
    ctx: &OpContext,
    record: LedgerRecord,
) -> Result<AssignmentAction, LedgerError> {
    let key = record.key();

    if let Some(external_ref) = &record.external_ref {
        let revoked = with_retry(&ctx.retry, "revoke", || {
            ctx.authority.revoke(&ctx.company_contact_id, external_ref)
        })
        .await;

        if let Err(err) = revoked {
            // The ledger record stays; the next pass sees it and retries.
            warn!(key = %key, error = %err, "revoke failed, keeping ledger record");
            return Ok(AssignmentAction::Failed {
                key,
                operation: "revoke".to_string(),
                error: err.to_string(),
            });
        }
    }

    ctx.ledger.delete(record.id)?;
    debug!(key = %key, "assignment deleted");
    Ok(AssignmentAction::Deleted {
        key,
        role_id: record.role_id,
    })
}

async fn execute_create(
    ctx: &OpContext,
    planned: PlannedCreate,
) -> Result<AssignmentAction, LedgerError> {
    let key = planned.key();

    // Admin-scope roles are company-wide bookkeeping: no remote grant.
    let external_ref = if planned.role.is_admin_scope {
        None
    } else {
        let granted = with_retry(&ctx.retry, "grant", || {
            ctx.authority.grant(
                &ctx.company_contact_id,
                planned.assignment.location_id.as_deref(),
                &planned.role.name,
            )
        })
        .await;

        match granted {
            Ok(reference) => Some(reference),
            Err(err) => {
                warn!(key = %key, error = %err, "grant failed, assignment not created");
                return Ok(AssignmentAction::Failed {
                    key,
                    operation: "grant".to_string(),
                    error: err.to_string(),
                });
            },
        }
    };

    let created = ctx.ledger.create(NewLedgerRecord {
        contact_id: ctx.contact_id.clone(),
        company_id: planned.assignment.company_id.clone(),
        location_id: planned.assignment.location_id.clone(),
        role_id: planned.role.id.clone(),
        external_ref,
    });

    match created {
        Ok(record) => {
            debug!(key = %key, "assignment created");
            Ok(AssignmentAction::Created {
                key,
                role_id: record.role_id,
                external_ref: record.external_ref,
            })
        },
        Err(LedgerError::DuplicateKey { .. }) => {
            warn!(key = %key, "slot already occupied, create dropped");
            Ok(AssignmentAction::Failed {
                key,
                operation: "create".to_string(),
                error: "slot already occupied in ledger".to_string(),
            })
        },
        Err(err) => Err(err),
    }
}

async fn execute_update(
    ctx: &OpContext,
    planned: PlannedUpdate,
) -> Result<AssignmentAction, LedgerError> {
    let key = planned.key();
    let record = &planned.record;
    let old_role_id = record.role_id.clone();

    // The old grant must be gone before the new one is issued; the
    // authority rejects a second grant for a held slot.
    if let Some(external_ref) = &record.external_ref {
        let revoked = with_retry(&ctx.retry, "revoke", || {
            ctx.authority.revoke(&ctx.company_contact_id, external_ref)
        })
        .await;

        if let Err(err) = revoked {
            warn!(key = %key, error = %err, "revoke failed, update abandoned");
            return Ok(AssignmentAction::Failed {
                key,
                operation: "revoke".to_string(),
                error: err.to_string(),
            });
        }

        // The old reference is dead either way; record that before
        // attempting the new grant, so a grant failure cannot leave a
        // revoked reference looking live.
        ctx.ledger.update(record.id, &old_role_id, None)?;
    }

    let external_ref = if planned.grant_needed() {
        let granted = with_retry(&ctx.retry, "grant", || {
            ctx.authority.grant(
                &ctx.company_contact_id,
                record.location_id.as_deref(),
                &planned.new_role.name,
            )
        })
        .await;

        match granted {
            Ok(reference) => Some(reference),
            Err(err) => {
                warn!(key = %key, error = %err, "grant failed, role change not applied");
                return Ok(AssignmentAction::Failed {
                    key,
                    operation: "grant".to_string(),
                    error: err.to_string(),
                });
            },
        }
    } else {
        None
    };

    ctx.ledger
        .update(record.id, &planned.new_role.id, external_ref.as_deref())?;
    debug!(key = %key, old_role = %old_role_id, new_role = %planned.new_role.id, "assignment updated");
    Ok(AssignmentAction::Updated {
        key,
        old_role_id,
        new_role_id: planned.new_role.id.clone(),
        external_ref,
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
